//! Swarm Orchestrator (C9, spec.md §4.5): DAG-scheduled agent execution
//! with assigned/autonomous/synthesis modes, per-edge payload inclusion,
//! conditional skipping, and resume/cancel semantics.

pub mod autonomous;
pub mod builder;
pub mod condition;
pub mod dag;
pub mod orchestrator;
pub mod runner;
pub mod summarize;

pub use builder::{build_swarm, AgentSpec, AutonomousSpec, DependsOnSpec, SwarmSpec};
pub use dag::{critical_path, detect_cycle, levels, DagNode};
pub use orchestrator::{OrchestratorConfig, SwarmOrchestrator};
pub use runner::{drive_turn, ordered_blocks, spawn_turn, TurnOutcome};
