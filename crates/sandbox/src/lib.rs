pub mod entry;
pub mod supervisor;

pub use entry::{RunConfig, SandboxEntry};
pub use supervisor::{SandboxOutcome, SandboxSupervisor, MIN_IDLE_TIMEOUT, MIN_TICK_INTERVAL};
