//! Top-level handle the gateway bin constructs once at startup and clones
//! per inbound connection (spec.md §4.1). Owns nothing connection-local;
//! see [`crate::connection::Connection`] for that.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use rl_sandbox::SandboxSupervisor;
use rl_store::StoreGateway;
use rl_transport::config::AgentBackendConfig;

use crate::connection::{BrokerDeps, Connection, StimulusSink};
use crate::event_log::EventLogRegistry;
use crate::permission::MIN_PERMISSION_TIMEOUT;
use crate::wire::WireMessage;

pub struct Broker {
    deps: Arc<BrokerDeps>,
}

impl Broker {
    pub fn new(
        store: Arc<StoreGateway>,
        sandbox: Arc<SandboxSupervisor>,
        agent_backend: AgentBackendConfig,
        fallback_working_dir: PathBuf,
        max_event_log: usize,
        permission_timeout: Duration,
        stimulus_sink: Option<StimulusSink>,
    ) -> Self {
        Self {
            deps: Arc::new(BrokerDeps {
                store,
                sandbox,
                event_logs: Arc::new(EventLogRegistry::new(max_event_log)),
                agent_backend,
                fallback_working_dir,
                permission_timeout: permission_timeout.max(MIN_PERMISSION_TIMEOUT),
                stimulus_sink,
            }),
        }
    }

    /// Bind a new client connection: returns the [`Connection`] handle the
    /// caller dispatches `InboundMessage`s into, and the receiver half of
    /// its outbound [`WireMessage`] channel to forward over the wire
    /// (WebSocket send loop, owned by the gateway bin).
    pub fn accept(&self) -> (Arc<Connection>, mpsc::UnboundedReceiver<WireMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(self.deps.clone(), tx), rx)
    }
}
