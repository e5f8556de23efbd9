//! Backend factory
//!
//! Picks the adapter for a runner's [`BackendKind`] and hands it out as a
//! shared [`DebugBackendRef`].

use crate::dap::DapBackend;
use crate::mi::MiBackend;
use cairn_config::{BackendKind, ConnectionConfig, RunnerConfig};
use cairn_ports::DebugBackendRef;
use std::sync::Arc;
use tracing::debug;

pub struct BackendFactory {
    connection: ConnectionConfig,
}

impl BackendFactory {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self { connection }
    }

    /// Unattached backend for `runner`. Call `attach` on it to connect.
    pub fn create(&self, runner: &RunnerConfig) -> DebugBackendRef {
        create_backend(runner, &self.connection)
    }
}

pub fn create_backend(runner: &RunnerConfig, connection: &ConnectionConfig) -> DebugBackendRef {
    debug!(backend = ?runner.backend, "Creating backend");
    match runner.backend {
        BackendKind::Dap => Arc::new(DapBackend::new(connection.clone())),
        BackendKind::Mi => Arc::new(MiBackend::new(connection.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_picks_adapter_by_kind() {
        let factory = BackendFactory::new(ConnectionConfig::default());
        let dap = factory.create(&RunnerConfig::attach(BackendKind::Dap, "127.0.0.1", 9229));
        let mi = factory.create(&RunnerConfig::attach(BackendKind::Mi, "127.0.0.1", 2345));
        assert_eq!(dap.name(), "dap");
        assert_eq!(mi.name(), "mi");
        assert!(!mi.features().exception_breaks);
    }
}
