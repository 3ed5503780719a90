//! Per-machine connection status

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

/// Connection flags shared between the adapter and its sessions
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus {
    machines: Arc<DashMap<String, bool>>,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, machine: &str, connected: bool) {
        let previous = self.machines.insert(machine.to_string(), connected);
        if previous != Some(connected) {
            info!(
                "Machine {} {}",
                machine,
                if connected { "connected" } else { "disconnected" }
            );
        }
    }

    /// Unknown machines count as disconnected
    pub fn is_connected(&self, machine: &str) -> bool {
        self.machines.get(machine).is_some_and(|c| *c)
    }

    /// All machines sorted by name
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        let mut all: Vec<_> = self
            .machines
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        all.sort();
        all
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_shared_between_clones() {
        let status = ConnectionStatus::new();
        let view = status.clone();
        assert!(!view.is_connected("Press-1"));

        status.set("Press-1", true);
        status.set("Press-2", false);
        assert!(view.is_connected("Press-1"));
        assert_eq!(
            view.snapshot(),
            vec![("Press-1".to_string(), true), ("Press-2".to_string(), false)]
        );
    }
}
