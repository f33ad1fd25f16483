//! ---
//! upkeep_section: "03-history-logging"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Task classification and update history."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use crate::event::EventRecord;
use crate::Result;

/// Counters published by the updater.
#[derive(Clone)]
pub struct UpdaterMetrics {
    commands_sent: IntCounterVec,
    history_events: IntCounterVec,
    host_restarts: IntCounter,
    #[allow(dead_code)]
    registry: Arc<Registry>,
}

impl UpdaterMetrics {
    /// Register all updater metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let commands_sent = IntCounterVec::new(
            Opts::new(
                "upkeep_commands_sent_total",
                "Total number of commands handed to the update engine",
            ),
            &["command"],
        )?;
        registry.register(Box::new(commands_sent.clone()))?;

        let history_events = IntCounterVec::new(
            Opts::new(
                "upkeep_history_events_total",
                "Total number of update history records appended",
            ),
            &["type"],
        )?;
        registry.register(Box::new(history_events.clone()))?;

        let host_restarts = IntCounter::with_opts(Opts::new(
            "upkeep_host_restarts_total",
            "Total number of host transitions that scheduled a restart",
        ))?;
        registry.register(Box::new(host_restarts.clone()))?;

        Ok(Self {
            commands_sent,
            history_events,
            host_restarts,
            registry,
        })
    }

    /// Count a command handed to the engine.
    pub fn record_command(&self, command: &str) {
        self.commands_sent.with_label_values(&[command]).inc();
    }

    /// Count a history record.
    pub fn record_event(&self, event: &EventRecord) {
        self.history_events.with_label_values(&[event.kind()]).inc();
    }

    /// Count a scheduled host restart.
    pub fn record_restart(&self) {
        self.host_restarts.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn counters_register_and_increment() {
        let registry = Arc::new(Registry::new());
        let metrics = UpdaterMetrics::new(registry.clone()).unwrap();
        metrics.record_command("Repair");
        metrics.record_command("Repair");
        metrics.record_event(&EventRecord::DownloadingModule {
            name: "host".into(),
            timestamp: Utc::now(),
        });
        metrics.record_restart();

        let families = registry.gather();
        let commands = families
            .iter()
            .find(|family| family.get_name() == "upkeep_commands_sent_total")
            .unwrap();
        assert_eq!(commands.get_metric()[0].get_counter().get_value(), 2.0);
        assert_eq!(families.len(), 3);
    }

    #[test]
    fn double_registration_fails() {
        let registry = Arc::new(Registry::new());
        UpdaterMetrics::new(registry.clone()).unwrap();
        assert!(UpdaterMetrics::new(registry).is_err());
    }
}
