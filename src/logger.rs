use crate::events::{EngineEvent, EngineEventKind, EventMessageVerbosity};

/// Installs the process-wide tracing subscriber backing `StdIoLogger`:
/// JSON lines for machine consumers, compact lines otherwise. Subsequent
/// calls are no-ops.
pub fn init_logger(json_output: bool) {
    if json_output {
        let _ = tracing_subscriber::fmt().json().try_init();
    } else {
        let _ = tracing_subscriber::fmt().compact().try_init();
    }
}

pub trait Logger: Send + Sync {
    fn log(&self, event: EngineEvent);
    fn clone_dyn(&self) -> Box<dyn Logger>;
}

impl Clone for Box<dyn Logger> {
    fn clone(&self) -> Self {
        self.clone_dyn()
    }
}

/// Logger backed by the tracing subscriber, used when no UI adapter is
/// attached (tests, headless runs).
#[derive(Clone)]
pub struct StdIoLogger {}

impl StdIoLogger {
    pub fn new() -> StdIoLogger {
        StdIoLogger {}
    }
}

impl Default for StdIoLogger {
    fn default() -> Self {
        StdIoLogger::new()
    }
}

impl Logger for StdIoLogger {
    fn log(&self, event: EngineEvent) {
        let details = event.get_details();
        let message = event.message(EventMessageVerbosity::FullDetailsWithoutEnvVars);

        tracing::span!(
            tracing::Level::INFO,
            "",
            cluster = details.cluster().to_string().as_str(),
            execution_id = details.execution_id(),
            stage = details.stage().sub_step_name().as_str(),
            transmitter = details.transmitter().to_string().as_str(),
        )
        .in_scope(|| match event.kind() {
            EngineEventKind::Activity => debug!("{}", message),
            EngineEventKind::Warning => warn!("{}", message),
            EngineEventKind::Error => error!("{}", message),
            _ => info!("{}", message),
        });
    }

    fn clone_dyn(&self) -> Box<dyn Logger> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDetails, EventMessage, InfrastructureStep, Stage, Transmitter};
    use crate::io_models::KsailIdentifier;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_stdio_logger_forwards_events_to_tracing() {
        // setup:
        let logger = StdIoLogger::new();
        let details = EventDetails::new(
            None,
            KsailIdentifier::from("logger-test"),
            "exec-1".to_string(),
            Stage::Infrastructure(InfrastructureStep::CreateCluster),
            Transmitter::Orchestrator("orchestrator".to_string()),
        );

        // execute:
        logger.log(EngineEvent::Info(
            details,
            EventMessage::new_from_safe("hello from the engine".to_string()),
        ));

        // verify:
        assert!(logs_contain("hello from the engine"));
    }
}
