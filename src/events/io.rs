use crate::errors::ErrorMessageVerbosity;
use crate::events;
use crate::events::EventMessageVerbosity;
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};

#[derive(Deserialize, Serialize)]
/// EngineEvent: wire representation of an engine event, consumed by UI
/// adapters rendering JSON streams.
pub struct EngineEvent {
    pub r#type: String,
    pub timestamp: DateTime<Utc>,
    pub details: EventDetails,
    pub message: EventMessage,
    pub task_name: Option<String>,
    pub elapsed_seconds: Option<u64>,
}

impl From<events::EngineEvent> for EngineEvent {
    fn from(event: events::EngineEvent) -> Self {
        let timestamp = Utc::now();
        let r#type = match event.kind() {
            events::EngineEventKind::Title => "title",
            events::EngineEventKind::Activity => "activity",
            events::EngineEventKind::Info => "info",
            events::EngineEventKind::Success => "success",
            events::EngineEventKind::Warning => "warning",
            events::EngineEventKind::Error => "error",
            events::EngineEventKind::StageStart => "stage-start",
            events::EngineEventKind::StageEnd => "stage-end",
            events::EngineEventKind::TaskStart => "task-start",
            events::EngineEventKind::TaskEnd => "task-end",
        }
        .to_string();

        let task_name = match &event {
            events::EngineEvent::TaskStart(_, name) | events::EngineEvent::TaskEnd(_, name, _) => Some(name.clone()),
            _ => None,
        };

        let message = match &event {
            events::EngineEvent::Error(engine_error, _) => EventMessage {
                safe_message: engine_error.message(ErrorMessageVerbosity::SafeOnly),
                full_details: Some(engine_error.message(ErrorMessageVerbosity::FullDetailsWithoutEnvVars)),
            },
            _ => EventMessage {
                safe_message: event.message(EventMessageVerbosity::SafeOnly),
                full_details: Some(event.message(EventMessageVerbosity::FullDetailsWithoutEnvVars)),
            },
        };

        EngineEvent {
            r#type,
            timestamp,
            details: EventDetails::from(event.get_details().clone()),
            message,
            task_name,
            elapsed_seconds: event.elapsed().map(|e| e.as_secs()),
        }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub struct EventMessage {
    pub safe_message: String,
    pub full_details: Option<String>,
}

#[derive(Deserialize, Serialize)]
pub struct EventDetails {
    pub provider_kind: Option<String>,
    pub cluster: String,
    pub execution_id: String,
    pub stage: String,
    pub step: String,
    pub transmitter: String,
}

impl From<events::EventDetails> for EventDetails {
    fn from(details: events::EventDetails) -> Self {
        EventDetails {
            provider_kind: details.provider_kind().map(|k| k.to_string()),
            cluster: details.cluster().to_string(),
            execution_id: details.execution_id().to_string(),
            stage: details.stage().to_string(),
            step: details.stage().sub_step_name(),
            transmitter: details.transmitter().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventMessage as DomainEventMessage, InfrastructureStep, Stage, Transmitter};
    use crate::io_models::KsailIdentifier;

    #[test]
    fn test_engine_event_io_roundtrip() {
        // setup:
        let details = events::EventDetails::new(
            None,
            KsailIdentifier::from("demo"),
            "exec-42".to_string(),
            Stage::Infrastructure(InfrastructureStep::CreateCluster),
            Transmitter::Provisioner("kind".to_string()),
        );
        let event = events::EngineEvent::Info(details, DomainEventMessage::new_from_safe("hello".to_string()));

        // execute:
        let io_event = EngineEvent::from(event);
        let json = serde_json::to_string(&io_event).expect("serializable event");

        // verify:
        assert!(json.contains("\"type\":\"info\""));
        assert!(json.contains("\"step\":\"create-cluster\""));
        assert!(json.contains("hello"));
    }
}
