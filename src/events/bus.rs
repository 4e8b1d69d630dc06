use crate::events::EngineEvent;
use crate::logger::Logger;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default capacity of the event bus queue.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 100;

/// EventBus: multi-producer bounded queue of engine events. Any component may
/// publish through its `Logger` implementation; the single UI adapter drains
/// it. On overflow, droppable events (`Activity`) are evicted first; `Error`
/// and `StageEnd` events are never dropped so the stage nesting invariant
/// survives backpressure.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<VecDeque<EngineEvent>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        EventBus {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn publish(&self, event: EngineEvent) {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if queue.len() >= self.capacity {
            if let Some(pos) = queue.iter().position(|ev| ev.is_droppable()) {
                queue.remove(pos);
            } else if event.is_droppable() {
                // Queue is full of non-droppable events, shed the incoming one.
                return;
            }
            // Non-droppable event against a full queue of non-droppable events:
            // the queue grows past capacity rather than losing it.
        }

        queue.push_back(event);
    }

    /// Removes and returns all queued events, preserving publish order.
    pub fn drain(&self) -> Vec<EngineEvent> {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

impl Logger for EventBus {
    fn log(&self, event: EngineEvent) {
        self.publish(event);
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
    use std::time::Duration;

    fn details() -> EventDetails {
        EventDetails::new(
            None,
            KsailIdentifier::from("bus-test"),
            "exec-1".to_string(),
            Stage::Infrastructure(InfrastructureStep::CreateCluster),
            Transmitter::Orchestrator("orchestrator".to_string()),
        )
    }

    fn activity(i: usize) -> EngineEvent {
        EngineEvent::Activity(details(), EventMessage::new_from_safe(format!("activity {i}")))
    }

    fn stage_end(i: usize) -> EngineEvent {
        EngineEvent::StageEnd(
            details(),
            EventMessage::new_from_safe(format!("stage {i}")),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_overflow_drops_activity_first() {
        // setup:
        let bus = EventBus::new(3);
        bus.publish(activity(0));
        bus.publish(stage_end(1));
        bus.publish(activity(2));

        // execute: queue is full, push a critical event
        bus.publish(stage_end(3));

        // verify: oldest activity evicted, both stage ends kept
        let events = bus.drain();
        assert_eq!(3, events.len());
        let stage_ends = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::StageEnd(_, _, _)))
            .count();
        assert_eq!(2, stage_ends);
    }

    #[test]
    fn test_overflow_never_drops_critical_events() {
        // setup: fill the bus with critical events only
        let bus = EventBus::new(2);
        bus.publish(stage_end(0));
        bus.publish(stage_end(1));

        // execute:
        bus.publish(stage_end(2));
        bus.publish(activity(3));

        // verify: all three stage ends survive, the activity was shed
        let events = bus.drain();
        assert_eq!(3, events.len());
        assert!(events.iter().all(|e| matches!(e, EngineEvent::StageEnd(_, _, _))));
    }

    #[test]
    fn test_drain_preserves_order() {
        // setup:
        let bus = EventBus::default();
        bus.publish(stage_end(0));
        bus.publish(stage_end(1));

        // execute:
        let events = bus.drain();

        // verify:
        assert_eq!(2, events.len());
        assert!(bus.is_empty());
        assert!(events[0].message(crate::events::EventMessageVerbosity::SafeOnly).contains("stage 0"));
    }
}
