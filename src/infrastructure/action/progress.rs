use crate::errors::EngineError;
use crate::events::Stage::Infrastructure;
use crate::events::{EngineEvent, EventDetails, EventMessage, InfrastructureStep};
use crate::infrastructure::action::{InfraLogger, InfraLoggerImpl};
use crate::io_models::context::AbortHandle;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

/// Upper bound of workers a progress group spawns.
const MAX_GROUP_WORKERS: usize = 4;

/// One unit of work inside a stage. The closure receives the group abort
/// handle and must poll it at its suspension points.
pub struct ProgressTask<'a> {
    pub name: String,
    pub run: Box<dyn FnOnce(&AbortHandle) -> Result<(), Box<EngineError>> + Send + 'a>,
}

impl<'a> ProgressTask<'a> {
    pub fn new(
        name: String,
        run: impl FnOnce(&AbortHandle) -> Result<(), Box<EngineError>> + Send + 'a,
    ) -> Self {
        ProgressTask {
            name,
            run: Box::new(run),
        }
    }
}

/// Runs a stage: emits StageStart, executes `f`, and always emits StageEnd
/// with the elapsed time so start/end events stay balanced even on failure.
pub fn run_stage<F>(
    logger: &InfraLoggerImpl,
    step: InfrastructureStep,
    title: &str,
    abort: &AbortHandle,
    f: F,
) -> Result<(), Box<EngineError>>
where
    F: FnOnce(&InfraLoggerImpl) -> Result<(), Box<EngineError>>,
{
    let stage_details = EventDetails::clone_changing_stage(logger.details().clone(), Infrastructure(step));
    let stage_logger = logger.with_details(stage_details.clone());

    if abort.is_cancel_requested() {
        return Err(Box::new(EngineError::new_task_cancellation_requested(stage_details)));
    }

    stage_logger.log_event(EngineEvent::StageStart(
        stage_details.clone(),
        EventMessage::new_from_safe(title.to_string()),
    ));
    let started = Instant::now();

    let ret = f(&stage_logger);

    stage_logger.log_event(EngineEvent::StageEnd(
        stage_details,
        EventMessage::new_from_safe(title.to_string()),
        started.elapsed(),
    ));

    ret
}

/// ProgressGroup: runs its tasks on bounded scoped workers against one
/// derived abort handle; the first error cancels every sibling, and no task
/// outlives the group.
pub struct ProgressGroup {
    max_workers: usize,
}

impl ProgressGroup {
    pub fn new() -> Self {
        ProgressGroup {
            max_workers: MAX_GROUP_WORKERS,
        }
    }

    pub fn with_max_workers(max_workers: usize) -> Self {
        ProgressGroup {
            max_workers: max_workers.max(1),
        }
    }

    pub fn run(
        &self,
        logger: &InfraLoggerImpl,
        abort: &AbortHandle,
        tasks: Vec<ProgressTask>,
    ) -> Result<(), Box<EngineError>> {
        if tasks.is_empty() {
            return Ok(());
        }

        let group_abort = abort.new_child();
        let workers = self.max_workers.min(tasks.len());
        let queue: Mutex<VecDeque<ProgressTask>> = Mutex::new(tasks.into());
        let first_error: Mutex<Option<Box<EngineError>>> = Mutex::new(None);

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    loop {
                        if group_abort.is_cancel_requested() {
                            break;
                        }

                        let task = match queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
                            Some(task) => task,
                            None => break,
                        };

                        logger.log_event(EngineEvent::TaskStart(logger.details().clone(), task.name.clone()));
                        let started = Instant::now();
                        let ret = (task.run)(&group_abort);
                        logger.log_event(EngineEvent::TaskEnd(
                            logger.details().clone(),
                            task.name.clone(),
                            started.elapsed(),
                        ));

                        if let Err(e) = ret {
                            let mut first_error = first_error.lock().unwrap_or_else(|e| e.into_inner());
                            if first_error.is_none() {
                                *first_error = Some(e);
                            }
                            // Fail fast: siblings observe the group handle.
                            group_abort.cancel();
                            break;
                        }
                    }
                });
            }
        });

        match first_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for ProgressGroup {
    fn default() -> Self {
        ProgressGroup::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EngineEventKind, Stage, Transmitter};
    use crate::events::bus::EventBus;
    use crate::io_models::KsailIdentifier;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn logger_with_bus() -> (InfraLoggerImpl, EventBus) {
        let bus = EventBus::default();
        let details = EventDetails::new(
            None,
            KsailIdentifier::from("progress-test"),
            "exec-1".to_string(),
            Stage::Infrastructure(InfrastructureStep::InstallInfrastructureComponents),
            Transmitter::Orchestrator("orchestrator".to_string()),
        );
        (InfraLoggerImpl::new(details, Box::new(bus.clone())), bus)
    }

    #[test]
    fn test_group_runs_all_tasks_and_balances_events() {
        // setup:
        let (logger, bus) = logger_with_bus();
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<ProgressTask> = (0..6)
            .map(|i| {
                let counter = counter.clone();
                ProgressTask::new(format!("task-{i}"), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        // execute:
        let ret = ProgressGroup::new().run(&logger, &AbortHandle::new(), tasks);

        // verify: all ran, every TaskStart has a matching TaskEnd
        assert!(ret.is_ok());
        assert_eq!(6, counter.load(Ordering::SeqCst));
        let events = bus.drain();
        let starts = events.iter().filter(|e| e.kind() == EngineEventKind::TaskStart).count();
        let ends = events.iter().filter(|e| e.kind() == EngineEventKind::TaskEnd).count();
        assert_eq!(6, starts);
        assert_eq!(6, ends);
    }

    #[test]
    fn test_group_fails_fast_and_cancels_siblings() {
        // setup: one failing task, many slow ones behind it
        let (logger, _bus) = logger_with_bus();
        let ran_after_failure = Arc::new(AtomicUsize::new(0));

        let mut tasks: Vec<ProgressTask> = vec![];
        tasks.push(ProgressTask::new("boom".to_string(), |abort| {
            let details = EventDetails::new(
                None,
                KsailIdentifier::from("progress-test"),
                "exec-1".to_string(),
                Stage::Infrastructure(InfrastructureStep::InstallInfrastructureComponents),
                Transmitter::Orchestrator("orchestrator".to_string()),
            );
            let _ = abort;
            Err(Box::new(EngineError::new_unknown(details, "boom".to_string(), None)))
        }));
        for i in 0..8 {
            let ran_after_failure = ran_after_failure.clone();
            tasks.push(ProgressTask::new(format!("slow-{i}"), move |abort| {
                thread::sleep(Duration::from_millis(50));
                if !abort.is_cancel_requested() {
                    ran_after_failure.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }));
        }

        // execute: single worker so the failing task runs first
        let ret = ProgressGroup::with_max_workers(1).run(&logger, &AbortHandle::new(), tasks);

        // verify: error surfaced, queued siblings never ran
        assert!(ret.is_err());
        assert_eq!(0, ran_after_failure.load(Ordering::SeqCst));
    }

    #[test]
    fn test_group_failure_does_not_cancel_invocation() {
        // setup:
        let (logger, _bus) = logger_with_bus();
        let global = AbortHandle::new();
        let tasks = vec![ProgressTask::new("boom".to_string(), |_| {
            let details = EventDetails::new(
                None,
                KsailIdentifier::from("progress-test"),
                "exec-1".to_string(),
                Stage::Infrastructure(InfrastructureStep::InstallInfrastructureComponents),
                Transmitter::Orchestrator("orchestrator".to_string()),
            );
            Err(Box::new(EngineError::new_unknown(details, "boom".to_string(), None)))
        })];

        // execute:
        let ret = ProgressGroup::new().run(&logger, &global, tasks);

        // verify: the invocation-level handle stays clean
        assert!(ret.is_err());
        assert!(!global.is_cancel_requested());
    }

    #[test]
    fn test_stage_events_are_balanced_even_on_failure() {
        // setup:
        let (logger, bus) = logger_with_bus();

        // execute:
        let ret = run_stage(
            &logger,
            InfrastructureStep::CreateCluster,
            "Create cluster",
            &AbortHandle::new(),
            |stage_logger| {
                stage_logger.info("working".into());
                Err(Box::new(EngineError::new_unknown(
                    stage_logger.details().clone(),
                    "stage failed".to_string(),
                    None,
                )))
            },
        );

        // verify: StageStart and StageEnd both emitted
        assert!(ret.is_err());
        let events = bus.drain();
        assert_eq!(
            1,
            events.iter().filter(|e| e.kind() == EngineEventKind::StageStart).count()
        );
        assert_eq!(
            1,
            events.iter().filter(|e| e.kind() == EngineEventKind::StageEnd).count()
        );
    }
}
