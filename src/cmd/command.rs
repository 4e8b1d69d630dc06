use crate::io_models::context::AbortHandle;
use std::io::{BufRead, BufReader, Error, ErrorKind};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use timeout_readwrite::TimeoutReader;

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("Error while executing command")]
    ExecutionError(#[from] Error),

    #[error("Command terminated with a non success exit status code: {0}")]
    ExitStatusError(ExitStatus),

    #[error("Command killed due to timeout: {0}")]
    TimeoutError(String),

    #[error("Command killed by user request: {0}")]
    Killed(String),
}

#[derive(Debug, Clone)]
pub enum AbortReason {
    Timeout(Duration),
    Canceled,
}

impl AbortReason {
    pub fn is_cancel(&self) -> bool {
        matches!(self, AbortReason::Canceled)
    }
}

/// Decides when a running command must die: a deadline, the invocation's
/// abort handle, or both. Owned and cheap to build, one per command run;
/// the same handle that cancels the whole plan cancels its child processes.
pub struct CommandKiller {
    deadline: Option<(Instant, Duration)>,
    abort: Option<AbortHandle>,
}

impl CommandKiller {
    pub fn never() -> CommandKiller {
        CommandKiller {
            deadline: None,
            abort: None,
        }
    }

    pub fn from_timeout(timeout: Duration) -> CommandKiller {
        CommandKiller {
            deadline: Some((Instant::now(), timeout)),
            abort: None,
        }
    }

    pub fn from_abort(abort: AbortHandle) -> CommandKiller {
        CommandKiller {
            deadline: None,
            abort: Some(abort),
        }
    }

    pub fn from(timeout: Duration, abort: AbortHandle) -> CommandKiller {
        CommandKiller {
            deadline: Some((Instant::now(), timeout)),
            abort: Some(abort),
        }
    }

    pub fn should_abort(&self) -> Option<AbortReason> {
        if let Some((started, timeout)) = self.deadline {
            if started.elapsed() >= timeout {
                return Some(AbortReason::Timeout(timeout));
            }
        }
        if let Some(abort) = &self.abort {
            if abort.is_cancel_requested() {
                return Some(AbortReason::Canceled);
            }
        }

        None
    }
}

// How long the stdout pump blocks before re-checking the killer.
const STDOUT_READ_TIMEOUT: Duration = Duration::from_secs(1);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(120);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One external tool invocation with streamed output and cooperative
/// cancellation. The wrappers in this module (docker, helm, kind, k3d,
/// talosctl, vcluster) all funnel through it.
pub struct KsailCommand {
    command: Command,
    kill_grace_period: Duration,
}

impl KsailCommand {
    pub fn new<P: AsRef<Path>>(binary: P, args: &[&str], envs: &[(&str, &str)]) -> KsailCommand {
        let mut command = Command::new(binary.as_ref().as_os_str());
        command.args(args);
        for (k, v) in envs {
            command.env(k, v);
        }

        KsailCommand {
            command,
            kill_grace_period: Duration::from_secs(60),
        }
    }

    pub fn set_kill_grace_period(&mut self, grace_period: Duration) {
        self.kill_grace_period = grace_period;
    }

    /// Runs the command, streaming stdout and stderr line by line, until it
    /// exits or the killer fires. Stderr drains on its own scoped thread so a
    /// chatty tool cannot fill the pipe while stdout is being pumped.
    pub fn exec_with_abort<STDOUT, STDERR>(
        &mut self,
        stdout_output: &mut STDOUT,
        stderr_output: &mut STDERR,
        abort_notifier: &CommandKiller,
    ) -> Result<(), CommandError>
    where
        STDOUT: FnMut(String),
        STDERR: FnMut(String) + Send,
    {
        info!("command: {:?}", self.command);
        let mut child = self
            .command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::new(ErrorKind::BrokenPipe, "Cannot get stdout for command"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::new(ErrorKind::BrokenPipe, "Cannot get stderr for command"))?;

        thread::scope(|scope| {
            scope.spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    stderr_output(line);
                }
            });

            // Pump stdout until it closes, re-checking the killer between
            // reads. Killing the child also closes the stderr pipe, which
            // unblocks the drain thread before the scope ends.
            let mut reader = BufReader::new(TimeoutReader::new(stdout, STDOUT_READ_TIMEOUT)).lines();
            let mut last_heartbeat = Instant::now();
            loop {
                if let Some(reason) = abort_notifier.should_abort() {
                    return Err(self.kill_for(&mut child, reason));
                }

                match reader.next() {
                    None => break,
                    Some(Ok(line)) => stdout_output(line),
                    Some(Err(ref err)) if err.kind() == ErrorKind::TimedOut => {
                        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                            info!("command still running, no output yet: {:?}", self.command);
                            last_heartbeat = Instant::now();
                        }
                    }
                    Some(Err(err)) => {
                        warn!("error on stdout of cmd {:?}: {:?}", self.command, err);
                        break;
                    }
                }
            }

            // Stdout is closed, wait for the exit status.
            loop {
                match child.try_wait() {
                    Ok(Some(exit_status)) => {
                        return if exit_status.success() {
                            Ok(())
                        } else {
                            debug!("command: {:?} terminated with {:?}", self.command, exit_status);
                            Err(CommandError::ExitStatusError(exit_status))
                        };
                    }
                    Ok(None) => {
                        if let Some(reason) = abort_notifier.should_abort() {
                            return Err(self.kill_for(&mut child, reason));
                        }
                        thread::sleep(EXIT_POLL_INTERVAL);
                    }
                    Err(err) => return Err(CommandError::ExecutionError(err)),
                }
            }
        })
    }

    /// Asks the child to shut down with SIGINT, escalating to SIGKILL once
    /// the grace period is over, and maps the abort reason to the matching
    /// error.
    fn kill_for(&self, child: &mut Child, reason: AbortReason) -> CommandError {
        let msg = format!("Killing process {:?} due to {:?}", self.command, reason);
        warn!("{}", msg);

        unsafe {
            let pid = child.id() as i32;
            let _ = libc::kill(pid, libc::SIGINT);
        }

        let killed_since = Instant::now();
        while let Ok(None) = child.try_wait() {
            if killed_since.elapsed() > self.kill_grace_period {
                info!("command still running after grace period, hard killing it");
                let _ = child.kill();
            }
            thread::sleep(Duration::from_millis(500));
        }
        let _ = child.wait();

        if reason.is_cancel() {
            CommandError::Killed(msg)
        } else {
            CommandError::TimeoutError(msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_models::context::AbortHandle;
    use std::time::{Duration, Instant};

    #[test]
    fn test_streams_stdout_and_stderr() {
        // setup:
        let mut cmd = KsailCommand::new("sh", &["-c", "echo to-stdout; echo to-stderr 1>&2"], &[]);
        let mut stdout_lines = vec![];
        let mut stderr_lines = vec![];

        // execute:
        let ret = cmd.exec_with_abort(
            &mut |line| stdout_lines.push(line),
            &mut |line| stderr_lines.push(line),
            &CommandKiller::never(),
        );

        // verify:
        assert!(ret.is_ok());
        assert_eq!(vec!["to-stdout".to_string()], stdout_lines);
        assert_eq!(vec!["to-stderr".to_string()], stderr_lines);
    }

    #[test]
    fn test_non_zero_exit_status_is_an_error() {
        let mut cmd = KsailCommand::new("false", &[], &[]);
        let ret = cmd.exec_with_abort(&mut |_| {}, &mut |_| {}, &CommandKiller::never());

        assert!(matches!(ret, Err(CommandError::ExitStatusError(_))));
    }

    #[test]
    fn test_timeout_kills_the_command() {
        // setup:
        let mut cmd = KsailCommand::new("sleep", &["120"], &[]);
        cmd.set_kill_grace_period(Duration::from_secs(2));
        let started = Instant::now();

        // execute:
        let ret = cmd.exec_with_abort(
            &mut |_| {},
            &mut |_| {},
            &CommandKiller::from_timeout(Duration::from_secs(1)),
        );

        // verify: killed well before the sleep would have finished
        assert!(matches!(ret, Err(CommandError::TimeoutError(_))));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_abort_handle_cancels_the_command() {
        // setup: the invocation-level handle is cancelled from another thread
        let abort = AbortHandle::new();
        let canceller = abort.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(1));
            canceller.cancel();
        });

        let mut cmd = KsailCommand::new("sleep", &["120"], &[]);
        cmd.set_kill_grace_period(Duration::from_secs(2));

        // execute:
        let ret = cmd.exec_with_abort(&mut |_| {}, &mut |_| {}, &CommandKiller::from_abort(abort));

        // verify:
        assert!(matches!(ret, Err(CommandError::Killed(_))));
    }

    #[test]
    fn test_killer_reports_cancel_before_timeout() {
        // setup:
        let abort = AbortHandle::new();
        abort.cancel();
        let killer = CommandKiller::from(Duration::from_secs(600), abort);

        // execute & verify: cancellation is visible without waiting for the deadline
        assert!(matches!(killer.should_abort(), Some(AbortReason::Canceled)));
    }
}
