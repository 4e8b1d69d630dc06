use once_cell::sync::Lazy;
use std::fs::File;
use std::io::{Error, Read};
use std::os::fd::FromRawFd;
use std::sync::Mutex;
use std::thread;

// Some wrapped tools (k3d list being the known offender) write directly to the
// process stdout instead of the handle we give them. Capturing requires
// redirecting fd 1 to a pipe, which is process-global state: one lock
// serializes every capture, making the wrapped operation effectively
// serialized per process.
static STDOUT_REDIRECT_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Runs `f` with the process stdout redirected to a pipe and returns `f`'s
/// result along with everything written to stdout meanwhile. The original
/// stdout is restored on all exit paths, including panics inside `f`.
pub fn with_captured_stdout<T>(f: impl FnOnce() -> T) -> Result<(T, String), Error> {
    let _guard = STDOUT_REDIRECT_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    unsafe {
        let stdout_fd = libc::STDOUT_FILENO;
        let saved_fd = libc::dup(stdout_fd);
        if saved_fd < 0 {
            return Err(Error::last_os_error());
        }

        let mut pipe_fds = [0i32; 2];
        if libc::pipe(pipe_fds.as_mut_ptr()) != 0 {
            let err = Error::last_os_error();
            libc::close(saved_fd);
            return Err(err);
        }
        let (read_fd, write_fd) = (pipe_fds[0], pipe_fds[1]);

        if libc::dup2(write_fd, stdout_fd) < 0 {
            let err = Error::last_os_error();
            libc::close(saved_fd);
            libc::close(read_fd);
            libc::close(write_fd);
            return Err(err);
        }
        // stdout_fd now owns the pipe write side.
        libc::close(write_fd);

        // Restoring fd 1 closes the pipe write side, which unblocks the reader.
        let restore = scopeguard::guard(saved_fd, |saved_fd| {
            libc::dup2(saved_fd, stdout_fd);
            libc::close(saved_fd);
        });

        // Drain the pipe from another thread: a single-threaded read after f()
        // would deadlock once the pipe buffer fills up.
        let mut reader = File::from_raw_fd(read_fd);
        let reader_handle = thread::spawn(move || {
            let mut captured = String::new();
            let _ = reader.read_to_string(&mut captured);
            captured
        });

        let result = f();

        drop(restore);
        let captured = reader_handle.join().unwrap_or_default();

        Ok((result, captured))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_direct_stdout_writes() {
        // setup & execute:
        let (ret, captured) = with_captured_stdout(|| {
            println!("raw line from a wrapped tool");
            42
        })
        .expect("capture must succeed");

        // verify:
        assert_eq!(42, ret);
        assert!(captured.contains("raw line from a wrapped tool"));
    }

    #[test]
    fn test_consecutive_captures_do_not_mix() {
        let (_, first) = with_captured_stdout(|| println!("first")).unwrap();
        let (_, second) = with_captured_stdout(|| println!("second")).unwrap();

        assert!(first.contains("first") && !first.contains("second"));
        assert!(second.contains("second") && !second.contains("first"));
    }
}
