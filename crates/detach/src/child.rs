//! Child-side half of a launch: detach, run the command, report back, exit.
//!
//! Everything here runs in the forked process. It must not return into the
//! parent's runtime and must not touch the parent's synchronization state,
//! so it is written against blocking std I/O only and always terminates
//! with `process::exit`.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use report_proto::Report;

use crate::signal::{self, SavedDisposition};

/// The parent binds its listener after forking; cover that window.
const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Exit code for the forked process itself when setup failed. The command's
/// own exit code travels inside the report, not here.
const FORK_EXIT_FAILURE: i32 = 1;

/// Detach, execute, report, die. Never returns.
pub(crate) fn run_and_report(addr: SocketAddr, command: &str, ambient: SavedDisposition) -> ! {
    // Undo the parent's SIGCHLD override in ourselves: our own child (the
    // shell) must be waitable the normal way.
    signal::reinstate(ambient);

    let pid = nix::unistd::getpid();

    if let Err(e) = nix::unistd::setsid() {
        deliver(
            addr,
            &Report::failed(format!(
                "could not make detached process {pid} a session leader: {e}"
            )),
        );
        std::process::exit(FORK_EXIT_FAILURE);
    }

    match run_command(command) {
        Ok((exit_code, output)) => {
            deliver(addr, &Report::ran(exit_code, output));
            std::process::exit(0);
        }
        Err(e) => {
            deliver(
                addr,
                &Report::failed(format!(
                    "could not run command {command:?} (pid {pid}): {e}"
                )),
            );
            std::process::exit(FORK_EXIT_FAILURE);
        }
    }
}

/// Run the command through a shell, blocking until it finishes.
///
/// Stdout is captured as lines; stderr is discarded so it never reaches the
/// parent's terminal; stdin is closed.
fn run_command(command: &str) -> std::io::Result<(i32, Vec<String>)> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()?;
    let lines = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_owned)
        .collect();
    Ok((extract_exit_code(output.status), lines))
}

/// Extract exit code from ExitStatus, mapping signal deaths to 128 + signal.
#[cfg(unix)]
fn extract_exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| status.signal().map(|sig| 128 + sig).unwrap_or(1))
}

#[cfg(not(unix))]
fn extract_exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Best-effort report delivery: one connection, full body, clean close.
///
/// Every failure is swallowed. If the parent is gone there is no one left
/// to tell, and the child is about to exit either way.
fn deliver(addr: SocketAddr, report: &Report) {
    let Ok(body) = report.encode() else {
        return;
    };
    let Some(mut stream) = connect_with_retry(addr) else {
        return;
    };
    if stream.write_all(&body).is_err() {
        return;
    }
    let _ = stream.flush();
    // Close-terminated framing: the shutdown is the end-of-report marker
    // the parent reads until.
    let _ = stream.shutdown(Shutdown::Write);
}

fn connect_with_retry(addr: SocketAddr) -> Option<TcpStream> {
    for attempt in 0..CONNECT_ATTEMPTS {
        match TcpStream::connect(addr) {
            Ok(stream) => return Some(stream),
            Err(_) if attempt + 1 < CONNECT_ATTEMPTS => thread::sleep(CONNECT_RETRY_DELAY),
            Err(_) => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SIGCHLD_TEST_LOCK;
    use std::sync::PoisonError;

    fn run_serialized(command: &str) -> std::io::Result<(i32, Vec<String>)> {
        // These tests wait on spawned shells; see SIGCHLD_TEST_LOCK.
        let _serial = SIGCHLD_TEST_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        run_command(command)
    }

    #[test]
    fn captures_stdout_lines_and_exit_code() {
        let (code, lines) = run_serialized("printf 'one\\ntwo\\n'; exit 3").unwrap();
        assert_eq!(code, 3);
        assert_eq!(lines, vec!["one".to_owned(), "two".to_owned()]);
    }

    #[test]
    fn discards_stderr() {
        let (code, lines) = run_serialized("echo visible; echo hidden >&2").unwrap();
        assert_eq!(code, 0);
        assert_eq!(lines, vec!["visible".to_owned()]);
    }

    #[test]
    fn missing_command_reported_through_shell_status() {
        let (code, lines) = run_serialized("no-such-command-here").unwrap();
        assert_eq!(code, 127);
        assert!(lines.is_empty());
    }

    #[test]
    fn signal_death_maps_to_128_plus_signal() {
        let (code, _) = run_serialized("kill -TERM $$").unwrap();
        assert_eq!(code, 128 + libc::SIGTERM);
    }

    #[test]
    fn connect_retry_gives_up_without_listener() {
        // Reserve a port, then close it so nothing answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(connect_with_retry(addr).is_none());
    }
}
