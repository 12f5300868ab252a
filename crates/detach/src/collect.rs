//! Parent-side collector: one connection, one report, one settlement.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, warn};

use report_proto::{MAX_REPORT_SIZE, Report};

use crate::error::JobError;
use crate::promise::Outcome;
use crate::signal::SigchldGuard;

/// Receive the child's report and settle the promise, in the required
/// order: tear down the listener, kill the child's process group, reinstate
/// the SIGCHLD disposition, then deliver the outcome.
///
/// The group kill is a backstop: the child exits itself right after
/// reporting, but nothing holds it to that under scheduling races or a
/// deadline elapse.
pub(crate) async fn run(
    listener: TcpListener,
    pid: i32,
    deadline: Option<Duration>,
    guard: SigchldGuard,
    tx: oneshot::Sender<Outcome>,
) {
    let outcome = match deadline {
        Some(limit) => match time::timeout(limit, receive_report(&listener)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(pid, ?limit, "deadline elapsed, killing detached process");
                Err(JobError::DeadlineElapsed(limit))
            }
        },
        None => receive_report(&listener).await,
    };

    // One-shot channel: no second connection is ever accepted.
    drop(listener);
    kill_detached(pid);
    await_death(pid).await;
    // Reinstate the pre-launch SIGCHLD disposition.
    drop(guard);

    if tx.send(outcome).is_err() {
        debug!(pid, "job promise dropped before settlement");
    }
}

/// Accept the single report connection and read it until the sender closes.
async fn receive_report(listener: &TcpListener) -> Outcome {
    let (conn, peer) = listener
        .accept()
        .await
        .map_err(|e| JobError::ResultUndeliverable(format!("accept failed: {e}")))?;
    debug!(%peer, "report connection accepted");

    // No framing: the body is everything up to the child's shutdown. The
    // cap only bounds memory; oversize is rejected by the decoder.
    let mut body = Vec::new();
    let mut conn = conn.take(MAX_REPORT_SIZE as u64 + 1);
    conn.read_to_end(&mut body)
        .await
        .map_err(|e| JobError::ResultUndeliverable(format!("read failed: {e}")))?;

    let report = Report::decode(&body)
        .map_err(|e| JobError::ResultUndeliverable(e.to_string()))?;
    settle(report)
}

/// Map a decoded report onto the promise outcome.
fn settle(report: Report) -> Outcome {
    if let Some(error) = report.error {
        return Err(JobError::Setup(error));
    }
    let output = report.output.unwrap_or_default().join("\n");
    match report.exit_code {
        Some(0) => Ok(output),
        Some(code) => Err(JobError::NonZeroExit { code, output }),
        None => Err(JobError::ResultUndeliverable(
            "report carries neither exit code nor error".into(),
        )),
    }
}

/// SIGKILL the detached process and its group.
///
/// The plain kill covers the window before the child's `setsid`; the group
/// kill covers everything the command may have spawned once the child is a
/// session leader (its pgid equals its pid). Failure means the target is
/// already gone, which is the expected case.
pub(crate) fn kill_detached(pid: i32) {
    let target = nix::unistd::Pid::from_raw(pid);
    let _ = nix::sys::signal::kill(target, nix::sys::signal::Signal::SIGKILL);
    let _ = nix::sys::signal::killpg(target, nix::sys::signal::Signal::SIGKILL);
}

/// Wait until the detached process is actually gone.
///
/// While the ignore disposition is active the kernel reaps the child the
/// moment it exits; if the disposition were reinstated while the child is
/// still mid-death, it would linger as a zombie nobody waits for. SIGKILL
/// is already in flight, so the wait is short and bounded.
async fn await_death(pid: i32) {
    use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};

    let target = nix::unistd::Pid::from_raw(pid);
    for _ in 0..500 {
        match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
            // waitpid(2): StillAlive while dying; anything else (including
            // ECHILD once auto-reaped) means the process is gone.
            Ok(WaitStatus::StillAlive) => time::sleep(Duration::from_millis(2)).await,
            _ => return,
        }
    }
    warn!(pid, "detached process survived SIGKILL probe window");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::AsyncWriteExt;

    async fn one_shot_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    async fn send_body(addr: SocketAddr, body: Vec<u8>) {
        let mut conn = tokio::net::TcpStream::connect(addr).await.unwrap();
        conn.write_all(&body).await.unwrap();
        conn.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn ran_report_resolves_with_joined_output() {
        let (listener, addr) = one_shot_listener().await;
        let body = Report::ran(0, vec!["a".into(), "b".into()]).encode().unwrap();
        tokio::spawn(send_body(addr, body));

        let outcome = receive_report(&listener).await;
        assert_eq!(outcome.unwrap(), "a\nb");
    }

    #[tokio::test]
    async fn nonzero_report_rejects_with_code_and_output() {
        let (listener, addr) = one_shot_listener().await;
        let body = Report::ran(5, vec!["boom".into()]).encode().unwrap();
        tokio::spawn(send_body(addr, body));

        let err = receive_report(&listener).await.unwrap_err();
        match err {
            JobError::NonZeroExit { code, output } => {
                assert_eq!(code, 5);
                assert_eq!(output, "boom");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_report_rejects_with_setup_error() {
        let (listener, addr) = one_shot_listener().await;
        let body = Report::failed("setsid refused").encode().unwrap();
        tokio::spawn(send_body(addr, body));

        let err = receive_report(&listener).await.unwrap_err();
        assert!(matches!(err, JobError::Setup(msg) if msg == "setsid refused"));
    }

    #[tokio::test]
    async fn empty_connection_is_undeliverable() {
        let (listener, addr) = one_shot_listener().await;
        tokio::spawn(send_body(addr, Vec::new()));

        let err = receive_report(&listener).await.unwrap_err();
        assert!(matches!(err, JobError::ResultUndeliverable(_)));
    }

    #[tokio::test]
    async fn garbage_body_is_undeliverable() {
        let (listener, addr) = one_shot_listener().await;
        tokio::spawn(send_body(addr, b"definitely not json".to_vec()));

        let err = receive_report(&listener).await.unwrap_err();
        assert!(matches!(err, JobError::ResultUndeliverable(_)));
    }

    #[test]
    fn settlement_requires_exit_code_when_no_error() {
        let report = Report {
            success: true,
            output: Some(vec!["x".into()]),
            exit_code: None,
            error: None,
        };
        assert!(matches!(
            settle(report).unwrap_err(),
            JobError::ResultUndeliverable(_)
        ));
    }
}
