use std::net::SocketAddr;
use std::time::Duration;

/// Failure to start a launch. No [`crate::JobPromise`] is produced; the
/// caller gets this directly from [`crate::launch`].
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("could not override SIGCHLD disposition: {0}")]
    SignalPolicy(#[source] std::io::Error),

    #[error("no free loopback port after {0} attempts")]
    PortsExhausted(u32),

    #[error("loopback port probe failed: {0}")]
    PortProbe(#[source] std::io::Error),

    #[error("could not fork launcher process: {0}")]
    Fork(nix::errno::Errno),

    #[error("could not bind report listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Failure delivered through a settled [`crate::JobPromise`].
///
/// `NonZeroExit` means the command itself failed; every other variant means
/// the launcher failed. Callers can tell the two apart by matching.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    /// The command ran to completion but returned a non-zero status.
    #[error("exit code {code}: {output}")]
    NonZeroExit { code: i32, output: String },

    /// The detached process failed before or while starting the command.
    #[error("detached process setup failed: {0}")]
    Setup(String),

    /// The report connection closed without a usable payload, or was never
    /// made at all.
    #[error("no result received from detached process: {0}")]
    ResultUndeliverable(String),

    /// No report arrived within the requested deadline; the detached
    /// process has been killed.
    #[error("no report within {0:?}, detached process killed")]
    DeadlineElapsed(Duration),
}
