//! Launch sequencing: signal policy, port, fork, bind, collector.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use nix::unistd::{ForkResult, fork};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::LaunchError;
use crate::promise::JobPromise;
use crate::signal::SigchldGuard;
use crate::{child, collect, port};

/// What to launch and under what limits.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    command: String,
    deadline: Option<Duration>,
}

impl LaunchRequest {
    /// A launch of `command`, run through a shell, with no deadline.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            deadline: None,
        }
    }

    /// Kill the detached process and reject the promise if no report has
    /// arrived within `limit`.
    #[must_use]
    pub fn deadline(mut self, limit: Duration) -> Self {
        self.deadline = Some(limit);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Launch `command` as a detached, session-leader process.
///
/// Returns as soon as the child is forked and the report listener is up;
/// the command's outcome arrives through the returned [`JobPromise`]. Must
/// be called within a tokio runtime. Errors here are construction-time
/// failures — once a promise exists, every further failure settles it.
pub async fn launch(command: impl Into<String>) -> Result<JobPromise, LaunchError> {
    launch_with(LaunchRequest::new(command)).await
}

/// [`launch`] with explicit limits.
pub async fn launch_with(request: LaunchRequest) -> Result<JobPromise, LaunchError> {
    // The ignore disposition must be in effect before the fork: the child
    // may exit before the parent runs again.
    let guard = SigchldGuard::engage().map_err(LaunchError::SignalPolicy)?;
    let ambient = guard.ambient();

    let port = port::find_unused_port().await?;
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    // SAFETY: the child branch never returns into the runtime it was forked
    // under — `run_and_report` uses blocking std I/O only and terminates
    // with `process::exit`.
    let pid = match unsafe { fork() } {
        Err(errno) => return Err(LaunchError::Fork(errno)),
        Ok(ForkResult::Child) => child::run_and_report(addr, request.command(), ambient),
        Ok(ForkResult::Parent { child }) => child.as_raw(),
    };

    debug!(pid, %addr, command = request.command(), "forked detached process");

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(source) => {
            // Lost the port race. The child would fail its connect retries
            // and exit on its own, but don't rely on that.
            collect::kill_detached(pid);
            return Err(LaunchError::Bind { addr, source });
        }
    };

    let (tx, rx) = oneshot::channel();
    tokio::spawn(collect::run(listener, pid, request.deadline, guard, tx));
    Ok(JobPromise::new(pid, rx))
}
