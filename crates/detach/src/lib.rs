//! Launch a shell command as a detached, session-leader OS process and get
//! its outcome back through a promise, without blocking on the child.
//!
//! ## Launch Flow
//!
//! 1. The SIGCHLD disposition is overridden to `SIG_IGN` so the kernel
//!    auto-reaps the child (no zombies), with the prior disposition saved
//! 2. A free loopback port is picked by random draw + connect probe
//! 3. The process forks; the child becomes a session leader, runs the
//!    command via `sh -c` with stderr discarded, and posts one JSON report
//!    to `127.0.0.1:<port>` before exiting
//! 4. The parent binds a one-shot listener on that port, returns a
//!    [`JobPromise`], and settles it from a background task when the report
//!    connection closes
//! 5. On settlement the child's process group is SIGKILLed as a backstop
//!    and the saved SIGCHLD disposition is reinstated
//!
//! Construction-time failures (signal override, port allocation, fork,
//! listener bind) are returned directly from [`launch`]; everything after
//! that is delivered through the promise.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let job = detach::launch("echo hello").await?;
//! let pid = job.pid();
//! assert_eq!(job.await?, "hello");
//! # let _ = pid;
//! # Ok(())
//! # }
//! ```

mod child;
mod collect;
mod error;
mod launch;
mod port;
mod promise;
mod signal;

pub use error::{JobError, LaunchError};
pub use launch::{LaunchRequest, launch, launch_with};
pub use port::find_unused_port;
pub use promise::JobPromise;
