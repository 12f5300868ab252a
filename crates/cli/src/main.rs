use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::debug;

use detach::{JobError, LaunchRequest, launch_with};

#[derive(Parser)]
#[command(
    name = "detach",
    version,
    about = "Run a shell command as a detached process and wait for its report"
)]
struct Cli {
    /// Shell command to run (one opaque string, executed via `sh -c`)
    command: String,

    /// Kill the detached process and give up after this many milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut request = LaunchRequest::new(&cli.command);
    if let Some(ms) = cli.deadline_ms {
        request = request.deadline(Duration::from_millis(ms));
    }

    let job = match launch_with(request).await {
        Ok(job) => job,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    debug!(pid = job.pid(), "launched");

    match job.await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            ExitCode::SUCCESS
        }
        Err(JobError::NonZeroExit { code, output }) => {
            if !output.is_empty() {
                println!("{output}");
            }
            // Pass the command's own status through where it fits.
            u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
