//! Common library for gsync: storage abstraction, backends, sync policy and the reconciler
//!
//! # Overview
//!
//! Every storage provider implements the traits in [`storage`]: a [`Backend`] resolves paths to
//! [`Node`]s, which are either a [`File`] or a [`Directory`]. The local filesystem lives in
//! [`local`], the simulated backend used for dry runs in [`dry_run`]. Remote providers are
//! registered with [`Backends`] through a [`BackendFactory`] and opened on first use.
//!
//! [`SyncOptions`] holds the validated flags along with the pure decision functions, and the
//! [`Reconciler`] walks the source tree applying those decisions to the destination, returning
//! a [`Report`] of everything it did.
//!
//! # Error Handling
//!
//! Errors are classified by [`Error`]: validation and path errors abort the run, everything else
//! is contained to the item being processed, logged with its kind and path, and collected in the
//! report so sibling items still get reconciled.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! let flags = common::SyncFlags {
//!     recursive: true,
//!     delete: true,
//!     ..Default::default()
//! };
//! let options = common::SyncOptions::new(&flags)?;
//! let backends = common::Backends::new();
//! let report = common::Reconciler::new(&backends, &options)
//!     .run(&["src/".to_string()], "dest")
//!     .await?;
//! println!("{}", report.summary);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod dry_run;
pub mod error;
pub mod local;
pub mod options;
pub mod report;
pub mod size;
pub mod storage;
pub mod sync;
pub mod testutils;

pub use backends::{BackendFactory, Backends};
pub use config::OutputConfig;
pub use error::{Error, Result};
pub use options::{Decision, FileFacts, SkipReason, SyncFlags, SyncOptions};
pub use report::{Action, ActionRecord, Report, Summary};
pub use storage::{Backend, BackendKind, Directory, File, Locator, Node};
pub use sync::Reconciler;

/// Run `func` on a single-threaded runtime with logging configured from `output`.
///
/// Returns `None` if the future failed, after reporting the error (unless quiet).
pub fn run<Fut, S, E>(output: OutputConfig, func: impl FnOnce() -> Fut) -> Option<S>
where
    S: std::fmt::Display,
    E: std::fmt::Display,
    Fut: std::future::Future<Output = std::result::Result<S, E>>,
{
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(output.log_directive()));
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("failed to install the log subscriber: {error}");
    }
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start the runtime: {error}");
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.shows_summary() {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
