use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gsync",
    version,
    about = "Synchronize directory trees between local disks and a cloud drive",
    long_about = "`gsync` brings a destination tree in line with one or more sources, rsync style. \
Either side may be a local path or a drive path.

SRC, DEST:
    Use 'googledrive://' to address a folder on the drive; the bare scheme is the top folder.
    A trailing '/' on SRC means \"the contents of\" the directory, without it the directory
    itself is placed inside DEST.

EXAMPLE:
    gsync -a ./sourcedir/ googledrive://destdir
    gsync -a googledrive://sourcedir/ ./destdir
    gsync -a googledrive://sourcedir googledrive://destdir"
)]
struct Args {
    // Comparison
    /// Skip based on checksum, not modification time and size
    #[arg(short = 'c', long, help_heading = "Comparison")]
    checksum: bool,

    /// Skip files that match in size
    #[arg(long, help_heading = "Comparison")]
    size_only: bool,

    /// Don't skip files that match size and time
    #[arg(short = 'I', long, help_heading = "Comparison")]
    ignore_times: bool,

    /// Skip files that are newer on the receiver
    #[arg(short = 'u', long, help_heading = "Comparison")]
    update: bool,

    // Transfer
    /// Archive mode; same as -rt
    #[arg(short = 'a', long, help_heading = "Transfer")]
    archive: bool,

    /// Recurse into directories
    #[arg(short = 'r', long, help_heading = "Transfer")]
    recursive: bool,

    /// Transfer directories without recursing
    #[arg(short = 'd', long, help_heading = "Transfer")]
    dirs: bool,

    /// Preserve modification times
    #[arg(short = 't', long, help_heading = "Transfer")]
    times: bool,

    /// Skip creating new files on receiver
    #[arg(long, help_heading = "Transfer")]
    existing: bool,

    /// Skip updating files that exist on receiver
    #[arg(long, help_heading = "Transfer")]
    ignore_existing: bool,

    /// Sender removes synchronized files (non-directories)
    #[arg(long, help_heading = "Transfer")]
    remove_source_files: bool,

    /// Delete extraneous files from destination directories (requires -r or -d)
    #[arg(long, help_heading = "Transfer")]
    delete: bool,

    /// Don't transfer any file larger than SIZE
    ///
    /// Accepts a number with an optional unit (b, k/kb, m/mb, g/gb; binary multiples) and an
    /// optional byte adjustment, e.g. "1.5mb-1".
    #[arg(long, value_name = "SIZE", help_heading = "Transfer")]
    max_size: Option<String>,

    /// Don't transfer any file smaller than SIZE
    #[arg(long, value_name = "SIZE", help_heading = "Transfer")]
    min_size: Option<String>,

    /// Show what would have been transferred without changing anything
    #[arg(short = 'n', long, help_heading = "Transfer")]
    dry_run: bool,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    ///
    /// At INFO and above every reconciled item is logged.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Drive
    /// Drive session file holding the API client credentials and refresh token
    #[arg(
        long,
        value_name = "PATH",
        default_value = "config.json",
        help_heading = "Drive"
    )]
    session: std::path::PathBuf,

    // ARGUMENTS
    /// Source path(s) followed by the destination
    #[arg(required = true, num_args = 2.., value_name = "SRC... DEST")]
    paths: Vec<String>,
}

impl Args {
    fn flags(&self) -> common::SyncFlags {
        common::SyncFlags {
            verbose: self.verbose > 0,
            checksum: self.checksum,
            size_only: self.size_only,
            ignore_times: self.ignore_times,
            update: self.update,
            recursive: self.recursive,
            dirs: self.dirs,
            times: self.times,
            existing: self.existing,
            ignore_existing: self.ignore_existing,
            delete: self.delete,
            dry_run: self.dry_run,
            remove_source_files: self.remove_source_files,
            archive: self.archive,
            min_size: self.min_size.clone(),
            max_size: self.max_size.clone(),
        }
    }
}

/// Connector used when no drive client is linked into the binary.
struct NoDriveClient;

#[async_trait::async_trait]
impl remote::session::Connect for NoDriveClient {
    async fn connect(
        &self,
        _session: &remote::session::Session,
    ) -> Result<Arc<dyn remote::store::ObjectStore>> {
        Err(anyhow!(
            "this build of gsync has no drive client, {} paths cannot be opened",
            remote::SCHEME
        ))
    }
}

#[instrument]
async fn async_main(args: Args) -> Result<common::Summary> {
    let options = common::SyncOptions::new(&args.flags())?;
    let Some((dest, sources)) = args.paths.split_last() else {
        return Err(anyhow!("expected at least one source and a destination"));
    };
    let backends = common::Backends::new().with_factory(Box::new(
        remote::session::RemoteFactory::new(&args.session, Box::new(NoDriveClient)),
    ));
    let report = common::Reconciler::new(&backends, &options)
        .run(sources, dest)
        .await?;
    if report.has_errors() {
        tracing::info!(
            "{} item(s) could not be synchronized",
            report.summary.errors
        );
    }
    Ok(report.summary)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let res = common::run(output, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
