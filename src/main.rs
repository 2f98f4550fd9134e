use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use optrace::config::TraceConfig;
use optrace::connector_probe;
use optrace::tracer::{spawn_tracee, Tracer};

/// Marker opening the first output line. Errors are appended to it; the
/// file list follows on the second line.
const OUTPUT_MARKER: &str = "(optrace)";

/// Discover the option files a MySQL or MariaDB Connector C library reads.
#[derive(Debug, Parser)]
struct Command {
    /// Path to the Connector C shared object (libmysqlclient.so, libmariadb.so, ...)
    library: PathBuf,
    /// Debug-level diagnostics on stderr
    #[arg(short, long)]
    verbose: bool,
    /// Single-character separator for the output list (default: newline)
    #[arg(long, default_value = "\n", hide_default_value = true)]
    delimiter: char,
    /// Let the connector actually open the files it finds; follows !include
    /// directives, but the connector may print its own errors first
    #[arg(long)]
    allow_read: bool,
    /// Poll the tracee with a bounded backoff instead of blocking forever
    #[arg(long)]
    timeout: bool,
    /// Run the probe sequence with no tracing at all, for cross-checking
    /// against an external syscall logger
    #[arg(long)]
    tracee_only: bool,
}

fn main() -> Result<()> {
    let opts = Command::parse();

    let filter = if opts.verbose {
        EnvFilter::try_new("optrace=debug")?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if opts.tracee_only {
        connector_probe::run(&opts.library, false);
    }

    let cfg = TraceConfig {
        delimiter: opts.delimiter,
        suppress_open: !opts.allow_read,
        poll_timeout: opts.timeout,
        ..TraceConfig::default()
    };
    debug!(library = %opts.library.display(), ?cfg, "starting traced probe");

    let library = opts.library.clone();
    let report = match spawn_tracee(move || connector_probe::run(&library, true)) {
        Ok(child) => Tracer::new(child, cfg).run(),
        Err(err) => {
            println!("{OUTPUT_MARKER}Error: {err}");
            println!();
            process::exit(err.exit_code());
        }
    };

    match &report.error {
        Some(err) => println!("{OUTPUT_MARKER}Error: {err}"),
        None => println!("{OUTPUT_MARKER}"),
    }
    println!("{}", report.files);
    process::exit(report.error.as_ref().map_or(0, |err| err.exit_code()))
}
