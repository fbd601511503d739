//! Read-only inspector for a WAL directory.
//!
//! Iterates segment files in base-index order and prints every entry in the
//! requested range, without opening the catalog, so it works on directories
//! whose WAL is not running.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use segwal::SegmentFiler;

#[derive(Debug, Parser)]
#[command(name = "waldump", about = "Dump the entries of a write-ahead log directory")]
struct Args {
    /// Exclusive lower bound: only entries with a higher index are printed.
    #[arg(long, default_value_t = 0)]
    after: u64,

    /// Exclusive upper bound: only entries with a lower index are printed.
    /// 0 means no upper bound.
    #[arg(long, default_value_t = 0)]
    before: u64,

    /// Path to the WAL directory.
    dir: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let filer = SegmentFiler::new(&args.dir);

    let result = filer.dump_logs(args.after, args.before, |info, entry| {
        println!(
            "segment={} index={} len={} data={}",
            info.id,
            entry.index,
            entry.data.len(),
            String::from_utf8_lossy(&entry.data)
        );
        true
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}
