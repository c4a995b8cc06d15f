//! Command-line argument parsing for lodstream.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// lodstream command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "lodstream", about = "Streams level-of-detail blocks for a moving camera")]
pub struct CliArgs {
    /// Generation worker threads (0 = automatic).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Payloads integrated per tick.
    #[arg(long)]
    pub items_per_tick: Option<usize>,

    /// Minimum milliseconds between two integration batches.
    #[arg(long)]
    pub frame_delay_ms: Option<u64>,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 600)]
    pub frames: u32,

    /// Number of identities to stream.
    #[arg(long, default_value_t = 3)]
    pub identities: u32,

    /// Run consistency checks after every mutation.
    #[arg(long)]
    pub check_invariants: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(workers) = args.workers {
            self.scheduler.worker_threads = workers;
        }
        if let Some(items) = args.items_per_tick {
            self.integration.items_per_tick = items;
        }
        if let Some(delay) = args.frame_delay_ms {
            self.integration.frame_delay_ms = delay;
        }
        if args.check_invariants {
            self.debug.check_invariants = true;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
