use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::export::ExportMode;

#[derive(Parser)]
#[command(name = "ampoose")]
#[command(about = "Export a profile's post history through calibrated GraphQL queries.")]
#[command(version)]
pub struct Cli {
    /// SQLite store holding calibration and resume state (default: ampoose.db)
    #[arg(long, global = true, value_name = "FILE")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture the GraphQL operations an export needs
    Calibrate {
        /// HAR file(s) recorded while browsing the profile
        har: Vec<PathBuf>,

        /// Capture from a running Chrome via the DevTools protocol instead
        #[arg(long, conflicts_with = "har")]
        cdp: bool,

        /// Chrome host (CDP remote debugging address)
        #[arg(long, requires = "cdp")]
        host: Option<String>,

        /// Chrome remote debugging port
        #[arg(long, requires = "cdp")]
        port: Option<u16>,

        /// Target selector (id, URL, or title substring)
        #[arg(long, requires = "cdp")]
        target: Option<String>,

        /// Profile to open in the tab before capturing
        #[arg(long, requires = "cdp")]
        profile_url: Option<String>,

        /// Seconds to wait for the required operations
        #[arg(long, requires = "cdp")]
        timeout: Option<u64>,
    },

    /// Show calibration readiness and the latest checkpoint
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export the calibrated profile's posts
    Export {
        /// Which posts to keep
        #[arg(long, value_enum)]
        mode: Option<ExportMode>,

        /// Posts to collect in count mode
        #[arg(long)]
        count: Option<usize>,

        /// Age limit in days for days mode and --date-filter
        #[arg(long)]
        days: Option<u32>,

        /// Apply the day window in every mode
        #[arg(long, action = clap::ArgAction::SetTrue)]
        date_filter: Option<bool>,

        /// Posts per part file (0 writes a single file)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Posts requested per timeline page
        #[arg(long)]
        page_size: Option<u32>,

        /// Directory the export is written under
        #[arg(short, long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Continue the last stored run
        #[arg(long)]
        resume: bool,

        /// Send every request to this GraphQL endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// JSON snapshot of the logged-in page (cookies, inputs, globals)
        #[arg(long, value_name = "FILE")]
        host_snapshot: Option<PathBuf>,

        /// Fixed delay between pages in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Fetch a single post by id
    Post {
        /// Post (story) id
        post_id: String,

        /// Send the request to this GraphQL endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// JSON snapshot of the logged-in page (cookies, inputs, globals)
        #[arg(long, value_name = "FILE")]
        host_snapshot: Option<PathBuf>,
    },

    /// Move resume cursors between machines
    Cursors {
        #[command(subcommand)]
        action: CursorsCommand,
    },

    /// Print the resolved configuration
    Config,

    /// Generate shell completions
    #[cfg(feature = "completions")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum CursorsCommand {
    /// Write stored cursors as a transfer file
    Export {
        /// Output file (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Merge cursors from a transfer file
    Import {
        /// Transfer file written by `cursors export`
        file: PathBuf,
    },
}
