use std::path::PathBuf;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::config::ResolvedClientConfig;
use crate::error::Result;
use crate::export::{ControllerSnapshot, DirectorySink, ExportController, ExportSettings};

use super::util::{build_client, install_ctrlc, open_store};

/// Options for a full timeline export.
pub struct ExportOptions {
    pub store_path: PathBuf,
    pub client: ResolvedClientConfig,
    pub settings: ExportSettings,
    pub out_dir: PathBuf,
    /// Continue the stored checkpoint instead of starting over.
    pub resume: bool,
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_message(snapshot: &ControllerSnapshot) -> String {
    let progress = &snapshot.progress;
    let mut msg = format!(
        "run {}: {} pages, {} posts",
        snapshot.run_id, progress.pages_fetched, progress.total_posts
    );
    if progress.duplicate_streak > 0 {
        msg.push_str(&format!(", duplicate streak {}", progress.duplicate_streak));
    }
    if !snapshot.part_files.is_empty() {
        msg.push_str(&format!(", {} part files", snapshot.part_files.len()));
    }
    msg
}

/// Run the export to completion and write its output under `out_dir`.
pub fn run_export(options: &ExportOptions) -> Result<()> {
    let store = open_store(&options.store_path)?;
    let client = build_client(&options.client, store);
    let sink = DirectorySink::new(&options.out_dir);
    let mut controller = ExportController::new(client, sink, options.settings.clone());

    let stop = controller.stop_handle();
    install_ctrlc(move || stop.stop())?;

    let resumed = options.resume && controller.resume_from_store()?;
    if options.resume && !resumed {
        println!("Nothing to resume; starting a new run");
    }

    let pb = spinner();
    let listener_pb = pb.clone();
    controller.subscribe(move |snapshot| listener_pb.set_message(progress_message(snapshot)));

    let result = controller.start(resumed);
    pb.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            // Keep whatever was collected before the failure.
            let snapshot = controller.snapshot();
            if snapshot.buffered_posts > 0 || !snapshot.part_files.is_empty() {
                match controller.download_json() {
                    Ok(paths) => print_written(options, &paths),
                    Err(write_err) => tracing::warn!(%write_err, "could not save partial export"),
                }
            }
            return Err(err);
        }
    };

    println!(
        "Stopped: {} ({} pages, {} posts)",
        outcome.stop_reason.describe(),
        outcome.pages_fetched,
        outcome.total_posts
    );
    let paths = controller.download_json()?;
    print_written(options, &paths);
    Ok(())
}

fn print_written(options: &ExportOptions, paths: &[String]) {
    for path in paths {
        println!("Wrote {}", options.out_dir.join(path).display());
    }
}
