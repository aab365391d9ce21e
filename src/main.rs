use clap::Parser;
#[cfg(feature = "completions")]
use clap::CommandFactory;
use std::process;
#[cfg(feature = "cdp")]
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ampoose::cli::{Cli, Commands, CursorsCommand};
use ampoose::commands::{
    run_calibrate, run_cursors_export, run_cursors_import, run_export, run_post, run_status,
    CalibrateOptions, CursorsOptions, ExportOptions, PostOptions, StatusOptions,
};
use ampoose::config::{load_config, render_config, ResolvedConfig};
use ampoose::error::Result;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut resolved = ResolvedConfig::from_config(&load_config()?);
    if let Some(db) = cli.db {
        resolved.store.path = db;
    }
    let store_path = resolved.store.path.clone();

    match cli.command {
        Commands::Calibrate {
            har,
            cdp,
            host,
            port,
            target,
            profile_url,
            timeout,
        } => {
            if !cdp {
                return run_calibrate(&CalibrateOptions {
                    store_path,
                    har_files: har,
                });
            }
            let mut calibrate = resolved.calibrate;
            if let Some(value) = host {
                calibrate.cdp_host = value;
            }
            if let Some(value) = port {
                calibrate.cdp_port = value;
            }
            if let Some(value) = target {
                calibrate.target = Some(value);
            }
            if let Some(value) = profile_url {
                calibrate.profile_url = Some(value);
            }
            if let Some(value) = timeout {
                calibrate.timeout_secs = value;
            }
            run_cdp(store_path, calibrate)
        }
        Commands::Status { json } => run_status(&StatusOptions { store_path, json }),
        Commands::Export {
            mode,
            count,
            days,
            date_filter,
            chunk_size,
            page_size,
            out_dir,
            resume,
            endpoint,
            host_snapshot,
            delay_ms,
        } => {
            let mut export = resolved.export;
            if let Some(value) = mode {
                export.mode = value;
            }
            if let Some(value) = count {
                export.count = value;
            }
            if let Some(value) = days {
                export.days = value;
            }
            if let Some(value) = date_filter {
                export.date_filter = value;
            }
            if let Some(value) = chunk_size {
                export.chunk_size = value;
            }
            if let Some(value) = page_size {
                export.page_size = value;
            }
            if let Some(value) = out_dir {
                export.out_dir = value;
            }
            if let Some(value) = delay_ms {
                export.request_delay_ms = value;
            }
            let mut client = resolved.client;
            if let Some(value) = endpoint {
                client.endpoint = Some(value);
            }
            if let Some(value) = host_snapshot {
                client.host_snapshot = Some(value);
            }
            let options = ExportOptions {
                store_path,
                settings: export.settings(client.endpoint.clone()),
                out_dir: export.out_dir.clone(),
                client,
                resume,
            };
            run_export(&options)
        }
        Commands::Post {
            post_id,
            endpoint,
            host_snapshot,
        } => {
            let mut client = resolved.client;
            if let Some(value) = endpoint {
                client.endpoint = Some(value);
            }
            if let Some(value) = host_snapshot {
                client.host_snapshot = Some(value);
            }
            run_post(&post_id, &PostOptions { store_path, client })
        }
        Commands::Cursors { action } => {
            let options = CursorsOptions { store_path };
            match action {
                CursorsCommand::Export { output } => {
                    run_cursors_export(&options, output.as_deref())
                }
                CursorsCommand::Import { file } => run_cursors_import(&options, &file),
            }
        }
        Commands::Config => {
            print!("{}", render_config(&resolved)?);
            Ok(())
        }
        #[cfg(feature = "completions")]
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "ampoose", &mut std::io::stdout());
            Ok(())
        }
    }
}

#[cfg(feature = "cdp")]
fn run_cdp(
    store_path: std::path::PathBuf,
    calibrate: ampoose::config::ResolvedCalibrateConfig,
) -> Result<()> {
    ampoose::commands::run_cdp_calibration(&ampoose::commands::CdpOptions {
        store_path,
        host: calibrate.cdp_host,
        port: calibrate.cdp_port,
        target: calibrate.target,
        profile_url: calibrate.profile_url,
        timeout: Duration::from_secs(calibrate.timeout_secs),
        poll_interval: Duration::from_millis(calibrate.poll_interval_ms.max(1)),
        scroll_interval: Duration::from_millis(calibrate.scroll_interval_ms),
    })
}

#[cfg(not(feature = "cdp"))]
fn run_cdp(
    _store_path: std::path::PathBuf,
    _calibrate: ampoose::config::ResolvedCalibrateConfig,
) -> Result<()> {
    Err(ampoose::error::AmpooseError::InvalidArgs(
        "this build does not include CDP support (feature `cdp`)".to_string(),
    ))
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
