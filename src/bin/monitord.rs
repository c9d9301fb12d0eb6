//! monitord - motion-triggered site recording daemon
//!
//! This daemon:
//! 1. Loads settings (JSON file + MONITOR_* environment)
//! 2. Starts a supervisor for every bootstrap site in the settings file
//! 3. Serves the control API for runtime (re)configuration
//! 4. On Ctrl-C, drains every site (stopping and uploading recordings) and exits

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use site_monitor::{
    api::ApiServer,
    config::MonitorConfig,
    parse_configure_request, MonitorContext, SupervisorRegistry,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON settings file.
    #[arg(long, env = "MONITOR_CONFIG")]
    config: Option<PathBuf>,
    /// Control API listen address (overrides the settings file).
    #[arg(long)]
    api_addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.api_addr {
        cfg.api_addr = addr;
    }
    log::info!(
        "monitord {} recordings={} debounce={:?} poll={:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.recordings_dir.display(),
        cfg.debounce,
        cfg.poll_interval
    );

    let ctx = Arc::new(MonitorContext::with_ffmpeg(
        cfg.supervisor_settings(),
        cfg.decode.clone(),
    ));
    let registry = Arc::new(SupervisorRegistry::new(ctx, cfg.shutdown_grace));

    for (i, request) in cfg.sites.iter().enumerate() {
        let site = match parse_configure_request(request, &cfg.defaults) {
            Ok(site) => site,
            Err(e) => {
                log::error!("bootstrap site #{} skipped: {}", i + 1, e);
                continue;
            }
        };
        let name = site.name.clone();
        match registry.reconfigure(site) {
            Ok(outcome) => log::info!("bootstrap site {}: {:?}", name, outcome),
            Err(e) => log::error!("bootstrap site {} failed: {:#}", name, e),
        }
    }

    let api_handle = ApiServer::new(cfg.api_config(), registry.clone(), cfg.defaults).spawn()?;
    log::info!("control api listening on {}", api_handle.addr);

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    api_handle.stop()?;
    let drained = registry.shutdown_all();
    let recordings: usize = drained.iter().map(|summary| summary.drained).sum();
    log::info!(
        "stopped {} site(s), {} recording(s) finalized during shutdown",
        drained.len(),
        recordings
    );
    Ok(())
}
