mod config;
mod host;
mod signals;
mod telemetry;
mod units;

use anyhow::Result;
use tierloop_logging::{init_console_logger, ConsoleLoggerConfig};

use crate::{config::AppConfig, host::DemoHost, signals::ExitSignal};

fn main() -> Result<()> {
    init_console_logger(&ConsoleLoggerConfig::from_env())?;

    let cfg = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("loading config from {path}");
            AppConfig::load_toml(&path)?
        }
        None => AppConfig::default(),
    };

    let exit = ExitSignal::new();
    if let Err(e) = exit.install_ctrlc_handler() {
        log::warn!("ctrl-c handler not installed: {e}");
    }

    let mut host = DemoHost::new(cfg, exit)?;
    host.spawn_units()?;

    log::info!("boot");
    let frames = host.run()?;
    log::debug!("final state: {:?}", host.dispatcher());
    log::info!("shutdown after {frames} frame(s)");
    Ok(())
}
