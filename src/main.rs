//! root-vanished - shows a fullscreen warning once the root file system's
//! block device disappears, and optionally reboots.

use anyhow::Result;
use clap::Parser;

use root_vanished::cli::Cli;
use root_vanished::config::Config;
use root_vanished::controller::{FailsafeController, Outcome};
use root_vanished::host::LinuxHost;

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from(cli);
    let mut controller = FailsafeController::new(config, LinuxHost);
    match controller.run()? {
        Outcome::Rebooted => log::info!("Reboot requested"),
        Outcome::DisplayClosed => log::warn!("Display went away, exiting"),
    }

    Ok(())
}
