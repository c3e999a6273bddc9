//! Command line interface.

use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "root-vanished", version)]
#[command(
    about = "Displays a blue screen once the root file system vanishes, e.g. because the user \
             (accidentally) unplugged the USB drive on which the root file system resides."
)]
pub struct Cli {
    /// Mountpoint to resolve into a block device to watch.
    #[arg(long, default_value = "/")]
    pub mountpoint: String,

    /// Initiate a reboot once the user pressed a key.
    #[arg(long)]
    pub reboot: bool,

    /// In case the keyboard cannot be grabbed, automatically reboot after this
    /// many seconds.
    #[arg(
        long = "reboot_fallback_seconds",
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    pub reboot_fallback_seconds: i64,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config::new(cli.mountpoint, cli.reboot, cli.reboot_fallback_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        let args = std::iter::once("root-vanished").chain(args.iter().copied());
        Cli::try_parse_from(args).map(Config::from)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_all_flags() {
        let config = parse(&[
            "--mountpoint=/run/live",
            "--reboot",
            "--reboot_fallback_seconds=5",
        ])
        .unwrap();
        assert_eq!(config.mountpoint, "/run/live");
        assert!(config.reboot);
        assert_eq!(config.reboot_fallback_seconds, 5);
    }

    #[test]
    fn test_negative_fallback_accepted() {
        let config = parse(&["--reboot_fallback_seconds", "-1"]).unwrap();
        assert_eq!(config.reboot_fallback_seconds, -1);
    }

    #[test]
    fn test_non_integer_fallback_rejected() {
        assert!(parse(&["--reboot_fallback_seconds=soon"]).is_err());
    }

    #[test]
    fn test_help_and_version_are_not_failures() {
        let err = parse(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        let err = parse(&["--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert_eq!(err.exit_code(), 0);
    }
}
