use crate::settings::{DEFAULT_CONFIG, DEFAULT_PLUGIN_CONF_DIR};
use clap::{Args, Parser};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

const HEADING_GENERAL: &str = "General";
const HEADING_SANDBOX: &str = "Sandbox simulation";
const HEADING_DEBUG: &str = "Debug";

#[derive(Parser, Debug)]
#[command(
    name = "sentinel-run",
    about = "Run a single node plugin the way the sentinel-node agent would"
)]
pub struct Config {
    #[arg(value_name = "PLUGIN", help = "Name of the plugin to run")]
    pub plugin: String,

    #[arg(value_name = "ARGUMENT", help = "Optional plugin argument (e.g. \"config\")")]
    pub argument: Option<String>,

    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(flatten)]
    pub sandbox: SandboxOptions,

    #[command(flatten)]
    pub debug: DebugOptions,
}

#[derive(Args, Debug)]
pub struct GeneralOptions {
    #[arg(
        long,
        value_name = "FILE",
        help = "Use this node configuration file",
        help_heading = HEADING_GENERAL
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "plugin-dir",
        value_name = "DIR",
        help = "Search for plugins in this directory (repeatable, overrides the configured path)",
        help_heading = HEADING_GENERAL
    )]
    pub plugin_dirs: Vec<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        help = "Read per-plugin configuration from this directory",
        help_heading = HEADING_GENERAL
    )]
    pub servicedir_conf: Option<PathBuf>,

    #[arg(
        long,
        help = "Force the plugin file ownership policy on",
        help_heading = HEADING_GENERAL
    )]
    pub paranoia: bool,
}

#[derive(Args, Debug)]
pub struct SandboxOptions {
    #[arg(
        long,
        help = "Do not simulate the agent unit's systemd hardening properties",
        help_heading = HEADING_SANDBOX
    )]
    pub ignore_systemd_properties: bool,
}

#[derive(Args, Debug)]
pub struct DebugOptions {
    #[arg(long, help = "Print tool diagnostics to stderr", help_heading = HEADING_DEBUG)]
    pub debug: bool,

    #[arg(
        long,
        help = "Export the plugin debug variable into the plugin's environment",
        help_heading = HEADING_DEBUG
    )]
    pub pdebug: bool,
}

impl Config {
    pub fn config_path(&self) -> &Path {
        self.general
            .config
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_CONFIG))
    }

    pub fn plugin_conf_dir(&self) -> &Path {
        self.general
            .servicedir_conf
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_PLUGIN_CONF_DIR))
    }

    /// Operator flags to carry across the re-exec boundary, rebuilt from the
    /// parsed form. The guard flag is the orchestrator's, never emitted here.
    pub fn reexec_flags(&self) -> Vec<OsString> {
        let mut flags: Vec<OsString> = Vec::new();

        if let Some(path) = &self.general.config {
            flags.push("--config".into());
            flags.push(path.into());
        }
        for dir in &self.general.plugin_dirs {
            flags.push("--plugin-dir".into());
            flags.push(dir.into());
        }
        if let Some(dir) = &self.general.servicedir_conf {
            flags.push("--servicedir-conf".into());
            flags.push(dir.into());
        }
        if self.general.paranoia {
            flags.push("--paranoia".into());
        }
        if self.debug.debug {
            flags.push("--debug".into());
        }
        if self.debug.pdebug {
            flags.push("--pdebug".into());
        }

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_plugin_and_argument() {
        let config = Config::parse_from(["sentinel-run", "load", "config"]);
        assert_eq!(config.plugin, "load");
        assert_eq!(config.argument.as_deref(), Some("config"));
        assert!(!config.sandbox.ignore_systemd_properties);
    }

    #[test]
    fn test_reexec_flags_rebuild_operator_options() {
        let config = Config::parse_from([
            "sentinel-run",
            "--config",
            "/tmp/node.conf",
            "--plugin-dir",
            "/tmp/plugins",
            "--paranoia",
            "--debug",
            "load",
        ]);

        let flags = config.reexec_flags();
        assert_eq!(
            flags,
            [
                OsString::from("--config"),
                OsString::from("/tmp/node.conf"),
                OsString::from("--plugin-dir"),
                OsString::from("/tmp/plugins"),
                OsString::from("--paranoia"),
                OsString::from("--debug"),
            ]
        );
    }

    #[test]
    fn test_guard_flag_is_not_forwarded_by_reexec_flags() {
        let config =
            Config::parse_from(["sentinel-run", "--ignore-systemd-properties", "load"]);
        assert!(config.sandbox.ignore_systemd_properties);
        assert!(config.reexec_flags().is_empty());
    }

    #[test]
    fn test_default_paths() {
        let config = Config::parse_from(["sentinel-run", "load"]);
        assert_eq!(config.config_path(), Path::new(DEFAULT_CONFIG));
        assert_eq!(config.plugin_conf_dir(), Path::new(DEFAULT_PLUGIN_CONF_DIR));
    }
}
