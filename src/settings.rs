use anyhow::{Context, Result};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG: &str = "/etc/sentinel/sentinel-node.conf";
pub const DEFAULT_PLUGIN_DIR: &str = "/etc/sentinel/plugins";
pub const DEFAULT_PLUGIN_CONF_DIR: &str = "/etc/sentinel/plugin-conf.d";
pub const DEFAULT_AGENT_UNIT: &str = "sentinel-node.service";

/// Node agent configuration, as far as this tool cares about it. The format
/// is `key value` lines with `#` comments; unknown keys are ignored because
/// the agent understands far more of them than we do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub paranoia: bool,
    pub ignore_systemd_properties: bool,
    pub plugin_dirs: Vec<PathBuf>,
    pub systemd_unit: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paranoia: false,
            ignore_systemd_properties: false,
            plugin_dirs: Vec::new(),
            systemd_unit: DEFAULT_AGENT_UNIT.to_string(),
        }
    }
}

impl Settings {
    /// Loads the node configuration. A missing file is fine for the default
    /// path; a path the operator asked for explicitly must exist.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        let mut settings = Self::default();

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if !explicit && err.kind() == ErrorKind::NotFound => return Ok(settings),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read config {}", path.display()));
            }
        };

        settings.apply(&contents);
        Ok(settings)
    }

    /// Plugin search path: CLI overrides win, then the config, then the
    /// packaged default.
    pub fn plugin_dirs(&self, overrides: &[PathBuf]) -> Vec<PathBuf> {
        if !overrides.is_empty() {
            return overrides.to_vec();
        }
        if !self.plugin_dirs.is_empty() {
            return self.plugin_dirs.clone();
        }
        vec![PathBuf::from(DEFAULT_PLUGIN_DIR)]
    }

    fn apply(&mut self, contents: &str) {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once(char::is_whitespace) else {
                continue;
            };
            let value = value.trim();

            match key {
                "paranoia" => self.paranoia = parse_bool(value),
                "ignore_systemd_properties" => self.ignore_systemd_properties = parse_bool(value),
                "plugin_dir" => self.plugin_dirs.push(PathBuf::from(value)),
                "systemd_unit" => self.systemd_unit = value.to_string(),
                _ => {}
            }
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "yes" | "true" | "on")
}
