use crate::properties::{self, HardeningProperty, ImportError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    path::Path,
    process::{Command, Stdio},
};

/// Presence of this directory means a systemd instance is managing the host.
pub const UNIT_MANAGER_RUNTIME_DIR: &str = "/run/systemd/system";

pub const SANDBOX_RUNNER: &str = "systemd-run";
pub const UNIT_QUERY: &str = "systemctl";

/// Host questions the degradation controller asks before re-sandboxing.
/// One seam so the controller's state machine is testable without a live
/// service manager.
pub trait HostInspector {
    /// Whether a unit-managing service manager is present at all.
    fn has_unit_manager(&self) -> bool;

    /// Whether this invocation may create transient units. Permission denial
    /// is a routing decision, never an error.
    fn can_create_transient_unit(&self) -> bool;

    /// Version of the sandbox runner, or `None` when it cannot be determined.
    fn sandbox_runner_version(&self) -> Option<u32>;

    /// Replayable hardening properties of the named unit.
    fn unit_properties(&self, unit: &str) -> Result<Vec<HardeningProperty>, ImportError>;
}

static VERSION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^systemd (\d+)").expect("version pattern is valid"));

/// First version token in the runner's `--version` output.
fn parse_runner_version(output: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let captures = VERSION_LINE.captures(line)?;
        captures[1].parse().ok()
    })
}

/// Live implementation backed by blocking subprocess calls.
#[derive(Debug, Clone, Copy)]
pub struct SystemdInspector;

impl HostInspector for SystemdInspector {
    fn has_unit_manager(&self) -> bool {
        Path::new(UNIT_MANAGER_RUNTIME_DIR).is_dir()
    }

    fn can_create_transient_unit(&self) -> bool {
        Command::new(SANDBOX_RUNNER)
            .args(["--quiet", "--pipe", "--collect", "--wait", "--", "/bin/true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn sandbox_runner_version(&self) -> Option<u32> {
        let output = Command::new(SANDBOX_RUNNER)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .ok()?;

        parse_runner_version(&String::from_utf8_lossy(&output.stdout))
    }

    fn unit_properties(&self, unit: &str) -> Result<Vec<HardeningProperty>, ImportError> {
        let output = Command::new(UNIT_QUERY)
            .args(["show", unit])
            .stdin(Stdio::null())
            .output()
            .map_err(|_| ImportError)?;

        if !output.status.success() {
            return Err(ImportError);
        }

        Ok(properties::filter_show_output(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }
}
