use crate::{
    diag::Diag,
    envfile::TransferEnvFile,
    probe::SANDBOX_RUNNER,
    properties::HardeningProperty,
};
use anyhow::{Context, Result, anyhow, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    ffi::{OsStr, OsString},
    os::unix::process::ExitStatusExt,
    path::Path,
    process::{Command, ExitStatus},
};

/// Ensures the transient unit is discarded after completion, shares our
/// standard streams with the plugin, stays quiet about unit lifecycle, and
/// blocks until the sandboxed process exits.
const RUNNER_FLAGS: [&str; 4] = ["--collect", "--pipe", "--quiet", "--wait"];

/// Guard flag forcing the nested invocation onto the direct-execution branch.
pub const GUARD_FLAG: &str = "--ignore-systemd-properties";

static PLUGIN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:-]+$").expect("plugin name pattern is valid"));
static PLUGIN_ARGUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+$").expect("plugin argument pattern is valid"));

/// Plugin name and argument checked against the allowed-character patterns.
/// Both strings may originate from untrusted callers and cross into a process
/// launcher, so allowlist validation here is the injection defense.
#[derive(Debug, Clone)]
pub struct ValidatedPlugin {
    name: String,
    argument: Option<String>,
}

impl ValidatedPlugin {
    pub fn new(name: &str, argument: Option<&str>) -> Result<Self> {
        if !PLUGIN_NAME.is_match(name) {
            bail!(
                "Invalid plugin name {name:?}: only letters, digits, '-', '_', '.' and ':' are allowed"
            );
        }

        if let Some(argument) = argument {
            if !PLUGIN_ARGUMENT.is_match(argument) {
                bail!("Invalid plugin argument {argument:?}: only word characters are allowed");
            }
        }

        Ok(Self {
            name: name.to_string(),
            argument: argument.map(str::to_string),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }
}

/// Re-runs this program inside a transient sandboxed unit carrying the
/// imported properties and the transferred environment. Returns the
/// subprocess exit code; fails only when the runner cannot be launched.
pub fn run(
    properties: &[HardeningProperty],
    plugin: &ValidatedPlugin,
    forward_flags: &[OsString],
    diag: &Diag,
) -> Result<i32> {
    let transfer = TransferEnvFile::capture()?;
    let self_path = std::env::current_exe().context("Failed to resolve own executable path")?;

    let argv = build_invocation(
        properties,
        plugin,
        forward_flags,
        transfer.path(),
        self_path.as_ref(),
    );

    diag.note(format!("re-exec: {SANDBOX_RUNNER} {}", render_argv(&argv)));

    let status = Command::new(SANDBOX_RUNNER).args(&argv).status().map_err(|err| {
        anyhow!(
            "Failed to launch {SANDBOX_RUNNER}: {err}; retry with {GUARD_FLAG} to run the plugin without sandbox simulation"
        )
    })?;

    let code = exit_code(status);
    if let Some(warning) = outcome_warning(code) {
        diag.warn(warning);
    }

    Ok(code)
    // transfer dropped here, after the subprocess completed
}

/// Warning for a nonzero sandboxed exit. The cause is ambiguous between a
/// plugin failure and a runner failure, so the message says so.
fn outcome_warning(code: i32) -> Option<String> {
    (code != 0).then(|| {
        format!(
            "sandboxed run exited with status {code}; the failure may come from the plugin itself or from {SANDBOX_RUNNER}"
        )
    })
}

/// Argument vector for the sandbox runner. The guard flag is appended
/// unconditionally so a nested invocation can never re-enter this path.
fn build_invocation(
    properties: &[HardeningProperty],
    plugin: &ValidatedPlugin,
    forward_flags: &[OsString],
    transfer_path: &Path,
    self_path: &Path,
) -> Vec<OsString> {
    let mut argv: Vec<OsString> = RUNNER_FLAGS.iter().map(OsString::from).collect();

    argv.push(format!("--property=EnvironmentFile={}", transfer_path.display()).into());
    for property in properties {
        argv.push(format!("--property={property}").into());
    }

    argv.push("--".into());
    argv.push(self_path.into());
    argv.extend(forward_flags.iter().cloned());
    argv.push(GUARD_FLAG.into());
    argv.push(plugin.name().into());
    if let Some(argument) = plugin.argument() {
        argv.push(argument.into());
    }

    argv
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn render_argv(argv: &[OsString]) -> String {
    argv.iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

// Human-readable quoting for debug output only; the launch itself never goes
// through a shell.
fn quote(arg: &OsStr) -> String {
    let arg = arg.to_string_lossy();
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));

    if plain {
        arg.into_owned()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties;

    fn plugin(name: &str, argument: Option<&str>) -> ValidatedPlugin {
        ValidatedPlugin::new(name, argument).unwrap()
    }

    #[test]
    fn test_plugin_name_accepts_allowed_characters() {
        for name in ["load", "if_eth0", "df.root", "smart:sda", "cpu-5"] {
            assert!(ValidatedPlugin::new(name, None).is_ok(), "{name} rejected");
        }
    }

    #[test]
    fn test_plugin_name_rejects_shell_metacharacters() {
        for name in ["a b", "a;b", "a|b", "a$b", "a`b", "", "a\nb", "a/b"] {
            assert!(ValidatedPlugin::new(name, None).is_err(), "{name:?} accepted");
        }
    }

    #[test]
    fn test_plugin_argument_rejects_non_word_characters() {
        assert!(ValidatedPlugin::new("load", Some("config")).is_ok());
        assert!(ValidatedPlugin::new("load", Some("auto-conf")).is_err());
        assert!(ValidatedPlugin::new("load", Some("a b")).is_err());
        assert!(ValidatedPlugin::new("load", Some("$(id)")).is_err());
    }

    #[test]
    fn test_guard_flag_always_present() {
        let argv = build_invocation(
            &[],
            &plugin("load", None),
            &[],
            Path::new("/tmp/envfile"),
            Path::new("/usr/bin/sentinel-run"),
        );
        assert!(argv.iter().any(|arg| arg == GUARD_FLAG));
    }

    #[test]
    fn test_guard_flag_precedes_plugin_name() {
        let argv = build_invocation(
            &[],
            &plugin("load", Some("config")),
            &[OsString::from("--debug")],
            Path::new("/tmp/envfile"),
            Path::new("/usr/bin/sentinel-run"),
        );
        let guard = argv.iter().position(|arg| arg == GUARD_FLAG).unwrap();
        assert_eq!(argv[guard + 1], OsString::from("load"));
        assert_eq!(argv[guard + 2], OsString::from("config"));
    }

    #[test]
    fn test_imported_properties_follow_environment_file_in_order() {
        let imported = properties::filter_show_output("ProtectHome=yes\nUser=root\n");
        let argv = build_invocation(
            &imported,
            &plugin("load", None),
            &[],
            Path::new("/tmp/envfile"),
            Path::new("/usr/bin/sentinel-run"),
        );

        let properties: Vec<&OsString> = argv
            .iter()
            .filter(|arg| arg.to_string_lossy().starts_with("--property="))
            .collect();

        assert_eq!(properties.len(), 3);
        assert_eq!(*properties[0], OsString::from("--property=EnvironmentFile=/tmp/envfile"));
        assert_eq!(*properties[1], OsString::from("--property=ProtectHome=yes"));
        assert_eq!(*properties[2], OsString::from("--property=User=root"));
    }

    #[test]
    fn test_terminator_separates_runner_flags_from_self_invocation() {
        let argv = build_invocation(
            &[],
            &plugin("load", None),
            &[],
            Path::new("/tmp/envfile"),
            Path::new("/usr/bin/sentinel-run"),
        );
        let terminator = argv.iter().position(|arg| arg == "--").unwrap();
        assert_eq!(argv[terminator + 1], OsString::from("/usr/bin/sentinel-run"));
    }

    #[test]
    fn test_exit_code_maps_signal_death() {
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(15)), 143);
    }

    #[test]
    fn test_nonzero_exit_propagates_code_with_ambiguity_warning() {
        let code = exit_code(ExitStatus::from_raw(3 << 8));
        assert_eq!(code, 3);

        let warning = outcome_warning(code).unwrap();
        assert!(warning.contains("status 3"));
        assert!(warning.contains(SANDBOX_RUNNER));
    }

    #[test]
    fn test_clean_exit_produces_no_warning() {
        assert_eq!(outcome_warning(0), None);
    }

    #[test]
    fn test_quote_wraps_arguments_with_special_characters() {
        assert_eq!(quote(OsStr::new("plain-arg_1.ok")), "plain-arg_1.ok");
        assert_eq!(quote(OsStr::new("has space")), "'has space'");
        assert_eq!(quote(OsStr::new("don't")), "'don'\\''t'");
    }
}
