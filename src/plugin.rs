use crate::{diag::Diag, reexec::ValidatedPlugin};
use anyhow::{Context, Result, bail};
use nix::{sys::stat::stat, unistd::geteuid};
use std::{
    convert::Infallible,
    fs,
    os::unix::fs::PermissionsExt,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::Command,
};

/// Exported when the operator asks for plugin debugging.
const PLUGIN_DEBUG_VAR: &str = "SENTINEL_DEBUG";

/// Options for the direct-execution path.
#[derive(Debug)]
pub struct ExecOptions<'a> {
    pub plugin_dirs: Vec<PathBuf>,
    pub conf_dir: &'a Path,
    pub paranoia: bool,
    pub plugin_debug: bool,
}

/// Runs the plugin in the current environment, replacing this process image.
/// Returns only on failure.
pub fn exec(plugin: &ValidatedPlugin, options: &ExecOptions<'_>, diag: &Diag) -> Result<Infallible> {
    let path = find(&options.plugin_dirs, plugin.name()).with_context(|| {
        format!(
            "Unknown plugin {:?} (searched: {})",
            plugin.name(),
            options
                .plugin_dirs
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })?;

    if options.paranoia {
        check_paranoia(&path)?;
    }

    let mut command = Command::new(&path);
    if let Some(argument) = plugin.argument() {
        command.arg(argument);
    }

    for (key, value) in plugin_env(options.conf_dir, plugin.name())? {
        command.env(key, value);
    }
    if options.plugin_debug {
        command.env(PLUGIN_DEBUG_VAR, "1");
    }

    diag.note(format!("executing {}", path.display()));

    Err(command.exec()).with_context(|| format!("Failed to execute {}", path.display()))
}

/// First executable regular file named after the plugin across the search
/// path.
fn find(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(name))
        .find(|path| is_executable_file(path))
}

fn is_executable_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Ownership policy applied before handing control to the plugin file: it
/// must belong to root or to us, and must not be writable by group or other.
fn check_paranoia(path: &Path) -> Result<()> {
    let status = stat(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    let euid = geteuid();

    if status.st_uid != 0 && status.st_uid != euid.as_raw() {
        bail!(
            "Paranoia: {} must be owned by root or uid {} (owner is uid {})",
            path.display(),
            euid,
            status.st_uid
        );
    }

    if status.st_mode & 0o022 != 0 {
        bail!(
            "Paranoia: {} is group- or other-writable (mode {:o})",
            path.display(),
            status.st_mode & 0o7777
        );
    }

    Ok(())
}

/// Per-plugin environment collected from the plugin configuration directory.
/// Files are read in name order; later entries override earlier ones when the
/// same variable appears twice.
fn plugin_env(conf_dir: &Path, name: &str) -> Result<Vec<(String, String)>> {
    let mut env = Vec::new();

    let Ok(entries) = fs::read_dir(conf_dir) else {
        // No configuration directory on this host.
        return Ok(env);
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    for file in files {
        let contents = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read plugin config {}", file.display()))?;
        collect_section_env(&contents, name, &mut env);
    }

    Ok(env)
}

fn collect_section_env(contents: &str, plugin: &str, out: &mut Vec<(String, String)>) {
    let mut applies = false;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            applies = section_matches(section, plugin);
            continue;
        }

        if !applies {
            continue;
        }

        // Only env.* directives matter here; user/group switching is the
        // agent's business, not this tool's.
        if let Some(rest) = line.strip_prefix("env.") {
            if let Some((key, value)) = rest.split_once(char::is_whitespace) {
                out.push((key.to_string(), value.trim().to_string()));
            }
        }
    }
}

// Section names match exactly or as a prefix glob with a trailing '*'.
fn section_matches(section: &str, plugin: &str) -> bool {
    match section.strip_suffix('*') {
        Some(prefix) => plugin.starts_with(prefix),
        None => section == plugin,
    }
}
