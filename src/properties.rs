use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use std::fmt;

/// One security directive of the agent unit, kept verbatim in its reported
/// `Name=Value` form. Duplicate names are preserved in encounter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardeningProperty(String);

impl HardeningProperty {
    pub fn as_line(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HardeningProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The unit query failed. The unit is undefined or the service manager is
/// unreachable; either way the caller degrades to direct execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportError;

/// Name patterns eligible for replay on the transient unit: capability sets,
/// identity, filesystem and namespace restrictions, syscall filtering, path
/// grants, hard resource limits and environment pass-through.
static IMPORT_ALLOWLIST: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"^AmbientCapabilities$",
        r"^CapabilityBoundingSet$",
        r"^(Dynamic)?User$",
        r"^Group$",
        r"^SupplementaryGroups$",
        r"^(Pass|Unset)?Environment$",
        r"^(Bind|BindReadOnly|Exec|NoExec|Inaccessible|ReadOnly|ReadWrite)Paths$",
        r"^(Cache|Configuration|Logs|Runtime|State)Directory(Mode)?$",
        r"^Limit",
        r"^Private",
        r"^Protect",
        r"^Restrict",
        r"^SystemCall",
        r"^(DeviceAllow|DevicePolicy|KeyringMode|LockPersonality|MemoryDenyWriteExecute|MountFlags|NoNewPrivileges|ProcSubset|RemoveIPC|RootDirectory|RootImage|TemporaryFileSystem|UMask)$",
    ])
    .expect("import allowlist patterns are valid")
});

// Soft limits are runtime-mutable and meaningless to replay.
static SOFT_LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Limit.*Soft$").expect("soft limit pattern is valid"));

/// Properties whose reported rendering cannot be replayed literally:
/// `DropInPaths` is already merged into the other reported values, and
/// `EnvironmentFiles` is shown descriptively (`... (ignore_errors=no)`).
const NON_LITERAL: &[&str] = &["DropInPaths", "EnvironmentFile", "EnvironmentFiles"];

/// Filters the service manager's `show` output down to the replayable
/// hardening properties, preserving input order.
pub fn filter_show_output(output: &str) -> Vec<HardeningProperty> {
    let mut kept = Vec::new();

    for line in output.lines() {
        let Some((name, _)) = line.split_once('=') else {
            continue;
        };

        if SOFT_LIMIT.is_match(name) || NON_LITERAL.contains(&name) {
            continue;
        }

        if IMPORT_ALLOWLIST.is_match(name) {
            kept.push(HardeningProperty(line.to_string()));
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(properties: &[HardeningProperty]) -> Vec<&str> {
        properties.iter().map(|p| p.as_line()).collect()
    }

    #[test]
    fn test_keeps_allowlisted_lines_verbatim_in_order() {
        let output = "Description=Sentinel node agent\n\
                      ProtectHome=yes\n\
                      ExecStart={ path=/usr/sbin/sentinel-node }\n\
                      User=root\n\
                      SystemCallFilter=@system-service\n";
        let imported = filter_show_output(output);
        assert_eq!(
            lines(&imported),
            ["ProtectHome=yes", "User=root", "SystemCallFilter=@system-service"]
        );
    }

    #[test]
    fn test_never_returns_environment_file_or_drop_in_lines() {
        let output = "EnvironmentFiles=/etc/default/sentinel-node (ignore_errors=yes)\n\
                      DropInPaths=/etc/systemd/system/sentinel-node.service.d/override.conf\n\
                      EnvironmentFile=/etc/default/sentinel-node (ignore_errors=no)\n\
                      ProtectSystem=strict\n";
        let imported = filter_show_output(output);
        assert_eq!(lines(&imported), ["ProtectSystem=strict"]);
    }

    #[test]
    fn test_excludes_soft_limits_but_keeps_hard_limits() {
        let output = "LimitNOFILE=524288\nLimitNOFILESoft=1024\nLimitCORE=infinity\nLimitCORESoft=0\n";
        let imported = filter_show_output(output);
        assert_eq!(lines(&imported), ["LimitNOFILE=524288", "LimitCORE=infinity"]);
    }

    #[test]
    fn test_duplicate_names_preserved_in_encounter_order() {
        let output = "ReadWritePaths=/var/lib/sentinel\nReadWritePaths=/run/sentinel\n";
        let imported = filter_show_output(output);
        assert_eq!(
            lines(&imported),
            ["ReadWritePaths=/var/lib/sentinel", "ReadWritePaths=/run/sentinel"]
        );
    }

    #[test]
    fn test_rejects_unrelated_unit_bookkeeping() {
        let output = "Id=sentinel-node.service\n\
                      FragmentPath=/lib/systemd/system/sentinel-node.service\n\
                      Wants=network-online.target\n\
                      MainPID=1234\n";
        assert!(filter_show_output(output).is_empty());
    }

    #[test]
    fn test_empty_input_yields_empty_import() {
        assert!(filter_show_output("").is_empty());
    }
}
