use anyhow::{Context, Result};
use std::{io::Write, path::Path};
use tempfile::NamedTempFile;

/// Variables the service manager assigns inside the transient unit itself.
/// Forwarding them would collide with the values the unit is supposed to see.
pub const ENV_IGNORE: &[&str] = &[
    "_",
    "HOME",
    "INVOCATION_ID",
    "JOURNAL_STREAM",
    "LANG",
    "LISTEN_FDNAMES",
    "LISTEN_FDS",
    "LISTEN_PID",
    "LOGNAME",
    "MANAGERPID",
    "NOTIFY_SOCKET",
    "PATH",
    "SHELL",
    "USER",
    "XDG_RUNTIME_DIR",
    "XDG_SESSION_ID",
];

/// Encodes one variable as an `EnvironmentFile=` line: `KEY="value"` with
/// every literal double quote backslash-escaped. The quoted span is read as
/// one logical value, so embedded newlines need no further treatment.
pub fn encode(key: &str, value: &str) -> String {
    format!("{key}=\"{}\"\n", value.replace('"', "\\\""))
}

/// The caller's environment, encoded for transfer into the transient unit.
/// The backing file is exclusively owned and removed on drop, so cleanup
/// covers every exit path of the orchestrator including launch failure.
#[derive(Debug)]
pub struct TransferEnvFile {
    file: NamedTempFile,
}

impl TransferEnvFile {
    /// Snapshots the ambient environment, minus the ignore set. Variables
    /// whose name or value is not valid unicode are skipped.
    pub fn capture() -> Result<Self> {
        let mut file =
            NamedTempFile::new().context("Failed to create environment transfer file")?;

        for (key, value) in std::env::vars_os() {
            let (Ok(key), Ok(value)) = (key.into_string(), value.into_string()) else {
                continue;
            };

            if ENV_IGNORE.contains(&key.as_str()) {
                continue;
            }

            file.write_all(encode(&key, &value).as_bytes())
                .context("Failed to write environment transfer file")?;
        }

        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
