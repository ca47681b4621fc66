mod config;
mod diag;
mod envfile;
mod plugin;
mod probe;
mod properties;
mod reexec;
mod settings;
mod simulate;

use anyhow::Result;
use clap::Parser;
use config::Config;
use diag::Diag;
use plugin::ExecOptions;
use probe::SystemdInspector;
use reexec::ValidatedPlugin;
use settings::Settings;
use simulate::Plan;
use std::process;

/// Exit code for failures of this tool itself (validation, runner launch),
/// distinct from plugin exit codes and from the direct-execution path's 1.
const FATAL_EXIT: i32 = 70;

fn main() {
    let config = Config::parse();
    let diag = Diag::new(config.debug.debug);

    match run(&config, &diag) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("# sentinel-run: {err:#}");
            process::exit(FATAL_EXIT);
        }
    }
}

fn run(config: &Config, diag: &Diag) -> Result<i32> {
    let settings = Settings::load(config.config_path(), config.general.config.is_some())?;
    let plugin = ValidatedPlugin::new(&config.plugin, config.argument.as_deref())?;

    let disabled =
        config.sandbox.ignore_systemd_properties || settings.ignore_systemd_properties;

    match simulate::plan(disabled, &settings.systemd_unit, &SystemdInspector) {
        Plan::Sandbox(imported) => {
            reexec::run(&imported, &plugin, &config.reexec_flags(), diag)
        }
        Plan::Direct(reason) => {
            if let Some(note) = reason.debug_note() {
                diag.note(note);
            }

            let options = ExecOptions {
                plugin_dirs: settings.plugin_dirs(&config.general.plugin_dirs),
                conf_dir: config.plugin_conf_dir(),
                paranoia: config.general.paranoia || settings.paranoia,
                plugin_debug: config.debug.pdebug,
            };

            match plugin::exec(&plugin, &options, diag) {
                Ok(never) => match never {},
                Err(err) => {
                    diag.warn(format!("{err:#}"));
                    Ok(1)
                }
            }
        }
    }
}
