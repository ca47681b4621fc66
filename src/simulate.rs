use crate::{
    probe::HostInspector,
    properties::HardeningProperty,
};

/// Oldest sandbox runner carrying the stream pass-through mode we rely on.
pub const MIN_RUNNER_VERSION: u32 = 236;

/// Decision of the degradation chain: either re-exec inside a transient unit
/// with the imported properties, or run the plugin directly as this tool
/// always has.
#[derive(Debug, PartialEq, Eq)]
pub enum Plan {
    Direct(SkipReason),
    Sandbox(Vec<HardeningProperty>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SimulationDisabled,
    NoUnitManager,
    NoTransientUnitPermission,
    RunnerVersionUnknown,
    RunnerTooOld(u32),
    ImportFailed,
}

impl SkipReason {
    /// Debug note for the conditions worth telling the operator about.
    /// Disabled simulation and a missing or unqueryable unit are the normal
    /// course of things and stay silent.
    pub fn debug_note(&self) -> Option<String> {
        match self {
            Self::NoTransientUnitPermission => Some(
                "not permitted to create transient units, running plugin directly".to_string(),
            ),
            Self::RunnerVersionUnknown => Some(format!(
                "sandbox runner version unknown (need >= {MIN_RUNNER_VERSION}), running plugin directly"
            )),
            Self::RunnerTooOld(version) => Some(format!(
                "sandbox runner version {version} is older than {MIN_RUNNER_VERSION}, running plugin directly"
            )),
            Self::SimulationDisabled | Self::NoUnitManager | Self::ImportFailed => None,
        }
    }
}

/// The degradation state machine. Conditions are evaluated strictly in order,
/// first match wins, each at most once per invocation; every disqualifying
/// condition fails open toward direct execution.
pub fn plan(disabled: bool, unit: &str, inspector: &impl HostInspector) -> Plan {
    if disabled {
        return Plan::Direct(SkipReason::SimulationDisabled);
    }

    if !inspector.has_unit_manager() {
        return Plan::Direct(SkipReason::NoUnitManager);
    }

    if !inspector.can_create_transient_unit() {
        return Plan::Direct(SkipReason::NoTransientUnitPermission);
    }

    match inspector.sandbox_runner_version() {
        None => return Plan::Direct(SkipReason::RunnerVersionUnknown),
        Some(version) if version < MIN_RUNNER_VERSION => {
            return Plan::Direct(SkipReason::RunnerTooOld(version));
        }
        Some(_) => {}
    }

    match inspector.unit_properties(unit) {
        // An empty property list still sandboxes: the transient unit changes
        // process ancestry and stream wiring even with no extra restrictions.
        Ok(properties) => Plan::Sandbox(properties),
        Err(_) => Plan::Direct(SkipReason::ImportFailed),
    }
}
