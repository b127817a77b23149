//! Commands consumed by the `BackendActor` (spec §6 "Commands (consumed by actor)").
//!
//! Priority follows spec §4.1: Abort > Control > Normal.

use crate::model::ChannelMode;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandPriority {
    Normal = 0,
    Control = 1,
    Abort = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerMode {
    Software,
    Hardware,
    Continuous,
}

#[derive(Clone, Debug)]
pub enum Command {
    // Live
    StartLive,
    StopLive,
    SetTriggerMode(TriggerMode),
    SetTriggerFps(f64),
    UpdateIllumination { intensity: f64 },
    SetDisplayResolutionScaling(f64),
    SetFilterAutoSwitch(bool),

    // Mode
    SetMicroscopeMode(ChannelMode),
    UpdateChannelConfiguration(ChannelMode),

    // Peripherals
    SetObjective(String),
    SetPiezoPosition(f64),
    MovePiezoRelative(f64),

    // Autofocus
    StartAutofocus,
    StopAutofocus,
    SetAutofocusParams { sweep_range_um: f64, step_um: f64 },

    // Laser AF
    SetLaserAfProperties(crate::model::LaserAFConfig),
    InitializeLaserAf,
    SetLaserAfCharacterizationMode(bool),
    UpdateLaserAfThreshold(f64),
    MoveToLaserAfTarget(f64),
    SetLaserAfReference,
    MeasureLaserAfDisplacement { search_for_spot: bool },
    CaptureLaserAfFrame,

    // Acquisition
    StartAcquisition {
        experiment_id: Option<String>,
        acquire_current_fov: bool,
    },
    StopAcquisition,
    PauseAcquisition,
    ResumeAcquisition,
    SetFluidicsRounds(u32),
    SetAcquisitionParameters(Box<crate::model::AcquisitionParameters>),
    SetAcquisitionPath(PathBuf),
    SetAcquisitionChannels(Vec<ChannelMode>),
    StartNewExperiment(String),
}

impl Command {
    /// Static priority classification (spec §4.1).
    pub fn priority(&self) -> CommandPriority {
        match self {
            Command::StopAcquisition | Command::StopLive | Command::StopAutofocus => {
                CommandPriority::Abort
            }
            Command::StartAcquisition { .. }
            | Command::StartLive
            | Command::PauseAcquisition
            | Command::ResumeAcquisition
            | Command::StartAutofocus
            | Command::MoveToLaserAfTarget(_)
            | Command::InitializeLaserAf => CommandPriority::Control,
            _ => CommandPriority::Normal,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Command::StartLive => "StartLive",
            Command::StopLive => "StopLive",
            Command::SetTriggerMode(_) => "SetTriggerMode",
            Command::SetTriggerFps(_) => "SetTriggerFPS",
            Command::UpdateIllumination { .. } => "UpdateIllumination",
            Command::SetDisplayResolutionScaling(_) => "SetDisplayResolutionScaling",
            Command::SetFilterAutoSwitch(_) => "SetFilterAutoSwitch",
            Command::SetMicroscopeMode(_) => "SetMicroscopeMode",
            Command::UpdateChannelConfiguration(_) => "UpdateChannelConfiguration",
            Command::SetObjective(_) => "SetObjective",
            Command::SetPiezoPosition(_) => "SetPiezoPosition",
            Command::MovePiezoRelative(_) => "MovePiezoRelative",
            Command::StartAutofocus => "StartAutofocus",
            Command::StopAutofocus => "StopAutofocus",
            Command::SetAutofocusParams { .. } => "SetAutofocusParams",
            Command::SetLaserAfProperties(_) => "SetLaserAFProperties",
            Command::InitializeLaserAf => "InitializeLaserAF",
            Command::SetLaserAfCharacterizationMode(_) => "SetLaserAFCharacterizationMode",
            Command::UpdateLaserAfThreshold(_) => "UpdateLaserAFThreshold",
            Command::MoveToLaserAfTarget(_) => "MoveToLaserAFTarget",
            Command::SetLaserAfReference => "SetLaserAFReference",
            Command::MeasureLaserAfDisplacement { .. } => "MeasureLaserAFDisplacement",
            Command::CaptureLaserAfFrame => "CaptureLaserAFFrame",
            Command::StartAcquisition { .. } => "StartAcquisition",
            Command::StopAcquisition => "StopAcquisition",
            Command::PauseAcquisition => "PauseAcquisition",
            Command::ResumeAcquisition => "ResumeAcquisition",
            Command::SetFluidicsRounds(_) => "SetFluidicsRounds",
            Command::SetAcquisitionParameters(_) => "SetAcquisitionParameters",
            Command::SetAcquisitionPath(_) => "SetAcquisitionPath",
            Command::SetAcquisitionChannels(_) => "SetAcquisitionChannels",
            Command::StartNewExperiment(_) => "StartNewExperiment",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_outranks_control_and_normal() {
        assert!(Command::StopAcquisition.priority() > Command::StartAcquisition { experiment_id: None, acquire_current_fov: false }.priority());
        assert!(Command::StartAcquisition { experiment_id: None, acquire_current_fov: false }.priority() > Command::SetTriggerFps(10.0).priority());
    }
}
