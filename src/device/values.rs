//! Typed views over enumerated register values.

use super::parameter::Parameter;
use crate::constants::{
    REG_OVERRIDE_TIME_HIGH, REG_OVERRIDE_TIME_LOW, REG_OVERRIDE_TIME_MEDIUM,
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ventilation speed reported and requested by a ventilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VentilationSpeed {
    Off,
    Low,
    Medium,
    High,
    OverrideLow,
    OverrideMedium,
    OverrideHigh,
    Away,
    Boost,
    Auto,
}

impl VentilationSpeed {
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => VentilationSpeed::Off,
            1 => VentilationSpeed::Low,
            2 => VentilationSpeed::Medium,
            3 => VentilationSpeed::High,
            4 => VentilationSpeed::OverrideLow,
            5 => VentilationSpeed::OverrideMedium,
            6 => VentilationSpeed::OverrideHigh,
            7 => VentilationSpeed::Away,
            8 => VentilationSpeed::Boost,
            9 => VentilationSpeed::Auto,
            _ => return None,
        })
    }

    pub fn raw(self) -> u16 {
        match self {
            VentilationSpeed::Off => 0,
            VentilationSpeed::Low => 1,
            VentilationSpeed::Medium => 2,
            VentilationSpeed::High => 3,
            VentilationSpeed::OverrideLow => 4,
            VentilationSpeed::OverrideMedium => 5,
            VentilationSpeed::OverrideHigh => 6,
            VentilationSpeed::Away => 7,
            VentilationSpeed::Boost => 8,
            VentilationSpeed::Auto => 9,
        }
    }

    /// Override speeds are only entered through a timed preset.
    pub fn is_override(self) -> bool {
        matches!(
            self,
            VentilationSpeed::OverrideLow
                | VentilationSpeed::OverrideMedium
                | VentilationSpeed::OverrideHigh
        )
    }

    /// Feature a unit must advertise before this speed may be requested.
    pub fn required_feature(self) -> Option<UnitFeatures> {
        match self {
            VentilationSpeed::Off => Some(UnitFeatures::OFF_CAPABLE),
            VentilationSpeed::Auto => Some(UnitFeatures::AUTO_MODE),
            VentilationSpeed::Away => Some(UnitFeatures::AWAY_MODE),
            VentilationSpeed::Boost => Some(UnitFeatures::BOOST_MODE),
            _ => None,
        }
    }
}

impl fmt::Display for VentilationSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VentilationSpeed::Off => "off",
            VentilationSpeed::Low => "low",
            VentilationSpeed::Medium => "medium",
            VentilationSpeed::High => "high",
            VentilationSpeed::OverrideLow => "override low",
            VentilationSpeed::OverrideMedium => "override medium",
            VentilationSpeed::OverrideHigh => "override high",
            VentilationSpeed::Away => "away",
            VentilationSpeed::Boost => "boost",
            VentilationSpeed::Auto => "auto",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BypassMode {
    Close,
    Open,
    Auto,
}

impl BypassMode {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(BypassMode::Close),
            1 => Some(BypassMode::Open),
            2 => Some(BypassMode::Auto),
            _ => None,
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            BypassMode::Close => 0,
            BypassMode::Open => 1,
            BypassMode::Auto => 2,
        }
    }
}

/// Progress of a bind operation as reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingStatus {
    Idle,
    OutgoingInProgress,
    OutgoingCompleted,
    OutgoingFailed,
    IncomingInProgress,
    IncomingCompleted,
    IncomingFailed,
}

impl BindingStatus {
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => BindingStatus::Idle,
            1 => BindingStatus::OutgoingInProgress,
            2 => BindingStatus::OutgoingCompleted,
            3 => BindingStatus::OutgoingFailed,
            4 => BindingStatus::IncomingInProgress,
            5 => BindingStatus::IncomingCompleted,
            6 => BindingStatus::IncomingFailed,
            _ => return None,
        })
    }

    pub fn raw(self) -> u16 {
        match self {
            BindingStatus::Idle => 0,
            BindingStatus::OutgoingInProgress => 1,
            BindingStatus::OutgoingCompleted => 2,
            BindingStatus::OutgoingFailed => 3,
            BindingStatus::IncomingInProgress => 4,
            BindingStatus::IncomingCompleted => 5,
            BindingStatus::IncomingFailed => 6,
        }
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            BindingStatus::OutgoingInProgress | BindingStatus::IncomingInProgress
        )
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            BindingStatus::OutgoingCompleted | BindingStatus::IncomingCompleted
        )
    }
}

/// Named fan speed preset of a ventilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Preset {
    Away,
    Low,
    Medium,
    High,
}

impl Preset {
    /// Supply and exhaust parameters holding this preset's fan speeds.
    pub fn fan_speed_parameters(self) -> (Parameter, Parameter) {
        match self {
            Preset::Away => (Parameter::PresetAwaySupply, Parameter::PresetAwayExhaust),
            Preset::Low => (Parameter::PresetLowSupply, Parameter::PresetLowExhaust),
            Preset::Medium => (Parameter::PresetMediumSupply, Parameter::PresetMediumExhaust),
            Preset::High => (Parameter::PresetHighSupply, Parameter::PresetHighExhaust),
        }
    }

    /// Register that starts a timed override at this preset, if any.
    pub fn override_register(self) -> Option<u16> {
        match self {
            Preset::Away => None,
            Preset::Low => Some(REG_OVERRIDE_TIME_LOW),
            Preset::Medium => Some(REG_OVERRIDE_TIME_MEDIUM),
            Preset::High => Some(REG_OVERRIDE_TIME_HIGH),
        }
    }

    /// Speed the unit reports while a timed override at this preset runs.
    pub fn override_speed(self) -> Option<VentilationSpeed> {
        match self {
            Preset::Away => None,
            Preset::Low => Some(VentilationSpeed::OverrideLow),
            Preset::Medium => Some(VentilationSpeed::OverrideMedium),
            Preset::High => Some(VentilationSpeed::OverrideHigh),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Away => f.write_str("away"),
            Preset::Low => f.write_str("low"),
            Preset::Medium => f.write_str("medium"),
            Preset::High => f.write_str("high"),
        }
    }
}

/// Reset applied by a device reset command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetMode {
    /// Restart the node, keep settings.
    Soft,
    /// Restore factory settings, drops all bindings on the bridge.
    Factory,
}

impl ResetMode {
    pub fn raw(self) -> u16 {
        match self {
            ResetMode::Soft => 1,
            ResetMode::Factory => 2,
        }
    }
}

bitflags! {
    /// Optional features a ventilation unit advertises.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct UnitFeatures: u16 {
        const OFF_CAPABLE = 0b0000_0001;
        const AUTO_MODE   = 0b0000_0010;
        const AWAY_MODE   = 0b0000_0100;
        const BOOST_MODE  = 0b0000_1000;
        /// Timed overrides via the override time registers.
        const TIMER       = 0b0001_0000;
    }
}
