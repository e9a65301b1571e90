//! # Device Model
//!
//! Devices reachable through the bridge: the bridge itself, bound ventilation
//! units (controllers) and bound accessories such as remotes and sensors.
//! Each device has a Modbus address that is unique on the bus, a
//! [`DeviceKind`] and the set of [`Parameter`]s it is polled for.

pub mod parameter;
pub mod registry;
pub mod values;

pub use parameter::{
    Decoded, Domain, Encoding, Parameter, ParameterSpec, ParameterType, TimeUnit, Value,
};
pub use registry::{DeviceList, DeviceRegistry};
pub use values::{BindingStatus, BypassMode, Preset, ResetMode, UnitFeatures, VentilationSpeed};

use crate::constants::{
    PRODUCT_ID_BRDG_02R13, PRODUCT_ID_VMD_02RPS78, PRODUCT_ID_VMD_07RPS13, PRODUCT_ID_VMN_02LM11,
    PRODUCT_ID_VMN_05LM02,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The role a device plays on the RF network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Bridge,
    VentilationUnit,
    Accessory,
}

const NODE_INFO: &[Parameter] = &[
    Parameter::ProductId,
    Parameter::RfAddress,
    Parameter::SoftwareVersion,
];

const BRIDGE_PARAMETERS: &[Parameter] = &[
    Parameter::RfLoadCurrentHour,
    Parameter::RfLoadLastHour,
    Parameter::MessagesSentCurrentHour,
    Parameter::MessagesSentLastHour,
    Parameter::Uptime,
    Parameter::BindingStatus,
];

const VENTILATION_UNIT_PARAMETERS: &[Parameter] = &[
    Parameter::FaultStatus,
    Parameter::RfCommLost,
    Parameter::SupplyFanSpeed,
    Parameter::ExhaustFanSpeed,
    Parameter::SupplyFanRpm,
    Parameter::ExhaustFanRpm,
    Parameter::TemperatureInlet,
    Parameter::TemperatureOutlet,
    Parameter::TemperatureExhaust,
    Parameter::TemperatureSupply,
    Parameter::BypassPosition,
    Parameter::BypassMode,
    Parameter::CurrentVentilationSpeed,
    Parameter::RequestedVentilationSpeed,
    Parameter::OverrideRemainingTime,
    Parameter::FilterDirty,
    Parameter::FilterRemaining,
    Parameter::FilterDuration,
    Parameter::ErrorCode,
    Parameter::Defrost,
    Parameter::Postheater,
    Parameter::Co2Level,
    Parameter::UnitFeatures,
    Parameter::PreheaterSetpoint,
    Parameter::FrostProtectionSetpoint,
    Parameter::FreeVentilationSetpoint,
    Parameter::FreeVentilationCoolingOffset,
    Parameter::Co2ControlSetpoint,
    Parameter::BasicVentilationEnable,
    Parameter::PresetAwaySupply,
    Parameter::PresetAwayExhaust,
    Parameter::PresetLowSupply,
    Parameter::PresetLowExhaust,
    Parameter::PresetMediumSupply,
    Parameter::PresetMediumExhaust,
    Parameter::PresetHighSupply,
    Parameter::PresetHighExhaust,
];

const ACCESSORY_PARAMETERS: &[Parameter] = &[
    Parameter::FaultStatus,
    Parameter::RfCommLost,
    Parameter::BatteryLow,
];

impl DeviceKind {
    /// Parameters polled for a device of this kind unless narrowed.
    pub fn default_capabilities(self) -> BTreeSet<Parameter> {
        let specific = match self {
            DeviceKind::Bridge => BRIDGE_PARAMETERS,
            DeviceKind::VentilationUnit => VENTILATION_UNIT_PARAMETERS,
            DeviceKind::Accessory => ACCESSORY_PARAMETERS,
        };
        NODE_INFO.iter().chain(specific).copied().collect()
    }

    /// Device kind implied by a product id read from the node.
    pub fn from_product_id(product_id: u32) -> Option<Self> {
        match product_id {
            PRODUCT_ID_BRDG_02R13 => Some(DeviceKind::Bridge),
            PRODUCT_ID_VMD_02RPS78 | PRODUCT_ID_VMD_07RPS13 => Some(DeviceKind::VentilationUnit),
            PRODUCT_ID_VMN_05LM02 | PRODUCT_ID_VMN_02LM11 => Some(DeviceKind::Accessory),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Bridge => write!(f, "bridge"),
            DeviceKind::VentilationUnit => write!(f, "ventilation unit"),
            DeviceKind::Accessory => write!(f, "accessory"),
        }
    }
}

/// Human readable product name for known product ids.
pub fn product_name(product_id: u32) -> Option<&'static str> {
    match product_id {
        PRODUCT_ID_BRDG_02R13 => Some("BRDG-02R13"),
        PRODUCT_ID_VMD_02RPS78 => Some("VMD-02RPS78"),
        PRODUCT_ID_VMD_07RPS13 => Some("VMD-07RPS13"),
        PRODUCT_ID_VMN_05LM02 => Some("VMN-05LM02"),
        PRODUCT_ID_VMN_02LM11 => Some("VMN-02LM11"),
        _ => None,
    }
}

/// Descriptive data that does not affect identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub name: Option<String>,
    pub product_id: Option<u32>,
    pub rf_address: Option<u32>,
}

/// A device addressable through the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub address: u8,
    pub kind: DeviceKind,
    pub capabilities: BTreeSet<Parameter>,
    pub metadata: DeviceMetadata,
}

impl Device {
    /// Creates a device with the default capability set of its kind.
    pub fn new(address: u8, kind: DeviceKind) -> Self {
        Self {
            address,
            kind,
            capabilities: kind.default_capabilities(),
            metadata: DeviceMetadata::default(),
        }
    }

    /// Narrows the polled parameters to `capabilities`.
    pub fn with_capabilities<I>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = Parameter>,
    {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = Some(name.into());
        self
    }

    pub fn with_product_id(mut self, product_id: u32) -> Self {
        self.metadata.product_id = Some(product_id);
        self
    }

    pub fn with_rf_address(mut self, rf_address: u32) -> Self {
        self.metadata.rf_address = Some(rf_address);
        self
    }

    pub fn supports(&self, parameter: Parameter) -> bool {
        self.capabilities.contains(&parameter)
    }

    /// Name used in logs: the configured name or kind and address.
    pub fn label(&self) -> String {
        match &self.metadata.name {
            Some(name) => format!("{name}@{}", self.address),
            None => format!("{}@{}", self.kind, self.address),
        }
    }
}
