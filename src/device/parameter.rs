//! # Parameter Catalogue
//!
//! Every measurement or setting the gateway knows about is a variant of the
//! closed [`Parameter`] enumeration. Each variant maps to a register range on
//! the node, a wire encoding, a semantic type and (for writable settings) a
//! validity domain used to bound-check writes before they reach the bus.

use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Units for duration-typed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Days,
}

impl TimeUnit {
    fn seconds(self) -> u64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Days => 86_400,
        }
    }
}

/// Semantic type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    Percentage,
    Temperature,
    Enum,
    Duration(TimeUnit),
    Boolean,
    Count,
    Flags,
}

/// How a parameter is laid out in holding registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    U16,
    /// Two registers, high word first.
    U32,
    /// Signed, hundredths of a unit.
    I16Centi,
    Bool,
}

impl Encoding {
    pub fn width(self) -> u16 {
        match self {
            Encoding::U32 => 2,
            _ => 1,
        }
    }
}

/// Values a writable parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Domain {
    Range { min: f64, max: f64 },
    Choices(&'static [u16]),
}

impl Domain {
    pub fn contains(&self, value: f64) -> bool {
        match self {
            Domain::Range { min, max } => value >= *min && value <= *max,
            Domain::Choices(choices) => {
                value.fract() == 0.0 && choices.iter().any(|c| f64::from(*c) == value)
            }
        }
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Percentage(u16),
    Temperature(f64),
    Enum(u16),
    Duration(Duration),
    Boolean(bool),
    Count(u32),
    Flags(u16),
}

impl Value {
    /// Numeric view used for epsilon comparison and domain checks.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Percentage(v) | Value::Enum(v) | Value::Flags(v) => f64::from(*v),
            Value::Temperature(v) => *v,
            Value::Duration(d) => d.as_secs_f64(),
            Value::Boolean(b) => f64::from(u8::from(*b)),
            Value::Count(v) => f64::from(*v),
        }
    }

    /// Whether `other` differs from `self` by more than `epsilon`.
    pub fn differs(&self, other: &Value, epsilon: f64) -> bool {
        if std::mem::discriminant(self) != std::mem::discriminant(other) {
            return true;
        }
        let delta = (self.as_f64() - other.as_f64()).abs();
        if epsilon == 0.0 {
            delta != 0.0
        } else {
            delta > epsilon
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Percentage(v) => write!(f, "{v}%"),
            Value::Temperature(v) => write!(f, "{v:.2}°C"),
            Value::Enum(v) => write!(f, "{v}"),
            Value::Duration(d) => write!(f, "{}s", d.as_secs()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Count(v) => write!(f, "{v}"),
            Value::Flags(v) => write!(f, "0x{v:04X}"),
        }
    }
}

/// A decoded register value with its validity flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoded {
    pub value: Value,
    /// False when the node reported the "not available" sentinel.
    pub valid: bool,
}

/// Static description of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSpec {
    pub register: u16,
    pub encoding: Encoding,
    pub kind: ParameterType,
    /// `Some` for writable parameters.
    pub domain: Option<Domain>,
    /// Changes at or below this magnitude are not notified.
    pub epsilon: f64,
}

const PERCENT: Domain = Domain::Range {
    min: 0.0,
    max: 100.0,
};
const BYPASS_MODES: &[u16] = &[0, 1, 2];
const REQUESTED_SPEEDS: &[u16] = &[0, 1, 2, 3, 7, 8, 9];

/// Every parameter known to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    // Node information
    ProductId,
    RfAddress,
    SoftwareVersion,
    FaultStatus,
    /// True when RF communication with the node is lost.
    RfCommLost,
    BatteryLow,

    // Bridge
    RfLoadCurrentHour,
    RfLoadLastHour,
    MessagesSentCurrentHour,
    MessagesSentLastHour,
    Uptime,
    BindingStatus,

    // Ventilation unit measurements
    SupplyFanSpeed,
    ExhaustFanSpeed,
    SupplyFanRpm,
    ExhaustFanRpm,
    TemperatureInlet,
    TemperatureOutlet,
    TemperatureExhaust,
    TemperatureSupply,
    BypassPosition,
    BypassMode,
    CurrentVentilationSpeed,
    RequestedVentilationSpeed,
    OverrideRemainingTime,
    FilterDirty,
    FilterRemaining,
    FilterDuration,
    ErrorCode,
    Defrost,
    Postheater,
    Co2Level,
    UnitFeatures,

    // Ventilation unit settings
    PreheaterSetpoint,
    FrostProtectionSetpoint,
    FreeVentilationSetpoint,
    FreeVentilationCoolingOffset,
    Co2ControlSetpoint,
    BasicVentilationEnable,
    PresetAwaySupply,
    PresetAwayExhaust,
    PresetLowSupply,
    PresetLowExhaust,
    PresetMediumSupply,
    PresetMediumExhaust,
    PresetHighSupply,
    PresetHighExhaust,
}

impl Parameter {
    pub const ALL: [Parameter; 47] = [
        Parameter::ProductId,
        Parameter::RfAddress,
        Parameter::SoftwareVersion,
        Parameter::FaultStatus,
        Parameter::RfCommLost,
        Parameter::BatteryLow,
        Parameter::RfLoadCurrentHour,
        Parameter::RfLoadLastHour,
        Parameter::MessagesSentCurrentHour,
        Parameter::MessagesSentLastHour,
        Parameter::Uptime,
        Parameter::BindingStatus,
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

    /// Register layout, type and write domain.
    pub fn spec(self) -> ParameterSpec {
        use Encoding::*;
        use ParameterType as T;

        let read = |register, encoding, kind| ParameterSpec {
            register,
            encoding,
            kind,
            domain: None,
            epsilon: 0.0,
        };
        let write = |register, encoding, kind, domain| ParameterSpec {
            register,
            encoding,
            kind,
            domain: Some(domain),
            epsilon: 0.0,
        };
        let temperature = |register| ParameterSpec {
            register,
            encoding: I16Centi,
            kind: T::Temperature,
            domain: None,
            epsilon: 0.1,
        };
        let setpoint = |register, min, max| ParameterSpec {
            register,
            encoding: I16Centi,
            kind: T::Temperature,
            domain: Some(Domain::Range { min, max }),
            epsilon: 0.1,
        };

        match self {
            Parameter::ProductId => read(REG_PRODUCT_ID, U32, T::Count),
            Parameter::RfAddress => read(REG_RF_ADDRESS, U32, T::Count),
            Parameter::SoftwareVersion => read(REG_SOFTWARE_VERSION, U16, T::Count),
            Parameter::FaultStatus => read(REG_FAULT_STATUS, Bool, T::Boolean),
            Parameter::RfCommLost => read(REG_RF_COMM_STATUS, Bool, T::Boolean),
            Parameter::BatteryLow => read(REG_BATTERY_LOW, Bool, T::Boolean),

            Parameter::RfLoadCurrentHour => read(REG_RF_LOAD_CURRENT_HOUR, U16, T::Percentage),
            Parameter::RfLoadLastHour => read(REG_RF_LOAD_LAST_HOUR, U16, T::Percentage),
            Parameter::MessagesSentCurrentHour => {
                read(REG_MESSAGES_SENT_CURRENT_HOUR, U16, T::Count)
            }
            Parameter::MessagesSentLastHour => read(REG_MESSAGES_SENT_LAST_HOUR, U16, T::Count),
            Parameter::Uptime => read(REG_UPTIME, U32, T::Duration(TimeUnit::Seconds)),
            Parameter::BindingStatus => read(REG_BINDING_STATUS, U16, T::Enum),

            Parameter::SupplyFanSpeed => read(REG_SUPPLY_FAN_SPEED, U16, T::Percentage),
            Parameter::ExhaustFanSpeed => read(REG_EXHAUST_FAN_SPEED, U16, T::Percentage),
            Parameter::SupplyFanRpm => read(REG_SUPPLY_FAN_RPM, U16, T::Count),
            Parameter::ExhaustFanRpm => read(REG_EXHAUST_FAN_RPM, U16, T::Count),
            Parameter::TemperatureInlet => temperature(REG_TEMPERATURE_INLET),
            Parameter::TemperatureOutlet => temperature(REG_TEMPERATURE_OUTLET),
            Parameter::TemperatureExhaust => temperature(REG_TEMPERATURE_EXHAUST),
            Parameter::TemperatureSupply => temperature(REG_TEMPERATURE_SUPPLY),
            Parameter::BypassPosition => read(REG_BYPASS_POSITION, U16, T::Percentage),
            Parameter::BypassMode => {
                write(REG_BYPASS_MODE, U16, T::Enum, Domain::Choices(BYPASS_MODES))
            }
            Parameter::CurrentVentilationSpeed => {
                read(REG_CURRENT_VENTILATION_SPEED, U16, T::Enum)
            }
            Parameter::RequestedVentilationSpeed => write(
                REG_REQUESTED_VENTILATION_SPEED,
                U16,
                T::Enum,
                Domain::Choices(REQUESTED_SPEEDS),
            ),
            Parameter::OverrideRemainingTime => read(
                REG_OVERRIDE_REMAINING_TIME,
                U16,
                T::Duration(TimeUnit::Minutes),
            ),
            Parameter::FilterDirty => read(REG_FILTER_DIRTY, Bool, T::Boolean),
            Parameter::FilterRemaining => read(REG_FILTER_REMAINING, U16, T::Percentage),
            Parameter::FilterDuration => {
                read(REG_FILTER_DURATION, U16, T::Duration(TimeUnit::Days))
            }
            Parameter::ErrorCode => read(REG_ERROR_CODE, U16, T::Enum),
            Parameter::Defrost => read(REG_DEFROST, Bool, T::Boolean),
            Parameter::Postheater => read(REG_POSTHEATER, U16, T::Percentage),
            Parameter::Co2Level => read(REG_CO2_LEVEL, U16, T::Count),
            Parameter::UnitFeatures => read(REG_UNIT_FEATURES, U16, T::Flags),

            Parameter::PreheaterSetpoint => setpoint(REG_PREHEATER_SETPOINT, -20.0, 50.0),
            Parameter::FrostProtectionSetpoint => {
                setpoint(REG_FROST_PROTECTION_SETPOINT, -20.0, 50.0)
            }
            Parameter::FreeVentilationSetpoint => {
                setpoint(REG_FREE_VENTILATION_SETPOINT, 0.0, 30.0)
            }
            Parameter::FreeVentilationCoolingOffset => {
                setpoint(REG_FREE_VENTILATION_COOLING_OFFSET, 1.0, 10.0)
            }
            Parameter::Co2ControlSetpoint => write(
                REG_CO2_CONTROL_SETPOINT,
                U16,
                T::Count,
                Domain::Range {
                    min: 400.0,
                    max: 2300.0,
                },
            ),
            Parameter::BasicVentilationEnable => write(
                REG_BASIC_VENTILATION_ENABLE,
                Bool,
                T::Boolean,
                Domain::Range { min: 0.0, max: 1.0 },
            ),
            Parameter::PresetAwaySupply => write(REG_PRESET_AWAY_SUPPLY, U16, T::Percentage, PERCENT),
            Parameter::PresetAwayExhaust => {
                write(REG_PRESET_AWAY_EXHAUST, U16, T::Percentage, PERCENT)
            }
            Parameter::PresetLowSupply => write(REG_PRESET_LOW_SUPPLY, U16, T::Percentage, PERCENT),
            Parameter::PresetLowExhaust => write(REG_PRESET_LOW_EXHAUST, U16, T::Percentage, PERCENT),
            Parameter::PresetMediumSupply => {
                write(REG_PRESET_MEDIUM_SUPPLY, U16, T::Percentage, PERCENT)
            }
            Parameter::PresetMediumExhaust => {
                write(REG_PRESET_MEDIUM_EXHAUST, U16, T::Percentage, PERCENT)
            }
            Parameter::PresetHighSupply => write(REG_PRESET_HIGH_SUPPLY, U16, T::Percentage, PERCENT),
            Parameter::PresetHighExhaust => {
                write(REG_PRESET_HIGH_EXHAUST, U16, T::Percentage, PERCENT)
            }
        }
    }

    pub fn register(self) -> u16 {
        self.spec().register
    }

    /// Number of holding registers the parameter occupies.
    pub fn width(self) -> u16 {
        self.spec().encoding.width()
    }

    pub fn kind(self) -> ParameterType {
        self.spec().kind
    }

    pub fn is_writable(self) -> bool {
        self.spec().domain.is_some()
    }

    /// Stable snake_case name used in snapshots and logs.
    pub fn name(self) -> String {
        let debug = format!("{self:?}");
        let mut name = String::with_capacity(debug.len() + 4);
        for (i, ch) in debug.chars().enumerate() {
            if ch.is_ascii_uppercase() {
                if i > 0 {
                    name.push('_');
                }
                name.push(ch.to_ascii_lowercase());
            } else {
                name.push(ch);
            }
        }
        name
    }

    /// Decodes the registers returned for this parameter.
    ///
    /// Returns `None` when the register count does not match the width.
    pub fn decode(self, registers: &[u16]) -> Option<Decoded> {
        let spec = self.spec();
        if registers.len() != usize::from(spec.encoding.width()) {
            return None;
        }

        let (raw, valid) = match spec.encoding {
            Encoding::U32 => {
                let raw = (u32::from(registers[0]) << 16) | u32::from(registers[1]);
                (raw, raw != SENTINEL_U32)
            }
            Encoding::I16Centi => (u32::from(registers[0]), registers[0] != SENTINEL_I16),
            Encoding::U16 | Encoding::Bool => {
                (u32::from(registers[0]), registers[0] != SENTINEL_U16)
            }
        };

        let value = match spec.kind {
            ParameterType::Percentage => Value::Percentage(raw as u16),
            ParameterType::Temperature => Value::Temperature(f64::from(raw as u16 as i16) / 100.0),
            ParameterType::Enum => Value::Enum(raw as u16),
            ParameterType::Duration(unit) => {
                Value::Duration(Duration::from_secs(u64::from(raw) * unit.seconds()))
            }
            ParameterType::Boolean => Value::Boolean(raw != 0),
            ParameterType::Count => Value::Count(raw),
            ParameterType::Flags => Value::Flags(raw as u16),
        };

        Some(Decoded { value, valid })
    }

    /// Encodes a numeric value for writing, checking the validity domain.
    ///
    /// Returns `None` when the parameter is read-only or the value falls
    /// outside its domain.
    pub fn encode(self, value: f64) -> Option<Vec<u16>> {
        let spec = self.spec();
        let domain = spec.domain?;
        if !value.is_finite() || !domain.contains(value) {
            return None;
        }

        let registers = match spec.encoding {
            Encoding::I16Centi => vec![((value * 100.0).round() as i16) as u16],
            Encoding::Bool => vec![u16::from(value != 0.0)],
            Encoding::U16 => vec![value.round() as u16],
            Encoding::U32 => {
                let raw = value.round() as u32;
                vec![(raw >> 16) as u16, (raw & 0xFFFF) as u16]
            }
        };
        Some(registers)
    }

    /// Value as it will read back after writing `value`.
    pub fn value_of(self, value: f64) -> Option<Value> {
        let registers = self.encode(value)?;
        self.decode(&registers).map(|decoded| decoded.value)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
