//! # Command Dispatcher
//!
//! Accepts commands from the outside, checks them against the registry and
//! the parameter domains, sends them through the bus and tracks each one in
//! a pending table until it completes:
//!
//! ```text
//! Submitted -> Sent -> Acked
//!                   -> TimedOut -> (backoff) -> Sent ...
//!                   -> Rejected
//! ```
//!
//! A timed out command is retried with exponential backoff up to the
//! configured number of retries. A rejected command is never retried. An
//! acknowledged command updates the state cache optimistically; the next poll
//! reconciles those values with what the device reports.

use crate::bus::Bus;
use crate::config::CommandSettings;
use crate::constants::{
    MAX_OVERRIDE_MINUTES, REG_FILTER_RESET, REG_RESET_COMMAND, REG_UNBIND_COMMAND,
};
use crate::device::{
    BindingStatus, BypassMode, Device, DeviceKind, DeviceRegistry, Parameter, Preset, ResetMode,
    UnitFeatures, Value, VentilationSpeed,
};
use crate::error::{CommandFailed, TransportError};
use crate::protocol::{BindMode, MessageKind, ProtocolMessage};
use crate::state::StateCache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// A command intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Bind a node to the bridge; sent to the bridge.
    Bind {
        mode: BindMode,
        node: u8,
        product_id: u32,
        rf_serial: Option<u32>,
    },
    /// Remove a node from the bridge; sent to the bridge.
    Unbind { node: u8 },
    DeviceReset,
    FactoryReset,
    FilterReset,
    SetPresetFanSpeed {
        preset: Preset,
        supply: u8,
        exhaust: u8,
    },
    /// Temporary override at a preset for `minutes`.
    SetPresetModeDuration { preset: Preset, minutes: u16 },
    SetVentilationSpeed { speed: VentilationSpeed },
    SetBypassMode { mode: BypassMode },
    SetSetpoint { parameter: Parameter, value: f64 },
    SetBasicVentilation { enabled: bool },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Bind { .. } => "bind",
            Command::Unbind { .. } => "unbind",
            Command::DeviceReset => "device reset",
            Command::FactoryReset => "factory reset",
            Command::FilterReset => "filter reset",
            Command::SetPresetFanSpeed { .. } => "set preset fan speed",
            Command::SetPresetModeDuration { .. } => "set preset mode duration",
            Command::SetVentilationSpeed { .. } => "set ventilation speed",
            Command::SetBypassMode { .. } => "set bypass mode",
            Command::SetSetpoint { .. } => "set setpoint",
            Command::SetBasicVentilation { .. } => "set basic ventilation",
        }
    }

    /// Device kinds that accept this command.
    fn accepted_by(&self, kind: DeviceKind) -> bool {
        match self {
            Command::Bind { .. } | Command::Unbind { .. } => kind == DeviceKind::Bridge,
            Command::DeviceReset | Command::FactoryReset => true,
            Command::FilterReset
            | Command::SetPresetFanSpeed { .. }
            | Command::SetPresetModeDuration { .. }
            | Command::SetVentilationSpeed { .. }
            | Command::SetBypassMode { .. }
            | Command::SetSetpoint { .. }
            | Command::SetBasicVentilation { .. } => kind == DeviceKind::VentilationUnit,
        }
    }
}

/// A command addressed to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub target: u8,
    #[serde(flatten)]
    pub command: Command,
}

impl CommandRequest {
    pub fn new(target: u8, command: Command) -> Self {
        Self { target, command }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Submitted,
    Sent,
    TimedOut,
    Acked,
    Rejected,
}

/// Tracking entry for a command in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingCommand {
    pub id: u64,
    pub target: u8,
    pub expected_ack: MessageKind,
    pub submitted_at: DateTime<Utc>,
    pub retries: u32,
    pub state: CommandState,
}

/// Result of an acknowledged command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub id: u64,
    /// Total sends, including the first.
    pub attempts: u32,
    pub response: ProtocolMessage,
}

/// Wire message plus the values it is expected to establish.
struct Plan {
    message: ProtocolMessage,
    optimistic: Vec<(Parameter, Value)>,
}

pub struct CommandDispatcher {
    bus: Arc<dyn Bus>,
    registry: Arc<DeviceRegistry>,
    cache: Arc<StateCache>,
    settings: CommandSettings,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingCommand>>,
}

impl CommandDispatcher {
    pub fn new(
        bus: Arc<dyn Bus>,
        registry: Arc<DeviceRegistry>,
        cache: Arc<StateCache>,
        settings: CommandSettings,
    ) -> Self {
        Self {
            bus,
            registry,
            cache,
            settings,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    /// Commands currently tracked, oldest first.
    pub fn pending(&self) -> Vec<PendingCommand> {
        let mut out: Vec<PendingCommand> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }

    pub async fn submit(&self, request: CommandRequest) -> Result<CommandOutcome, CommandFailed> {
        self.submit_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Submits a command that can be cancelled between attempts.
    pub async fn submit_with_cancel(
        &self,
        request: CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, CommandFailed> {
        let device = self.registry.lookup(request.target)?;
        let plan = self.plan(&device, &request.command)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let expected_ack = plan
            .message
            .expected_ack()
            .unwrap_or(MessageKind::WriteAck);

        log::info!("Command #{id}: {} for {}", request.command.name(), device.label());
        self.track(PendingCommand {
            id,
            target: request.target,
            expected_ack,
            submitted_at: Utc::now(),
            retries: 0,
            state: CommandState::Submitted,
        });

        let result = self.drive(id, &plan.message, cancel).await;
        self.untrack(id);

        let (response, attempts) = match result {
            Ok(ok) => ok,
            Err(e) => {
                log::error!("Command #{id} ({}) failed: {e}", request.command.name());
                return Err(e);
            }
        };

        let now = Utc::now();
        for (parameter, value) in plan.optimistic {
            if let Err(e) = self.cache.apply_optimistic(request.target, parameter, value, now) {
                log::debug!("Skipping optimistic {parameter}: {e}");
            }
        }

        Ok(CommandOutcome {
            id,
            attempts,
            response,
        })
    }

    /// Sends until acked, rejected, cancelled or out of retries.
    async fn drive(
        &self,
        id: u64,
        message: &ProtocolMessage,
        cancel: &CancellationToken,
    ) -> Result<(ProtocolMessage, u32), CommandFailed> {
        let mut retries = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(CommandFailed::Cancelled);
            }

            self.set_state(id, CommandState::Sent, retries);
            let failure = match self
                .bus
                .send_and_await(message, self.settings.ack_timeout())
                .await
            {
                Ok(ProtocolMessage::Error { code, .. }) => {
                    self.set_state(id, CommandState::Rejected, retries);
                    return Err(CommandFailed::Rejected(code));
                }
                Ok(response) => {
                    self.set_state(id, CommandState::Acked, retries);
                    return Ok((response, retries + 1));
                }
                Err(TransportError::Timeout) => CommandFailed::Timeout,
                Err(TransportError::Framing(_) | TransportError::UnexpectedResponse(_)) => {
                    CommandFailed::Framing
                }
                Err(TransportError::Io(reason)) => return Err(CommandFailed::Io(reason)),
                Err(TransportError::Encode(e)) => return Err(CommandFailed::Encode(e)),
            };

            if retries >= self.settings.max_retries {
                return Err(failure);
            }
            retries += 1;
            self.set_state(id, CommandState::TimedOut, retries);

            let delay = self.settings.backoff(retries);
            log::warn!(
                "Command #{id}: {failure}, retry {retries}/{} in {delay:?}",
                self.settings.max_retries
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(CommandFailed::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }

    fn plan(&self, device: &Device, command: &Command) -> Result<Plan, CommandFailed> {
        let address = device.address;
        if !command.accepted_by(device.kind) {
            return Err(CommandFailed::Unsupported {
                address,
                reason: format!("{} is not accepted by a {}", command.name(), device.kind),
            });
        }

        let write = |register: u16, values: Vec<u16>| ProtocolMessage::WriteRequest {
            address,
            register,
            values,
        };

        let plan = match command {
            Command::Bind {
                mode,
                node,
                product_id,
                rf_serial,
            } => {
                if *node == address {
                    return Err(CommandFailed::Unsupported {
                        address,
                        reason: "cannot bind the bridge address".to_string(),
                    });
                }
                let status = match mode {
                    BindMode::Controller => BindingStatus::OutgoingInProgress,
                    BindMode::Accessory { .. } => BindingStatus::IncomingInProgress,
                };
                Plan {
                    message: ProtocolMessage::BindRequest {
                        address,
                        mode: *mode,
                        node: *node,
                        product_id: *product_id,
                        rf_serial: *rf_serial,
                    },
                    optimistic: vec![(Parameter::BindingStatus, Value::Enum(status.raw()))],
                }
            }
            Command::Unbind { node } => Plan {
                message: write(REG_UNBIND_COMMAND, vec![u16::from(*node)]),
                optimistic: Vec::new(),
            },
            Command::DeviceReset => Plan {
                message: write(REG_RESET_COMMAND, vec![ResetMode::Soft.raw()]),
                optimistic: Vec::new(),
            },
            Command::FactoryReset => Plan {
                message: write(REG_RESET_COMMAND, vec![ResetMode::Factory.raw()]),
                optimistic: Vec::new(),
            },
            Command::FilterReset => Plan {
                message: write(REG_FILTER_RESET, vec![0]),
                optimistic: vec![(Parameter::FilterDirty, Value::Boolean(false))],
            },
            Command::SetPresetFanSpeed {
                preset,
                supply,
                exhaust,
            } => {
                let (supply_param, exhaust_param) = preset.fan_speed_parameters();
                let supply_regs = encode_checked(supply_param, f64::from(*supply))?;
                let exhaust_regs = encode_checked(exhaust_param, f64::from(*exhaust))?;
                let mut values = supply_regs;
                values.extend(exhaust_regs);
                Plan {
                    message: write(supply_param.register(), values),
                    optimistic: vec![
                        (supply_param, Value::Percentage(u16::from(*supply))),
                        (exhaust_param, Value::Percentage(u16::from(*exhaust))),
                    ],
                }
            }
            Command::SetPresetModeDuration { preset, minutes } => {
                let (Some(register), Some(speed)) =
                    (preset.override_register(), preset.override_speed())
                else {
                    return Err(CommandFailed::Unsupported {
                        address,
                        reason: format!("no timed override for the {preset} preset"),
                    });
                };
                if *minutes == 0 || *minutes > MAX_OVERRIDE_MINUTES {
                    return Err(CommandFailed::OutOfRange {
                        parameter: Parameter::OverrideRemainingTime,
                        value: f64::from(*minutes),
                    });
                }
                self.require_feature(address, UnitFeatures::TIMER, "timer")?;
                Plan {
                    message: write(register, vec![*minutes]),
                    optimistic: vec![
                        (
                            Parameter::OverrideRemainingTime,
                            Value::Duration(Duration::from_secs(u64::from(*minutes) * 60)),
                        ),
                        (Parameter::CurrentVentilationSpeed, Value::Enum(speed.raw())),
                    ],
                }
            }
            Command::SetVentilationSpeed { speed } => {
                let parameter = Parameter::RequestedVentilationSpeed;
                let values = encode_checked(parameter, f64::from(speed.raw()))?;
                if let Some(feature) = speed.required_feature() {
                    self.require_feature(address, feature, &speed.to_string())?;
                }
                Plan {
                    message: write(parameter.register(), values),
                    optimistic: vec![(parameter, Value::Enum(speed.raw()))],
                }
            }
            Command::SetBypassMode { mode } => {
                let parameter = Parameter::BypassMode;
                let values = encode_checked(parameter, f64::from(mode.raw()))?;
                Plan {
                    message: write(parameter.register(), values),
                    optimistic: vec![(parameter, Value::Enum(mode.raw()))],
                }
            }
            Command::SetSetpoint { parameter, value } => {
                if !parameter.is_writable() {
                    return Err(CommandFailed::Unsupported {
                        address,
                        reason: format!("{parameter} is read-only"),
                    });
                }
                let values = encode_checked(*parameter, *value)?;
                let optimistic = parameter
                    .decode(&values)
                    .map(|decoded| vec![(*parameter, decoded.value)])
                    .unwrap_or_default();
                Plan {
                    message: write(parameter.register(), values),
                    optimistic,
                }
            }
            Command::SetBasicVentilation { enabled } => {
                let parameter = Parameter::BasicVentilationEnable;
                Plan {
                    message: write(parameter.register(), vec![u16::from(*enabled)]),
                    optimistic: vec![(parameter, Value::Boolean(*enabled))],
                }
            }
        };
        Ok(plan)
    }

    /// Refuses when the unit's feature flags are known and lack `feature`.
    fn require_feature(
        &self,
        address: u8,
        feature: UnitFeatures,
        what: &str,
    ) -> Result<(), CommandFailed> {
        let known = self
            .cache
            .read(address, Parameter::UnitFeatures)
            .reading()
            .filter(|r| r.valid)
            .and_then(|r| match r.value {
                Value::Flags(bits) => Some(UnitFeatures::from_bits_truncate(bits)),
                _ => None,
            });
        match known {
            Some(features) if !features.contains(feature) => Err(CommandFailed::Unsupported {
                address,
                reason: format!("unit does not support {what}"),
            }),
            _ => Ok(()),
        }
    }

    fn track(&self, pending: PendingCommand) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pending.id, pending);
    }

    fn untrack(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn set_state(&self, id: u64, state: CommandState, retries: u32) {
        if let Some(entry) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            log::trace!("Command #{id}: {:?} -> {state:?}", entry.state);
            entry.state = state;
            entry.retries = retries;
        }
    }
}

fn encode_checked(parameter: Parameter, value: f64) -> Result<Vec<u16>, CommandFailed> {
    parameter
        .encode(value)
        .ok_or(CommandFailed::OutOfRange { parameter, value })
}
