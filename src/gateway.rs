//! # Gateway
//!
//! Wires the registry, state cache, poll scheduler and command dispatcher
//! around one [`Bus`] and exposes what a host platform needs: a state
//! snapshot, reads, change notifications and command submission. It also
//! owns the flows that span several bus transactions: identifying the bridge
//! at startup, binding new nodes and unbinding them.

use crate::bus::transport::deadline_after;
use crate::bus::Bus;
use crate::command::{Command, CommandDispatcher, CommandOutcome, CommandRequest};
use crate::config::GatewayConfig;
use crate::constants::PRODUCT_ID_BRDG_02R13;
use crate::device::{
    product_name, BindingStatus, Decoded, Device, DeviceKind, DeviceMetadata, DeviceRegistry,
    Parameter, Value,
};
use crate::error::{CommandFailed, GatewayError, RegistryError};
use crate::poll::{CycleReport, PollScheduler};
use crate::protocol::{BindMode, ProtocolMessage};
use crate::state::{ReadResult, Reading, ReadingSource, StateCache, StateChange};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Serialisable view of everything the gateway knows.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub devices: Vec<DeviceSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub address: u8,
    pub kind: DeviceKind,
    pub metadata: DeviceMetadata,
    pub capabilities: Vec<Parameter>,
    pub available: bool,
    pub readings: Vec<ReadingSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadingSnapshot {
    pub parameter: Parameter,
    pub value: Value,
    pub valid: bool,
    pub stale: bool,
    pub source: ReadingSource,
    pub timestamp: DateTime<Utc>,
}

pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<DeviceRegistry>,
    cache: Arc<StateCache>,
    scheduler: PollScheduler,
    dispatcher: CommandDispatcher,
}

impl Gateway {
    /// Builds the components without touching the bus.
    pub fn new(bus: Arc<dyn Bus>, config: GatewayConfig) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let cache = Arc::new(StateCache::new(
            Arc::clone(&registry),
            config.poll.max_age(),
        ));
        let scheduler = PollScheduler::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            Arc::clone(&cache),
            config.poll.clone(),
        );
        let dispatcher = CommandDispatcher::new(
            bus,
            Arc::clone(&registry),
            Arc::clone(&cache),
            config.command.clone(),
        );
        Self {
            config,
            registry,
            cache,
            scheduler,
            dispatcher,
        }
    }

    /// Identifies the bridge, then registers it and the configured devices.
    pub async fn start(bus: Arc<dyn Bus>, config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let gateway = Self::new(bus, config);
        gateway.identify_bridge().await?;

        for entry in &gateway.config.devices {
            let device = entry.to_device();
            log::info!("Registering {} ({} parameters)", device.label(), device.capabilities.len());
            gateway.registry.register(device)?;
        }
        Ok(gateway)
    }

    async fn identify_bridge(&self) -> Result<(), GatewayError> {
        let address = self.config.bridge_address;
        let product_id = self.read_u32(address, Parameter::ProductId).await?;
        if product_id != PRODUCT_ID_BRDG_02R13 {
            return Err(GatewayError::UnexpectedBridge(format!(
                "product id 0x{product_id:08X} at address {address}"
            )));
        }

        let rf_address = self.read_u32(address, Parameter::RfAddress).await?;
        if let Some(expected) = self.config.expected_bridge_rf_address {
            if expected != rf_address {
                return Err(GatewayError::UnexpectedBridge(format!(
                    "RF address 0x{rf_address:06X}, expected 0x{expected:06X}"
                )));
            }
        }

        let mut bridge = Device::new(address, DeviceKind::Bridge)
            .with_product_id(product_id)
            .with_rf_address(rf_address);
        if let Some(name) = product_name(product_id) {
            bridge = bridge.with_name(name);
        }
        log::info!("Found {} with RF address 0x{rf_address:06X}", bridge.label());
        self.registry.register(bridge)?;
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn read(&self, address: u8, parameter: Parameter) -> ReadResult {
        self.cache.read(address, parameter)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.cache.subscribe()
    }

    pub async fn submit(&self, request: CommandRequest) -> Result<CommandOutcome, CommandFailed> {
        self.dispatcher.submit(request).await
    }

    /// Runs a single poll cycle.
    pub async fn poll_once(&self) -> CycleReport {
        self.scheduler.run_cycle(&CancellationToken::new()).await
    }

    /// Polls until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        self.scheduler.run(cancel).await
    }

    pub fn snapshot(&self) -> Snapshot {
        let now = Utc::now();
        let unavailable: HashSet<u8> = self.scheduler.unavailable_devices().into_iter().collect();
        let devices = self
            .registry
            .list(None)
            .iter()
            .map(|device| DeviceSnapshot {
                address: device.address,
                kind: device.kind,
                metadata: device.metadata.clone(),
                capabilities: device.capabilities.iter().copied().collect(),
                available: !unavailable.contains(&device.address),
                readings: self
                    .cache
                    .readings_for(device.address)
                    .into_iter()
                    .map(|reading| self.reading_snapshot(reading, now))
                    .collect(),
            })
            .collect();
        Snapshot {
            taken_at: now,
            devices,
        }
    }

    fn reading_snapshot(&self, reading: Reading, now: DateTime<Utc>) -> ReadingSnapshot {
        ReadingSnapshot {
            stale: self.cache.is_stale(&reading, now),
            parameter: reading.parameter,
            value: reading.value,
            valid: reading.valid,
            source: reading.source,
            timestamp: reading.timestamp,
        }
    }

    /// Binds a ventilation unit to the bridge at `node`.
    pub async fn bind_controller(
        &self,
        node: u8,
        product_id: u32,
        rf_serial: Option<u32>,
    ) -> Result<Device, GatewayError> {
        self.bind(BindMode::Controller, node, product_id, rf_serial)
            .await
    }

    /// Binds an accessory to the already bound `controller`.
    pub async fn bind_accessory(
        &self,
        controller: u8,
        node: u8,
        product_id: u32,
        rf_serial: Option<u32>,
    ) -> Result<Device, GatewayError> {
        let host = self.registry.lookup(controller)?;
        if host.kind != DeviceKind::VentilationUnit {
            return Err(GatewayError::BindFailed(format!(
                "{} is not a ventilation unit",
                host.label()
            )));
        }
        self.bind(BindMode::Accessory { controller }, node, product_id, rf_serial)
            .await
    }

    async fn bind(
        &self,
        mode: BindMode,
        node: u8,
        product_id: u32,
        rf_serial: Option<u32>,
    ) -> Result<Device, GatewayError> {
        if self.registry.contains(node) {
            return Err(RegistryError::DuplicateAddress(node).into());
        }
        let bridge = self.config.bridge_address;
        self.dispatcher
            .submit(CommandRequest::new(
                bridge,
                Command::Bind {
                    mode,
                    node,
                    product_id,
                    rf_serial,
                },
            ))
            .await?;

        let expected = match mode {
            BindMode::Controller => BindingStatus::OutgoingCompleted,
            BindMode::Accessory { .. } => BindingStatus::IncomingCompleted,
        };
        let outcome = self.await_binding().await;
        if outcome != Some(expected) {
            let reason = match outcome {
                Some(status) => format!("bridge reported {status:?} for node {node}"),
                None => format!(
                    "no result for node {node} within {:?}",
                    self.config.bind.timeout()
                ),
            };
            log::error!("Binding failed: {reason}");
            self.release_half_bound(node).await;
            return Err(GatewayError::BindFailed(reason));
        }

        let kind = DeviceKind::from_product_id(product_id).unwrap_or(match mode {
            BindMode::Controller => DeviceKind::VentilationUnit,
            BindMode::Accessory { .. } => DeviceKind::Accessory,
        });
        let mut device = Device::new(node, kind).with_product_id(product_id);
        if let Some(name) = product_name(product_id) {
            device = device.with_name(name);
        }
        match self.read_u32(node, Parameter::RfAddress).await {
            Ok(rf_address) => device = device.with_rf_address(rf_address),
            Err(e) => log::debug!("RF address of node {node} unknown: {e}"),
        }

        log::info!("Bound {}", device.label());
        self.registry.register(device.clone())?;
        Ok(device)
    }

    /// Polls the bridge's binding status until it leaves the in-progress
    /// states or the bind timeout passes.
    async fn await_binding(&self) -> Option<BindingStatus> {
        let bridge = self.config.bridge_address;
        let deadline = deadline_after(self.config.bind.timeout());

        while Instant::now() < deadline {
            sleep(self.config.bind.status_poll()).await;
            let status = match self.read_decoded(bridge, Parameter::BindingStatus).await {
                Ok(decoded) => decoded.value.as_f64() as u16,
                Err(e) => {
                    log::debug!("Binding status unavailable: {e}");
                    continue;
                }
            };
            match BindingStatus::from_raw(status) {
                Some(status) if status.is_in_progress() => {}
                Some(BindingStatus::Idle) | None => {}
                Some(status) => return Some(status),
            }
        }
        None
    }

    async fn release_half_bound(&self, node: u8) {
        let request = CommandRequest::new(self.config.bridge_address, Command::Unbind { node });
        if let Err(e) = self.dispatcher.submit(request).await {
            log::warn!("Could not unbind half-bound node {node}: {e}");
        }
    }

    /// Removes `node` from the bridge, the registry and the cache.
    pub async fn unbind(&self, node: u8) -> Result<(), GatewayError> {
        let bridge = self.config.bridge_address;
        if node == bridge {
            return Err(CommandFailed::Unsupported {
                address: bridge,
                reason: "the bridge cannot unbind itself".to_string(),
            }
            .into());
        }
        self.dispatcher
            .submit(CommandRequest::new(bridge, Command::Unbind { node }))
            .await?;

        match self.registry.remove(node) {
            Ok(device) => log::info!("Unbound {}", device.label()),
            Err(e) => log::debug!("Unbound node {node}: {e}"),
        }
        let purged = self.cache.purge(node);
        log::debug!("Dropped {purged} readings of node {node}");
        Ok(())
    }

    /// Reads a parameter directly from the bus and records it when the
    /// device is registered.
    async fn read_decoded(
        &self,
        address: u8,
        parameter: Parameter,
    ) -> Result<Decoded, GatewayError> {
        let response = self.scheduler.read_with_retry(address, parameter).await?;
        let decoded = match response {
            ProtocolMessage::ReadResponse { registers, .. } => parameter.decode(&registers),
            _ => None,
        }
        .ok_or(GatewayError::MissingValue { address, parameter })?;

        if self.registry.contains(address) {
            // Unsupported parameters are simply not cached.
            let _ = self.cache.update(address, parameter, decoded, Utc::now());
        }
        Ok(decoded)
    }

    async fn read_u32(&self, address: u8, parameter: Parameter) -> Result<u32, GatewayError> {
        match self.read_decoded(address, parameter).await? {
            Decoded {
                value: Value::Count(v),
                valid: true,
            } => Ok(v),
            _ => Err(GatewayError::MissingValue { address, parameter }),
        }
    }
}
