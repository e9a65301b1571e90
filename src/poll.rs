//! # Poll Scheduler
//!
//! Reads every parameter of every registered device on a fixed period and
//! feeds the results into the [`StateCache`]. Devices are visited in
//! registry order, one request at a time.
//!
//! A device whose reads keep failing after the configured attempts is
//! skipped for the rest of the cycle; the cycle itself always runs to the
//! end. Unreachable devices are reported once at warn level and once more
//! when they come back.

use crate::bus::Bus;
use crate::config::PollSettings;
use crate::device::{Device, DeviceRegistry, Parameter};
use crate::error::TransportError;
use crate::protocol::ProtocolMessage;
use crate::state::{StateCache, UpdateOutcome};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub devices_polled: usize,
    /// Readings stored in the cache (outdated ones are not counted).
    pub readings_updated: usize,
    /// Parameters the device answered with an exception or an unusable value.
    pub parameters_skipped: usize,
    /// Devices abandoned for this cycle after transport failures.
    pub failed_devices: Vec<u8>,
    pub cancelled: bool,
    pub duration: Duration,
}

/// Outcome of reading one parameter.
enum ParameterRead {
    Stored,
    Skipped,
}

pub struct PollScheduler {
    bus: Arc<dyn Bus>,
    registry: Arc<DeviceRegistry>,
    cache: Arc<StateCache>,
    settings: PollSettings,
    interval: Duration,
    unavailable: Mutex<HashSet<u8>>,
}

impl PollScheduler {
    pub fn new(
        bus: Arc<dyn Bus>,
        registry: Arc<DeviceRegistry>,
        cache: Arc<StateCache>,
        settings: PollSettings,
    ) -> Self {
        let interval = settings.interval();
        Self {
            bus,
            registry,
            cache,
            settings,
            interval,
            unavailable: Mutex::new(HashSet::new()),
        }
    }

    /// Effective poll period, never below the enforced minimum.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Devices that failed their last poll.
    pub fn unavailable_devices(&self) -> Vec<u8> {
        let mut out: Vec<u8> = self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        out.sort_unstable();
        out
    }

    /// Polls until `cancel` fires. Cycles never overlap: a cycle that
    /// overruns the period delays the next one.
    pub async fn run(&self, cancel: CancellationToken) {
        log::info!("Polling every {}s", self.interval.as_secs());
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run_cycle(&cancel).await;
            if report.cancelled {
                break;
            }
            log::debug!(
                "Poll cycle: {} devices, {} readings, {} failed, took {:?}",
                report.devices_polled,
                report.readings_updated,
                report.failed_devices.len(),
                report.duration
            );
        }
        log::info!("Polling stopped");
    }

    /// Runs one full cycle over the registry.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let devices = self.registry.list(None);

        'devices: for device in devices.iter() {
            report.devices_polled += 1;
            let mut reachable = false;

            for parameter in device.capabilities.iter().copied() {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'devices;
                }

                match self.poll_parameter(device, parameter).await {
                    Ok(ParameterRead::Stored) => {
                        reachable = true;
                        report.readings_updated += 1;
                    }
                    Ok(ParameterRead::Skipped) => {
                        reachable = true;
                        report.parameters_skipped += 1;
                    }
                    Err(e) => {
                        self.mark_unavailable(device, &e);
                        report.failed_devices.push(device.address);
                        continue 'devices;
                    }
                }
            }

            if reachable {
                self.mark_available(device);
            }
        }

        report.duration = started.elapsed();
        report
    }

    async fn poll_parameter(
        &self,
        device: &Device,
        parameter: Parameter,
    ) -> Result<ParameterRead, TransportError> {
        let response = self.read_with_retry(device.address, parameter).await?;

        match response {
            ProtocolMessage::ReadResponse { registers, .. } => {
                let Some(decoded) = parameter.decode(&registers) else {
                    log::debug!(
                        "{}: {} registers for {parameter}, expected {}",
                        device.label(),
                        registers.len(),
                        parameter.width()
                    );
                    return Ok(ParameterRead::Skipped);
                };
                match self.cache.update(device.address, parameter, decoded, Utc::now()) {
                    Ok(UpdateOutcome::Stored) => Ok(ParameterRead::Stored),
                    Ok(UpdateOutcome::Outdated) => Ok(ParameterRead::Skipped),
                    Err(e) => {
                        // Device removed while the cycle ran.
                        log::debug!("Dropping {parameter} for {}: {e}", device.label());
                        Ok(ParameterRead::Skipped)
                    }
                }
            }
            ProtocolMessage::Error { code, .. } => {
                log::debug!("{}: reading {parameter} rejected: {code}", device.label());
                Ok(ParameterRead::Skipped)
            }
            other => Err(TransportError::UnexpectedResponse(format!(
                "{:?} to a read request",
                other.kind()
            ))),
        }
    }

    /// Reads one parameter, retrying transport failures with a fixed delay.
    pub async fn read_with_retry(
        &self,
        address: u8,
        parameter: Parameter,
    ) -> Result<ProtocolMessage, TransportError> {
        let request = ProtocolMessage::ReadRequest {
            address,
            register: parameter.register(),
            count: parameter.width(),
        };
        let attempts = self.settings.attempts.max(1);

        let mut attempt = 1;
        loop {
            match self
                .bus
                .send_and_await(&request, self.settings.read_timeout())
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    log::debug!(
                        "Reading {parameter} from {address} failed ({e}), attempt {attempt}/{attempts}"
                    );
                    attempt += 1;
                    sleep(self.settings.retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn mark_unavailable(&self, device: &Device, error: &TransportError) {
        let newly = self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.address);
        if newly {
            log::warn!("{} is unavailable: {error}", device.label());
        } else {
            log::debug!("{} still unavailable: {error}", device.label());
        }
    }

    fn mark_available(&self, device: &Device) {
        let was_down = self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&device.address);
        if was_down {
            log::info!("{} is available again", device.label());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers reads with the register number, except for silent addresses.
    struct EchoBus {
        silent: u8,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Bus for EchoBus {
        async fn send_and_await(
            &self,
            message: &ProtocolMessage,
            _timeout: Duration,
        ) -> Result<ProtocolMessage, TransportError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            match message {
                ProtocolMessage::ReadRequest {
                    address, count, register,
                } if *address != self.silent => Ok(ProtocolMessage::ReadResponse {
                    address: *address,
                    registers: vec![*register % 100; usize::from(*count)],
                }),
                _ => Err(TransportError::Timeout),
            }
        }
    }

    fn scheduler(silent: u8) -> (PollScheduler, Arc<EchoBus>, Arc<StateCache>) {
        let registry = Arc::new(DeviceRegistry::new());
        for address in [1, 2, 3] {
            registry
                .register(
                    Device::new(address, DeviceKind::VentilationUnit)
                        .with_capabilities([Parameter::SupplyFanSpeed, Parameter::BypassPosition]),
                )
                .unwrap();
        }
        let cache = Arc::new(StateCache::new(Arc::clone(&registry), Duration::from_secs(90)));
        let bus = Arc::new(EchoBus {
            silent,
            sent: AtomicUsize::new(0),
        });
        let settings = PollSettings {
            retry_delay_ms: 1,
            ..PollSettings::default()
        };
        let scheduler = PollScheduler::new(bus.clone(), registry, Arc::clone(&cache), settings);
        (scheduler, bus, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skips_failing_device() {
        let (scheduler, bus, cache) = scheduler(2);
        let report = scheduler.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report.devices_polled, 3);
        assert_eq!(report.failed_devices, vec![2]);
        assert_eq!(report.readings_updated, 4);
        // 2 + 2 reads for the healthy devices, 3 attempts for the first parameter of device 2.
        assert_eq!(bus.sent.load(Ordering::SeqCst), 7);
        assert!(cache.read(3, Parameter::SupplyFanSpeed).is_fresh());
        assert_eq!(scheduler.unavailable_devices(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_cycle_stops_between_requests() {
        let (scheduler, bus, _) = scheduler(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = scheduler.run_cycle(&cancel).await;
        assert!(report.cancelled);
        assert_eq!(bus.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let (scheduler, _, _) = scheduler(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        scheduler.run(cancel).await;
    }

    #[test]
    fn test_interval_is_clamped() {
        let registry = Arc::new(DeviceRegistry::new());
        let cache = Arc::new(StateCache::new(Arc::clone(&registry), Duration::from_secs(90)));
        let bus = Arc::new(EchoBus {
            silent: 0,
            sent: AtomicUsize::new(0),
        });
        let settings = PollSettings {
            interval_secs: 10,
            ..PollSettings::default()
        };
        let scheduler = PollScheduler::new(bus, registry, cache, settings);
        assert_eq!(scheduler.interval(), Duration::from_secs(30));
    }
}
