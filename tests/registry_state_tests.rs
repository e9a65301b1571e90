//! Registry and state cache behaviour seen from outside the crate.

use airios_rs::device::{Decoded, Device, DeviceKind, DeviceRegistry, Parameter, Value};
use airios_rs::state::{ReadResult, ReadingSource, StateCache, UpdateOutcome};
use airios_rs::RegistryError;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn registry() -> Arc<DeviceRegistry> {
    let registry = Arc::new(DeviceRegistry::new());
    registry.register(Device::new(207, DeviceKind::Bridge)).unwrap();
    registry
        .register(
            Device::new(2, DeviceKind::VentilationUnit)
                .with_capabilities([Parameter::SupplyFanSpeed, Parameter::TemperatureSupply]),
        )
        .unwrap();
    registry.register(Device::new(5, DeviceKind::Accessory)).unwrap();
    registry
}

fn percentage(value: u16) -> Decoded {
    Decoded {
        value: Value::Percentage(value),
        valid: true,
    }
}

#[test]
fn test_duplicate_address_is_rejected() {
    let registry = registry();
    let err = registry
        .register(Device::new(2, DeviceKind::Accessory))
        .unwrap_err();
    assert_eq!(err, RegistryError::DuplicateAddress(2));
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_lookup_missing_device() {
    assert_eq!(registry().lookup(42), Err(RegistryError::NotFound(42)));
}

#[test]
fn test_list_keeps_insertion_order_and_filters() {
    let registry = registry();
    assert_eq!(registry.list(None).addresses(), vec![207, 2, 5]);

    let units = registry.list(Some(DeviceKind::VentilationUnit));
    assert_eq!(units.addresses(), vec![2]);

    // The sequence can be walked again.
    let all = registry.list(None);
    assert_eq!(all.iter().count(), 3);
    assert_eq!(all.iter().count(), 3);
}

#[test]
fn test_list_is_a_snapshot() {
    let registry = registry();
    let before = registry.list(None);
    registry.remove(5).unwrap();
    assert_eq!(before.addresses(), vec![207, 2, 5]);
    assert_eq!(registry.list(None).addresses(), vec![207, 2]);
}

#[test]
fn test_update_requires_registered_capability() {
    let cache = StateCache::new(registry(), Duration::from_secs(90));
    let now = Utc::now();

    assert_eq!(
        cache.update(9, Parameter::SupplyFanSpeed, percentage(10), now),
        Err(RegistryError::NotFound(9))
    );
    assert_eq!(
        cache.update(2, Parameter::BypassPosition, percentage(10), now),
        Err(RegistryError::UnsupportedParameter {
            address: 2,
            parameter: Parameter::BypassPosition
        })
    );
    assert!(cache.is_empty());
}

#[test]
fn test_stale_is_distinct_from_not_found() {
    let cache = StateCache::new(registry(), Duration::from_secs(90));
    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    assert_eq!(cache.read_at(2, Parameter::SupplyFanSpeed, t0), ReadResult::NotFound);

    cache.update(2, Parameter::SupplyFanSpeed, percentage(30), t0).unwrap();
    assert!(cache
        .read_at(2, Parameter::SupplyFanSpeed, t0 + ChronoDuration::seconds(60))
        .is_fresh());

    match cache.read_at(2, Parameter::SupplyFanSpeed, t0 + ChronoDuration::seconds(91)) {
        ReadResult::Stale(reading) => assert_eq!(reading.value, Value::Percentage(30)),
        other => panic!("expected a stale reading, got {other:?}"),
    }
}

#[test]
fn test_optimistic_value_is_replaced_by_poll() {
    let cache = StateCache::new(registry(), Duration::from_secs(90));
    let t0 = Utc::now();

    let stored = cache
        .apply_optimistic(2, Parameter::SupplyFanSpeed, Value::Percentage(40), t0)
        .unwrap();
    assert_eq!(stored, Some(UpdateOutcome::Stored));
    let reading = cache.read(2, Parameter::SupplyFanSpeed).reading().cloned().unwrap();
    assert_eq!(reading.source, ReadingSource::Optimistic);

    cache
        .update(2, Parameter::SupplyFanSpeed, percentage(38), t0 + ChronoDuration::seconds(1))
        .unwrap();
    let reading = cache.read(2, Parameter::SupplyFanSpeed).reading().cloned().unwrap();
    assert_eq!(reading.source, ReadingSource::Polled);
    assert_eq!(reading.value, Value::Percentage(38));

    // Outside the capability set: silently not cached.
    assert_eq!(
        cache
            .apply_optimistic(2, Parameter::PresetLowSupply, Value::Percentage(40), t0)
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_change_notifications_respect_epsilon() {
    let cache = StateCache::new(registry(), Duration::from_secs(90));
    let mut changes = cache.subscribe();
    let t0 = Utc::now();
    let temperature = |v: f64| Decoded {
        value: Value::Temperature(v),
        valid: true,
    };

    cache.update(2, Parameter::TemperatureSupply, temperature(20.0), t0).unwrap();
    cache
        .update(2, Parameter::TemperatureSupply, temperature(20.05), t0 + ChronoDuration::seconds(1))
        .unwrap();
    cache
        .update(2, Parameter::TemperatureSupply, temperature(20.5), t0 + ChronoDuration::seconds(2))
        .unwrap();
    cache
        .update(
            2,
            Parameter::TemperatureSupply,
            Decoded {
                value: Value::Temperature(20.5),
                valid: false,
            },
            t0 + ChronoDuration::seconds(3),
        )
        .unwrap();

    let first = changes.recv().await.unwrap();
    assert_eq!(first.previous, None);
    let second = changes.recv().await.unwrap();
    assert_eq!(second.current, Value::Temperature(20.5));
    let third = changes.recv().await.unwrap();
    assert!(!third.valid);
    assert!(changes.try_recv().is_err());
}

#[test]
fn test_purge_drops_device_readings() {
    let cache = StateCache::new(registry(), Duration::from_secs(90));
    let now = Utc::now();
    cache.update(2, Parameter::SupplyFanSpeed, percentage(30), now).unwrap();
    cache
        .update(
            207,
            Parameter::BindingStatus,
            Decoded {
                value: Value::Enum(0),
                valid: true,
            },
            now,
        )
        .unwrap();

    assert_eq!(cache.purge(2), 1);
    assert_eq!(cache.len(), 1);
    assert!(cache.readings_for(2).is_empty());
}

proptest! {
    /// Two updates applied in either order leave the later one stored.
    #[test]
    fn prop_update_is_order_independent(
        a in 0u16..=100,
        b in 0u16..=100,
        offset in 1i64..3600,
        reversed in any::<bool>(),
    ) {
        let cache = StateCache::new(registry(), Duration::from_secs(7200));
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t2 = t1 + ChronoDuration::seconds(offset);

        let mut updates = vec![(t1, a), (t2, b)];
        if reversed {
            updates.reverse();
        }
        for (timestamp, value) in updates {
            cache.update(2, Parameter::SupplyFanSpeed, percentage(value), timestamp).unwrap();
        }

        let stored = cache.read_at(2, Parameter::SupplyFanSpeed, t2).reading().cloned().unwrap();
        prop_assert_eq!(stored.value, Value::Percentage(b));
        prop_assert_eq!(stored.timestamp, t2);
    }
}
