//! End-to-end scenarios through the gateway, the real transport and the
//! bridge simulator. No hardware needed.

use airios_rs::bus::{Bus, SimulatedBridge, Transport};
use airios_rs::config::{DeviceEntry, GatewayConfig};
use airios_rs::constants::{
    DEFAULT_FRAME_GAP, PRODUCT_ID_VMD_07RPS13, PRODUCT_ID_VMN_05LM02, REG_BYPASS_POSITION,
    REG_PRESET_LOW_SUPPLY, REG_SUPPLY_FAN_SPEED,
};
use airios_rs::device::{DeviceKind, Parameter, Preset, Value};
use airios_rs::protocol::ProtocolMessage;
use airios_rs::{Command, CommandRequest, Gateway, TransportError};
use std::sync::Arc;
use std::time::Duration;

fn unit_entry() -> DeviceEntry {
    DeviceEntry {
        address: 2,
        kind: DeviceKind::VentilationUnit,
        product_id: Some(PRODUCT_ID_VMD_07RPS13),
        name: Some("living room".to_string()),
        capabilities: Some(vec![Parameter::SupplyFanSpeed, Parameter::BypassPosition]),
    }
}

fn simulated_bridge() -> SimulatedBridge {
    let bridge = SimulatedBridge::new(207, 0x00A0_00CF);
    bridge.add_node(2, PRODUCT_ID_VMD_07RPS13, 0x00A0_0002);
    bridge.set_register(2, REG_SUPPLY_FAN_SPEED, 30);
    bridge.set_register(2, REG_BYPASS_POSITION, 0);
    // The unit runs at its low preset, so the supply fan follows it.
    bridge.mirror(2, REG_PRESET_LOW_SUPPLY, REG_SUPPLY_FAN_SPEED);
    bridge
}

async fn start(bridge: &SimulatedBridge, config: GatewayConfig) -> Gateway {
    let bus: Arc<dyn Bus> = Arc::new(Transport::new(bridge.port(), DEFAULT_FRAME_GAP));
    Gateway::start(bus, config).await.unwrap()
}

/// Preset write for "Low" (40/35) followed by a poll that reports 40 % supply.
#[tokio::test(start_paused = true)]
async fn e2e_preset_write_is_seen_by_next_poll() {
    let bridge = simulated_bridge();
    let config = GatewayConfig {
        devices: vec![unit_entry()],
        ..GatewayConfig::default()
    };
    let gateway = start(&bridge, config).await;
    let mut changes = gateway.subscribe();

    gateway.poll_once().await;
    assert_eq!(
        gateway.read(2, Parameter::SupplyFanSpeed).reading().unwrap().value,
        Value::Percentage(30)
    );

    gateway
        .submit(CommandRequest::new(
            2,
            Command::SetPresetFanSpeed {
                preset: Preset::Low,
                supply: 40,
                exhaust: 35,
            },
        ))
        .await
        .unwrap();

    let report = gateway.poll_once().await;
    assert!(report.failed_devices.is_empty());
    let reading = gateway.read(2, Parameter::SupplyFanSpeed);
    assert!(reading.is_fresh());
    assert_eq!(reading.reading().unwrap().value, Value::Percentage(40));

    let mut saw_change = false;
    while let Ok(change) = changes.try_recv() {
        if change.address == 2
            && change.parameter == Parameter::SupplyFanSpeed
            && change.previous == Some(Value::Percentage(30))
        {
            assert_eq!(change.current, Value::Percentage(40));
            saw_change = true;
        }
    }
    assert!(saw_change);
}

/// A configured poll interval of 10 s is clamped to 30 s.
#[tokio::test(start_paused = true)]
async fn e2e_poll_interval_is_clamped() {
    let config = GatewayConfig::from_json(r#"{ "poll": { "interval_secs": 10 } }"#).unwrap();
    assert_eq!(config.poll.interval_secs, 30);

    let bridge = simulated_bridge();
    let gateway = start(&bridge, config).await;
    assert_eq!(gateway.scheduler().interval(), Duration::from_secs(30));
}

/// No response within the timeout gives Timeout and leaves the bus free.
#[tokio::test(start_paused = true)]
async fn e2e_timeout_does_not_hold_the_bus() {
    let bridge = simulated_bridge();
    bridge.set_silent(2, true);
    let transport = Arc::new(Transport::new(bridge.port(), DEFAULT_FRAME_GAP));

    let err = transport
        .send_and_await(
            &ProtocolMessage::ReadRequest {
                address: 2,
                register: REG_SUPPLY_FAN_SPEED,
                count: 1,
            },
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);
    assert!(!transport.is_busy());
}

/// Binding an accessory registers it and the snapshot shows it after a poll.
#[tokio::test(start_paused = true)]
async fn e2e_bind_accessory_then_snapshot() {
    let bridge = simulated_bridge();
    let config = GatewayConfig {
        devices: vec![unit_entry()],
        ..GatewayConfig::default()
    };
    let gateway = start(&bridge, config).await;

    let device = gateway
        .bind_accessory(2, 5, PRODUCT_ID_VMN_05LM02, None)
        .await
        .unwrap();
    assert_eq!(device.kind, DeviceKind::Accessory);
    assert!(bridge.has_node(5));

    gateway.poll_once().await;
    let snapshot = gateway.snapshot();
    let addresses: Vec<u8> = snapshot.devices.iter().map(|d| d.address).collect();
    assert_eq!(addresses, vec![207, 2, 5]);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["devices"][2]["kind"], "accessory");
    let product = json["devices"][2]["readings"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["parameter"] == "product_id")
        .unwrap()
        .clone();
    assert_eq!(product["value"]["value"], PRODUCT_ID_VMN_05LM02);
}

/// A failing device degrades to missing readings, never to a failed cycle.
#[tokio::test(start_paused = true)]
async fn e2e_unreachable_unit_keeps_bridge_readings_fresh() {
    let bridge = simulated_bridge();
    let config = GatewayConfig {
        devices: vec![unit_entry()],
        ..GatewayConfig::default()
    };
    let gateway = start(&bridge, config).await;
    bridge.set_silent(2, true);

    let report = gateway.poll_once().await;
    assert_eq!(report.failed_devices, vec![2]);
    assert!(gateway.read(207, Parameter::Uptime).is_fresh());
    assert!(gateway.read(2, Parameter::SupplyFanSpeed).reading().is_none());

    let snapshot = gateway.snapshot();
    assert!(!snapshot.devices.iter().find(|d| d.address == 2).unwrap().available);
}
