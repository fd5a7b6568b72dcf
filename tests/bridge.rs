//! Bridge integration tests
//!
//! Drives the whole bridge over the in-memory broker and cloud

use std::sync::Arc;
use std::time::Duration;

use deboot_bridge::broker::MemoryBroker;
use deboot_bridge::cloud::{ActionCall, MemoryCloud, MemoryDevice};
use deboot_bridge::config::DeviceProfile;
use deboot_bridge::{
    Bridge, BridgeOptions, CommandRouter, CommandTable, DeviceContext, EventRouter, EventTable,
    TopicScheme, await_ready,
};
use serde_json::{Value, json};

mod common;
use common::{ROOT, build_bridge, next_on, ready_device, wait_for_calls};

/// Trigger actions run by every attach
const TRIGGERS: usize = 6;

#[tokio::test(start_paused = true)]
async fn test_single_device_end_to_end() {
    let device = Arc::new(
        MemoryDevice::new("D1", "Living room")
            .with_ready_after(Duration::from_millis(800))
            .with_standard_responses(),
    );
    let (bridge, broker) = build_bridge(DeviceProfile::Single, vec![Arc::clone(&device)]);
    let mut outbound = broker.outbound();

    assert_eq!(bridge.link().await.unwrap(), 1);

    assert_eq!(next_on(&mut outbound, "deboot/bridge/status").await, "online");
    let info: Value = serde_json::from_str(&next_on(&mut outbound, "deboot/D1/info").await).unwrap();
    assert_eq!(info["did"], "D1");
    assert_eq!(info["nick"], "Living room");

    // Initial snapshot from the triggers
    assert_eq!(next_on(&mut outbound, "deboot/D1/batterystate").await, "100");

    device.emit("BatteryInfo", json!(5));
    assert_eq!(next_on(&mut outbound, "deboot/D1/batterystate").await, "5");

    broker.inject("deboot/D1/cmd/charge", "");
    wait_for_calls(&device, TRIGGERS + 1).await;
    assert_eq!(device.calls()[TRIGGERS], ActionCall::new("charge", &[]));
}

#[tokio::test]
async fn test_initial_triggers_publish_fanned_results() {
    let device = Arc::new(MemoryDevice::new("E1", "Kitchen").with_standard_responses());
    device.signal_ready();
    let (bridge, broker) = build_bridge(DeviceProfile::Single, vec![device]);
    let mut logs = broker.outbound();
    let mut areas = broker.outbound();

    bridge.link().await.unwrap();

    let first: Value = serde_json::from_str(&next_on(&mut logs, "deboot/E1/cleanlogs/1").await).unwrap();
    assert_eq!(first["type"], "auto");
    next_on(&mut logs, "deboot/E1/cleanlogs/2").await;

    let area: Value = serde_json::from_str(&next_on(&mut areas, "deboot/E1/mapareas/0").await).unwrap();
    assert_eq!(area["mapSpotAreaName"], "Living room");
}

#[tokio::test]
async fn test_publish_failure_is_isolated() {
    let d1 = ready_device("D1");
    let d2 = ready_device("D2");
    let (bridge, broker) =
        build_bridge(DeviceProfile::Multi, vec![Arc::clone(&d1), Arc::clone(&d2)]);
    broker.fail_publish("deboot/D1/chargestate");

    assert_eq!(bridge.link().await.unwrap(), 2);
    let mut d1_out = broker.outbound();
    let mut d2_out = broker.outbound();

    d1.emit("ChargeState", json!("charging"));
    d1.emit("BatteryInfo", json!(42));
    d2.emit("ChargeState", json!("idle"));

    assert_eq!(next_on(&mut d1_out, "deboot/D1/batterystate").await, "42");
    assert_eq!(next_on(&mut d2_out, "deboot/D2/chargestate").await, "idle");

    // The failing handler is still subscribed
    d1.emit("ChargeState", json!("returning"));
    d1.emit("BatteryInfo", json!(41));
    assert_eq!(next_on(&mut d1_out, "deboot/D1/batterystate").await, "41");
    assert!(broker.published_to("deboot/D1/chargestate").is_empty());
}

#[tokio::test]
async fn test_command_topics_dispatch_actions() {
    let device = ready_device("dev1");
    let (bridge, broker) = build_bridge(DeviceProfile::Single, vec![Arc::clone(&device)]);
    bridge.link().await.unwrap();

    broker.inject("deboot/dev1/cmd/clean", "");
    broker.inject("deboot/dev1/cmd/cleanarea", r#"{"areaid":"3"}"#);
    broker.inject(
        "deboot/dev1/cmd/cleancustomarea",
        r#"{"area":"-3.5,1.2,2,4","runs":"2"}"#,
    );

    wait_for_calls(&device, TRIGGERS + 3).await;
    assert_eq!(
        device.calls()[TRIGGERS..],
        [
            ActionCall::new("clean", &[]),
            ActionCall::new("SpotArea", &["start", "3"]),
            ActionCall::new("customarea", &["start", "-3.5,1.2,2,4", "2"]),
        ]
    );
}

#[tokio::test]
async fn test_invalid_area_payloads_run_nothing() {
    let device = ready_device("dev1");
    let (bridge, broker) = build_bridge(DeviceProfile::Single, vec![Arc::clone(&device)]);
    bridge.link().await.unwrap();

    broker.inject("deboot/dev1/cmd/cleanarea", r#"{"areaid":""}"#);
    broker.inject("deboot/dev1/cmd/cleanarea", "{}");
    broker.inject("deboot/dev1/cmd/cleanarea", "not json");
    broker.inject("deboot/dev1/cmd/cleancustomarea", r#"{"area":"1,2,3,4","runs":null}"#);
    broker.inject("deboot/dev1/cmd/dance", "");
    // Commands are handled in order, so this one marks the end of the batch
    broker.inject("deboot/dev1/cmd/stop", "");

    wait_for_calls(&device, TRIGGERS + 1).await;
    assert_eq!(device.calls()[TRIGGERS..], [ActionCall::new("stop", &[])]);
}

#[tokio::test]
async fn test_single_profile_rejects_two_devices() {
    let d1 = ready_device("D1");
    let d2 = ready_device("D2");
    let (bridge, broker) =
        build_bridge(DeviceProfile::Single, vec![Arc::clone(&d1), Arc::clone(&d2)]);

    assert_eq!(bridge.link().await.unwrap(), 0);

    assert!(bridge.linked().is_empty());
    assert!(broker.subscriptions().is_empty());
    assert!(broker.published_to("deboot/D1/info").is_empty());
    assert!(d1.calls().is_empty());
    assert_eq!(d2.subscriber_count("BatteryInfo"), 0);
}

#[tokio::test]
async fn test_repeated_attach_registers_nothing_new() {
    let device = ready_device("D1");
    let broker = Arc::new(MemoryBroker::new());
    let ready = await_ready(device.clone(), Duration::from_secs(1))
        .await
        .unwrap();
    let mut ctx = DeviceContext::new(ready, TopicScheme::new(ROOT));
    let events = EventRouter::new(broker.clone(), Arc::new(EventTable::standard()));
    let commands = CommandRouter::new(broker.clone(), Arc::new(CommandTable::standard()));

    assert_eq!(events.attach(&mut ctx), 6);
    assert_eq!(commands.attach(&mut ctx).await, 6);
    assert_eq!(events.attach(&mut ctx), 0);
    assert_eq!(commands.attach(&mut ctx).await, 0);

    assert_eq!(ctx.subscriptions().len(), 7);
    assert_eq!(broker.subscriptions().len(), 6);
    assert_eq!(device.subscriber_count("CleanLog"), 1);

    let mut outbound = broker.outbound();
    device.emit("DeebotPosition", json!("1,2"));
    broker.inject("deboot/D1/cmd/pause", "");

    assert_eq!(next_on(&mut outbound, "deboot/D1/position").await, "1,2");
    wait_for_calls(&device, 1).await;
    tokio::task::yield_now().await;
    assert_eq!(device.calls(), vec![ActionCall::new("pause", &[])]);
    assert_eq!(broker.published_to("deboot/D1/position").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_device_is_excluded() {
    let fast = Arc::new(MemoryDevice::new("D1", "Kitchen").with_ready_after(Duration::from_secs(2)));
    let silent = Arc::new(MemoryDevice::new("D2", "Cellar"));
    let (bridge, broker) = build_bridge(
        DeviceProfile::Multi,
        vec![Arc::clone(&fast), Arc::clone(&silent)],
    );

    assert_eq!(bridge.link().await.unwrap(), 1);

    assert_eq!(bridge.linked(), vec!["D1"]);
    assert_eq!(broker.published_to("deboot/D1/info").len(), 1);
    assert!(broker.published_to("deboot/D2/info").is_empty());
    assert!(silent.calls().is_empty());
}

#[tokio::test]
async fn test_shutdown_announces_offline_and_disconnects() {
    let device = ready_device("D1");
    let broker = Arc::new(MemoryBroker::new());
    let cloud = Arc::new(MemoryCloud::new(vec![Arc::clone(&device)]));
    let bridge = Bridge::new(BridgeOptions::new(ROOT), broker.clone(), cloud);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let (result, ()) = tokio::join!(
        bridge.run_until(async {
            let _ = stop_rx.await;
        }),
        async {
            wait_for_calls(&device, TRIGGERS).await;
            let _ = stop_tx.send(());
        }
    );

    result.unwrap();
    assert_eq!(
        broker.published_to("deboot/bridge/status"),
        vec!["online", "offline"]
    );
    assert!(broker.is_disconnected());
    assert!(bridge.linked().is_empty());
}

#[tokio::test]
async fn test_command_subset_limits_subscriptions() {
    let device = ready_device("D1");
    let broker = Arc::new(MemoryBroker::new());
    let cloud = Arc::new(MemoryCloud::new(vec![Arc::clone(&device)]));
    let mut options = BridgeOptions::new(ROOT);
    options.commands = CommandTable::standard()
        .select(&["clean".to_string(), "charge".to_string()])
        .unwrap();
    let bridge = Bridge::new(options, broker.clone(), cloud);

    bridge.link().await.unwrap();

    assert_eq!(
        broker.subscriptions(),
        vec!["deboot/D1/cmd/clean", "deboot/D1/cmd/charge"]
    );

    broker.inject("deboot/D1/cmd/stop", "");
    broker.inject("deboot/D1/cmd/clean", "");
    wait_for_calls(&device, TRIGGERS + 1).await;
    assert_eq!(device.calls()[TRIGGERS..], [ActionCall::new("clean", &[])]);
}
