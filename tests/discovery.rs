mod common;

use common::MockGateway;
use gateway_poller::{
    Capabilities, ConnectionPool, DiscoverySettings, Error, ModelRegistry, PoolConfig, ScanPlan,
    discover,
};
use std::time::Duration;
use tokio::time::Instant;

const HOST: &str = "10.0.0.20";
const PORT: u16 = 502;

#[tokio::test(start_paused = true)]
async fn finds_devices_in_primary_range() {
    let gateway = MockGateway::new();
    gateway.add_device(101, 44).set_name(101, "Main feeder");
    gateway.add_device(103, 999);
    gateway.add_device(105, 170);
    let registry = ModelRegistry::builtin();

    let devices = discover(&gateway, &registry, HOST, PORT, &DiscoverySettings::default())
        .await
        .unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].name, "Main feeder");
    assert_eq!(devices[0].id.unit_id, 101);
    assert_eq!(devices[0].store.model, "A9MEM1540");
    assert!(devices[0].capabilities.contains(Capabilities::THREE_PHASE));

    // No name configured: model name plus address.
    assert_eq!(devices[1].name, "Easergy TH110 (105)");
    assert_eq!(devices[1].store.type_code, 170);
    assert!(devices[1].capabilities.contains(Capabilities::HUMIDITY));

    // Devices were found, so the fallback range is left alone.
    let probed = gateway.probed();
    assert_eq!(probed.first(), Some(&100));
    assert_eq!(probed.last(), Some(&199));
    assert!(probed.iter().all(|&unit| unit >= 100));

    // The scan used its own connection.
    assert_eq!(gateway.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn falls_back_when_primary_range_is_empty() {
    let gateway = MockGateway::new();
    gateway.add_device(5, 209);
    let registry = ModelRegistry::builtin();

    let devices = discover(&gateway, &registry, HOST, PORT, &DiscoverySettings::default())
        .await
        .unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id.unit_id, 5);
    assert_eq!(devices[0].name, "Acti9 Control 2DI (5)");

    let probed = gateway.probed();
    assert_eq!(probed.len(), 100 + 99);
    assert_eq!(probed[100], 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_ranges_are_scanned_in_order() {
    let gateway = MockGateway::new();
    gateway.add_device(12, 210).add_device(2, 41);
    let registry = ModelRegistry::builtin();
    let settings = DiscoverySettings::with_ranges(vec![10..=12, 1..=3]);

    let devices = discover(&gateway, &registry, HOST, PORT, &settings).await.unwrap();

    let units: Vec<u8> = devices.iter().map(|d| d.id.unit_id).collect();
    assert_eq!(units, vec![12, 2]);
    assert_eq!(gateway.probed(), vec![10, 11, 12, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn stops_after_consecutive_timeouts() {
    let gateway = MockGateway::new();
    gateway.add_device(100, 44);
    gateway.silence(101..=199);
    let registry = ModelRegistry::builtin();

    let start = Instant::now();
    let devices = discover(&gateway, &registry, HOST, PORT, &DiscoverySettings::default())
        .await
        .unwrap();

    assert_eq!(devices.len(), 1);
    // 101..=111 time out; the eleventh in a row ends the scan.
    assert_eq!(gateway.probed().last(), Some(&111));
    assert!(start.elapsed() >= Duration::from_secs(3 * 11));
}

#[tokio::test(start_paused = true)]
async fn scan_waits_the_configured_delay_between_units() {
    let gateway = MockGateway::new();
    gateway.add_device(4, 44);
    let registry = ModelRegistry::builtin();
    let settings = DiscoverySettings {
        probe_delay_ms: 500,
        ..DiscoverySettings::with_ranges(vec![1..=10])
    };

    let start = Instant::now();
    let devices = discover(&gateway, &registry, HOST, PORT, &settings).await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(gateway.probed().len(), 10);
    // Every unit answers at once, so the pauses between units are all
    // the time the scan took.
    assert!(start.elapsed() >= Duration::from_millis(9 * 500));
    assert!(start.elapsed() < Duration::from_millis(10 * 500));
}

#[tokio::test(start_paused = true)]
async fn timeouts_before_first_device_do_not_stop_the_scan() {
    let gateway = MockGateway::new();
    gateway.silence(100..=120);
    gateway.add_device(150, 45);
    let registry = ModelRegistry::builtin();
    let settings = DiscoverySettings {
        plan: ScanPlan::Ranges {
            ranges: vec![100..=160],
        },
        ..DiscoverySettings::default()
    };

    let devices = discover(&gateway, &registry, HOST, PORT, &settings).await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id.unit_id, 150);
    assert_eq!(gateway.probed().last(), Some(&160));
}

#[tokio::test(start_paused = true)]
async fn unreachable_gateway_fails_the_scan() {
    let gateway = MockGateway::new();
    gateway.refuse_connections(true);
    let registry = ModelRegistry::builtin();

    let err = discover(&gateway, &registry, HOST, PORT, &DiscoverySettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectError { .. }));

    gateway.refuse_connections(false);
    gateway.hang_connections(true);
    let err = discover(&gateway, &registry, HOST, PORT, &DiscoverySettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectTimeout(_)));
}

#[tokio::test(start_paused = true)]
async fn pool_discovery_leaves_pool_untouched() {
    let gateway = MockGateway::new();
    gateway.add_device(110, 92);
    let pool = ConnectionPool::new(gateway.clone(), PoolConfig::default());
    let registry = ModelRegistry::builtin();
    let settings = DiscoverySettings::with_ranges(vec![105..=115]);

    let devices = pool.discover(&registry, HOST, PORT, &settings).await.unwrap();

    assert_eq!(devices.len(), 1);
    assert!(pool.is_empty());
    assert_eq!(pool.ref_count(HOST, PORT), 0);
}

#[tokio::test(start_paused = true)]
async fn discovered_device_serializes_for_the_host() {
    let gateway = MockGateway::new();
    gateway.add_device(104, 44);
    let registry = ModelRegistry::builtin();
    let settings = DiscoverySettings::with_ranges(vec![104..=104]);

    let devices = discover(&gateway, &registry, HOST, PORT, &settings).await.unwrap();
    let json = serde_json::to_value(&devices[0]).unwrap();

    assert_eq!(json["id"]["unit_id"], 104);
    assert_eq!(json["settings"]["host"], HOST);
    assert_eq!(json["store"]["model"], "A9MEM1540");
    let caps = json["capabilities"].as_array().unwrap();
    assert!(caps.iter().any(|c| c == "THREE_PHASE"));
}

#[test]
fn settings_deserialize_with_defaults() {
    let settings: DiscoverySettings = serde_json::from_str(
        r#"{ "plan": { "strategy": "ranges", "ranges": [{ "start": 1, "end": 20 }] },
             "probe_timeout_ms": 1500 }"#,
    )
    .unwrap();

    assert_eq!(
        settings.plan,
        ScanPlan::Ranges {
            ranges: vec![1..=20]
        }
    );
    assert_eq!(settings.probe_timeout_ms, 1500);
    assert_eq!(settings.probe_delay_ms, 100);
    assert_eq!(settings.max_consecutive_timeouts, 10);
}
