use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use vitals_rs::error::SensorError;
use vitals_rs::mock::{ScriptedFailure, ScriptedTransport};
use vitals_rs::protocol::{encode_sfloat, SFLOAT_NAN};
use vitals_rs::sensor_client::{SensorConnection, SensorRegistry};
use vitals_rs::types::{ConnectionState, Reading, SensorKind};

fn spo2_payload(raw: u16) -> Vec<u8> {
    let mut p = vec![0x00];
    p.extend(raw.to_le_bytes());
    p.extend(encode_sfloat(72, 0).to_le_bytes());
    p
}

async fn wait_for_state(conn: &SensorConnection, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while conn.state() != want {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("state never became {want:?}, still {:?}", conn.state()));
}

fn collector() -> (impl FnMut(Reading) + Send + 'static, mpsc::UnboundedReceiver<Reading>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (move |r: Reading| tx.send(r).unwrap(), rx)
}

#[tokio::test]
async fn forwards_readings_in_order_and_drops_bad_notifications() {
    let transport = ScriptedTransport::new(
        "Polar H10",
        vec![
            vec![0x00, 72],
            vec![0x01, 80, 0x00],
            vec![0x01, 5], // truncated 16-bit value
            vec![],
            vec![0x00, 90],
        ],
    );
    let stats = transport.stats();
    let conn = SensorConnection::new(SensorKind::HeartRate, Arc::new(transport));
    let (on_reading, mut rx) = collector();

    let name = conn.connect(on_reading).await.unwrap();
    assert_eq!(name, "Polar H10");

    let mut got = Vec::new();
    for _ in 0..3 {
        got.push(rx.recv().await.unwrap());
    }
    assert_eq!(
        got,
        vec![
            Reading::HeartRate(72),
            Reading::HeartRate(80),
            Reading::HeartRate(90)
        ]
    );

    // Script exhausted: the device is gone and the link is released once.
    wait_for_state(&conn, ConnectionState::Disconnected).await;
    assert!(rx.recv().await.is_none());
    assert_eq!(stats.disconnects(), 1);
    assert_eq!(conn.device_name(), None);
}

#[tokio::test]
async fn sentinel_payload_never_reaches_callback() {
    let transport = ScriptedTransport::new(
        "Oximeter",
        vec![
            spo2_payload(SFLOAT_NAN),
            spo2_payload(encode_sfloat(97, 0)),
            spo2_payload(SFLOAT_NAN),
        ],
    );
    let conn = SensorConnection::new(SensorKind::Oximeter, Arc::new(transport));
    let (on_reading, mut rx) = collector();
    conn.connect(on_reading).await.unwrap();

    assert_eq!(rx.recv().await, Some(Reading::SpO2(97.0)));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn anonymous_device_gets_fallback_name() {
    let transport = ScriptedTransport::new("", vec![]).anonymous().hold_open();
    let conn = SensorConnection::new(SensorKind::Thermometer, Arc::new(transport));
    let name = conn.connect(|_| {}).await.unwrap();
    assert_eq!(name, "Unknown Device");
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.device_name().as_deref(), Some("Unknown Device"));
    conn.disconnect().await;
}

#[tokio::test]
async fn connect_failures_are_typed_and_leave_connection_idle() {
    let cases = [
        (ScriptedFailure::Capability, "capability"),
        (ScriptedFailure::Selection, "selection"),
        (ScriptedFailure::Connect, "connect"),
        (ScriptedFailure::Service, "service"),
        (ScriptedFailure::Characteristic, "characteristic"),
    ];
    for (failure, label) in cases {
        let transport = ScriptedTransport::new("cuff", vec![vec![0x00; 5]]).failing(failure);
        let stats = transport.stats();
        let conn = SensorConnection::new(SensorKind::BloodPressure, Arc::new(transport));

        let err = conn.connect(|_| panic!("no reading expected")).await.unwrap_err();
        match failure {
            ScriptedFailure::Capability => {
                assert!(matches!(err, SensorError::CapabilityUnavailable(_)), "{label}")
            }
            ScriptedFailure::Selection => assert_eq!(err, SensorError::SelectionCancelled),
            _ => assert!(matches!(err, SensorError::ConnectionFailed(_)), "{label}: {err}"),
        }
        assert_eq!(conn.state(), ConnectionState::Disconnected, "{label}");

        if failure == ScriptedFailure::Characteristic {
            // The link opened before subscribe failed must still be released.
            tokio::time::timeout(Duration::from_secs(2), async {
                while stats.disconnects() == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("link released");
            assert_eq!(stats.subscribes(), 0);
        }
    }
}

#[tokio::test]
async fn wrong_service_is_a_connection_failure() {
    let transport = ScriptedTransport::new("HR strap", vec![])
        .with_service(SensorKind::HeartRate.service_uuid());
    let conn = SensorConnection::new(SensorKind::Oximeter, Arc::new(transport));
    let err = conn.connect(|_| {}).await.unwrap_err();
    assert!(matches!(err, SensorError::ConnectionFailed(_)));
}

#[tokio::test]
async fn disconnect_is_idempotent_in_every_state() {
    let transport = ScriptedTransport::new("strap", vec![vec![0x00, 61]]).hold_open();
    let stats = transport.stats();
    let conn = SensorConnection::new(SensorKind::HeartRate, Arc::new(transport));

    // Before any connect.
    conn.disconnect().await;
    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    let (on_reading, mut rx) = collector();
    conn.connect(on_reading).await.unwrap();
    assert_eq!(rx.recv().await, Some(Reading::HeartRate(61)));

    conn.disconnect().await;
    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(stats.disconnects(), 1);
    // Dispatch task is gone, so the callback (and its sender) was dropped.
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn disconnect_during_connect_aborts_it() {
    let gate = Arc::new(Notify::new());
    let transport = ScriptedTransport::new("slow", vec![vec![0x00, 70]]).gated(Arc::clone(&gate));
    let stats = transport.stats();
    let conn = Arc::new(SensorConnection::new(SensorKind::HeartRate, Arc::new(transport)));

    let pending = tokio::spawn({
        let conn = Arc::clone(&conn);
        async move { conn.connect(|_| panic!("aborted connect must not forward")).await }
    });
    wait_for_state(&conn, ConnectionState::Connecting).await;

    conn.disconnect().await;
    assert_eq!(pending.await.unwrap(), Err(SensorError::Aborted));
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    // Opening the gate afterwards changes nothing.
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(stats.connects(), 0);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn disconnect_after_link_opened_aborts_and_releases_it() {
    let gate = Arc::new(Notify::new());
    let transport =
        ScriptedTransport::new("cuff", vec![vec![0x00; 5]]).gated_subscribe(Arc::clone(&gate));
    let stats = transport.stats();
    let conn = Arc::new(SensorConnection::new(SensorKind::BloodPressure, Arc::new(transport)));

    let pending = tokio::spawn({
        let conn = Arc::clone(&conn);
        async move { conn.connect(|_| panic!("aborted connect must not forward")).await }
    });
    // The transport link exists; subscribe is parked on the gate.
    wait_until("transport connect", || stats.connects() == 1).await;
    assert_eq!(conn.state(), ConnectionState::Connecting);

    conn.disconnect().await;
    assert_eq!(pending.await.unwrap(), Err(SensorError::Aborted));
    wait_until("link release", || stats.disconnects() == 1).await;
    assert_eq!(stats.subscribes(), 0);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn dropped_connect_future_resets_state() {
    let gate = Arc::new(Notify::new());
    let transport = ScriptedTransport::new("slow", vec![])
        .hold_open()
        .gated(Arc::clone(&gate));
    let conn = SensorConnection::new(SensorKind::HeartRate, Arc::new(transport));

    let timed_out = tokio::time::timeout(Duration::from_millis(50), conn.connect(|_| {})).await;
    assert!(timed_out.is_err());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.device_name(), None);

    // The same connection can still be used afterwards.
    gate.notify_one();
    assert_eq!(conn.connect(|_| {}).await.as_deref(), Ok("slow"));
    assert_eq!(conn.state(), ConnectionState::Connected);
    conn.disconnect().await;
}

#[tokio::test]
async fn dropped_connect_future_releases_opened_link() {
    let gate = Arc::new(Notify::new());
    let transport = ScriptedTransport::new("cuff", vec![]).gated_subscribe(Arc::clone(&gate));
    let stats = transport.stats();
    let conn = SensorConnection::new(SensorKind::BloodPressure, Arc::new(transport));

    let timed_out = tokio::time::timeout(Duration::from_millis(50), conn.connect(|_| {})).await;
    assert!(timed_out.is_err());
    assert_eq!(stats.connects(), 1);
    wait_until("link release", || stats.disconnects() == 1).await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnecting_releases_the_previous_device() {
    let transport = ScriptedTransport::new("strap", vec![]).hold_open();
    let stats = transport.stats();
    let conn = SensorConnection::new(SensorKind::HeartRate, Arc::new(transport));

    conn.connect(|_| {}).await.unwrap();
    conn.connect(|_| {}).await.unwrap();
    assert_eq!(stats.connects(), 2);
    assert_eq!(stats.disconnects(), 1);
    assert_eq!(conn.state(), ConnectionState::Connected);

    conn.disconnect().await;
    assert_eq!(stats.disconnects(), 2);
}

#[tokio::test]
async fn registry_keeps_kinds_independent() {
    let transport = ScriptedTransport::new("multi", vec![]).hold_open();
    let registry = SensorRegistry::new(Arc::new(transport));

    registry.connect(SensorKind::HeartRate, |_| {}).await.unwrap();
    registry.connect(SensorKind::Thermometer, |_| {}).await.unwrap();
    assert_eq!(registry.state(SensorKind::HeartRate), ConnectionState::Connected);
    assert_eq!(registry.state(SensorKind::Thermometer), ConnectionState::Connected);
    assert_eq!(registry.state(SensorKind::Oximeter), ConnectionState::Disconnected);

    registry.disconnect(SensorKind::HeartRate).await;
    assert_eq!(registry.state(SensorKind::HeartRate), ConnectionState::Disconnected);
    assert_eq!(registry.state(SensorKind::Thermometer), ConnectionState::Connected);

    registry.disconnect_all().await;
    for kind in SensorKind::ALL {
        assert_eq!(registry.state(kind), ConnectionState::Disconnected);
        assert_eq!(registry.get(kind).kind(), kind);
    }
}
