mod common;

use common::*;
use formlink::bridge::{DiscoveryOptions, EndpointDiscovery, EndpointProbe};
use formlink::{AutomationError, CancellationToken, ProcessTarget};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn discovery(listeners: Arc<FakeListeners>, options: DiscoveryOptions) -> EndpointDiscovery {
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    let probe = EndpointProbe::new(http, "127.0.0.1", options.per_probe_timeout);
    EndpointDiscovery::new(listeners, probe, options)
}

fn quick() -> DiscoveryOptions {
    DiscoveryOptions {
        per_probe_timeout: Duration::from_millis(300),
        overall_timeout: Duration::from_millis(1_500),
        ..DiscoveryOptions::default()
    }
}

#[tokio::test]
async fn test_discovers_the_signature_listener_among_impostors() {
    let bridge = MockBridge::start(two_form_state()).await;
    let impostor = start_impostor().await;
    let (silent, _silent_task) = start_silent_listener().await;
    let other_process = start_impostor().await;

    let listeners = FakeListeners::with_ports(&[
        (impostor.port(), PID),
        (silent, PID),
        (bridge.port(), PID),
        (bridge.port(), PID),
        (other_process.port(), PID + 1),
    ]);
    let discovery = discovery(listeners, quick());

    let candidates = discovery.candidates(&ProcessTarget::Pid(PID)).await.unwrap();
    assert_eq!(candidates.len(), 3, "duplicate and foreign ports are dropped");
    assert!(candidates.windows(2).all(|w| w[0].0 < w[1].0));

    let started = Instant::now();
    let endpoint = discovery.discover(&ProcessTarget::Pid(PID), None).await.unwrap();
    assert_eq!(endpoint.port, bridge.port());
    assert_eq!(endpoint.process_id, Some(PID));
    assert_eq!(endpoint.signature_path, "/forms");
    assert!(started.elapsed() < Duration::from_millis(1_500));
}

#[tokio::test]
async fn test_empty_form_list_still_matches_signature() {
    let bridge = MockBridge::start(Arc::new(BridgeState::default())).await;
    let discovery = discovery(FakeListeners::with_ports(&[(bridge.port(), PID)]), quick());
    let endpoint = discovery.discover(&ProcessTarget::Any, None).await.unwrap();
    assert_eq!(endpoint.port, bridge.port());
}

#[tokio::test]
async fn test_no_candidates_is_a_discovery_failure() {
    let discovery = discovery(FakeListeners::with_ports(&[]), quick());
    let err = discovery.discover(&ProcessTarget::Pid(PID), None).await.unwrap_err();
    assert!(matches!(
        err,
        AutomationError::DiscoveryFailure { candidates: 0, .. }
    ));
}

#[tokio::test]
async fn test_ports_outside_the_range_are_ignored() {
    let bridge = MockBridge::start(two_form_state()).await;
    let options = DiscoveryOptions {
        port_range: 1..=1,
        ..quick()
    };
    let discovery = discovery(FakeListeners::with_ports(&[(bridge.port(), PID)]), options);
    assert!(discovery.discover(&ProcessTarget::Pid(PID), None).await.is_err());
}

#[tokio::test]
async fn test_only_impostors_fail_without_hanging() {
    let impostor = start_impostor().await;
    let (silent, _task) = start_silent_listener().await;
    let discovery = discovery(
        FakeListeners::with_ports(&[(impostor.port(), PID), (silent, PID)]),
        quick(),
    );

    let started = Instant::now();
    let err = discovery.discover(&ProcessTarget::Pid(PID), None).await.unwrap_err();
    assert!(matches!(err, AutomationError::DiscoveryFailure { candidates: 2, .. }));
    assert!(started.elapsed() < Duration::from_millis(1_500));
}

#[tokio::test]
async fn test_overall_timeout_bounds_discovery() {
    let (silent, _task) = start_silent_listener().await;
    let options = DiscoveryOptions {
        per_probe_timeout: Duration::from_secs(10),
        overall_timeout: Duration::from_millis(300),
        ..DiscoveryOptions::default()
    };
    let discovery = discovery(FakeListeners::with_ports(&[(silent, PID)]), options);

    let started = Instant::now();
    let err = discovery.discover(&ProcessTarget::Pid(PID), None).await.unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_cancellation_interrupts_discovery() {
    let (silent, _task) = start_silent_listener().await;
    let options = DiscoveryOptions {
        per_probe_timeout: Duration::from_secs(10),
        overall_timeout: Duration::from_secs(10),
        ..DiscoveryOptions::default()
    };
    let discovery = discovery(FakeListeners::with_ports(&[(silent, PID)]), options);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = discovery
        .discover(&ProcessTarget::Pid(PID), Some(&cancel))
        .await
        .unwrap_err();
    assert!(matches!(err, AutomationError::Cancelled));
}

#[tokio::test]
async fn test_fixed_port_skips_the_socket_table() {
    let bridge = MockBridge::start(two_form_state()).await;
    let options = DiscoveryOptions {
        fixed_port: Some(bridge.port()),
        ..quick()
    };
    let discovery = discovery(FakeListeners::with_ports(&[]), options);
    let endpoint = discovery.discover(&ProcessTarget::Any, None).await.unwrap();
    assert_eq!(endpoint.port, bridge.port());
}

#[tokio::test]
async fn test_session_discover_caches_the_endpoint() {
    let bridge = MockBridge::start(two_form_state()).await;
    let fixture = session_for(&bridge);

    let first = fixture.session.discover().await.unwrap();
    // an empty socket table would fail a second discovery
    fixture.listeners.set(&[]);
    let second = fixture.session.discover().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        fixture.session.bridge().endpoint().await.map(|e| e.port),
        Some(bridge.port())
    );
}
