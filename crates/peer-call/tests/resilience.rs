//! Integration tests for the self-healing loops and teardown.
//!
//! - Capture acquisition retries with at most one request in flight
//! - Signaling recreation on a fixed interval, one registration at a time
//! - Teardown releases tracks, registrations and transports in order

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use common::types::CallRole;
use pc_test_utils::{
    binding, collect_until, identity, settings, state, wait_connected, wait_disconnected,
    wait_for_event, GatedCapture, ScriptedCapture,
};
use peer_call::actors::{CallSupervisor, SessionEventKind, SignalingState};
use peer_call::transport::loopback::{LoopbackCamera, LoopbackRelay};
use peer_call::transport::{CaptureDevice, CaptureError};
use peer_call::CallError;
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_secs(1);

fn spawn_responder(
    relay: &LoopbackRelay,
    device: Arc<dyn CaptureDevice>,
) -> (peer_call::CallSupervisorHandle, tokio::task::JoinHandle<()>) {
    CallSupervisor::spawn(
        binding("bob", "alice", CallRole::Responder),
        settings(),
        Arc::new(relay.clone()),
        device,
        &CancellationToken::new(),
    )
}

// ============================================================================
// Capture
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_capture_retries_without_overlapping_requests() {
    let relay = LoopbackRelay::new();
    // Each attempt outlasts two poll ticks.
    let camera = ScriptedCapture::new()
        .failing(3, CaptureError::PermissionPending)
        .with_delay(Duration::from_millis(2_500));

    let (bob, task) = spawn_responder(&relay, Arc::new(camera.clone()));
    let mut events = bob.subscribe_events();

    let seen = collect_until(&mut events, INTERVAL * 20, |kind| {
        *kind == SessionEventKind::SignalingOpened
    })
    .await;

    assert_eq!(camera.attempts(), 4);
    assert_eq!(camera.peak_in_flight(), 1, "acquisitions must never overlap");

    let failures = seen
        .iter()
        .filter(|k| matches!(k, SessionEventKind::CaptureFailed { .. }))
        .count();
    assert_eq!(failures, 3);

    // Signaling only starts once a stream exists.
    let acquired = seen
        .iter()
        .position(|k| matches!(k, SessionEventKind::CaptureAcquired { .. }))
        .unwrap();
    assert_eq!(acquired, seen.len() - 2);
    assert_eq!(relay.registration_count(&identity("bob")), 1);

    // Polling stopped after success.
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(camera.attempts(), 4);

    bob.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(camera.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_denied_permission_is_retried() {
    let relay = LoopbackRelay::new();
    let camera = ScriptedCapture::new().failing(2, CaptureError::PermissionDenied);

    let (bob, task) = spawn_responder(&relay, Arc::new(camera.clone()));
    let mut events = bob.subscribe_events();

    wait_for_event(&mut events, INTERVAL * 4, |kind| {
        matches!(kind, SessionEventKind::CaptureAcquired { .. })
    })
    .await;
    assert_eq!(camera.attempts(), 3);

    bob.shutdown().await.unwrap();
    task.await.unwrap();
}

// ============================================================================
// Signaling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_signaling_recreated_after_disconnect() {
    let relay = LoopbackRelay::new();
    let (bob, task) = spawn_responder(&relay, Arc::new(LoopbackCamera::new()));
    let mut events = bob.subscribe_events();

    wait_for_event(&mut events, INTERVAL, |kind| {
        *kind == SessionEventKind::SignalingOpened
    })
    .await;
    let bob_id = identity("bob");
    assert!(relay.disconnect(&bob_id));

    wait_for_event(&mut events, INTERVAL, |kind| {
        matches!(kind, SessionEventKind::SignalingFailed { .. })
    })
    .await;
    assert_eq!(state(&bob).await.signaling, None);

    let started = tokio::time::Instant::now();
    wait_for_event(&mut events, INTERVAL * 2, |kind| {
        *kind == SessionEventKind::SignalingOpened
    })
    .await;
    assert!(started.elapsed() >= INTERVAL, "recreation waits one interval");

    assert!(relay.is_registered(&bob_id));
    assert_eq!(relay.registration_count(&bob_id), 2);
    assert_eq!(relay.peak_presence(&bob_id), 1);

    bob.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(!relay.is_registered(&bob_id));
}

#[tokio::test(start_paused = true)]
async fn test_slow_failing_registrations_never_overlap() {
    let relay = LoopbackRelay::new();
    relay.fail_next_registrations(3);
    // Each attempt outlasts two recreate ticks.
    relay.set_registration_delay(Duration::from_millis(2_500));

    let (bob, task) = spawn_responder(&relay, Arc::new(LoopbackCamera::new()));
    let mut events = bob.subscribe_events();

    let seen = collect_until(&mut events, INTERVAL * 20, |kind| {
        *kind == SessionEventKind::SignalingOpened
    })
    .await;

    let failures = seen
        .iter()
        .filter(|k| matches!(k, SessionEventKind::SignalingFailed { .. }))
        .count();
    let recreations = seen
        .iter()
        .filter(|k| **k == SessionEventKind::SignalingRecreated)
        .count();
    assert_eq!(failures, 3);
    assert_eq!(recreations, 3);

    let bob_id = identity("bob");
    assert_eq!(relay.peak_presence(&bob_id), 1, "one registration at a time");
    assert_eq!(relay.registration_count(&bob_id), 1);
    assert_eq!(state(&bob).await.signaling, Some(SignalingState::Open));

    bob.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_call_recovers_after_relay_drops_initiator() {
    let relay = LoopbackRelay::new();
    let (bob, bob_task) = spawn_responder(&relay, Arc::new(LoopbackCamera::new()));
    let (alice, alice_task) = CallSupervisor::spawn(
        binding("alice", "bob", CallRole::Initiator),
        settings(),
        Arc::new(relay.clone()),
        Arc::new(LoopbackCamera::new()),
        &CancellationToken::new(),
    );
    wait_connected(&alice, INTERVAL * 3).await;

    // The relay drops alice; her links close with the registration.
    let mut alice_events = alice.subscribe_events();
    assert!(relay.disconnect(&identity("alice")));
    wait_for_event(&mut alice_events, INTERVAL, |kind| {
        matches!(kind, SessionEventKind::SignalingFailed { .. })
    })
    .await;
    wait_disconnected(&alice, INTERVAL).await;

    wait_connected(&alice, INTERVAL * 4).await;
    wait_connected(&bob, INTERVAL).await;
    assert_eq!(relay.active_links().len(), 1);
    assert_eq!(relay.peak_presence(&identity("alice")), 1);

    alice.shutdown().await.unwrap();
    alice_task.await.unwrap();
    bob.shutdown().await.unwrap();
    bob_task.await.unwrap();
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_acquisition_leaks_nothing() {
    let relay = LoopbackRelay::new();
    let camera = GatedCapture::new();

    let (bob, task) = spawn_responder(&relay, Arc::new(camera.clone()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(camera.started(), 1);

    bob.shutdown().await.unwrap();
    task.await.unwrap();

    // The gate opening after teardown must not bring a stream to life.
    camera.open();
    tokio::time::sleep(INTERVAL * 3).await;

    assert_eq!(camera.started(), 1, "no retries after teardown");
    assert_eq!(camera.live_tracks(), 0);
    assert!(!relay.is_registered(&identity("bob")));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_placement_leaks_nothing() {
    let relay = LoopbackRelay::new();
    let ack_delay = Duration::from_secs(2);
    relay.set_acknowledgement_delay(ack_delay);

    let (bob, bob_task) = spawn_responder(&relay, Arc::new(LoopbackCamera::new()));
    let mut bob_events = bob.subscribe_events();
    wait_for_event(&mut bob_events, INTERVAL, |kind| {
        *kind == SessionEventKind::SignalingOpened
    })
    .await;

    let alice_cam = LoopbackCamera::new();
    let (alice, alice_task) = CallSupervisor::spawn(
        binding("alice", "bob", CallRole::Initiator),
        settings(),
        Arc::new(relay.clone()),
        Arc::new(alice_cam.clone()),
        &CancellationToken::new(),
    );
    let mut alice_events = alice.subscribe_events();

    // Bob has answered; alice's placement is still waiting for its ack.
    wait_for_event(&mut bob_events, INTERVAL, |kind| {
        matches!(kind, SessionEventKind::CallAnswered { .. })
    })
    .await;
    assert!(state(&alice).await.placing);

    alice.shutdown().await.unwrap();
    alice_task.await.unwrap();

    assert!(relay.active_links().is_empty());
    assert!(!relay.is_registered(&identity("alice")));
    assert!(!alice.status().is_connected());
    wait_disconnected(&bob, INTERVAL).await;

    // The acknowledgement deadline passes without bringing the call back.
    tokio::time::sleep(ack_delay * 2).await;
    assert!(relay.active_links().is_empty());
    assert!(!alice.status().is_connected());
    assert_eq!(alice_cam.live_tracks(), 0);

    let seen = collect_until(&mut alice_events, INTERVAL, |kind| {
        *kind == SessionEventKind::Stopped
    })
    .await;
    assert!(!seen.iter().any(|k| matches!(k, SessionEventKind::CallPlacing { .. })));

    bob.shutdown().await.unwrap();
    bob_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_teardown_closes_call_then_registration() {
    let relay = LoopbackRelay::new();
    let bob_cam = LoopbackCamera::new();
    let (bob, bob_task) = spawn_responder(&relay, Arc::new(bob_cam.clone()));
    let (alice, alice_task) = CallSupervisor::spawn(
        binding("alice", "bob", CallRole::Initiator),
        settings(),
        Arc::new(relay.clone()),
        Arc::new(LoopbackCamera::new()),
        &CancellationToken::new(),
    );
    wait_connected(&bob, INTERVAL * 3).await;

    let mut bob_events = bob.subscribe_events();
    let mut status = bob.status();
    bob.shutdown().await.unwrap();
    bob_task.await.unwrap();

    assert!(!status.current().connected);
    assert!(status.current().remote_stream.is_none());
    assert!(matches!(
        status.wait_for(|s| s.connected).await,
        Err(CallError::ShuttingDown)
    ));
    assert!(relay.active_links().is_empty());
    assert!(!relay.is_registered(&identity("bob")));
    assert_eq!(bob_cam.live_tracks(), 0);

    let seen = collect_until(&mut bob_events, INTERVAL, |kind| {
        *kind == SessionEventKind::Stopped
    })
    .await;
    assert_eq!(seen.last(), Some(&SessionEventKind::Stopped));

    // Commands after teardown are refused.
    assert!(matches!(bob.toggle_camera().await, Err(CallError::ShuttingDown)));

    alice.shutdown().await.unwrap();
    alice_task.await.unwrap();
}
