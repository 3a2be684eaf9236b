//! Integration tests for capture device switching.
//!
//! With a live call only the outgoing video track is swapped on the
//! transport; without one the whole local stream is replaced. Neither path
//! touches signaling.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use common::config::{CaptureConstraints, FacingMode};
use common::types::CallRole;
use pc_test_utils::{
    binding, identity, settings, state, wait_connected, wait_for_event, ScriptedCapture,
};
use peer_call::actors::{CallSupervisor, SessionEventKind, SignalingState, SwitchOutcome};
use peer_call::transport::loopback::{LoopbackCamera, LoopbackRelay};
use peer_call::transport::{CaptureDevice, CaptureError};
use peer_call::{CallError, CallSupervisorHandle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_secs(1);

fn spawn(
    local: &str,
    remote: &str,
    role: CallRole,
    relay: &LoopbackRelay,
    device: Arc<dyn CaptureDevice>,
) -> (CallSupervisorHandle, JoinHandle<()>) {
    CallSupervisor::spawn(
        binding(local, remote, role),
        settings(),
        Arc::new(relay.clone()),
        device,
        &CancellationToken::new(),
    )
}

fn facing(mode: FacingMode) -> CaptureConstraints {
    let mut constraints = CaptureConstraints::default();
    if let Some(video) = constraints.video.as_mut() {
        video.facing_mode = Some(mode);
    }
    constraints
}

#[tokio::test(start_paused = true)]
async fn test_hot_swap_keeps_call_connected() {
    let relay = LoopbackRelay::new();
    let alice_cam = LoopbackCamera::new();
    let bob_cam = Arc::new(LoopbackCamera::new());
    let (bob, bob_task) = spawn("bob", "alice", CallRole::Responder, &relay, bob_cam);
    let alice_device = Arc::new(alice_cam.clone());
    let (alice, alice_task) = spawn("alice", "bob", CallRole::Initiator, &relay, alice_device);
    wait_connected(&alice, INTERVAL * 3).await;
    wait_connected(&bob, INTERVAL).await;

    let alice_id = identity("alice");
    let before = relay.transmitted_video(&alice_id).unwrap();
    let stream_before = state(&alice).await.capture_stream;
    let link_before = relay.active_links().first().unwrap().id;
    let mut alice_events = alice.subscribe_events();

    let outcome = alice.toggle_camera().await.unwrap();
    assert_eq!(outcome, SwitchOutcome::TrackReplaced);

    wait_for_event(&mut alice_events, INTERVAL, |kind| {
        *kind
            == SessionEventKind::DeviceSwitched {
                outcome: SwitchOutcome::TrackReplaced,
            }
    })
    .await;

    // Same call, same transport, new outgoing video.
    assert!(alice.status().is_connected());
    assert!(bob.status().is_connected());
    let links = relay.active_links();
    assert_eq!(links.len(), 1);
    assert_eq!(links.first().unwrap().id, link_before);

    let after = relay.transmitted_video(&alice_id).unwrap();
    assert_ne!(after, before);
    assert_eq!(state(&alice).await.capture_stream, stream_before);

    // Original microphone plus the new camera; everything else stopped.
    assert_eq!(alice_cam.acquisitions(), 2);
    assert_eq!(alice_cam.live_tracks(), 2);
    assert_eq!(relay.registration_count(&alice_id), 1);

    alice.shutdown().await.unwrap();
    alice_task.await.unwrap();
    bob.shutdown().await.unwrap();
    bob_task.await.unwrap();
    assert_eq!(alice_cam.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_switch_without_call_replaces_stream() {
    let relay = LoopbackRelay::new();
    let camera = LoopbackCamera::new();
    let (bob, task) = spawn("bob", "alice", CallRole::Responder, &relay, Arc::new(camera.clone()));
    let mut events = bob.subscribe_events();
    wait_for_event(&mut events, INTERVAL, |kind| {
        *kind == SessionEventKind::SignalingOpened
    })
    .await;
    let stream_before = state(&bob).await.capture_stream.unwrap();

    let outcome = bob
        .switch_device(facing(FacingMode::Environment))
        .await
        .unwrap();
    assert_eq!(outcome, SwitchOutcome::StreamReplaced);

    let bob_state = state(&bob).await;
    assert_ne!(bob_state.capture_stream.unwrap(), stream_before);
    assert_eq!(camera.live_tracks(), 2);

    // The stream change does not rebuild signaling.
    assert_eq!(bob_state.signaling, Some(SignalingState::Open));
    assert_eq!(relay.registration_count(&identity("bob")), 1);

    bob.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(camera.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_switch_before_first_stream_updates_constraints() {
    let relay = LoopbackRelay::new();
    let camera = ScriptedCapture::new().failing(1, CaptureError::PermissionPending);
    let (bob, task) = spawn("bob", "alice", CallRole::Responder, &relay, Arc::new(camera.clone()));
    let mut events = bob.subscribe_events();

    let outcome = bob
        .switch_device(facing(FacingMode::Environment))
        .await
        .unwrap();
    assert_eq!(outcome, SwitchOutcome::ConstraintsUpdated);

    wait_for_event(&mut events, INTERVAL * 3, |kind| {
        matches!(kind, SessionEventKind::CaptureAcquired { .. })
    })
    .await;

    let last = camera.requested().last().cloned().unwrap();
    assert_eq!(last.facing_mode(), Some(FacingMode::Environment));
    assert_eq!(camera.produced(), 1);

    bob.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_newer_switch_supersedes_pending_one() {
    let relay = LoopbackRelay::new();
    let camera = ScriptedCapture::new().with_delay(Duration::from_millis(500));
    let (bob, task) = spawn("bob", "alice", CallRole::Responder, &relay, Arc::new(camera.clone()));
    let mut events = bob.subscribe_events();
    wait_for_event(&mut events, INTERVAL * 2, |kind| {
        *kind == SessionEventKind::SignalingOpened
    })
    .await;

    let (first, second) = tokio::join!(
        bob.switch_device(facing(FacingMode::Environment)),
        bob.switch_device(facing(FacingMode::User)),
    );

    assert!(matches!(first, Err(CallError::Superseded)));
    assert_eq!(second.unwrap(), SwitchOutcome::StreamReplaced);

    let last = camera.requested().last().cloned().unwrap();
    assert_eq!(last.facing_mode(), Some(FacingMode::User));
    assert_eq!(camera.peak_in_flight(), 1);
    // Only the stream in service is still live.
    assert_eq!(camera.live_tracks(), 2);

    bob.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(camera.live_tracks(), 0);
}
