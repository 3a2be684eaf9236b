//! Waiting helpers for lifecycle events and state.

use peer_call::actors::{CallSupervisorHandle, SessionEvent, SessionEventKind, SupervisorState};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

/// Wait for the next event matching `predicate`, skipping others.
///
/// Panics if `within` elapses first or the supervisor goes away.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    within: Duration,
    mut predicate: impl FnMut(&SessionEventKind) -> bool,
) -> SessionEvent {
    let search = async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event.kind) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(within, search)
        .await
        .expect("timed out waiting for event")
}

/// Collect every event up to and including the first one matching
/// `predicate`.
pub async fn collect_until(
    events: &mut broadcast::Receiver<SessionEvent>,
    within: Duration,
    mut predicate: impl FnMut(&SessionEventKind) -> bool,
) -> Vec<SessionEventKind> {
    let mut seen = Vec::new();
    let search = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let done = predicate(&event.kind);
                    seen.push(event.kind);
                    if done {
                        return;
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(within, search)
        .await
        .expect("timed out collecting events");
    seen
}

/// Wait until the call is connected.
pub async fn wait_connected(handle: &CallSupervisorHandle, within: Duration) {
    let mut status = handle.status();
    tokio::time::timeout(within, status.wait_connected())
        .await
        .expect("timed out waiting for connection")
        .expect("supervisor stopped");
}

/// Wait until the call is not connected.
pub async fn wait_disconnected(handle: &CallSupervisorHandle, within: Duration) {
    let mut status = handle.status();
    tokio::time::timeout(within, status.wait_for(|s| !s.connected))
        .await
        .expect("timed out waiting for disconnection")
        .expect("supervisor stopped");
}

/// Snapshot of a running supervisor.
pub async fn state(handle: &CallSupervisorHandle) -> SupervisorState {
    handle.get_state().await.expect("supervisor stopped")
}
