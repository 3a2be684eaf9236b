//! Signaling session: one relay registration under one identity.
//!
//! A session is created in `Connecting`, becomes `Open` when the relay
//! accepts the registration, and ends in `Failed` or `Closed`. It is never
//! moved back to `Connecting`: the supervisor discards a failed session and
//! its recreate timer builds a fresh one under a new generation.

use super::messages::{Generation, SupervisorMessage};
use super::tasks::{deliver, spawn_forwarder};
use crate::transport::{Registration, Relay, RelayRegistration};
use common::config::RelayConfig;
use common::types::Identity;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a signaling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingState {
    Connecting,
    Open,
    Failed,
    Closed,
}

/// One registration attempt and, once it succeeds, the live registration.
pub struct SignalingSession {
    generation: Generation,
    identity: Identity,
    state: SignalingState,
    registration: Option<Arc<dyn RelayRegistration>>,
    /// Cancels the registration attempt and the event forwarder.
    cancel: CancellationToken,
}

impl SignalingSession {
    /// Start registering `identity`. The outcome arrives as
    /// `RegistrationCompleted` tagged with `generation`.
    pub(crate) fn open(
        generation: Generation,
        identity: Identity,
        relay: Arc<dyn Relay>,
        config: RelayConfig,
        parent: &CancellationToken,
        sender: mpsc::Sender<SupervisorMessage>,
    ) -> Self {
        let cancel = parent.child_token();
        let token = cancel.clone();
        let task_identity = identity.clone();

        debug!(
            target: "pc.signaling",
            identity = %identity,
            generation,
            "Registering with relay"
        );

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                result = relay.register(&task_identity, &config) => {
                    let message = SupervisorMessage::RegistrationCompleted { generation, result };
                    deliver(&sender, message).await;
                }
            }
        });

        Self {
            generation,
            identity,
            state: SignalingState::Connecting,
            registration: None,
            cancel,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SignalingState::Open
    }

    /// Whether `generation` names this session's pending registration.
    pub(crate) fn awaits(&self, generation: Generation) -> bool {
        self.generation == generation && self.state == SignalingState::Connecting
    }

    /// Whether `generation` names this session while it is open.
    pub(crate) fn is_current_open(&self, generation: Generation) -> bool {
        self.generation == generation && self.state == SignalingState::Open
    }

    /// The live registration, only while open.
    pub(crate) fn registration(&self) -> Option<Arc<dyn RelayRegistration>> {
        if self.is_open() {
            self.registration.clone()
        } else {
            None
        }
    }

    /// Take ownership of a successful registration and start forwarding its
    /// events.
    pub(crate) fn on_registered(
        &mut self,
        registration: Registration,
        sender: mpsc::Sender<SupervisorMessage>,
    ) {
        let generation = self.generation;
        spawn_forwarder(
            registration.events,
            self.cancel.child_token(),
            sender,
            move |event| SupervisorMessage::Registration { generation, event },
        );
        self.registration = Some(registration.handle);
        self.state = SignalingState::Open;

        info!(
            target: "pc.signaling",
            identity = %self.identity,
            generation,
            "Signaling open"
        );
    }

    /// Mark the session failed and release the registration.
    pub(crate) fn fail(&mut self, reason: &str) {
        warn!(
            target: "pc.signaling",
            identity = %self.identity,
            generation = self.generation,
            reason,
            "Signaling failed"
        );
        self.state = SignalingState::Failed;
        self.release();
    }

    /// Close the session on purpose (teardown or rebind).
    pub(crate) fn close(&mut self) {
        if matches!(self.state, SignalingState::Connecting | SignalingState::Open) {
            debug!(
                target: "pc.signaling",
                identity = %self.identity,
                generation = self.generation,
                "Closing signaling"
            );
            self.state = SignalingState::Closed;
        }
        self.release();
    }

    fn release(&mut self) {
        self.cancel.cancel();
        if let Some(registration) = self.registration.take() {
            registration.close();
        }
    }
}

impl Drop for SignalingSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::transport::loopback::LoopbackRelay;
    use common::types::DisplayName;

    fn identity(name: &str) -> Identity {
        Identity::derive("peer-chat", &DisplayName::parse(name).unwrap()).unwrap()
    }

    fn relay_config() -> RelayConfig {
        RelayConfig {
            host: "relay.test".to_string(),
            port: 443,
            secure: true,
            ice_servers: vec![],
        }
    }

    async fn opened(
        relay: &LoopbackRelay,
        name: &str,
    ) -> (SignalingSession, mpsc::Receiver<SupervisorMessage>) {
        let (tx, mut rx) = mpsc::channel(8);
        let parent = CancellationToken::new();
        let mut session = SignalingSession::open(
            1,
            identity(name),
            Arc::new(relay.clone()),
            relay_config(),
            &parent,
            tx.clone(),
        );
        assert_eq!(session.state(), SignalingState::Connecting);
        assert!(session.awaits(1));

        let Some(SupervisorMessage::RegistrationCompleted { generation, result }) = rx.recv().await
        else {
            panic!("expected registration result");
        };
        assert_eq!(generation, 1);
        session.on_registered(result.unwrap(), tx);
        (session, rx)
    }

    #[tokio::test]
    async fn test_open_registers_and_forwards_events() {
        let relay = LoopbackRelay::new();
        let (session, mut rx) = opened(&relay, "alice").await;

        assert!(session.is_open());
        assert!(session.is_current_open(1));
        assert!(session.registration().is_some());
        assert!(relay.is_registered(session.identity()));

        relay.disconnect(session.identity());
        let msg = rx.recv().await.unwrap();
        assert!(matches!(
            msg,
            SupervisorMessage::Registration {
                generation: 1,
                event: crate::transport::RegistrationEvent::Disconnected
            }
        ));
    }

    #[tokio::test]
    async fn test_fail_releases_registration() {
        let relay = LoopbackRelay::new();
        let (mut session, _rx) = opened(&relay, "alice").await;

        session.fail("relay error");

        assert_eq!(session.state(), SignalingState::Failed);
        assert!(session.registration().is_none());
        assert!(!relay.is_registered(session.identity()));
    }

    #[tokio::test]
    async fn test_drop_releases_registration() {
        let relay = LoopbackRelay::new();
        let (session, _rx) = opened(&relay, "alice").await;
        let alice = session.identity().clone();

        drop(session);
        assert!(!relay.is_registered(&alice));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_connecting_cancels_attempt() {
        let relay = LoopbackRelay::new();
        relay.set_registration_delay(std::time::Duration::from_secs(5));
        let (tx, mut rx) = mpsc::channel(8);
        let parent = CancellationToken::new();

        let mut session = SignalingSession::open(
            1,
            identity("alice"),
            Arc::new(relay.clone()),
            relay_config(),
            &parent,
            tx.clone(),
        );
        tokio::task::yield_now().await;
        session.close();
        assert_eq!(session.state(), SignalingState::Closed);

        // The attempt was cancelled, so nothing is ever delivered.
        let next = tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv()).await;
        assert!(next.is_err());
        assert!(!relay.is_registered(&identity("alice")));
    }
}
