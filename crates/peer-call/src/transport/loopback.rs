//! In-process relay, media transport and camera.
//!
//! [`LoopbackRelay`] behaves like a signaling relay with attached media
//! transport: identities register, calls ring the callee's registration, and
//! answering exchanges the two sides' streams. Closing a registration closes
//! every connection it took part in.
//!
//! The relay also exposes fault injection (failed registrations, dropped
//! registrations, broken links, slow registrations, late call
//! acknowledgements) and introspection so tests can observe what the
//! lifecycle manager actually did.

use super::{
    CaptureDevice, CaptureError, ConnectionEvent, IncomingCall, MediaConnection, MediaLink,
    Registration, RegistrationEvent, Relay, RelayRegistration, TransportError,
};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use async_trait::async_trait;
use common::config::{CaptureConstraints, FacingMode, RelayConfig};
use common::types::{ConnectionId, Identity, TrackId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Hub {
    state: Mutex<HubState>,
}

impl Hub {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reject(&self, id: ConnectionId) {
        let mut state = self.lock();
        if let Some(link) = state.links.remove(&id) {
            debug!(
                target: "pc.transport.loopback",
                connection_id = %id,
                caller = %link.caller,
                "Call rejected"
            );
            let _ = link.caller_events.send(ConnectionEvent::Closed);
        }
    }
}

#[derive(Default)]
struct HubState {
    next_registration: u64,
    peers: HashMap<Identity, PeerSlot>,
    links: HashMap<ConnectionId, Link>,
    pending: HashMap<Identity, usize>,
    peak_presence: HashMap<Identity, usize>,
    registrations: HashMap<Identity, u32>,
    fail_next_registrations: u32,
    registration_delay: Duration,
    acknowledgement_delay: Duration,
}

impl HubState {
    /// In-progress plus live registrations for `identity`.
    fn presence(&self, identity: &Identity) -> usize {
        self.pending.get(identity).copied().unwrap_or(0)
            + usize::from(self.peers.contains_key(identity))
    }

    fn note_presence(&mut self, identity: &Identity) {
        let now = self.presence(identity);
        let peak = self.peak_presence.entry(identity.clone()).or_default();
        *peak = (*peak).max(now);
    }

    fn close_links_of(&mut self, identity: &Identity) -> usize {
        let ids: Vec<ConnectionId> = self
            .links
            .iter()
            .filter(|(_, link)| link.caller == *identity || link.callee == *identity)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(link) = self.links.remove(id) {
                link.notify_both(&ConnectionEvent::Closed);
            }
        }
        ids.len()
    }
}

struct PeerSlot {
    registration: u64,
    events: mpsc::UnboundedSender<RegistrationEvent>,
}

struct Link {
    caller: Identity,
    callee: Identity,
    caller_events: mpsc::UnboundedSender<ConnectionEvent>,
    callee_events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    caller_stream: MediaStream,
    caller_video: Option<TrackId>,
    callee_video: Option<TrackId>,
}

impl Link {
    fn answered(&self) -> bool {
        self.callee_events.is_some()
    }

    fn notify_both(&self, event: &ConnectionEvent) {
        let _ = self.caller_events.send(event.clone());
        if let Some(callee) = &self.callee_events {
            let _ = callee.send(event.clone());
        }
    }
}

/// Snapshot of one media link for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub id: ConnectionId,
    pub caller: Identity,
    pub callee: Identity,
    /// Whether the callee answered.
    pub answered: bool,
    /// Video track the caller is currently sending.
    pub caller_video: Option<TrackId>,
    /// Video track the callee is currently sending.
    pub callee_video: Option<TrackId>,
}

/// In-process signaling relay and media transport.
#[derive(Clone, Default)]
pub struct LoopbackRelay {
    hub: Arc<Hub>,
}

impl LoopbackRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` registration attempts with `Unavailable`.
    pub fn fail_next_registrations(&self, count: u32) {
        self.hub.lock().fail_next_registrations = count;
    }

    /// Delay every registration attempt by `delay` before it resolves.
    pub fn set_registration_delay(&self, delay: Duration) {
        self.hub.lock().registration_delay = delay;
    }

    /// Resolve every `call` only `delay` after the callee has been rung.
    pub fn set_acknowledgement_delay(&self, delay: Duration) {
        self.hub.lock().acknowledgement_delay = delay;
    }

    /// Drop `identity`'s registration from the relay side.
    ///
    /// The registration holder receives `Disconnected`. Returns `false` if
    /// the identity was not registered.
    pub fn disconnect(&self, identity: &Identity) -> bool {
        let removed = self.hub.lock().peers.remove(identity);
        match removed {
            Some(slot) => {
                info!(
                    target: "pc.transport.loopback",
                    identity = %identity,
                    "Dropping registration"
                );
                let _ = slot.events.send(RegistrationEvent::Disconnected);
                true
            }
            None => false,
        }
    }

    /// Fail a media link. Both ends receive an error.
    pub fn break_link(&self, id: ConnectionId) -> bool {
        let mut state = self.hub.lock();
        match state.links.remove(&id) {
            Some(link) => {
                warn!(target: "pc.transport.loopback", connection_id = %id, "Breaking link");
                link.notify_both(&ConnectionEvent::Error("link broken".to_string()));
                true
            }
            None => false,
        }
    }

    /// Whether `identity` currently holds a live registration.
    #[must_use]
    pub fn is_registered(&self, identity: &Identity) -> bool {
        self.hub.lock().peers.contains_key(identity)
    }

    /// Successful registrations of `identity` so far.
    #[must_use]
    pub fn registration_count(&self, identity: &Identity) -> u32 {
        self.hub
            .lock()
            .registrations
            .get(identity)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous in-progress plus live registrations
    /// ever observed for `identity`.
    #[must_use]
    pub fn peak_presence(&self, identity: &Identity) -> usize {
        self.hub
            .lock()
            .peak_presence
            .get(identity)
            .copied()
            .unwrap_or(0)
    }

    /// All links that are ringing or answered.
    #[must_use]
    pub fn active_links(&self) -> Vec<LinkSnapshot> {
        self.hub
            .lock()
            .links
            .iter()
            .map(|(id, link)| LinkSnapshot {
                id: *id,
                caller: link.caller.clone(),
                callee: link.callee.clone(),
                answered: link.answered(),
                caller_video: link.caller_video,
                callee_video: link.callee_video,
            })
            .collect()
    }

    /// Video track `identity` is sending on its answered link, if any.
    #[must_use]
    pub fn transmitted_video(&self, identity: &Identity) -> Option<TrackId> {
        self.active_links()
            .into_iter()
            .filter(|link| link.answered)
            .find_map(|link| {
                if link.caller == *identity {
                    link.caller_video
                } else if link.callee == *identity {
                    link.callee_video
                } else {
                    None
                }
            })
    }
}

/// Decrements the in-progress count when a registration attempt ends,
/// including when the attempt's future is dropped mid-flight.
struct PendingGuard<'a> {
    hub: &'a Hub,
    identity: &'a Identity,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.hub.lock();
        if let Some(count) = state.pending.get_mut(self.identity) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.pending.remove(self.identity);
            }
        }
    }
}

#[async_trait]
impl Relay for LoopbackRelay {
    async fn register(
        &self,
        identity: &Identity,
        config: &RelayConfig,
    ) -> Result<Registration, TransportError> {
        let delay = {
            let mut state = self.hub.lock();
            *state.pending.entry(identity.clone()).or_default() += 1;
            state.note_presence(identity);
            state.registration_delay
        };
        let guard = PendingGuard {
            hub: &self.hub,
            identity,
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        drop(guard);

        let mut state = self.hub.lock();
        if state.fail_next_registrations > 0 {
            state.fail_next_registrations -= 1;
            return Err(TransportError::Unavailable(
                "injected registration failure".to_string(),
            ));
        }
        if state.peers.contains_key(identity) {
            return Err(TransportError::IdTaken(identity.to_string()));
        }

        state.next_registration += 1;
        let registration = state.next_registration;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state.peers.insert(
            identity.clone(),
            PeerSlot {
                registration,
                events: events_tx,
            },
        );
        *state.registrations.entry(identity.clone()).or_default() += 1;
        state.note_presence(identity);

        debug!(
            target: "pc.transport.loopback",
            identity = %identity,
            relay = %format!("{}:{}", config.host, config.port),
            registration,
            "Registered"
        );

        Ok(Registration {
            handle: Arc::new(LoopbackRegistration {
                hub: Arc::clone(&self.hub),
                identity: identity.clone(),
                registration,
                open: AtomicBool::new(true),
            }),
            events: events_rx,
        })
    }
}

struct LoopbackRegistration {
    hub: Arc<Hub>,
    identity: Identity,
    registration: u64,
    open: AtomicBool,
}

#[async_trait]
impl RelayRegistration for LoopbackRegistration {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
            && self
                .hub
                .lock()
                .peers
                .get(&self.identity)
                .is_some_and(|slot| slot.registration == self.registration)
    }

    async fn call(
        &self,
        remote: &Identity,
        stream: &MediaStream,
    ) -> Result<MediaLink, TransportError> {
        if !self.is_open() {
            return Err(TransportError::RegistrationClosed);
        }

        let id = ConnectionId::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (callee_events, ack_delay) = {
            let mut state = self.hub.lock();
            let callee_events = state.peers.get(remote).map(|slot| slot.events.clone());
            if callee_events.is_some() {
                state.links.insert(
                    id,
                    Link {
                        caller: self.identity.clone(),
                        callee: remote.clone(),
                        caller_events: events_tx.clone(),
                        callee_events: None,
                        caller_stream: stream.clone(),
                        caller_video: stream.video_track().map(MediaTrack::id),
                        callee_video: None,
                    },
                );
            }
            (callee_events, state.acknowledgement_delay)
        };

        // Lock released: a failed send drops the incoming call, which rejects itself.
        match callee_events {
            Some(callee) => {
                let incoming = LoopbackIncoming {
                    hub: Arc::clone(&self.hub),
                    id,
                    caller: self.identity.clone(),
                    settled: false,
                };
                let _ = callee.send(RegistrationEvent::IncomingCall(Box::new(incoming)));
            }
            None => {
                let _ = events_tx.send(ConnectionEvent::Error(format!(
                    "peer unavailable: {remote}"
                )));
            }
        }

        if !ack_delay.is_zero() {
            tokio::time::sleep(ack_delay).await;
        }

        Ok(MediaLink {
            connection: Arc::new(LoopbackConnection {
                hub: Arc::clone(&self.hub),
                id,
                remote: remote.clone(),
                side: Side::Caller,
            }),
            events: events_rx,
        })
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        let (removed, closed_links) = {
            let mut state = self.hub.lock();
            let removed = match state.peers.get(&self.identity) {
                Some(slot) if slot.registration == self.registration => {
                    state.peers.remove(&self.identity)
                }
                _ => None,
            };
            (removed, state.close_links_of(&self.identity))
        };
        drop(removed);

        debug!(
            target: "pc.transport.loopback",
            identity = %self.identity,
            registration = self.registration,
            closed_links,
            "Registration closed"
        );
    }
}

struct LoopbackIncoming {
    hub: Arc<Hub>,
    id: ConnectionId,
    caller: Identity,
    settled: bool,
}

impl IncomingCall for LoopbackIncoming {
    fn caller(&self) -> &Identity {
        &self.caller
    }

    fn answer(mut self: Box<Self>, stream: &MediaStream) -> Result<MediaLink, TransportError> {
        self.settled = true;

        let mut state = self.hub.lock();
        let link = state
            .links
            .get_mut(&self.id)
            .filter(|link| !link.answered())
            .ok_or(TransportError::ConnectionClosed)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = link
            .caller_events
            .send(ConnectionEvent::RemoteStream(stream.clone()));
        let _ = events_tx.send(ConnectionEvent::RemoteStream(link.caller_stream.clone()));
        link.callee_video = stream.video_track().map(MediaTrack::id);
        link.callee_events = Some(events_tx);
        drop(state);

        Ok(MediaLink {
            connection: Arc::new(LoopbackConnection {
                hub: Arc::clone(&self.hub),
                id: self.id,
                remote: self.caller.clone(),
                side: Side::Callee,
            }),
            events: events_rx,
        })
    }

    fn reject(mut self: Box<Self>) {
        self.settled = true;
        self.hub.reject(self.id);
    }
}

impl Drop for LoopbackIncoming {
    fn drop(&mut self) {
        if !self.settled {
            self.hub.reject(self.id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Caller,
    Callee,
}

struct LoopbackConnection {
    hub: Arc<Hub>,
    id: ConnectionId,
    remote: Identity,
    side: Side,
}

impl MediaConnection for LoopbackConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote(&self) -> &Identity {
        &self.remote
    }

    fn replace_video_track(&self, track: &MediaTrack) -> Result<(), TransportError> {
        if track.kind() != TrackKind::Video {
            return Err(TransportError::TrackReplacement(
                "not a video track".to_string(),
            ));
        }

        let mut state = self.hub.lock();
        let link = state
            .links
            .get_mut(&self.id)
            .ok_or(TransportError::ConnectionClosed)?;
        match self.side {
            Side::Caller => link.caller_video = Some(track.id()),
            Side::Callee => link.callee_video = Some(track.id()),
        }
        Ok(())
    }

    fn close(&self) {
        let mut state = self.hub.lock();
        if let Some(link) = state.links.remove(&self.id) {
            debug!(
                target: "pc.transport.loopback",
                connection_id = %self.id,
                remote = %self.remote,
                "Link closed"
            );
            link.notify_both(&ConnectionEvent::Closed);
        }
    }
}

/// Synthetic camera and microphone.
///
/// Every acquisition succeeds with fresh tracks. Produced streams are kept
/// so tests can check that nothing was left running.
#[derive(Clone, Default)]
pub struct LoopbackCamera {
    produced: Arc<Mutex<Vec<MediaStream>>>,
}

impl LoopbackCamera {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn produced(&self) -> MutexGuard<'_, Vec<MediaStream>> {
        self.produced.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of streams handed out so far.
    #[must_use]
    pub fn acquisitions(&self) -> usize {
        self.produced().len()
    }

    /// Tracks handed out and not yet stopped.
    #[must_use]
    pub fn live_tracks(&self) -> usize {
        self.produced()
            .iter()
            .flat_map(MediaStream::tracks)
            .filter(|t| t.is_live())
            .count()
    }
}

#[async_trait]
impl CaptureDevice for LoopbackCamera {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError> {
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "microphone"));
        }
        if let Some(video) = &constraints.video {
            let facing = video.facing_mode.unwrap_or(FacingMode::User);
            tracks.push(MediaTrack::new(
                TrackKind::Video,
                format!("camera:{}", facing.as_str()),
            ));
        }
        if tracks.is_empty() {
            return Err(CaptureError::NotFound);
        }

        let stream = MediaStream::new(tracks);
        self.produced().push(stream.clone());
        Ok(stream)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
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

    async fn stream(camera: &LoopbackCamera) -> MediaStream {
        camera.acquire(&CaptureConstraints::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_identity_is_exclusive() {
        let relay = LoopbackRelay::new();
        let alice = identity("alice");

        let first = relay.register(&alice, &relay_config()).await.unwrap();
        let second = relay.register(&alice, &relay_config()).await;
        assert!(matches!(second, Err(TransportError::IdTaken(_))));

        first.handle.close();
        assert!(!first.handle.is_open());
        assert!(relay.register(&alice, &relay_config()).await.is_ok());
        assert_eq!(relay.registration_count(&alice), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let relay = LoopbackRelay::new();
        relay.fail_next_registrations(2);
        let alice = identity("alice");

        assert!(relay.register(&alice, &relay_config()).await.is_err());
        assert!(relay.register(&alice, &relay_config()).await.is_err());
        assert!(relay.register(&alice, &relay_config()).await.is_ok());
    }

    #[tokio::test]
    async fn test_call_and_answer_exchange_streams() {
        let relay = LoopbackRelay::new();
        let camera = LoopbackCamera::new();
        let alice = identity("alice");
        let bob = identity("bob");

        let alice_reg = relay.register(&alice, &relay_config()).await.unwrap();
        let mut bob_reg = relay.register(&bob, &relay_config()).await.unwrap();
        let alice_stream = stream(&camera).await;
        let bob_stream = stream(&camera).await;

        let mut outbound = alice_reg.handle.call(&bob, &alice_stream).await.unwrap();

        let Some(RegistrationEvent::IncomingCall(incoming)) = bob_reg.events.recv().await else {
            panic!("expected incoming call");
        };
        assert_eq!(incoming.caller(), &alice);
        let mut inbound = incoming.answer(&bob_stream).unwrap();

        let Some(ConnectionEvent::RemoteStream(at_alice)) = outbound.events.recv().await else {
            panic!("expected remote stream at caller");
        };
        assert_eq!(at_alice, bob_stream);
        let Some(ConnectionEvent::RemoteStream(at_bob)) = inbound.events.recv().await else {
            panic!("expected remote stream at callee");
        };
        assert_eq!(at_bob, alice_stream);

        assert_eq!(
            relay.transmitted_video(&alice),
            alice_stream.video_track().map(MediaTrack::id)
        );

        outbound.connection.close();
        assert!(matches!(
            inbound.events.recv().await,
            Some(ConnectionEvent::Closed)
        ));
        assert!(relay.active_links().is_empty());
    }

    #[tokio::test]
    async fn test_call_to_unregistered_peer_errors_after_ack() {
        let relay = LoopbackRelay::new();
        let camera = LoopbackCamera::new();
        let alice = identity("alice");

        let reg = relay.register(&alice, &relay_config()).await.unwrap();
        let mut link = reg
            .handle
            .call(&identity("nobody"), &stream(&camera).await)
            .await
            .unwrap();

        assert!(matches!(
            link.events.recv().await,
            Some(ConnectionEvent::Error(reason)) if reason.contains("peer unavailable")
        ));
    }

    #[tokio::test]
    async fn test_dropped_incoming_call_is_rejected() {
        let relay = LoopbackRelay::new();
        let camera = LoopbackCamera::new();
        let alice = identity("alice");
        let bob = identity("bob");

        let alice_reg = relay.register(&alice, &relay_config()).await.unwrap();
        let mut bob_reg = relay.register(&bob, &relay_config()).await.unwrap();
        let mut outbound = alice_reg
            .handle
            .call(&bob, &stream(&camera).await)
            .await
            .unwrap();

        drop(bob_reg.events.recv().await);

        assert!(matches!(
            outbound.events.recv().await,
            Some(ConnectionEvent::Closed)
        ));
        assert!(relay.active_links().is_empty());
    }

    #[tokio::test]
    async fn test_closing_registration_closes_its_links() {
        let relay = LoopbackRelay::new();
        let camera = LoopbackCamera::new();
        let alice = identity("alice");
        let bob = identity("bob");

        let alice_reg = relay.register(&alice, &relay_config()).await.unwrap();
        let mut bob_reg = relay.register(&bob, &relay_config()).await.unwrap();
        let mut outbound = alice_reg
            .handle
            .call(&bob, &stream(&camera).await)
            .await
            .unwrap();
        let Some(RegistrationEvent::IncomingCall(incoming)) = bob_reg.events.recv().await else {
            panic!("expected incoming call");
        };
        let _inbound = incoming.answer(&stream(&camera).await).unwrap();
        let _ = outbound.events.recv().await;

        bob_reg.handle.close();

        assert!(matches!(
            outbound.events.recv().await,
            Some(ConnectionEvent::Closed)
        ));
        assert!(!relay.is_registered(&bob));
    }

    #[tokio::test]
    async fn test_disconnect_notifies_holder() {
        let relay = LoopbackRelay::new();
        let alice = identity("alice");
        let mut reg = relay.register(&alice, &relay_config()).await.unwrap();

        assert!(relay.disconnect(&alice));
        assert!(!reg.handle.is_open());
        assert!(matches!(
            reg.events.recv().await,
            Some(RegistrationEvent::Disconnected)
        ));
        assert!(!relay.disconnect(&alice));
    }

    #[tokio::test]
    async fn test_replace_video_track_updates_transmitted_track() {
        let relay = LoopbackRelay::new();
        let camera = LoopbackCamera::new();
        let alice = identity("alice");
        let bob = identity("bob");

        let alice_reg = relay.register(&alice, &relay_config()).await.unwrap();
        let mut bob_reg = relay.register(&bob, &relay_config()).await.unwrap();
        let outbound = alice_reg
            .handle
            .call(&bob, &stream(&camera).await)
            .await
            .unwrap();
        let Some(RegistrationEvent::IncomingCall(incoming)) = bob_reg.events.recv().await else {
            panic!("expected incoming call");
        };
        let _inbound = incoming.answer(&stream(&camera).await).unwrap();

        let back = MediaTrack::new(TrackKind::Video, "camera:environment");
        outbound.connection.replace_video_track(&back).unwrap();
        assert_eq!(relay.transmitted_video(&alice), Some(back.id()));

        let audio = MediaTrack::new(TrackKind::Audio, "mic");
        assert!(outbound.connection.replace_video_track(&audio).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_presence_counts_in_flight_attempts() {
        let relay = LoopbackRelay::new();
        relay.set_registration_delay(Duration::from_millis(100));
        let alice = identity("alice");

        let config = relay_config();

        let first = relay.register(&alice, &config);
        let second = relay.register(&alice, &config);
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_ok() != second.is_ok());
        assert_eq!(relay.peak_presence(&alice), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_acknowledgement_rings_callee_first() {
        let relay = LoopbackRelay::new();
        relay.set_acknowledgement_delay(Duration::from_millis(10));
        let camera = LoopbackCamera::new();
        let alice = identity("alice");
        let bob = identity("bob");

        let alice_reg = relay.register(&alice, &relay_config()).await.unwrap();
        let mut bob_reg = relay.register(&bob, &relay_config()).await.unwrap();
        let alice_stream = stream(&camera).await;

        let started = tokio::time::Instant::now();
        let pending = {
            let handle = Arc::clone(&alice_reg.handle);
            let bob = bob.clone();
            tokio::spawn(async move { handle.call(&bob, &alice_stream).await })
        };

        let Some(RegistrationEvent::IncomingCall(incoming)) = bob_reg.events.recv().await else {
            panic!("expected incoming call");
        };
        assert!(!pending.is_finished());
        incoming.reject();

        let mut outbound = pending.await.unwrap().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert!(matches!(
            outbound.events.recv().await,
            Some(ConnectionEvent::Closed)
        ));
    }

    #[tokio::test]
    async fn test_camera_tracks_follow_constraints() {
        let camera = LoopbackCamera::new();
        let stream = camera
            .acquire(&CaptureConstraints::default().with_toggled_camera())
            .await
            .unwrap();

        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(stream.video_track().unwrap().label(), "camera:environment");
        assert_eq!(camera.live_tracks(), 2);

        stream.stop_all();
        assert_eq!(camera.live_tracks(), 0);

        let nothing = CaptureConstraints {
            video: None,
            audio: false,
        };
        assert_eq!(camera.acquire(&nothing).await, Err(CaptureError::NotFound));
    }
}
