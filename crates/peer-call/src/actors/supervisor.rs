//! `CallSupervisor` - the lifecycle supervisor for one side of a call.
//!
//! The supervisor is a single actor task. It owns the capture source
//! manager, the current signaling session and the current call session, and
//! every state transition happens inside its message loop. Slow operations
//! (acquisition, registration, placement) run in spawned tasks and report
//! back through the mailbox with the generation of the component that
//! started them; anything carrying an outdated generation is ignored and its
//! resources are released.
//!
//! # Boot
//!
//! 1. Capture acquisition starts polling.
//! 2. Once a stream exists, signaling opens.
//! 3. Once signaling is open, an Initiator starts the placement loop after a
//!    random delay; a Responder waits for the inbound call.
//!
//! # Teardown
//!
//! Timers stop first, then the call transport closes, then the registration,
//! then capture tracks are released, and finally a disconnected status is
//! published.

use super::call::{CallSession, CallState};
use super::capture::{CaptureOutcome, CaptureSourceManager, PendingSwitch, TickOutcome};
use super::messages::{Generation, SupervisorMessage, SupervisorState, SwitchOutcome};
use super::signaling::SignalingSession;
use super::status::{CallStatus, EventPublisher, SessionEvent, SessionEventKind, StatusReceiver};
use super::tasks::{deliver, RetryTimer};
use crate::config::{Config, RetryTiming};
use crate::errors::CallError;
use crate::media::MediaStream;
use crate::observability::metrics;
use crate::transport::{
    CaptureDevice, CaptureError, ConnectionEvent, IncomingCall, MediaLink, Registration,
    RegistrationEvent, Relay, TransportError,
};
use common::config::{CaptureConstraints, RelayConfig};
use common::error::IdentityError;
use common::identity::CallRoute;
use common::types::{CallRole, DisplayName, Identity};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the supervisor mailbox.
const SUPERVISOR_CHANNEL_BUFFER: usize = 64;

/// Who is calling whom, and which side this supervisor plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    local: Identity,
    remote: Identity,
    role: CallRole,
}

impl SessionBinding {
    /// # Errors
    ///
    /// Returns `IdentityError::SelfCall` if `local` and `remote` are equal.
    pub fn new(local: Identity, remote: Identity, role: CallRole) -> Result<Self, IdentityError> {
        if local == remote {
            return Err(IdentityError::SelfCall);
        }
        Ok(Self {
            local,
            remote,
            role,
        })
    }

    /// Binding for the participant `local` of `route`.
    ///
    /// # Errors
    ///
    /// Returns a fatal `CallError::Identity` if `local` is not part of the
    /// route or the prefix is invalid.
    pub fn from_route(
        prefix: &str,
        route: &CallRoute,
        local: &DisplayName,
    ) -> Result<Self, CallError> {
        let (role, remote) = route.role_for(local)?;
        let binding = Self::new(
            Identity::derive(prefix, local)?,
            Identity::derive(prefix, remote)?,
            role,
        )?;
        Ok(binding)
    }

    pub fn local(&self) -> &Identity {
        &self.local
    }

    pub fn remote(&self) -> &Identity {
        &self.remote
    }

    pub fn role(&self) -> CallRole {
        self.role
    }
}

/// Everything a supervisor needs besides its binding and transports.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub relay: RelayConfig,
    pub constraints: CaptureConstraints,
    pub timing: RetryTiming,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            relay: config.relay.clone(),
            constraints: config.capture.clone(),
            timing: config.timing,
        }
    }
}

/// Handle to a `CallSupervisor`.
#[derive(Clone)]
pub struct CallSupervisorHandle {
    sender: mpsc::Sender<SupervisorMessage>,
    cancel_token: CancellationToken,
    status: watch::Receiver<CallStatus>,
    events: EventPublisher,
}

impl CallSupervisorHandle {
    /// Current and future call status.
    #[must_use]
    pub fn status(&self) -> StatusReceiver {
        StatusReceiver::new(self.status.clone())
    }

    /// Subscribe to raw lifecycle events from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SupervisorMessage,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| CallError::ShuttingDown)?;
        rx.await.map_err(|_| CallError::ShuttingDown)
    }

    /// Switch to a capture device matching `constraints`.
    ///
    /// Resolves once the fresh stream is in service, or immediately with
    /// `ConstraintsUpdated` if no stream has been acquired yet.
    pub async fn switch_device(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<SwitchOutcome, CallError> {
        self.request(|respond_to| SupervisorMessage::SwitchDevice {
            constraints,
            respond_to,
        })
        .await?
    }

    /// Flip between the front and back camera.
    pub async fn toggle_camera(&self) -> Result<SwitchOutcome, CallError> {
        self.request(|respond_to| SupervisorMessage::ToggleCamera { respond_to })
            .await?
    }

    /// Replace the binding; call and signaling are rebuilt from scratch.
    pub async fn rebind(&self, binding: SessionBinding) -> Result<(), CallError> {
        self.request(|respond_to| SupervisorMessage::Rebind {
            binding,
            respond_to,
        })
        .await?
    }

    /// Get a diagnostic snapshot.
    pub async fn get_state(&self) -> Result<SupervisorState, CallError> {
        self.request(|respond_to| SupervisorMessage::GetState { respond_to })
            .await
    }

    /// Tear the session down in order and stop the actor.
    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.request(|respond_to| SupervisorMessage::Shutdown { respond_to })
            .await
    }

    /// Cancel the supervisor. Teardown still runs, in the same order.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the supervisor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `CallSupervisor` implementation.
pub struct CallSupervisor {
    binding: SessionBinding,
    relay: Arc<dyn Relay>,
    relay_config: RelayConfig,
    timing: RetryTiming,
    /// Message receiver.
    receiver: mpsc::Receiver<SupervisorMessage>,
    /// Handed to spawned tasks so they can report back.
    sender: mpsc::Sender<SupervisorMessage>,
    /// Parent of every token handed to spawned tasks.
    cancel_token: CancellationToken,
    next_generation: Generation,
    capture: CaptureSourceManager,
    signaling: Option<SignalingSession>,
    signaling_retry: Option<RetryTimer>,
    call: Option<CallSession>,
    placement: Option<RetryTimer>,
    placement_in_flight: Option<Generation>,
    status: watch::Sender<CallStatus>,
    events: EventPublisher,
    is_shutting_down: bool,
}

impl CallSupervisor {
    /// Spawn a new supervisor.
    ///
    /// Returns a handle and the task join handle. The supervisor runs until
    /// `shutdown()` or `cancel()`, or until `parent` is cancelled.
    pub fn spawn(
        binding: SessionBinding,
        settings: SupervisorSettings,
        relay: Arc<dyn Relay>,
        device: Arc<dyn CaptureDevice>,
        parent: &CancellationToken,
    ) -> (CallSupervisorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SUPERVISOR_CHANNEL_BUFFER);
        let (status_tx, status_rx) = watch::channel(CallStatus::default());
        let cancel_token = parent.child_token();
        let events = EventPublisher::new();

        let actor = Self {
            binding,
            relay,
            relay_config: settings.relay,
            timing: settings.timing,
            receiver,
            sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            next_generation: 0,
            capture: CaptureSourceManager::new(
                device,
                settings.constraints,
                settings.timing.capture_retry,
                &cancel_token,
            ),
            signaling: None,
            signaling_retry: None,
            call: None,
            placement: None,
            placement_in_flight: None,
            status: status_tx,
            events: events.clone(),
            is_shutting_down: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CallSupervisorHandle {
            sender,
            cancel_token,
            status: status_rx,
            events,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "pc.actor.supervisor",
        fields(local = %self.binding.local, role = self.binding.role.as_str())
    )]
    async fn run(mut self) {
        info!(
            target: "pc.actor.supervisor",
            local = %self.binding.local,
            remote = %self.binding.remote,
            role = self.binding.role.as_str(),
            "CallSupervisor started"
        );

        self.boot();

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "pc.actor.supervisor",
                        local = %self.binding.local,
                        "CallSupervisor received cancellation signal"
                    );
                    self.teardown("cancelled");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message) {
                                break;
                            }
                        }
                        None => {
                            self.teardown("mailbox closed");
                            break;
                        }
                    }
                }
            }
        }

        self.drain_mailbox();

        info!(
            target: "pc.actor.supervisor",
            local = %self.binding.local,
            "CallSupervisor stopped"
        );
    }

    fn next_generation(&mut self) -> Generation {
        self.next_generation += 1;
        self.next_generation
    }

    fn publish(&self, kind: SessionEventKind) {
        self.events.publish(&self.binding.local, kind);
    }

    fn boot(&mut self) {
        let timer = self.next_generation();
        self.capture.start_polling(timer, self.sender.clone());
    }

    /// Handle one message. Returns `true` when the actor should stop.
    fn handle_message(&mut self, message: SupervisorMessage) -> bool {
        if self.is_shutting_down || !self.is_current(&message) {
            self.discard_stale(message);
            return false;
        }

        match message {
            SupervisorMessage::SwitchDevice {
                constraints,
                respond_to,
            } => self.switch_device(constraints, respond_to),

            SupervisorMessage::ToggleCamera { respond_to } => {
                let constraints = self.capture.target_constraints().with_toggled_camera();
                self.switch_device(constraints, respond_to);
            }

            SupervisorMessage::Rebind {
                binding,
                respond_to,
            } => {
                self.rebind(binding);
                let _ = respond_to.send(Ok(()));
            }

            SupervisorMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            SupervisorMessage::Shutdown { respond_to } => {
                self.teardown("shutdown requested");
                let _ = respond_to.send(());
                return true;
            }

            SupervisorMessage::CaptureTick { .. } => self.on_capture_tick(),

            SupervisorMessage::CaptureCompleted { attempt, result } => {
                self.on_capture_completed(attempt, result);
            }

            SupervisorMessage::SignalingTick { .. } => self.on_signaling_tick(),

            SupervisorMessage::RegistrationCompleted { result, .. } => {
                self.on_registration_completed(result);
            }

            SupervisorMessage::Registration { event, .. } => self.on_registration_event(event),

            SupervisorMessage::PlacementTick { .. } => self.on_placement_tick(),

            SupervisorMessage::PlacementCompleted { result, .. } => {
                self.on_placement_completed(result);
            }

            SupervisorMessage::Connection { event, .. } => self.on_connection_event(event),
        }

        false
    }

    /// Whether a message belongs to a component instance that still exists.
    fn is_current(&self, message: &SupervisorMessage) -> bool {
        match message {
            SupervisorMessage::CaptureTick { timer } => self.capture.owns_timer(*timer),
            SupervisorMessage::SignalingTick { timer } => self
                .signaling_retry
                .as_ref()
                .is_some_and(|t| t.generation() == *timer),
            SupervisorMessage::RegistrationCompleted { generation, .. } => self
                .signaling
                .as_ref()
                .is_some_and(|s| s.awaits(*generation)),
            SupervisorMessage::Registration { generation, .. } => self
                .signaling
                .as_ref()
                .is_some_and(|s| s.is_current_open(*generation)),
            SupervisorMessage::PlacementTick { timer } => self
                .placement
                .as_ref()
                .is_some_and(|t| t.generation() == *timer),
            SupervisorMessage::PlacementCompleted { attempt, .. } => {
                self.placement_in_flight == Some(*attempt)
            }
            SupervisorMessage::Connection { generation, .. } => self
                .call
                .as_ref()
                .is_some_and(|c| c.generation() == *generation && c.state() != CallState::Closed),
            // Capture tracks its own attempts; commands are always current.
            _ => true,
        }
    }

    fn discard_stale(&self, message: SupervisorMessage) {
        let source = message.source();
        debug!(
            target: "pc.actor.supervisor",
            local = %self.binding.local,
            source,
            "Ignoring stale callback"
        );
        metrics::record_stale_callback(source);
        message.release();
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    fn on_capture_tick(&mut self) {
        let attempt = self.next_generation();
        if self.capture.on_tick(attempt, self.sender.clone()) == TickOutcome::Skipped {
            debug!(
                target: "pc.capture",
                "Capture request still running, skipping tick"
            );
            metrics::record_capture_attempt("skipped");
        }
    }

    fn on_capture_completed(
        &mut self,
        attempt: Generation,
        result: Result<MediaStream, CaptureError>,
    ) {
        match self.capture.on_completed(attempt, result) {
            CaptureOutcome::Stale => metrics::record_stale_callback("capture"),
            CaptureOutcome::Failed(e) => {
                warn!(
                    target: "pc.capture",
                    error = %e,
                    kind = e.kind(),
                    "Capture attempt failed, retrying"
                );
                metrics::record_capture_attempt("failure");
                metrics::record_absorbed_failure("capture");
                self.publish(SessionEventKind::CaptureFailed {
                    reason: e.to_string(),
                });
            }
            CaptureOutcome::Acquired(stream) => {
                metrics::record_capture_attempt("success");
                self.publish(SessionEventKind::CaptureAcquired {
                    stream_id: stream.id(),
                });
                self.ensure_signaling();
            }
            CaptureOutcome::SwitchReady { fresh, pending } => {
                metrics::record_capture_attempt("success");
                self.finish_switch(fresh, pending);
            }
        }
    }

    fn switch_device(
        &mut self,
        constraints: CaptureConstraints,
        respond_to: oneshot::Sender<Result<SwitchOutcome, CallError>>,
    ) {
        info!(
            target: "pc.capture",
            facing_mode = ?constraints.facing_mode(),
            "Device switch requested"
        );
        let timer = self.next_generation();
        if let Some(outcome) =
            self.capture
                .request_switch(constraints, respond_to, timer, self.sender.clone())
        {
            metrics::record_device_switch(outcome.as_str());
            self.publish(SessionEventKind::DeviceSwitched { outcome });
        }
    }

    fn finish_switch(&mut self, fresh: MediaStream, pending: PendingSwitch) {
        // Hot-swap whenever a call transport exists, placed or connected.
        let connection = self
            .call
            .as_ref()
            .and_then(CallSession::connection)
            .cloned();

        match self.capture.apply_switch(fresh, pending, connection.as_ref()) {
            Ok(outcome) => {
                metrics::record_device_switch(outcome.as_str());
                self.publish(SessionEventKind::DeviceSwitched { outcome });
            }
            Err(e) => {
                warn!(target: "pc.capture", error = %e, "Device switch failed");
                metrics::record_absorbed_failure(e.kind());
                self.publish(SessionEventKind::DeviceSwitchFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Signaling
    // ------------------------------------------------------------------

    /// Open signaling if a stream exists and no session is owned.
    fn ensure_signaling(&mut self) {
        if self.is_shutting_down || self.signaling.is_some() || self.capture.stream().is_none() {
            return;
        }
        let generation = self.next_generation();
        self.signaling = Some(SignalingSession::open(
            generation,
            self.binding.local.clone(),
            Arc::clone(&self.relay),
            self.relay_config.clone(),
            &self.cancel_token,
            self.sender.clone(),
        ));
    }

    fn on_signaling_tick(&mut self) {
        if self.signaling.is_some() || self.capture.stream().is_none() {
            return;
        }
        info!(
            target: "pc.signaling",
            identity = %self.binding.local,
            "Trying to recreate signaling session"
        );
        metrics::record_signaling_recreation();
        self.publish(SessionEventKind::SignalingRecreated);
        self.ensure_signaling();
    }

    fn on_registration_completed(&mut self, result: Result<Registration, TransportError>) {
        match result {
            Ok(registration) => {
                metrics::record_signaling_registration("success");
                match self.signaling.as_mut() {
                    Some(session) => session.on_registered(registration, self.sender.clone()),
                    None => {
                        registration.handle.close();
                        return;
                    }
                }
                self.signaling_retry = None;
                self.publish(SessionEventKind::SignalingOpened);
                self.maybe_start_placement(false);
            }
            Err(e) => {
                metrics::record_signaling_registration("failure");
                self.fail_signaling(&e.to_string());
            }
        }
    }

    fn on_registration_event(&mut self, event: RegistrationEvent) {
        match event {
            RegistrationEvent::IncomingCall(incoming) => self.on_incoming_call(incoming),
            RegistrationEvent::Disconnected => self.fail_signaling("relay disconnected"),
            RegistrationEvent::Closed => self.fail_signaling("registration closed by relay"),
            RegistrationEvent::Error(reason) => {
                self.fail_signaling(&format!("relay error: {reason}"));
            }
        }
    }

    /// Discard the current session and make sure the recreate timer runs.
    fn fail_signaling(&mut self, reason: &str) {
        if let Some(mut session) = self.signaling.take() {
            session.fail(reason);
        }
        metrics::record_absorbed_failure("signaling");
        self.publish(SessionEventKind::SignalingFailed {
            reason: reason.to_string(),
        });

        // Placement needs an open registration.
        self.placement = None;
        self.placement_in_flight = None;

        if self.signaling_retry.is_none() {
            let timer = self.next_generation();
            let interval = self.timing.signaling_retry;
            self.signaling_retry = Some(RetryTimer::start(
                timer,
                interval,
                interval,
                &self.cancel_token,
                self.sender.clone(),
                |timer| SupervisorMessage::SignalingTick { timer },
            ));
        }
    }

    // ------------------------------------------------------------------
    // Call
    // ------------------------------------------------------------------

    fn on_incoming_call(&mut self, incoming: Box<dyn IncomingCall>) {
        let caller = incoming.caller().clone();
        if caller != self.binding.remote {
            self.reject_incoming(incoming, "unexpected caller");
            return;
        }
        let Some(stream) = self.capture.stream().cloned() else {
            self.reject_incoming(incoming, "no capture stream");
            return;
        };

        if self.call.as_ref().is_some_and(CallSession::is_connected) {
            self.reject_incoming(incoming, "already connected");
            return;
        }
        // Both sides dialled: the call placed by the lower identity wins,
        // whether ours is acknowledged or still in flight.
        let dialling = self.placement_in_flight.is_some()
            || self
                .call
                .as_ref()
                .is_some_and(|c| c.role() == CallRole::Initiator);
        if dialling && self.binding.local < self.binding.remote {
            self.reject_incoming(incoming, "outbound call takes precedence");
            return;
        }

        if let Some(mut previous) = self.call.take() {
            let reason = match previous.role() {
                CallRole::Initiator => "yielding to inbound call",
                CallRole::Responder => "superseded by new inbound call",
            };
            previous.close(reason);
            self.publish(SessionEventKind::CallClosed {
                remote: previous.remote().clone(),
                reason: reason.to_string(),
            });
        }
        self.placement = None;
        self.placement_in_flight = None;

        match incoming.answer(&stream) {
            Ok(link) => {
                let generation = self.next_generation();
                self.call = Some(CallSession::answered(
                    generation,
                    link,
                    &self.cancel_token,
                    self.sender.clone(),
                ));
                self.publish(SessionEventKind::CallAnswered { remote: caller });
            }
            Err(e) => {
                warn!(target: "pc.call", caller = %caller, error = %e, "Answering failed");
                metrics::record_absorbed_failure("placement");
                self.publish(SessionEventKind::PlacementFailed {
                    reason: e.to_string(),
                });
                self.maybe_start_placement(true);
            }
        }
        self.publish_status();
    }

    fn reject_incoming(&self, incoming: Box<dyn IncomingCall>, reason: &str) {
        let caller = incoming.caller().clone();
        info!(
            target: "pc.call",
            caller = %caller,
            reason,
            "Rejecting inbound call"
        );
        incoming.reject();
        self.publish(SessionEventKind::IncomingRejected {
            caller,
            reason: reason.to_string(),
        });
    }

    /// Whether an outbound placement may run right now.
    fn placement_ready(&self) -> bool {
        !self.is_shutting_down
            && self.binding.role == CallRole::Initiator
            && self.signaling.as_ref().is_some_and(SignalingSession::is_open)
            && self.capture.stream().is_some()
            && self.call.is_none()
    }

    /// Start the placement loop if it may run. A fresh start waits a random
    /// delay; a resume after a failed or closed call waits one retry interval
    /// plus a random delay, so two peers that collided drift apart.
    fn maybe_start_placement(&mut self, resume: bool) {
        if self.placement.is_some() || !self.placement_ready() {
            return;
        }

        let first_delay = if resume {
            self.timing.placement_retry + self.placement_jitter()
        } else {
            self.placement_jitter()
        };
        let timer = self.next_generation();
        debug!(
            target: "pc.call",
            remote = %self.binding.remote,
            first_delay_ms = u64::try_from(first_delay.as_millis()).unwrap_or(u64::MAX),
            "Starting placement loop"
        );
        self.placement = Some(RetryTimer::start(
            timer,
            first_delay,
            self.timing.placement_retry,
            &self.cancel_token,
            self.sender.clone(),
            |timer| SupervisorMessage::PlacementTick { timer },
        ));
    }

    fn placement_jitter(&self) -> Duration {
        let max = u64::try_from(self.timing.placement_jitter_max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    fn on_placement_tick(&mut self) {
        if !self.placement_ready() {
            self.placement = None;
            return;
        }
        if self.placement_in_flight.is_some() {
            metrics::record_call_placement("skipped");
            return;
        }
        let (Some(registration), Some(stream)) = (
            self.signaling.as_ref().and_then(SignalingSession::registration),
            self.capture.stream().cloned(),
        ) else {
            return;
        };

        let attempt = self.next_generation();
        self.placement_in_flight = Some(attempt);
        let remote = self.binding.remote.clone();
        let sender = self.sender.clone();
        let token = self.cancel_token.child_token();

        debug!(target: "pc.call", remote = %remote, attempt, "Placing call");

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                result = registration.call(&remote, &stream) => {
                    let message = SupervisorMessage::PlacementCompleted { attempt, result };
                    deliver(&sender, message).await;
                }
            }
        });
    }

    fn on_placement_completed(&mut self, result: Result<MediaLink, TransportError>) {
        self.placement_in_flight = None;

        match result {
            Ok(link) => {
                if !self.placement_ready() {
                    debug!(
                        target: "pc.call",
                        connection_id = %link.connection.id(),
                        "Closing placement acknowledged after a call became current"
                    );
                    metrics::record_stale_callback("placement");
                    link.connection.close();
                    return;
                }
                metrics::record_call_placement("success");
                let remote = link.connection.remote().clone();
                let generation = self.next_generation();
                self.call = Some(CallSession::placed(
                    generation,
                    link,
                    &self.cancel_token,
                    self.sender.clone(),
                ));
                // The loop stops on local acknowledgement, not on remote media.
                self.placement = None;
                self.publish(SessionEventKind::CallPlacing { remote });
            }
            Err(e) => {
                debug!(target: "pc.call", error = %e, "Placement attempt failed");
                metrics::record_call_placement("failure");
                metrics::record_absorbed_failure("placement");
                self.publish(SessionEventKind::PlacementFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::RemoteStream(stream) => {
                let Some(call) = self.call.as_mut() else {
                    return;
                };
                if let Some(setup) = call.on_remote_stream(stream) {
                    let remote = call.remote().clone();
                    metrics::record_call_setup(setup);
                    metrics::set_call_connected(true);
                    self.publish(SessionEventKind::CallConnected { remote });
                }
                self.publish_status();
            }
            ConnectionEvent::Closed => self.end_call("closed by transport"),
            ConnectionEvent::Error(reason) => {
                metrics::record_absorbed_failure("transport");
                self.end_call(&format!("transport error: {reason}"));
            }
        }
    }

    fn end_call(&mut self, reason: &str) {
        if let Some(mut call) = self.call.take() {
            let was_connected = call.is_connected();
            call.close(reason);
            self.publish(SessionEventKind::CallClosed {
                remote: call.remote().clone(),
                reason: reason.to_string(),
            });
            if was_connected {
                metrics::set_call_connected(false);
            }
        }
        self.publish_status();
        self.maybe_start_placement(true);
    }

    fn publish_status(&self) {
        let next = CallStatus {
            connected: self.call.as_ref().is_some_and(CallSession::is_connected),
            remote_stream: self
                .call
                .as_ref()
                .and_then(|c| c.remote_stream().cloned()),
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    // ------------------------------------------------------------------
    // Rebind, snapshot, teardown
    // ------------------------------------------------------------------

    fn rebind(&mut self, binding: SessionBinding) {
        if binding == self.binding {
            return;
        }
        info!(
            target: "pc.actor.supervisor",
            old_local = %self.binding.local,
            local = %binding.local,
            remote = %binding.remote,
            role = binding.role.as_str(),
            "Rebinding session"
        );

        self.placement = None;
        self.placement_in_flight = None;
        self.signaling_retry = None;
        if let Some(mut call) = self.call.take() {
            call.close("session rebound");
            self.publish(SessionEventKind::CallClosed {
                remote: call.remote().clone(),
                reason: "session rebound".to_string(),
            });
        }
        if let Some(mut session) = self.signaling.take() {
            session.close();
        }

        self.binding = binding;
        metrics::set_call_connected(false);
        self.publish_status();
        self.publish(SessionEventKind::Rebound {
            local: self.binding.local.clone(),
            remote: self.binding.remote.clone(),
        });
        self.ensure_signaling();
    }

    fn snapshot(&self) -> SupervisorState {
        SupervisorState {
            binding: self.binding.clone(),
            signaling: self.signaling.as_ref().map(SignalingSession::state),
            call: self.call.as_ref().map(CallSession::snapshot),
            capture_stream: self.capture.stream().map(MediaStream::id),
            placing: self.placement.is_some() || self.placement_in_flight.is_some(),
            connected: self.status.borrow().connected,
            shutting_down: self.is_shutting_down,
        }
    }

    fn teardown(&mut self, reason: &str) {
        if self.is_shutting_down {
            return;
        }
        self.is_shutting_down = true;
        info!(
            target: "pc.actor.supervisor",
            local = %self.binding.local,
            reason,
            "Tearing down session"
        );

        // 1. Timers and in-flight placement
        self.placement = None;
        self.placement_in_flight = None;
        self.signaling_retry = None;
        self.capture.stop_polling();

        // 2. Call transport
        if let Some(mut call) = self.call.take() {
            call.close(reason);
        }

        // 3. Signaling registration
        if let Some(mut session) = self.signaling.take() {
            session.close();
        }

        // 4. Capture tracks
        let released = self.capture.shutdown();
        debug!(target: "pc.capture", released, "Capture tracks released");

        // 5. Disconnected status
        metrics::set_call_connected(false);
        self.publish_status();

        self.cancel_token.cancel();
        self.publish(SessionEventKind::Stopped);
    }

    /// Release whatever in-flight tasks managed to post before the mailbox
    /// closed.
    fn drain_mailbox(&mut self) {
        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            message.release();
        }
    }
}
