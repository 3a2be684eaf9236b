//! Capture source manager.
//!
//! Owns the local capture stream. Acquisition is attempted on the first
//! poll tick and then on every tick until it succeeds, with at most one
//! acquisition in flight. Polling stops once a stream exists and restarts
//! only for a device switch.
//!
//! A switch acquires a fresh stream under the new constraints and then
//! either swaps the outgoing video track on the live call transport (the
//! stream keeps its id) or replaces the whole stream. The supervisor picks
//! the path; this module performs it and releases every track that is no
//! longer used.

use super::messages::{Generation, SupervisorMessage, SwitchOutcome};
use super::tasks::{deliver, RetryTimer};
use crate::errors::CallError;
use crate::media::MediaStream;
use crate::transport::{CaptureDevice, CaptureError, MediaConnection};
use common::config::CaptureConstraints;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A switch waiting for its fresh stream.
#[derive(Debug)]
pub(crate) struct PendingSwitch {
    constraints: CaptureConstraints,
    respond_to: oneshot::Sender<Result<SwitchOutcome, CallError>>,
}

/// What a finished acquisition means for the supervisor.
#[derive(Debug)]
pub(crate) enum CaptureOutcome {
    /// Nobody wants this result any more; its tracks were released.
    Stale,
    /// The attempt failed; polling continues.
    Failed(CaptureError),
    /// The first stream is available.
    Acquired(MediaStream),
    /// A fresh stream for a pending switch; apply with [`CaptureSourceManager::apply_switch`].
    SwitchReady {
        fresh: MediaStream,
        pending: PendingSwitch,
    },
}

/// What a poll tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// A new acquisition was started.
    Started,
    /// An acquisition is already in flight.
    Skipped,
    /// Nothing to acquire; polling stopped.
    Idle,
}

#[derive(Debug)]
struct InFlight {
    attempt: Generation,
    /// Cleared when the constraints this attempt was started with are
    /// replaced; the result is then released on arrival.
    wanted: bool,
}

pub struct CaptureSourceManager {
    device: Arc<dyn CaptureDevice>,
    constraints: CaptureConstraints,
    stream: Option<MediaStream>,
    in_flight: Option<InFlight>,
    pending_switch: Option<PendingSwitch>,
    poll: Option<RetryTimer>,
    retry_interval: Duration,
    cancel: CancellationToken,
}

impl CaptureSourceManager {
    pub(crate) fn new(
        device: Arc<dyn CaptureDevice>,
        constraints: CaptureConstraints,
        retry_interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            device,
            constraints,
            stream: None,
            in_flight: None,
            pending_switch: None,
            poll: None,
            retry_interval,
            cancel: parent.child_token(),
        }
    }

    /// The current capture stream.
    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    /// Constraints of the current stream (or of the acquisition poll).
    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    /// Constraints of the newest request, pending switch included.
    pub fn target_constraints(&self) -> &CaptureConstraints {
        self.pending_switch
            .as_ref()
            .map_or(&self.constraints, |p| &p.constraints)
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    pub fn is_acquiring(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn owns_timer(&self, timer: Generation) -> bool {
        self.poll.as_ref().is_some_and(|p| p.generation() == timer)
    }

    /// Start the poll loop; the first tick fires immediately.
    pub(crate) fn start_polling(
        &mut self,
        timer: Generation,
        sender: mpsc::Sender<SupervisorMessage>,
    ) {
        if self.poll.is_some() {
            return;
        }
        self.poll = Some(RetryTimer::start(
            timer,
            Duration::ZERO,
            self.retry_interval,
            &self.cancel,
            sender,
            |timer| SupervisorMessage::CaptureTick { timer },
        ));
    }

    pub(crate) fn stop_polling(&mut self) {
        self.poll = None;
    }

    fn wants_stream(&self) -> bool {
        self.stream.is_none() || self.pending_switch.is_some()
    }

    /// Handle a poll tick: start an acquisition unless one is in flight.
    pub(crate) fn on_tick(
        &mut self,
        attempt: Generation,
        sender: mpsc::Sender<SupervisorMessage>,
    ) -> TickOutcome {
        if !self.wants_stream() {
            self.stop_polling();
            return TickOutcome::Idle;
        }
        if self.in_flight.is_some() {
            return TickOutcome::Skipped;
        }

        let constraints = self.target_constraints().clone();
        let device = Arc::clone(&self.device);
        let token = self.cancel.clone();
        self.in_flight = Some(InFlight {
            attempt,
            wanted: true,
        });

        debug!(
            target: "pc.capture",
            attempt,
            facing_mode = ?constraints.facing_mode(),
            "Requesting capture stream"
        );

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                result = device.acquire(&constraints) => {
                    deliver(&sender, SupervisorMessage::CaptureCompleted { attempt, result }).await;
                }
            }
        });

        TickOutcome::Started
    }

    /// Handle a finished acquisition.
    pub(crate) fn on_completed(
        &mut self,
        attempt: Generation,
        result: Result<MediaStream, CaptureError>,
    ) -> CaptureOutcome {
        let wanted = match self.in_flight.take() {
            Some(in_flight) if in_flight.attempt == attempt => in_flight.wanted,
            other => {
                self.in_flight = other;
                if let Ok(stream) = result {
                    stream.stop_all();
                }
                return CaptureOutcome::Stale;
            }
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => return CaptureOutcome::Failed(e),
        };
        if !wanted {
            debug!(
                target: "pc.capture",
                attempt,
                "Releasing stream acquired under replaced constraints"
            );
            stream.stop_all();
            return CaptureOutcome::Stale;
        }

        if let Some(pending) = self.pending_switch.take() {
            self.stop_polling();
            return CaptureOutcome::SwitchReady {
                fresh: stream,
                pending,
            };
        }
        if self.stream.is_some() {
            stream.stop_all();
            return CaptureOutcome::Stale;
        }

        self.stop_polling();
        self.stream = Some(stream.clone());
        info!(
            target: "pc.capture",
            stream_id = %stream.id(),
            tracks = stream.tracks().len(),
            "Capture stream acquired"
        );
        CaptureOutcome::Acquired(stream)
    }

    /// Queue a device switch.
    ///
    /// Before the first stream exists this only replaces the poll
    /// constraints and answers `ConstraintsUpdated` at once; the return
    /// value is then `Some`. Otherwise the switch waits for a fresh stream,
    /// superseding any switch already waiting, and `None` is returned.
    pub(crate) fn request_switch(
        &mut self,
        constraints: CaptureConstraints,
        respond_to: oneshot::Sender<Result<SwitchOutcome, CallError>>,
        timer: Generation,
        sender: mpsc::Sender<SupervisorMessage>,
    ) -> Option<SwitchOutcome> {
        if self.stream.is_none() {
            self.constraints = constraints;
            if let Some(in_flight) = self.in_flight.as_mut() {
                in_flight.wanted = false;
            }
            let _ = respond_to.send(Ok(SwitchOutcome::ConstraintsUpdated));
            return Some(SwitchOutcome::ConstraintsUpdated);
        }

        if let Some(previous) = self.pending_switch.take() {
            debug!(target: "pc.capture", "Pending device switch superseded");
            let _ = previous.respond_to.send(Err(CallError::Superseded));
            if let Some(in_flight) = self.in_flight.as_mut() {
                in_flight.wanted = false;
            }
        }
        self.pending_switch = Some(PendingSwitch {
            constraints,
            respond_to,
        });
        self.start_polling(timer, sender);
        None
    }

    /// Put a fresh stream into service and answer the switch request.
    ///
    /// With a call `connection` only the outgoing video track is swapped on
    /// it; otherwise the whole stream is replaced.
    pub(crate) fn apply_switch(
        &mut self,
        fresh: MediaStream,
        pending: PendingSwitch,
        connection: Option<&Arc<dyn MediaConnection>>,
    ) -> Result<SwitchOutcome, CallError> {
        let PendingSwitch {
            constraints,
            respond_to,
        } = pending;

        let result = match connection {
            Some(connection) => self.hot_swap(fresh, connection.as_ref()),
            None => Ok(self.replace_stream(fresh)),
        };
        if result.is_ok() {
            self.constraints = constraints;
        }

        let _ = respond_to.send(result.clone());
        result
    }

    fn hot_swap(
        &mut self,
        fresh: MediaStream,
        connection: &dyn MediaConnection,
    ) -> Result<SwitchOutcome, CallError> {
        let (Some(current), Some(video)) = (self.stream.as_ref(), fresh.video_track().cloned())
        else {
            fresh.stop_all();
            return Err(CallError::Capture("no video track to swap".to_string()));
        };

        if let Err(e) = connection.replace_video_track(&video) {
            fresh.stop_all();
            return Err(e.into());
        }

        let (next, replaced) = current.with_video_track(video.clone());
        for track in &replaced {
            track.stop();
        }
        for track in fresh.tracks().iter().filter(|t| **t != video) {
            track.stop();
        }

        info!(
            target: "pc.capture",
            stream_id = %next.id(),
            connection_id = %connection.id(),
            video = video.label(),
            "Video track hot-swapped"
        );
        self.stream = Some(next);
        Ok(SwitchOutcome::TrackReplaced)
    }

    fn replace_stream(&mut self, fresh: MediaStream) -> SwitchOutcome {
        if let Some(previous) = self.stream.replace(fresh) {
            previous.stop_all();
        }
        info!(
            target: "pc.capture",
            stream_id = ?self.stream.as_ref().map(MediaStream::id),
            "Capture stream replaced"
        );
        SwitchOutcome::StreamReplaced
    }

    /// Stop polling, abandon in-flight work and release every track.
    /// Returns how many tracks were released.
    pub(crate) fn shutdown(&mut self) -> usize {
        self.stop_polling();
        self.cancel.cancel();
        self.in_flight = None;
        if let Some(pending) = self.pending_switch.take() {
            let _ = pending.respond_to.send(Err(CallError::ShuttingDown));
        }
        self.stream.take().map_or(0, |stream| stream.stop_all())
    }
}

impl Drop for CaptureSourceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
