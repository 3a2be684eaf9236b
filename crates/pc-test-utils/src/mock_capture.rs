//! Capture devices with scripted behavior.
//!
//! - [`ScriptedCapture`] fails a configured number of times before it starts
//!   producing streams, optionally taking a while per attempt, and records
//!   how many acquisitions were ever in flight at once.
//! - [`GatedCapture`] holds every acquisition until the test opens the gate.
//!
//! # Example
//!
//! ```rust,ignore
//! use pc_test_utils::ScriptedCapture;
//!
//! let camera = ScriptedCapture::new()
//!     .failing(3, CaptureError::PermissionPending)
//!     .with_delay(Duration::from_millis(2500));
//!
//! // ... run a supervisor against it ...
//!
//! assert_eq!(camera.attempts(), 4);
//! assert_eq!(camera.peak_in_flight(), 1);
//! ```

use async_trait::async_trait;
use common::config::CaptureConstraints;
use peer_call::media::{MediaStream, MediaTrack, TrackKind};
use peer_call::transport::{CaptureDevice, CaptureError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

fn synthetic_stream(constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError> {
    let mut tracks = Vec::new();
    if constraints.audio {
        tracks.push(MediaTrack::new(TrackKind::Audio, "scripted-microphone"));
    }
    if constraints.video.is_some() {
        let facing = constraints
            .facing_mode()
            .map_or("default", |f| f.as_str());
        tracks.push(MediaTrack::new(
            TrackKind::Video,
            format!("scripted-camera:{facing}"),
        ));
    }
    if tracks.is_empty() {
        return Err(CaptureError::NotFound);
    }
    Ok(MediaStream::new(tracks))
}

/// Streams handed out by a mock device, for leak checks.
#[derive(Debug, Default)]
struct Produced {
    streams: Vec<MediaStream>,
}

impl Produced {
    fn live_tracks(&self) -> usize {
        self.streams
            .iter()
            .flat_map(MediaStream::tracks)
            .filter(|t| t.is_live())
            .count()
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    failures_left: u32,
    failure: Option<CaptureError>,
    delay: Duration,
    attempts: usize,
    in_flight: usize,
    peak_in_flight: usize,
    requested: Vec<CaptureConstraints>,
    produced: Produced,
}

/// Capture device that fails a scripted number of times, then succeeds.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCapture {
    inner: Arc<Mutex<ScriptState>>,
}

/// Decrements the in-flight count even when the acquisition is cancelled.
struct InFlightGuard(Arc<Mutex<ScriptState>>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

impl ScriptedCapture {
    /// Create a device that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` acquisitions with `error`.
    #[must_use]
    pub fn failing(self, count: u32, error: CaptureError) -> Self {
        self.fail_next(count, error);
        self
    }

    /// Take `delay` for every acquisition.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().delay = delay;
        self
    }

    /// Fail the next `count` acquisitions with `error`.
    pub fn fail_next(&self, count: u32, error: CaptureError) {
        let mut state = self.inner.lock().unwrap();
        state.failures_left = count;
        state.failure = Some(error);
    }

    /// Acquisitions started so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts
    }

    /// Acquisitions currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.lock().unwrap().in_flight
    }

    /// The largest number of acquisitions ever running at the same time.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.inner.lock().unwrap().peak_in_flight
    }

    /// Streams handed out so far.
    #[must_use]
    pub fn produced(&self) -> usize {
        self.inner.lock().unwrap().produced.streams.len()
    }

    /// Tracks handed out and not yet stopped.
    #[must_use]
    pub fn live_tracks(&self) -> usize {
        self.inner.lock().unwrap().produced.live_tracks()
    }

    /// Constraints of every acquisition, in order.
    #[must_use]
    pub fn requested(&self) -> Vec<CaptureConstraints> {
        self.inner.lock().unwrap().requested.clone()
    }
}

#[async_trait]
impl CaptureDevice for ScriptedCapture {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError> {
        let delay = {
            let mut state = self.inner.lock().unwrap();
            state.attempts += 1;
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            state.requested.push(constraints.clone());
            state.delay
        };
        let _guard = InFlightGuard(Arc::clone(&self.inner));

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock().unwrap();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(state.failure.clone().unwrap_or(CaptureError::PermissionPending));
        }
        let stream = synthetic_stream(constraints)?;
        state.produced.streams.push(stream.clone());
        Ok(stream)
    }
}

#[derive(Debug, Default)]
struct GateState {
    started: usize,
    produced: Produced,
}

/// Capture device whose acquisitions wait until the gate opens.
#[derive(Debug, Clone)]
pub struct GatedCapture {
    gate: Arc<watch::Sender<bool>>,
    inner: Arc<Mutex<GateState>>,
}

impl Default for GatedCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl GatedCapture {
    /// Create a device with the gate closed.
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            gate: Arc::new(gate),
            inner: Arc::new(Mutex::new(GateState::default())),
        }
    }

    /// Let every waiting and future acquisition complete.
    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    /// Acquisitions that have started waiting.
    #[must_use]
    pub fn started(&self) -> usize {
        self.inner.lock().unwrap().started
    }

    /// Streams handed out so far.
    #[must_use]
    pub fn produced(&self) -> usize {
        self.inner.lock().unwrap().produced.streams.len()
    }

    /// Tracks handed out and not yet stopped.
    #[must_use]
    pub fn live_tracks(&self) -> usize {
        self.inner.lock().unwrap().produced.live_tracks()
    }
}

#[async_trait]
impl CaptureDevice for GatedCapture {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError> {
        self.inner.lock().unwrap().started += 1;

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(CaptureError::Other("gate dropped".to_string()));
        }

        let stream = synthetic_stream(constraints)?;
        self.inner
            .lock()
            .unwrap()
            .produced
            .streams
            .push(stream.clone());
        Ok(stream)
    }
}
