//! Local and remote media handles.
//!
//! A [`MediaTrack`] wraps one device track. Clones share the same underlying
//! handle, so stopping any clone releases the device for everyone. A
//! [`MediaStream`] is an identified set of tracks; cloning a stream is cheap
//! and is how the capture stream is shared read-only with the signaling and
//! call components.

use common::types::{StreamId, TrackId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

struct TrackInner {
    id: TrackId,
    kind: TrackKind,
    label: String,
    live: AtomicBool,
}

/// Handle to a single capture device track.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a new live track.
    #[must_use]
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: TrackId::new(),
                kind,
                label: label.into(),
                live: AtomicBool::new(true),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> TrackId {
        self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether the device behind this track is still held.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Release the device. Returns `true` if this call did the release.
    pub fn stop(&self) -> bool {
        self.inner.live.swap(false, Ordering::SeqCst)
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaTrack {}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("live", &self.is_live())
            .finish()
    }
}

/// An identified collection of tracks.
///
/// Equality compares the stream id and the track ids, so a stream whose
/// video track was swapped in place is not equal to its previous value even
/// though the id is unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    id: StreamId,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Create a stream with a fresh id.
    #[must_use]
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: StreamId::new(),
            tracks,
        }
    }

    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// First video track, if the stream has one.
    #[must_use]
    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    /// Whether any track still holds its device.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    /// Same stream (same id) with its video tracks replaced by `video`.
    ///
    /// Returns the new stream and the tracks that were replaced. The
    /// replaced tracks are not stopped here.
    #[must_use]
    pub fn with_video_track(&self, video: MediaTrack) -> (MediaStream, Vec<MediaTrack>) {
        let (replaced, mut kept): (Vec<_>, Vec<_>) = self
            .tracks
            .iter()
            .cloned()
            .partition(|t| t.kind() == TrackKind::Video);
        kept.push(video);

        (
            MediaStream {
                id: self.id,
                tracks: kept,
            },
            replaced,
        )
    }

    /// Stop every track. Returns how many tracks were released by this call.
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn camera_stream() -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio, "mic"),
            MediaTrack::new(TrackKind::Video, "front"),
        ])
    }

    #[test]
    fn test_stop_is_shared_between_clones() {
        let track = MediaTrack::new(TrackKind::Video, "front");
        let clone = track.clone();

        assert!(clone.stop());
        assert!(!track.is_live());
        assert!(!track.stop(), "second stop should be a no-op");
    }

    #[test]
    fn test_stop_all_counts_released_tracks() {
        let stream = camera_stream();
        assert!(stream.is_live());
        assert_eq!(stream.stop_all(), 2);
        assert!(!stream.is_live());
        assert_eq!(stream.stop_all(), 0);
    }

    #[test]
    fn test_with_video_track_keeps_id_and_audio() {
        let stream = camera_stream();
        let back = MediaTrack::new(TrackKind::Video, "back");

        let (swapped, replaced) = stream.with_video_track(back.clone());

        assert_eq!(swapped.id(), stream.id());
        assert_ne!(swapped, stream);
        assert_eq!(swapped.video_track(), Some(&back));
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced.first().unwrap().label(), "front");
        assert!(swapped
            .tracks()
            .iter()
            .any(|t| t.kind() == TrackKind::Audio));
    }
}
