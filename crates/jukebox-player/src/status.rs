use std::sync::{Arc, Mutex};

use jukebox_types::{ControllerStatus, PipelineState, PlaybackEndReason};

use crate::source::{MetadataEvent, MetadataHandler};

/// Status fields maintained by the controller's execution context.
///
/// State and queue depth are not stored here; they are read live when a snapshot is taken.
#[derive(Debug, Default)]
pub struct ControllerStatusState {
    /// Locator of the item owned by the active pipeline.
    pub now_playing: Option<String>,
    /// Most recent inline title reported for the active item.
    pub stream_title: Option<String>,
    /// Terminal reason of the previous pipeline.
    pub end_reason: Option<PlaybackEndReason>,
    pub consecutive_failures: u32,
    pub items_started: u64,
}

impl ControllerStatusState {
    /// Create a shared, mutex-protected status store.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Combine stored fields with live state and queue depth.
    pub fn snapshot(&self, state: PipelineState, queued: usize) -> ControllerStatus {
        ControllerStatus {
            state,
            now_playing: self.now_playing.clone(),
            queued,
            stream_title: self.stream_title.clone(),
            end_reason: self.end_reason,
            consecutive_failures: self.consecutive_failures,
            items_started: self.items_started,
        }
    }

    /// Record a new pipeline start. Titles reported while opening the item are kept.
    pub fn started(&mut self, locator: &str) {
        self.now_playing = Some(locator.to_string());
        self.consecutive_failures = 0;
        self.items_started += 1;
    }

    /// Clear item-specific fields when a pipeline ends or fails to start.
    pub fn ended(&mut self, reason: PlaybackEndReason) {
        self.now_playing = None;
        self.stream_title = None;
        self.end_reason = Some(reason);
    }
}

/// Title keys worth showing as "now playing".
const TITLE_KEYS: [&str; 3] = ["StreamTitle", "TIT2", "icy-name"];

/// Metadata handler that records titles into the status store before forwarding.
pub(crate) struct StatusRecorder {
    status: Arc<Mutex<ControllerStatusState>>,
    inner: Arc<dyn MetadataHandler>,
}

impl StatusRecorder {
    pub(crate) fn new(
        status: Arc<Mutex<ControllerStatusState>>,
        inner: Arc<dyn MetadataHandler>,
    ) -> Self {
        Self { status, inner }
    }
}

impl MetadataHandler for StatusRecorder {
    fn on_metadata(&self, event: &MetadataEvent) {
        if TITLE_KEYS.contains(&event.key.as_str()) {
            if let Ok(mut s) = self.status.lock() {
                // icy-name is the station; a track title wins over it.
                if event.key != "icy-name" || s.stream_title.is_none() {
                    s.stream_title = Some(event.value.clone());
                }
            }
        }
        self.inner.on_metadata(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingMetadata;

    fn event(key: &str, value: &str) -> MetadataEvent {
        MetadataEvent {
            locator: "http://radio".to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn snapshot_combines_live_fields() {
        let mut s = ControllerStatusState::default();
        s.started("/a.mp3");
        let snap = s.snapshot(PipelineState::Playing, 2);
        assert_eq!(snap.state, PipelineState::Playing);
        assert_eq!(snap.now_playing.as_deref(), Some("/a.mp3"));
        assert_eq!(snap.queued, 2);
        assert_eq!(snap.items_started, 1);

        s.ended(PlaybackEndReason::Skipped);
        let snap = s.snapshot(PipelineState::Playing, 0);
        assert!(snap.now_playing.is_none());
        assert_eq!(snap.end_reason, Some(PlaybackEndReason::Skipped));
    }

    #[test]
    fn recorder_keeps_latest_title_and_forwards() {
        let status = ControllerStatusState::shared();
        let inner = Arc::new(RecordingMetadata::default());
        let recorder = StatusRecorder::new(status.clone(), inner.clone());

        recorder.on_metadata(&event("icy-name", "Station"));
        recorder.on_metadata(&event("StreamTitle", "Song A"));
        recorder.on_metadata(&event("icy-name", "Station"));
        recorder.on_metadata(&event("TPE1", "Band"));

        assert_eq!(status.lock().unwrap().stream_title.as_deref(), Some("Song A"));
        assert_eq!(inner.events().len(), 4);
    }
}
