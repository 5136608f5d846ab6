pub mod device;
pub mod highlight;

pub use device::{ClipId, ClipSource, DeviceEvent, PlaybackDevice, PlaybackDeviceError, SimulatedDevice};
pub use highlight::{highlight, LinearTimeMapper, TimeToTokenMapper};

use crate::book::{Document, Segment};
use crate::config::resolve_media_url;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Selectable speed multipliers, in cycling order
pub const PLAYBACK_RATES: [f32; 5] = [0.75, 1.0, 1.25, 1.5, 2.0];

const SECS_PER_WORD: f32 = 0.45;
const MIN_READING_SECS: f32 = 1.5;
const MAX_READING_SECS: f32 = 8.0;

/// Time a learner needs to read a segment that has no narration
pub fn reading_time(segment: &Segment) -> Duration {
    let words = if segment.tokens.is_empty() {
        segment.original.split_whitespace().count()
    } else {
        segment.tokens.len()
    };
    let secs = (words as f32 * SECS_PER_WORD).clamp(MIN_READING_SECS, MAX_READING_SECS);
    Duration::from_secs_f32(secs)
}

/// What to do with a segment whose clip is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingAudioPolicy {
    /// Play a silent gap sized by [`reading_time`], then move on
    AdvanceAfterReadingTime,
    /// Stay on the segment until the user navigates
    Stall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "segment", rename_all = "lowercase")]
pub enum PlaybackPhase {
    Idle,
    Paused(usize),
    Playing(usize),
}

/// Snapshot for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub active_segment: usize,
    pub is_playing: bool,
    pub rate: f32,
    pub elapsed_secs: f32,
    pub highlighted_token: Option<usize>,
    pub stalled: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum PlaybackError {
    #[error("No document loaded")]
    NoDocument,

    #[error("Document has no segments")]
    EmptyDocument,

    #[error("Segment {index} out of range (document has {len})")]
    SegmentOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Device(#[from] PlaybackDeviceError),
}

/// Sequences a document's segments through the playback device.
///
/// Transport calls and device events are handled one at a time through
/// `&mut self`; device events for a clip that has since been replaced are
/// ignored, so rapid navigation cannot double-advance.
pub struct PlaybackController<D: PlaybackDevice> {
    device: D,
    mapper: Box<dyn TimeToTokenMapper>,
    policy: MissingAudioPolicy,
    media_origin: String,
    document: Option<Document>,
    index: usize,
    playing: bool,
    rate: f32,
    elapsed: Duration,
    duration: Option<Duration>,
    highlight: Option<usize>,
    clip: ClipId,
    clip_ready: bool,
    load_failed: bool,
    clip_finished: bool,
    last_error: Option<PlaybackDeviceError>,
}

impl<D: PlaybackDevice> PlaybackController<D> {
    pub fn new(device: D, policy: MissingAudioPolicy, media_origin: impl Into<String>) -> Self {
        let media_origin: String = media_origin.into();
        Self {
            device,
            mapper: Box::new(LinearTimeMapper),
            policy,
            media_origin: media_origin.trim_end_matches('/').to_string(),
            document: None,
            index: 0,
            playing: false,
            rate: 1.0,
            elapsed: Duration::ZERO,
            duration: None,
            highlight: None,
            clip: ClipId::default(),
            clip_ready: false,
            load_failed: false,
            clip_finished: false,
            last_error: None,
        }
    }

    pub fn with_mapper(mut self, mapper: Box<dyn TimeToTokenMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn active_segment(&self) -> Option<&Segment> {
        self.document.as_ref().and_then(|doc| doc.segments.get(self.index))
    }

    pub fn phase(&self) -> PlaybackPhase {
        match (&self.document, self.playing) {
            (None, _) => PlaybackPhase::Idle,
            (Some(_), true) => PlaybackPhase::Playing(self.index),
            (Some(_), false) => PlaybackPhase::Paused(self.index),
        }
    }

    pub fn highlighted_token(&self) -> Option<usize> {
        self.highlight
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            active_segment: self.index,
            is_playing: self.playing,
            rate: self.rate,
            elapsed_secs: self.elapsed.as_secs_f32(),
            highlighted_token: self.highlight,
            stalled: self.playing && !self.clip_ready,
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Replace the document and reset to `Paused(0)` at 1.0x
    pub fn load(&mut self, document: Document) -> Result<(), PlaybackError> {
        if document.segments.is_empty() {
            return Err(PlaybackError::EmptyDocument);
        }

        tracing::info!(
            "Loading '{}' into player ({} segments)",
            document.title,
            document.segments.len()
        );

        self.device.stop();
        self.document = Some(document);
        self.playing = false;
        self.rate = 1.0;
        self.last_error = None;
        self.enter_segment(0);
        Ok(())
    }

    /// Close the reader: release the clip and go back to `Idle`
    pub fn unload(&mut self) {
        self.device.stop();
        self.document = None;
        self.index = 0;
        self.playing = false;
        self.rate = 1.0;
        self.clip_ready = false;
        self.load_failed = false;
        self.clip_finished = false;
        self.last_error = None;
        self.elapsed = Duration::ZERO;
        self.duration = None;
        self.highlight = None;
        self.clip = ClipId(self.clip.0 + 1);
    }

    pub fn play(&mut self) -> Result<(), PlaybackError> {
        self.require_document()?;
        if !self.playing {
            self.start_playback()?;
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        self.require_document()?;
        if self.playing {
            self.device.pause();
            self.playing = false;
            tracing::debug!("Paused at segment {}", self.index);
        }
        Ok(())
    }

    pub fn toggle(&mut self) -> Result<(), PlaybackError> {
        if self.playing {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Move forward one segment, keeping play/pause intent. No-op at the end.
    pub fn next(&mut self) -> Result<(), PlaybackError> {
        let last = self.last_index()?;
        if self.index < last {
            self.jump(self.index + 1, self.playing)?;
        }
        Ok(())
    }

    /// Move back one segment, keeping play/pause intent. No-op at the start.
    pub fn previous(&mut self) -> Result<(), PlaybackError> {
        self.require_document()?;
        if self.index > 0 {
            self.jump(self.index - 1, self.playing)?;
        }
        Ok(())
    }

    /// Jump to a segment chosen by the user and play it from the start
    pub fn seek_to_segment(&mut self, index: usize) -> Result<(), PlaybackError> {
        let last = self.last_index()?;
        if index > last {
            return Err(PlaybackError::SegmentOutOfRange {
                index,
                len: last + 1,
            });
        }
        self.jump(index, true)?;
        Ok(())
    }

    /// Step through [`PLAYBACK_RATES`], wrapping after the fastest
    pub fn cycle_rate(&mut self) -> f32 {
        let position = PLAYBACK_RATES
            .iter()
            .position(|r| *r == self.rate)
            .unwrap_or(1);
        self.rate = PLAYBACK_RATES[(position + 1) % PLAYBACK_RATES.len()];
        self.device.set_rate(self.rate);
        tracing::debug!("Playback rate {}x", self.rate);
        self.rate
    }

    pub fn handle_event(&mut self, event: DeviceEvent) {
        if self.document.is_none() || event.clip() != self.clip {
            tracing::trace!("Ignoring stale device event {:?}", event);
            return;
        }

        match event {
            DeviceEvent::TimeUpdate {
                elapsed, duration, ..
            } => {
                self.elapsed = elapsed;
                self.duration = duration.filter(|d| !d.is_zero());
                let token_count = self.active_segment().map(|s| s.tokens.len()).unwrap_or(0);
                self.highlight = self.mapper.token_at(elapsed, self.duration, token_count);
            }
            DeviceEvent::Ended { .. } => self.on_clip_ended(),
            DeviceEvent::Failed { error, .. } => {
                tracing::error!("Segment {} playback failed: {}", self.index, error);
                self.device.pause();
                self.playing = false;
                self.last_error = Some(error);
            }
        }
    }

    fn on_clip_ended(&mut self) {
        if !self.playing {
            return;
        }
        let last = self.document.as_ref().and_then(Document::last_index).unwrap_or(0);
        if self.index < last {
            // failures are logged and kept in last_error
            let _ = self.jump(self.index + 1, true);
        } else {
            tracing::info!("Reached end of document");
            self.playing = false;
            self.clip_finished = true;
        }
    }

    fn jump(&mut self, index: usize, play: bool) -> Result<(), PlaybackDeviceError> {
        self.device.pause();
        self.playing = false;
        self.enter_segment(index);
        if play {
            self.start_playback()?;
        }
        Ok(())
    }

    /// Make `index` active: new clip id, cleared highlight, clip loaded paused
    fn enter_segment(&mut self, index: usize) {
        self.index = index;
        self.clip = ClipId(self.clip.0 + 1);
        self.elapsed = Duration::ZERO;
        self.duration = None;
        self.highlight = None;
        self.clip_ready = false;
        self.load_failed = false;
        self.clip_finished = false;

        let Some(source) = self.clip_source(index) else {
            tracing::warn!("Segment {} has no audio; waiting for navigation", index);
            self.device.stop();
            return;
        };

        match self.device.load(self.clip, source) {
            Ok(()) => {
                self.device.set_rate(self.rate);
                self.clip_ready = true;
            }
            Err(e) => {
                tracing::error!("Segment {} clip failed to load: {}", index, e);
                self.load_failed = true;
                self.last_error = Some(e);
            }
        }
    }

    fn start_playback(&mut self) -> Result<(), PlaybackDeviceError> {
        if self.clip_finished || self.load_failed {
            // replay after the document ended, or retry a clip that failed to load
            self.enter_segment(self.index);
        }
        if let (true, Some(error)) = (self.load_failed, &self.last_error) {
            return Err(error.clone());
        }
        self.playing = true;
        if !self.clip_ready {
            // No clip: stays Playing until the user moves on
            return Ok(());
        }

        if let Err(e) = self.device.play() {
            tracing::error!("Segment {} playback failed: {}", self.index, e);
            self.playing = false;
            self.last_error = Some(e.clone());
            return Err(e);
        }
        self.last_error = None;
        tracing::debug!("Playing segment {}", self.index);
        Ok(())
    }

    fn clip_source(&self, index: usize) -> Option<ClipSource> {
        let segment = self.document.as_ref()?.segments.get(index)?;
        match segment.audio_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Some(ClipSource::Url(resolve_media_url(&self.media_origin, url))),
            _ => match self.policy {
                MissingAudioPolicy::AdvanceAfterReadingTime => {
                    Some(ClipSource::Silence(reading_time(segment)))
                }
                MissingAudioPolicy::Stall => None,
            },
        }
    }

    fn require_document(&self) -> Result<&Document, PlaybackError> {
        self.document.as_ref().ok_or(PlaybackError::NoDocument)
    }

    fn last_index(&self) -> Result<usize, PlaybackError> {
        self.require_document()?
            .last_index()
            .ok_or(PlaybackError::EmptyDocument)
    }
}

impl<D: PlaybackDevice> Drop for PlaybackController<D> {
    fn drop(&mut self) {
        self.device.stop();
    }
}
