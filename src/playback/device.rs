// src/playback/device.rs
// Playback device capability and a clock-driven simulated implementation

use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const DEFAULT_TICK: Duration = Duration::from_millis(200);

/// Identifies one load of a clip. Events carry it so the controller can drop
/// events from a clip it has already moved away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClipId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum ClipSource {
    /// Absolute URL of an audio clip
    Url(String),
    /// Timed gap with no audio, reported like a regular clip
    Silence(Duration),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackDeviceError {
    #[error("Failed to load clip {url}: {reason}")]
    Load { url: String, reason: String },

    #[error("Playback failed: {0}")]
    Play(String),
}

/// Events a device reports back, delivered through whatever channel the
/// device was built with and fed to `PlaybackController::handle_event`.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    TimeUpdate {
        clip: ClipId,
        elapsed: Duration,
        duration: Option<Duration>,
    },
    Ended {
        clip: ClipId,
    },
    Failed {
        clip: ClipId,
        error: PlaybackDeviceError,
    },
}

impl DeviceEvent {
    pub fn clip(&self) -> ClipId {
        match self {
            DeviceEvent::TimeUpdate { clip, .. }
            | DeviceEvent::Ended { clip }
            | DeviceEvent::Failed { clip, .. } => *clip,
        }
    }
}

/// The only mutable handle on audio output. Owned by the playback controller.
pub trait PlaybackDevice: Send {
    /// Replace the current clip; playback starts paused at 0
    fn load(&mut self, clip: ClipId, source: ClipSource) -> Result<(), PlaybackDeviceError>;

    fn play(&mut self) -> Result<(), PlaybackDeviceError>;

    /// Keeps the position
    fn pause(&mut self);

    fn set_rate(&mut self, rate: f32);

    /// Drop the current clip
    fn stop(&mut self);
}

#[derive(Debug, Default)]
struct SimClock {
    clip: Option<ClipId>,
    duration: Duration,
    elapsed: Duration,
    rate: f32,
}

/// Advances a virtual clock instead of producing sound. Clip lengths come from
/// an estimator (URLs carry no duration), silences use their own length.
pub struct SimulatedDevice {
    events: mpsc::UnboundedSender<DeviceEvent>,
    estimate: Box<dyn Fn(&str) -> Duration + Send>,
    clock: Arc<Mutex<SimClock>>,
    ticker: Option<JoinHandle<()>>,
    tick: Duration,
}

impl SimulatedDevice {
    pub fn new<F>(events: mpsc::UnboundedSender<DeviceEvent>, estimate: F) -> Self
    where
        F: Fn(&str) -> Duration + Send + 'static,
    {
        Self {
            events,
            estimate: Box::new(estimate),
            clock: Arc::new(Mutex::new(SimClock {
                rate: 1.0,
                ..Default::default()
            })),
            ticker: None,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    fn halt_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl PlaybackDevice for SimulatedDevice {
    fn load(&mut self, clip: ClipId, source: ClipSource) -> Result<(), PlaybackDeviceError> {
        self.halt_ticker();
        let duration = match &source {
            ClipSource::Url(url) => (self.estimate)(url),
            ClipSource::Silence(duration) => *duration,
        };

        let mut clock = self.clock.lock().unwrap_or_else(|p| p.into_inner());
        clock.clip = Some(clip);
        clock.duration = duration;
        clock.elapsed = Duration::ZERO;
        tracing::debug!("Simulated clip {:?} loaded ({:.1}s)", clip, duration.as_secs_f32());
        Ok(())
    }

    fn play(&mut self) -> Result<(), PlaybackDeviceError> {
        if self.ticker.is_some() {
            return Ok(());
        }
        if self.clock.lock().map(|c| c.clip.is_none()).unwrap_or(true) {
            return Err(PlaybackDeviceError::Play("no clip loaded".to_string()));
        }

        let clock = self.clock.clone();
        let events = self.events.clone();
        let tick = self.tick;

        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.tick().await;
            loop {
                interval.tick().await;
                let (event, done) = {
                    let mut clock = match clock.lock() {
                        Ok(clock) => clock,
                        Err(_) => return,
                    };
                    let Some(clip) = clock.clip else { return };
                    let advance = tick.mul_f32(clock.rate.max(0.0));
                    clock.elapsed = (clock.elapsed + advance).min(clock.duration);
                    if clock.elapsed >= clock.duration {
                        (DeviceEvent::Ended { clip }, true)
                    } else {
                        (
                            DeviceEvent::TimeUpdate {
                                clip,
                                elapsed: clock.elapsed,
                                duration: Some(clock.duration),
                            },
                            false,
                        )
                    }
                };
                if events.send(event).is_err() || done {
                    return;
                }
            }
        }));
        Ok(())
    }

    fn pause(&mut self) {
        self.halt_ticker();
    }

    fn set_rate(&mut self, rate: f32) {
        if let Ok(mut clock) = self.clock.lock() {
            clock.rate = rate;
        }
    }

    fn stop(&mut self) {
        self.halt_ticker();
        if let Ok(mut clock) = self.clock.lock() {
            clock.clip = None;
            clock.elapsed = Duration::ZERO;
        }
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.halt_ticker();
    }
}
