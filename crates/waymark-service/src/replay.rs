//! Replay of recorded fixes through the positioning capability.
//!
//! The input is a JSON-lines file with one serialized [`LocationFix`] per
//! line; blank lines and lines starting with `#` are skipped. Fixes are
//! re-stamped with the current time when played. In low-power posture the
//! reported accuracy is multiplied by a configurable factor and the provider
//! becomes `network`, so the tracker sees what a coarse radio would give it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use waymark_core::{PositionEvent, PositioningSource, UpdateRequest};
use waymark_types::{LocationFix, RadioPosture};

/// Floor on the replay cadence.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Errors loading a replay file.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Failed to read replay file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid fix on line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("Replay file contains no fixes")]
    Empty,
}

/// How a replay plays back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    /// Start over once the last fix was played.
    pub looped: bool,
    /// Accuracy multiplier in low-power posture.
    pub low_power_accuracy_factor: f64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            looped: true,
            low_power_accuracy_factor: 4.0,
        }
    }
}

/// Positioning source backed by a recorded track.
pub struct ReplayPositioning {
    fixes: Arc<Vec<LocationFix>>,
    options: ReplayOptions,
    cursor: Arc<AtomicUsize>,
    sender: broadcast::Sender<PositionEvent>,
    playing: Mutex<Option<CancellationToken>>,
}

impl ReplayPositioning {
    /// Build a replay from already-parsed fixes.
    pub fn new(fixes: Vec<LocationFix>, options: ReplayOptions) -> Result<Self, ReplayError> {
        if fixes.is_empty() {
            return Err(ReplayError::Empty);
        }
        let (sender, _) = broadcast::channel(64);
        Ok(Self {
            fixes: Arc::new(fixes),
            options,
            cursor: Arc::new(AtomicUsize::new(0)),
            sender,
            playing: Mutex::new(None),
        })
    }

    /// Parse JSON lines.
    pub fn parse(text: &str, options: ReplayOptions) -> Result<Self, ReplayError> {
        let mut fixes = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fix = serde_json::from_str(line).map_err(|source| ReplayError::Parse {
                line: index + 1,
                source,
            })?;
            fixes.push(fix);
        }
        Self::new(fixes, options)
    }

    /// Load a JSON-lines file.
    pub fn from_path<P: AsRef<Path>>(path: P, options: ReplayOptions) -> Result<Self, ReplayError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| ReplayError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        let replay = Self::parse(&text, options)?;
        info!(
            "Loaded {} fixes for replay from {}",
            replay.len(),
            path.as_ref().display()
        );
        Ok(replay)
    }

    /// Number of recorded fixes.
    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    /// Always false; an empty replay cannot be built.
    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    fn playing(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.playing.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn halt(&self) {
        if let Some(token) = self.playing().take() {
            token.cancel();
        }
    }
}

impl Drop for ReplayPositioning {
    fn drop(&mut self) {
        self.halt();
    }
}

#[async_trait]
impl PositioningSource for ReplayPositioning {
    async fn request_updates(&self, request: UpdateRequest) -> waymark_core::Result<()> {
        let token = CancellationToken::new();
        if let Some(previous) = self.playing().replace(token.clone()) {
            previous.cancel();
        }

        debug!(
            "Replay at {} every {:?}",
            request.posture, request.interval
        );
        let player = Player {
            fixes: Arc::clone(&self.fixes),
            cursor: Arc::clone(&self.cursor),
            sender: self.sender.clone(),
            options: self.options,
            request,
        };
        tokio::spawn(player.run(token));
        Ok(())
    }

    async fn stop_updates(&self) -> waymark_core::Result<()> {
        self.halt();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PositionEvent> {
        self.sender.subscribe()
    }
}

struct Player {
    fixes: Arc<Vec<LocationFix>>,
    cursor: Arc<AtomicUsize>,
    sender: broadcast::Sender<PositionEvent>,
    options: ReplayOptions,
    request: UpdateRequest,
}

impl Player {
    async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.request.interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(fix) = self.next_fix() else {
                info!("Replay finished after {} fixes", self.fixes.len());
                break;
            };
            let _ = self.sender.send(PositionEvent::Fix(fix));
        }
    }

    fn next_fix(&self) -> Option<LocationFix> {
        let mut index = self.cursor.fetch_add(1, Ordering::Relaxed);
        if index >= self.fixes.len() {
            if !self.options.looped {
                return None;
            }
            index %= self.fixes.len();
            self.cursor.store(index + 1, Ordering::Relaxed);
        }

        let mut fix = self.fixes[index].clone();
        fix.timestamp = OffsetDateTime::now_utc();
        if self.request.posture == RadioPosture::LowPower {
            fix.accuracy *= self.options.low_power_accuracy_factor;
            fix.provider = "network".to_string();
        }
        Some(fix)
    }
}
