//! Transport state machine bound to one active track list.

use std::path::PathBuf;

use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::audio_engine::{AudioEngine, EngineEvent, EngineEventKind, EngineState};
use crate::playlist::{move_item, remap_index_after_move, Track};

/// Forward seeks landing this close to the end skip to the next track, and
/// backward seeks landing this close to the start go to the previous one.
const SEEK_EDGE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// Source of uniformly random track indices for shuffle.
pub trait IndexPicker: Send {
    /// Returns an index in `[0, len)`. `len` is never zero.
    fn pick(&mut self, len: usize) -> usize;
}

pub struct RandomIndexPicker {
    rng: StdRng,
}

impl RandomIndexPicker {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl Default for RandomIndexPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexPicker for RandomIndexPicker {
    fn pick(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }
}

pub struct PlaybackSession {
    engine: Box<dyn AudioEngine>,
    picker: Box<dyn IndexPicker>,
    tracks: Vec<Track>,
    current_index: usize,
    state: TransportState,
    duration_secs: f64,
    position_secs: f64,
    shuffle: bool,
    loop_enabled: bool,
    loaded_source: Option<PathBuf>,
    volume: f32,
    skip_seconds: u32,
}

impl PlaybackSession {
    /// Fresh session: stopped, nothing loaded, seeded from persisted settings.
    pub fn new(
        mut engine: Box<dyn AudioEngine>,
        picker: Box<dyn IndexPicker>,
        volume: f32,
        skip_seconds: u32,
    ) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        engine.set_volume(volume);
        Self {
            engine,
            picker,
            tracks: Vec::new(),
            current_index: 0,
            state: TransportState::Stopped,
            duration_secs: 0.0,
            position_secs: 0.0,
            shuffle: false,
            loop_enabled: false,
            loaded_source: None,
            volume,
            skip_seconds: skip_seconds.max(1),
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.tracks.get(self.current_index)
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn position_secs(&self) -> f64 {
        self.position_secs
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn loaded_source(&self) -> Option<&PathBuf> {
        self.loaded_source.as_ref()
    }

    pub fn set_skip_seconds(&mut self, seconds: u32) {
        self.skip_seconds = seconds.max(1);
    }

    /// Replaces the track list. The current index follows the loaded track
    /// when it is still present, otherwise it is clamped into range.
    pub fn replace_tracks(&mut self, tracks: Vec<Track>) {
        let followed = self.loaded_source.as_ref().and_then(|source| {
            tracks
                .iter()
                .position(|track| &track.file_path == source)
        });
        self.tracks = tracks;
        self.current_index = match followed {
            Some(index) => index,
            None => self.current_index.min(self.tracks.len().saturating_sub(1)),
        };
    }

    /// Moves one track and keeps `current_index` on the same logical track.
    pub fn move_track(&mut self, from: usize, to: usize) -> bool {
        if !move_item(&mut self.tracks, from, to) {
            return false;
        }
        self.current_index = remap_index_after_move(self.current_index, from, to);
        true
    }

    pub fn load_track(&mut self, index: usize) {
        let Some(track) = self.tracks.get(index) else {
            debug!("load_track ignored: index {} out of range", index);
            return;
        };
        let path = track.file_path.clone();
        self.current_index = index;
        if self.loaded_source.as_ref() != Some(&path) {
            debug!("Switching source to {}", path.display());
            self.engine.set_source(&path);
            self.loaded_source = Some(path);
            self.duration_secs = track.duration_secs.map(|secs| secs as f64).unwrap_or(0.0);
        }
        self.engine.play();
        self.position_secs = 0.0;
        self.state = TransportState::Playing;
    }

    pub fn toggle_play_pause(&mut self) {
        if self.state == TransportState::Playing {
            self.engine.pause();
            self.state = TransportState::Paused;
            return;
        }
        if self.loaded_source.is_none() {
            self.load_track(self.current_index);
            return;
        }
        if let Err(err) = self.engine.resume() {
            debug!("Resume failed ({}); restarting playback", err);
            self.engine.play();
            self.position_secs = 0.0;
        }
        self.state = TransportState::Playing;
    }

    pub fn next(&mut self) {
        if self.tracks.is_empty() {
            return;
        }
        self.load_track((self.current_index + 1) % self.tracks.len());
    }

    pub fn previous(&mut self) {
        let len = self.tracks.len();
        if len == 0 {
            return;
        }
        let index = if self.shuffle {
            self.picker.pick(len)
        } else {
            (self.current_index + len - 1) % len
        };
        self.load_track(index);
    }

    pub fn seek_relative(&mut self, delta_secs: f64) {
        if self.duration_secs <= 0.0 {
            return;
        }
        let position = self.engine.current_position_ms() as f64 / 1000.0;
        let target = position + delta_secs;
        if delta_secs > 0.0 && target >= self.duration_secs - SEEK_EDGE_SECS {
            self.next();
            return;
        }
        let clamped = target.clamp(0.0, self.duration_secs);
        if delta_secs < 0.0 && clamped <= SEEK_EDGE_SECS && self.current_index > 0 {
            self.previous();
            return;
        }
        self.engine.seek((clamped * 1000.0).round() as u64);
        self.position_secs = clamped;
    }

    pub fn skip_forward(&mut self) {
        self.seek_relative(f64::from(self.skip_seconds));
    }

    pub fn skip_backward(&mut self) {
        self.seek_relative(-f64::from(self.skip_seconds));
    }

    pub fn seek_absolute(&mut self, position_ms: u64) {
        if self.duration_secs <= 0.0 {
            return;
        }
        self.engine.seek(position_ms);
        self.position_secs = (position_ms as f64 / 1000.0).min(self.duration_secs);
    }

    /// Applies a clamped volume and returns it.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            self.volume
        };
        self.volume = volume;
        self.engine.set_volume(volume);
        volume
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        self.shuffle
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_enabled = !self.loop_enabled;
        self.loop_enabled
    }

    /// Applies an engine notification. Returns false for events about a
    /// source other than the loaded one.
    pub fn handle_engine_event(&mut self, event: &EngineEvent) -> bool {
        if self.loaded_source.as_ref() != Some(&event.source) {
            debug!("Ignoring stale engine event for {}", event.source.display());
            return false;
        }
        match event.kind {
            EngineEventKind::StateChanged(EngineState::Completed) => self.on_completed(),
            EngineEventKind::StateChanged(EngineState::Playing) => {
                self.state = TransportState::Playing
            }
            EngineEventKind::StateChanged(EngineState::Paused) => {
                self.state = TransportState::Paused
            }
            EngineEventKind::StateChanged(EngineState::Stopped) => {
                self.state = TransportState::Stopped
            }
            EngineEventKind::DurationChanged(duration_ms) => {
                self.duration_secs = duration_ms as f64 / 1000.0;
            }
            EngineEventKind::PositionChanged(position_ms) => {
                self.position_secs = position_ms as f64 / 1000.0;
            }
        }
        true
    }

    fn on_completed(&mut self) {
        if self.loop_enabled {
            self.engine.seek(0);
            self.engine.play();
            self.position_secs = 0.0;
            self.state = TransportState::Playing;
        } else if self.shuffle {
            if self.tracks.is_empty() {
                return;
            }
            let index = self.picker.pick(self.tracks.len());
            self.load_track(index);
        } else {
            self.next();
        }
    }

    /// Stops playback and frees the engine source. The session stays usable.
    pub fn release(&mut self) {
        if self.loaded_source.is_none() && self.state == TransportState::Stopped {
            return;
        }
        self.engine.release();
        self.loaded_source = None;
        self.state = TransportState::Stopped;
        self.position_secs = 0.0;
        self.duration_secs = 0.0;
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Picker that replays a fixed script, for deterministic shuffle tests.
#[cfg(test)]
pub(crate) struct ScriptedPicker {
    picks: std::collections::VecDeque<usize>,
}

#[cfg(test)]
impl ScriptedPicker {
    pub(crate) fn new(picks: &[usize]) -> Self {
        Self {
            picks: picks.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
impl IndexPicker for ScriptedPicker {
    fn pick(&mut self, len: usize) -> usize {
        self.picks.pop_front().unwrap_or(0) % len
    }
}
