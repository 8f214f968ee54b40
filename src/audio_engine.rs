//! Single-track audio engine boundary.

use std::path::{Path, PathBuf};

/// State reported by the engine. `Completed` is a one-shot notification that
/// the loaded source played to its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Playing,
    Paused,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    StateChanged(EngineState),
    DurationChanged(u64),
    PositionChanged(u64),
}

/// Engine notification tagged with the source it refers to, so that events
/// emitted for a previously loaded file can be recognized and dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub source: PathBuf,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn new(source: &Path, kind: EngineEventKind) -> Self {
        Self {
            source: source.to_path_buf(),
            kind,
        }
    }
}

/// Commands understood by a playback engine. Implementations report progress
/// asynchronously as [`EngineEvent`]s and never call back into their owner.
pub trait AudioEngine: Send {
    /// Switches the loaded source. Playback begins with the next `play()`.
    fn set_source(&mut self, path: &Path);
    /// Starts the loaded source from the beginning.
    fn play(&mut self);
    fn pause(&mut self);
    /// Continues from the paused position.
    fn resume(&mut self) -> Result<(), String>;
    fn seek(&mut self, position_ms: u64);
    fn current_position_ms(&self) -> u64;
    fn set_volume(&mut self, volume: f32);
    /// Stops output and frees the loaded source.
    fn release(&mut self);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::AudioEngine;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    pub enum EngineCall {
        SetSource(PathBuf),
        Play,
        Pause,
        Resume,
        Seek(u64),
        SetVolume(f32),
        Release,
    }

    /// Engine double that records every command and lets tests steer the
    /// reported position and resume outcome.
    #[derive(Clone, Default)]
    pub struct RecordingEngine {
        pub calls: Arc<Mutex<Vec<EngineCall>>>,
        pub position_ms: Arc<AtomicU64>,
        pub fail_resume: Arc<AtomicBool>,
    }

    impl RecordingEngine {
        pub fn calls(&self) -> Vec<EngineCall> {
            self.calls.lock().expect("calls lock poisoned").clone()
        }

        pub fn clear(&self) {
            self.calls.lock().expect("calls lock poisoned").clear();
        }

        pub fn set_position_ms(&self, position_ms: u64) {
            self.position_ms.store(position_ms, Ordering::SeqCst);
        }

        fn record(&self, call: EngineCall) {
            self.calls.lock().expect("calls lock poisoned").push(call);
        }
    }

    impl AudioEngine for RecordingEngine {
        fn set_source(&mut self, path: &Path) {
            self.record(EngineCall::SetSource(path.to_path_buf()));
        }

        fn play(&mut self) {
            self.position_ms.store(0, Ordering::SeqCst);
            self.record(EngineCall::Play);
        }

        fn pause(&mut self) {
            self.record(EngineCall::Pause);
        }

        fn resume(&mut self) -> Result<(), String> {
            self.record(EngineCall::Resume);
            if self.fail_resume.load(Ordering::SeqCst) {
                Err("nothing to resume".to_string())
            } else {
                Ok(())
            }
        }

        fn seek(&mut self, position_ms: u64) {
            self.position_ms.store(position_ms, Ordering::SeqCst);
            self.record(EngineCall::Seek(position_ms));
        }

        fn current_position_ms(&self) -> u64 {
            self.position_ms.load(Ordering::SeqCst)
        }

        fn set_volume(&mut self, volume: f32) {
            self.record(EngineCall::SetVolume(volume));
        }

        fn release(&mut self) {
            self.record(EngineCall::Release);
        }
    }
}
