use crate::audio_decoder;
use crate::audio_engine::{AudioEngine, EngineEvent, EngineEventKind, EngineState};
use crate::protocol::Message;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use log::{debug, error, info, trace, warn};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};
use tokio::sync::broadcast::Sender;

#[derive(Debug)]
enum EngineCommand {
    SetSource(PathBuf),
    Play,
    Pause,
    Resume,
    Seek(u64),
    SetVolume(f32),
    Release,
    Shutdown,
}

#[derive(Debug, Default)]
struct PlaybackBuffer {
    samples: Vec<f32>,
    /// Next interleaved sample to output.
    cursor: usize,
    channels: usize,
    sample_rate: u32,
}

impl PlaybackBuffer {
    fn position_ms(&self) -> u64 {
        if self.channels == 0 || self.sample_rate == 0 {
            return 0;
        }
        (self.cursor / self.channels) as u64 * 1000 / u64::from(self.sample_rate)
    }

    fn seek_to_ms(&mut self, position_ms: u64) {
        if self.channels == 0 {
            return;
        }
        let frame = position_ms * u64::from(self.sample_rate) / 1000;
        let sample = (frame as usize).saturating_mul(self.channels);
        self.cursor = sample.min(self.samples.len());
    }
}

/// State shared between the engine thread and the output callback.
struct PlaybackShared {
    buffer: Mutex<PlaybackBuffer>,
    playing: AtomicBool,
    finished: AtomicBool,
    volume_bits: AtomicU32,
    position_ms: Arc<AtomicU64>,
}

impl PlaybackShared {
    fn new(position_ms: Arc<AtomicU64>) -> Self {
        Self {
            buffer: Mutex::new(PlaybackBuffer::default()),
            playing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            volume_bits: AtomicU32::new(1.0_f32.to_bits()),
            position_ms,
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    fn with_buffer<R>(&self, apply: impl FnOnce(&mut PlaybackBuffer) -> R) -> R {
        let mut buffer = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut buffer)
    }
}

/// Copies the next block of buffered audio into `output`, scaled by volume.
/// Anything not covered by audio is silence.
fn fill_output<T>(output: &mut [T], shared: &PlaybackShared)
where
    T: SizedSample + FromSample<f32>,
{
    if !shared.playing.load(Ordering::Relaxed) {
        output.fill(T::EQUILIBRIUM);
        return;
    }
    // Never block the audio callback; a contended buffer yields one silent block.
    let Ok(mut buffer) = shared.buffer.try_lock() else {
        output.fill(T::EQUILIBRIUM);
        return;
    };

    let volume = shared.volume();
    let start = buffer.cursor.min(buffer.samples.len());
    let available = (buffer.samples.len() - start).min(output.len());
    for (out, sample) in output
        .iter_mut()
        .zip(&buffer.samples[start..start + available])
    {
        *out = T::from_sample(*sample * volume);
    }
    output[available..].fill(T::EQUILIBRIUM);

    buffer.cursor = start + available;
    shared
        .position_ms
        .store(buffer.position_ms(), Ordering::Relaxed);
    if buffer.cursor >= buffer.samples.len() {
        shared.finished.store(true, Ordering::Relaxed);
    }
}

struct OutputDevice {
    stream: cpal::Stream,
    sample_rate: u32,
    channels: usize,
}

fn open_output_device(shared: &Arc<PlaybackShared>) -> Result<OutputDevice, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "No output device available".to_string())?;
    let supported = device
        .default_output_config()
        .map_err(|err| format!("Error getting device config: {}", err))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, shared),
        other => Err(format!("Unsupported output sample format {:?}", other)),
    }?;

    debug!(
        "Audio device initialized with sample rate {} and {} channels",
        config.sample_rate.0, config.channels
    );
    Ok(OutputDevice {
        stream,
        sample_rate: config.sample_rate.0,
        channels: usize::from(config.channels),
    })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<PlaybackShared>,
) -> Result<cpal::Stream, String>
where
    T: SizedSample + FromSample<f32>,
{
    let shared = Arc::clone(shared);
    device
        .build_output_stream(
            config,
            move |output: &mut [T], _: &cpal::OutputCallbackInfo| fill_output(output, &shared),
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|err| format!("Failed to build audio stream: {}", err))
}

/// Engine thread state. Owns the output stream, which must stay on the thread
/// that created it.
struct EngineWorker {
    commands: Receiver<EngineCommand>,
    bus_sender: Sender<Message>,
    shared: Arc<PlaybackShared>,
    has_source: Arc<AtomicBool>,
    output: Option<OutputDevice>,
    source: Option<PathBuf>,
    poll_interval: Duration,
}

impl EngineWorker {
    fn run(&mut self) {
        loop {
            match self.commands.recv_timeout(self.poll_interval) {
                Ok(EngineCommand::Shutdown) => {
                    info!("Audio engine shutting down");
                    break;
                }
                Ok(command) => self.handle_command(command),
                Err(RecvTimeoutError::Timeout) => self.tick(),
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Audio engine handles dropped; exiting");
                    break;
                }
            }
        }
        self.stop_output();
    }

    fn handle_command(&mut self, command: EngineCommand) {
        trace!("Audio engine command: {:?}", command);
        match command {
            EngineCommand::SetSource(path) => self.load_source(path),
            EngineCommand::Play => {
                self.shared.with_buffer(|buffer| buffer.cursor = 0);
                self.shared.position_ms.store(0, Ordering::Relaxed);
                self.start_output();
            }
            EngineCommand::Pause => {
                self.shared.playing.store(false, Ordering::Relaxed);
                self.emit(EngineEventKind::StateChanged(EngineState::Paused));
            }
            EngineCommand::Resume => self.start_output(),
            EngineCommand::Seek(position_ms) => {
                let position_ms = self.shared.with_buffer(|buffer| {
                    buffer.seek_to_ms(position_ms);
                    buffer.position_ms()
                });
                self.shared.finished.store(false, Ordering::Relaxed);
                self.shared.position_ms.store(position_ms, Ordering::Relaxed);
                self.emit(EngineEventKind::PositionChanged(position_ms));
            }
            EngineCommand::SetVolume(volume) => {
                self.shared
                    .volume_bits
                    .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
            }
            EngineCommand::Release => {
                self.shared.playing.store(false, Ordering::Relaxed);
                self.shared.with_buffer(|buffer| *buffer = PlaybackBuffer::default());
                self.shared.position_ms.store(0, Ordering::Relaxed);
                self.source = None;
                self.stop_output();
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn load_source(&mut self, path: PathBuf) {
        self.shared.playing.store(false, Ordering::Relaxed);
        self.shared.finished.store(false, Ordering::Relaxed);
        self.shared.position_ms.store(0, Ordering::Relaxed);
        self.source = Some(path.clone());

        if self.output.is_none() {
            match open_output_device(&self.shared) {
                Ok(output) => self.output = Some(output),
                Err(err) => error!("Audio output unavailable: {}", err),
            }
        }
        let (target_rate, target_channels) = match &self.output {
            Some(output) => (output.sample_rate, output.channels),
            None => (48_000, 2),
        };

        let decoded = audio_decoder::decode_file(&path)
            .and_then(|decoded| decoded.into_output_format(target_rate, target_channels));
        match decoded {
            Ok(audio) => {
                let duration_ms = audio.duration_ms();
                self.shared.with_buffer(|buffer| {
                    *buffer = PlaybackBuffer {
                        samples: audio.samples,
                        cursor: 0,
                        channels: audio.channels,
                        sample_rate: audio.sample_rate,
                    }
                });
                self.emit(EngineEventKind::DurationChanged(duration_ms));
            }
            Err(err) => {
                error!("Failed to load {}: {}", path.display(), err);
                self.shared
                    .with_buffer(|buffer| *buffer = PlaybackBuffer::default());
                self.has_source.store(false, Ordering::Relaxed);
                self.emit(EngineEventKind::StateChanged(EngineState::Stopped));
            }
        }
    }

    fn start_output(&mut self) {
        let has_audio = self.shared.with_buffer(|buffer| !buffer.samples.is_empty());
        if !has_audio {
            warn!("Nothing loaded to play");
            self.emit(EngineEventKind::StateChanged(EngineState::Stopped));
            return;
        }
        let Some(output) = &self.output else {
            self.emit(EngineEventKind::StateChanged(EngineState::Stopped));
            return;
        };
        if let Err(err) = output.stream.play() {
            error!("Failed to start playback: {}", err);
            self.emit(EngineEventKind::StateChanged(EngineState::Stopped));
            return;
        }
        self.shared.finished.store(false, Ordering::Relaxed);
        self.shared.playing.store(true, Ordering::Relaxed);
        self.emit(EngineEventKind::StateChanged(EngineState::Playing));
    }

    fn stop_output(&mut self) {
        if let Some(output) = &self.output {
            if let Err(err) = output.stream.pause() {
                debug!("Failed to pause output stream: {}", err);
            }
        }
    }

    fn tick(&mut self) {
        if !self.shared.playing.load(Ordering::Relaxed) {
            return;
        }
        let position_ms = self.shared.position_ms.load(Ordering::Relaxed);
        self.emit(EngineEventKind::PositionChanged(position_ms));
        if self.shared.finished.swap(false, Ordering::Relaxed) {
            self.shared.playing.store(false, Ordering::Relaxed);
            self.emit(EngineEventKind::StateChanged(EngineState::Completed));
        }
    }

    fn emit(&self, kind: EngineEventKind) {
        let Some(source) = self.source.as_ref() else {
            return;
        };
        let _ = self
            .bus_sender
            .send(Message::Engine(EngineEvent::new(source, kind)));
    }
}

/// Handle to the local cpal/symphonia engine. Clones share one engine thread.
#[derive(Clone)]
pub struct LocalAudioEngine {
    commands: mpsc::Sender<EngineCommand>,
    position_ms: Arc<AtomicU64>,
    has_source: Arc<AtomicBool>,
}

impl LocalAudioEngine {
    pub fn spawn(bus_sender: Sender<Message>, poll_interval: Duration) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel();
        let position_ms = Arc::new(AtomicU64::new(0));
        let has_source = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(PlaybackShared::new(Arc::clone(&position_ms)));

        let worker_has_source = Arc::clone(&has_source);
        let spawned = thread::Builder::new()
            .name("audio-engine".to_string())
            .spawn(move || {
                // The output stream is not Send, so the worker lives on this thread only.
                let mut worker = EngineWorker {
                    commands: commands_rx,
                    bus_sender,
                    shared,
                    has_source: worker_has_source,
                    output: None,
                    source: None,
                    poll_interval,
                };
                let run_result =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| worker.run()));
                if let Err(payload) = run_result {
                    error!(
                        "Audio engine thread terminated due to panic: {}",
                        crate::panic_payload_to_string(payload.as_ref())
                    );
                }
            });
        if let Err(err) = spawned {
            error!("Failed to spawn audio engine thread: {}", err);
        }

        Self {
            commands: commands_tx,
            position_ms,
            has_source,
        }
    }

    pub fn shutdown(&self) {
        self.send(EngineCommand::Shutdown);
    }

    fn send(&self, command: EngineCommand) {
        if self.commands.send(command).is_err() {
            warn!("Audio engine is not running; command dropped");
        }
    }
}

impl AudioEngine for LocalAudioEngine {
    fn set_source(&mut self, path: &Path) {
        self.has_source.store(true, Ordering::Relaxed);
        self.position_ms.store(0, Ordering::Relaxed);
        self.send(EngineCommand::SetSource(path.to_path_buf()));
    }

    fn play(&mut self) {
        self.position_ms.store(0, Ordering::Relaxed);
        self.send(EngineCommand::Play);
    }

    fn pause(&mut self) {
        self.send(EngineCommand::Pause);
    }

    fn resume(&mut self) -> Result<(), String> {
        if !self.has_source.load(Ordering::Relaxed) {
            return Err("no source loaded".to_string());
        }
        self.send(EngineCommand::Resume);
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) {
        self.position_ms.store(position_ms, Ordering::Relaxed);
        self.send(EngineCommand::Seek(position_ms));
    }

    fn current_position_ms(&self) -> u64 {
        self.position_ms.load(Ordering::Relaxed)
    }

    fn set_volume(&mut self, volume: f32) {
        self.send(EngineCommand::SetVolume(volume));
    }

    fn release(&mut self) {
        self.has_source.store(false, Ordering::Relaxed);
        self.position_ms.store(0, Ordering::Relaxed);
        self.send(EngineCommand::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_with(samples: Vec<f32>, channels: usize, sample_rate: u32) -> PlaybackShared {
        let shared = PlaybackShared::new(Arc::new(AtomicU64::new(0)));
        shared.with_buffer(|buffer| {
            *buffer = PlaybackBuffer {
                samples,
                cursor: 0,
                channels,
                sample_rate,
            }
        });
        shared
    }

    #[test]
    fn test_engine_thread_spawns_without_a_source_and_shuts_down() {
        fn assert_send<T: Send>(_: &T) {}

        let (bus_sender, _bus_receiver) = tokio::sync::broadcast::channel(8);
        let mut engine = LocalAudioEngine::spawn(bus_sender, Duration::from_millis(5));
        assert_send(&engine);
        assert!(engine.resume().is_err());
        assert_eq!(engine.current_position_ms(), 0);
        engine.shutdown();
    }

    #[test]
    fn test_paused_output_is_silent_and_keeps_cursor() {
        let shared = shared_with(vec![0.5; 8], 2, 4);
        let mut output = [1.0_f32; 4];
        fill_output(&mut output, &shared);
        assert_eq!(output, [0.0; 4]);
        assert_eq!(shared.with_buffer(|buffer| buffer.cursor), 0);
    }

    #[test]
    fn test_output_applies_volume_and_reports_completion() {
        let shared = shared_with(vec![1.0, 1.0, 0.5, 0.5], 2, 2);
        shared.playing.store(true, Ordering::Relaxed);
        shared
            .volume_bits
            .store(0.5_f32.to_bits(), Ordering::Relaxed);

        let mut output = [9.0_f32; 6];
        fill_output(&mut output, &shared);
        assert_eq!(output, [0.5, 0.5, 0.25, 0.25, 0.0, 0.0]);
        assert!(shared.finished.load(Ordering::Relaxed));
        assert_eq!(shared.position_ms.load(Ordering::Relaxed), 1000);
    }

    #[test]
    fn test_partial_block_advances_cursor_and_position() {
        let shared = shared_with(vec![0.25; 400], 2, 100);
        shared.playing.store(true, Ordering::Relaxed);
        let mut output = [0_i16; 100];
        fill_output(&mut output, &shared);
        assert_eq!(shared.with_buffer(|buffer| buffer.cursor), 100);
        assert_eq!(shared.position_ms.load(Ordering::Relaxed), 500);
        assert!(!shared.finished.load(Ordering::Relaxed));
        assert!(output.iter().all(|sample| *sample > 0));
    }

    #[test]
    fn test_seek_clamps_to_buffer_end() {
        let mut buffer = PlaybackBuffer {
            samples: vec![0.0; 200],
            cursor: 0,
            channels: 2,
            sample_rate: 100,
        };
        buffer.seek_to_ms(500);
        assert_eq!(buffer.cursor, 100);
        assert_eq!(buffer.position_ms(), 500);
        buffer.seek_to_ms(60_000);
        assert_eq!(buffer.cursor, 200);
    }
}
