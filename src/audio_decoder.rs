use log::{debug, warn};
use rubato::{FftFixedIn, Resampler};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const RESAMPLER_CHUNK_FRAMES: usize = 1024;
const RESAMPLER_SUB_CHUNKS: usize = 2;

/// Fully decoded track as interleaved f32 samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / u64::from(self.sample_rate)
    }

    /// Converts to the output layout the device expects.
    pub fn into_output_format(
        self,
        target_rate: u32,
        target_channels: usize,
    ) -> Result<DecodedAudio, String> {
        let remapped = remap_channels(&self.samples, self.channels, target_channels);
        let resampled = resample(&remapped, target_channels, self.sample_rate, target_rate)?;
        Ok(DecodedAudio {
            samples: resampled,
            sample_rate: target_rate,
            channels: target_channels,
        })
    }
}

/// Decodes the default track of `path` completely.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, String> {
    let file = std::fs::File::open(path)
        .map_err(|err| format!("Failed to open {}: {}", path.display(), err))?;
    let media_source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| format!("Failed to probe {}: {}", path.display(), err))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .default_track()
        .ok_or_else(|| format!("No default track in {}", path.display()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let mut channels = track
        .codec_params
        .channels
        .map(|channels| channels.count())
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| format!("Failed to create decoder: {}", err))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => {
                debug!("Stopping decode of {}: {}", path.display(), err);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();
                let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(sample_buffer.samples());
            }
            Err(SymphoniaError::DecodeError(err)) => {
                warn!("Skipping undecodable packet in {}: {}", path.display(), err);
            }
            Err(err) => {
                return Err(format!("Decode error in {}: {}", path.display(), err));
            }
        }
    }

    if channels == 0 || samples.is_empty() {
        return Err(format!("No audio decoded from {}", path.display()));
    }
    debug!(
        "Decoded {} samples from {} (rate={}, channels={})",
        samples.len(),
        path.display(),
        sample_rate,
        channels
    );
    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Maps interleaved audio between channel counts. Mono is duplicated into every
/// output channel, downmixes to mono average, other layouts keep the leading
/// channels and pad with silence.
pub fn remap_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let frames = samples.len() / from;
    let mut output = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if from == 1 {
            output.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for channel in 0..to {
                output.push(frame.get(channel).copied().unwrap_or(0.0));
            }
        }
    }
    output
}

/// Resamples interleaved audio with an FFT resampler, compensating for the
/// resampler delay so the output length matches the input duration.
pub fn resample(
    samples: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, String> {
    if from_rate == to_rate || samples.is_empty() || channels == 0 || from_rate == 0 {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLER_CHUNK_FRAMES,
        RESAMPLER_SUB_CHUNKS,
        channels,
    )
    .map_err(|err| format!("Failed to create resampler: {}", err))?;

    let planar = deinterleave(samples, channels);
    let frames = planar[0].len();
    let expected_frames =
        (frames as u64 * u64::from(to_rate)).div_ceil(u64::from(from_rate)) as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected_frames + delay); channels];

    let mut offset = 0;
    while frames - offset >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = planar
            .iter()
            .map(|channel| &channel[offset..offset + needed])
            .collect();
        let processed = resampler
            .process(chunk.as_slice(), None)
            .map_err(|err| format!("Resampling failed: {}", err))?;
        append_planar(&mut output, processed);
        offset += needed;
    }
    if offset < frames {
        let tail: Vec<&[f32]> = planar.iter().map(|channel| &channel[offset..]).collect();
        let processed = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|err| format!("Resampling failed: {}", err))?;
        append_planar(&mut output, processed);
    }
    let mut flushes = 0;
    while output[0].len() < delay + expected_frames && flushes < 8 {
        let processed = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|err| format!("Resampling failed: {}", err))?;
        append_planar(&mut output, processed);
        flushes += 1;
    }

    let available = output[0].len().saturating_sub(delay).min(expected_frames);
    let mut interleaved = Vec::with_capacity(available * channels);
    for frame in delay..delay + available {
        for channel in &output {
            interleaved.push(channel[frame]);
        }
    }
    Ok(interleaved)
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, sample) in planar.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }
    planar
}

fn append_planar(output: &mut [Vec<f32>], processed: Vec<Vec<f32>>) {
    for (channel, block) in output.iter_mut().zip(processed) {
        channel.extend(block);
    }
}
