//! Media file helpers: supported-format checks, existence filtering, best-effort
//! removal and duration probing.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    thread,
};

use log::{debug, warn};
use symphonia::core::{
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};

pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 7] =
    ["mp3", "wav", "ogg", "flac", "aac", "m4a", "mp4"];

/// Batches smaller than this are checked on the calling thread.
const PARALLEL_EXISTENCE_THRESHOLD: usize = 16;

pub fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Expands dropped or imported paths into a sorted, de-duplicated list of audio
/// files. Directories are scanned one level at a time, recursively.
pub fn collect_audio_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut tracks = BTreeSet::new();
    let mut pending_directories = Vec::new();
    for path in paths {
        if path.is_file() {
            if is_supported_audio_file(path) {
                tracks.insert(path.clone());
            }
        } else if path.is_dir() {
            pending_directories.push(path.clone());
        }
    }

    while let Some(directory) = pending_directories.pop() {
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to read directory {}: {}", directory.display(), err);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => pending_directories.push(path),
                Ok(file_type) if file_type.is_file() && is_supported_audio_file(&path) => {
                    tracks.insert(path);
                }
                Ok(_) => {}
                Err(err) => debug!("Failed to inspect {}: {}", path.display(), err),
            }
        }
    }

    tracks.into_iter().collect()
}

/// Returns one existence flag per input path, in input order. Large batches are
/// split across scoped threads.
pub fn existence_mask<P>(paths: &[P]) -> Vec<bool>
where
    P: AsRef<Path> + Sync,
{
    if paths.len() < PARALLEL_EXISTENCE_THRESHOLD {
        return paths.iter().map(|path| path.as_ref().exists()).collect();
    }

    let parallelism = thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(2);
    let chunk_size = paths.len().div_ceil(parallelism).max(1);

    thread::scope(|scope| {
        let handles: Vec<_> = paths
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|path| path.as_ref().exists())
                        .collect::<Vec<bool>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap_or_default())
            .collect()
    })
}

/// Removes a file if it exists. Failures are logged, never raised.
pub fn safe_remove(path: &Path) -> bool {
    if path.as_os_str().is_empty() || !path.exists() {
        return false;
    }
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(err) => {
            warn!("File deletion failed for {}: {}", path.display(), err);
            false
        }
    }
}

/// Removes every given path on scoped threads; returns how many were deleted.
pub fn safe_remove_all(paths: &[PathBuf]) -> usize {
    if paths.len() < PARALLEL_EXISTENCE_THRESHOLD {
        return paths.iter().filter(|path| safe_remove(path)).count();
    }
    thread::scope(|scope| {
        let handles: Vec<_> = paths
            .chunks(PARALLEL_EXISTENCE_THRESHOLD)
            .map(|chunk| scope.spawn(move || chunk.iter().filter(|path| safe_remove(path)).count()))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(0))
            .sum()
    })
}

/// Reads the stream length of the default track in whole seconds.
pub fn probe_duration_secs(path: &Path) -> Option<u64> {
    let file = std::fs::File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;
    let track = probed.format.default_track()?;
    let frames = track.codec_params.n_frames?;
    if let Some(time_base) = track.codec_params.time_base {
        return Some(time_base.calc_time(frames).seconds);
    }
    let sample_rate = track.codec_params.sample_rate?;
    Some(frames / u64::from(sample_rate.max(1)))
}
