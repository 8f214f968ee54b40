//! Front-end facing snapshots of the player and the playlist list.

use std::path::PathBuf;

use crate::playback_session::{PlaybackSession, TransportState};
use crate::playlist::Track;

/// Slider range used while the duration is unknown.
const FALLBACK_SLIDER_MAX_MS: u64 = 1000;

/// `HH:MM:SS` for a non-negative number of seconds.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60
    )
}

/// Compact total such as `(1h, 2m, 3s)`; zero reads as `(0s)`.
pub fn format_duration_string(total_seconds: u64) -> String {
    if total_seconds == 0 {
        return "(0s)".to_string();
    }
    let hours = total_seconds / 3600;
    let minutes = (total_seconds / 60) % 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::with_capacity(3);
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || (hours == 0 && seconds == 0) {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 {
        parts.push(format!("{seconds}s"));
    }
    format!("({})", parts.join(", "))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackRow {
    /// One-based position shown next to the title.
    pub display_index: usize,
    pub title: String,
    pub duration_text: String,
    pub thumbnail_path: Option<PathBuf>,
    pub file_path: PathBuf,
    pub is_favourite: bool,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRenderModel {
    pub playlist_title: String,
    pub track_count_text: String,
    pub rows: Vec<TrackRow>,
    pub now_playing_title: String,
    pub now_playing_subtitle: String,
    pub now_playing_thumbnail: Option<PathBuf>,
    pub position_text: String,
    pub duration_text: String,
    pub slider_max_ms: u64,
    pub slider_value_ms: u64,
    pub shuffle: bool,
    pub loop_enabled: bool,
    pub volume: f32,
    pub state: TransportState,
    pub reorder_enabled: bool,
}

impl PlayerRenderModel {
    pub fn from_session(
        playlist_title: &str,
        session: &PlaybackSession,
        reorder_enabled: bool,
    ) -> Self {
        let tracks = session.tracks();
        let current_index = session.current_index();
        let rows = tracks
            .iter()
            .enumerate()
            .map(|(index, track)| track_row(index, track, index == current_index))
            .collect();

        let mut model = Self {
            playlist_title: playlist_title.to_string(),
            track_count_text: format!("{} tracks", tracks.len()),
            rows,
            now_playing_title: "No track playing".to_string(),
            now_playing_subtitle: "Select a song".to_string(),
            now_playing_thumbnail: None,
            position_text: format_duration(0.0),
            duration_text: format_duration(0.0),
            slider_max_ms: FALLBACK_SLIDER_MAX_MS,
            slider_value_ms: 0,
            shuffle: session.shuffle(),
            loop_enabled: session.loop_enabled(),
            volume: session.volume(),
            state: session.state(),
            reorder_enabled,
        };

        let Some(current) = session.current_track() else {
            return model;
        };
        let duration = session.duration_secs();
        let position = session.position_secs().max(0.0);
        model.now_playing_title = current.title.clone();
        model.now_playing_subtitle = playlist_title.to_string();
        model.now_playing_thumbnail = current.thumbnail_path.clone();
        model.position_text = format_duration(position);
        model.duration_text = format_duration(duration);
        if duration > 0.0 {
            model.slider_max_ms = (duration * 1000.0).round() as u64;
        }
        model.slider_value_ms = ((position * 1000.0).round() as u64).min(model.slider_max_ms);
        model
    }
}

fn track_row(index: usize, track: &Track, is_current: bool) -> TrackRow {
    TrackRow {
        display_index: index + 1,
        title: track.title.clone(),
        duration_text: format_duration(track.duration_secs.unwrap_or(0) as f64),
        thumbnail_path: track.thumbnail_path.clone(),
        file_path: track.file_path.clone(),
        is_favourite: track.is_favourite,
        is_current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_engine::testing::RecordingEngine;
    use crate::audio_engine::{EngineEvent, EngineEventKind};
    use crate::playback_session::ScriptedPicker;

    fn session(titles: &[&str]) -> PlaybackSession {
        let mut session = PlaybackSession::new(
            Box::new(RecordingEngine::default()),
            Box::new(ScriptedPicker::new(&[])),
            0.4,
            10,
        );
        session.replace_tracks(
            titles
                .iter()
                .enumerate()
                .map(|(ordinal, title)| Track {
                    id: ordinal as i64,
                    playlist_name: "Mix".to_string(),
                    title: title.to_string(),
                    original_title: title.to_string(),
                    file_path: PathBuf::from(format!("/media/{title}.mp3")),
                    duration_secs: Some(125),
                    thumbnail_path: None,
                    link: None,
                    ordinal,
                    is_favourite: ordinal == 0,
                })
                .collect(),
        );
        session
    }

    #[test]
    fn test_format_duration_uses_hours_minutes_seconds() {
        assert_eq!(format_duration(0.0), "00:00:00");
        assert_eq!(format_duration(59.9), "00:00:59");
        assert_eq!(format_duration(3723.0), "01:02:03");
        assert_eq!(format_duration(-4.0), "00:00:00");
    }

    #[test]
    fn test_format_duration_string_parts() {
        assert_eq!(format_duration_string(0), "(0s)");
        assert_eq!(format_duration_string(3723), "(1h, 2m, 3s)");
        assert_eq!(format_duration_string(3600), "(1h)");
        assert_eq!(format_duration_string(60), "(1m)");
        assert_eq!(format_duration_string(45), "(45s)");
        assert_eq!(format_duration_string(3605), "(1h, 5s)");
    }

    #[test]
    fn test_empty_session_renders_placeholders() {
        let model = PlayerRenderModel::from_session("Mix", &session(&[]), true);
        assert_eq!(model.track_count_text, "0 tracks");
        assert_eq!(model.now_playing_title, "No track playing");
        assert_eq!(model.now_playing_subtitle, "Select a song");
        assert_eq!(model.slider_max_ms, 1000);
        assert_eq!(model.slider_value_ms, 0);
        assert!(model.rows.is_empty());
    }

    #[test]
    fn test_playing_session_renders_progress_and_highlight() {
        let mut session = session(&["a", "b"]);
        session.load_track(1);
        let source = PathBuf::from("/media/b.mp3");
        session.handle_engine_event(&EngineEvent {
            source: source.clone(),
            kind: EngineEventKind::DurationChanged(200_000),
        });
        session.handle_engine_event(&EngineEvent {
            source,
            kind: EngineEventKind::PositionChanged(61_000),
        });

        let model = PlayerRenderModel::from_session("Mix", &session, false);
        assert_eq!(model.now_playing_title, "b");
        assert_eq!(model.now_playing_subtitle, "Mix");
        assert_eq!(model.position_text, "00:01:01");
        assert_eq!(model.duration_text, "00:03:20");
        assert_eq!(model.slider_max_ms, 200_000);
        assert_eq!(model.slider_value_ms, 61_000);
        assert_eq!(model.state, TransportState::Playing);
        assert!(!model.reorder_enabled);
        assert!(!model.rows[0].is_current);
        assert!(model.rows[0].is_favourite);
        assert!(model.rows[1].is_current);
        assert_eq!(model.rows[1].display_index, 2);
        assert_eq!(model.rows[1].duration_text, "00:02:05");
    }

    #[test]
    fn test_slider_value_never_exceeds_max() {
        let mut session = session(&["a"]);
        session.load_track(0);
        session.handle_engine_event(&EngineEvent {
            source: PathBuf::from("/media/a.mp3"),
            kind: EngineEventKind::PositionChanged(500_000),
        });
        let model = PlayerRenderModel::from_session("Mix", &session, true);
        assert_eq!(model.slider_max_ms, 125_000);
        assert_eq!(model.slider_value_ms, 125_000);
    }
}
