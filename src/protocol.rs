//! Event-bus protocol shared by all runtime components.
//!
//! Front-end commands, engine notifications, worker completions and render
//! publications all travel as [`Message`] values on one broadcast bus.

use std::path::PathBuf;

use crate::audio_engine::EngineEvent;
use crate::playlist::{PlaylistSummary, Track};
use crate::render_model::PlayerRenderModel;
use crate::worker_pool::PerformanceTier;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Playback(PlaybackMessage),
    Playlist(PlaylistMessage),
    Settings(SettingsMessage),
    Engine(EngineEvent),
    /// Results of store jobs; only the controller consumes these.
    Worker(WorkerMessage),
    /// Render output for the front-end.
    View(ViewMessage),
    Shutdown,
}

/// Transport commands for the active playback session.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    PlayIndex(usize),
    TogglePlayPause,
    Next,
    Previous,
    SkipForward,
    SkipBackward,
    SeekRelative(f64),
    SeekAbsolute(u64),
    SetVolume(f32),
    ToggleShuffle,
    ToggleLoop,
}

/// Playlist-domain commands.
#[derive(Debug, Clone)]
pub enum PlaylistMessage {
    /// Activates a playlist (or the favourites view) with a fresh session.
    Open(String),
    /// Re-reads the active playlist, optionally under a new name.
    Refresh(Option<String>),
    Reorder {
        from: usize,
        to: usize,
    },
    DeleteTrack(PathBuf),
    ToggleFavourite(PathBuf),
    RenameTrack {
        path: PathBuf,
        title: String,
    },
    NavigateBack,
    RequestPlaylistList,
    CreatePlaylist {
        name: String,
        link: String,
    },
    RenamePlaylist {
        old_name: String,
        new_name: String,
    },
    DeletePlaylist(String),
    ImportFiles {
        playlist: String,
        link: String,
        paths: Vec<PathBuf>,
    },
    ResetApplicationData,
}

#[derive(Debug, Clone)]
pub enum SettingsMessage {
    SetSkipSeconds(i64),
    SetPerformanceTier(PerformanceTier),
}

/// Immutable results posted by worker-pool jobs.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    SnapshotLoaded {
        playlist: String,
        sequence: u64,
        tracks: Vec<Track>,
    },
    TrackDeleted {
        playlist: String,
        sequence: u64,
        path: PathBuf,
        deleted: bool,
        /// The playlist had no playable tracks left after the delete.
        playlist_emptied: bool,
        tracks: Vec<Track>,
    },
    /// A reorder write finished; reads deferred behind it may run now.
    OrderPersisted {
        playlist: String,
    },
    FavouriteToggled {
        path: PathBuf,
        is_favourite: bool,
        owning_playlist: Option<String>,
    },
    TrackRenamed {
        path: PathBuf,
        renamed: bool,
        owning_playlist: Option<String>,
    },
    ImportCompleted {
        playlist: String,
        imported: usize,
    },
    PlaylistListLoaded(Vec<PlaylistSummary>),
    /// A create/rename/delete of a stored playlist finished.
    LibraryChanged {
        renamed: Option<(String, String)>,
        deleted: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub enum ViewMessage {
    Player(Box<PlayerRenderModel>),
    PlaylistList(Vec<PlaylistSummary>),
    /// User-facing rejection or status line.
    Notice(String),
}
