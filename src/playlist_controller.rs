//! Controller thread: owns the playback session of the active playlist and
//! reconciles it with store work running on the worker pool.
//!
//! Every fetch of a playlist snapshot carries a per-playlist sequence number.
//! A completion is applied only when its sequence is newer than the last one
//! applied for that playlist and the playlist is still the active one. Reads
//! of a playlist with a reorder write in flight are held back until that write
//! has committed, so the store never hands back an order older than the one
//! on screen.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, error, info, trace, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::app_context::{AppServices, SessionFactory, StoragePaths};
use crate::audio_engine::{EngineEvent, EngineEventKind};
use crate::db_manager::{DbManager, NewTrack};
use crate::media_files;
use crate::playback_session::PlaybackSession;
use crate::playlist::{is_favourites_name, PlaylistSummary, Track, FAVOURITES_PLAYLIST_NAME};
use crate::protocol::{
    Message, PlaybackMessage, PlaylistMessage, SettingsMessage, ViewMessage, WorkerMessage,
};
use crate::render_model::{format_duration_string, PlayerRenderModel};
use crate::snapshot_cache::{playlist_key, SnapshotCache};

type RenderLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct PlaylistController {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    services: AppServices,
    sessions: SessionFactory,
    session: Option<PlaybackSession>,
    active_playlist: Option<String>,
    cache: SnapshotCache,
    issued_sequences: HashMap<String, u64>,
    applied_sequences: HashMap<String, u64>,
    pending_order_writes: HashMap<String, usize>,
    deferred_snapshots: HashSet<String>,
    volume: f32,
    skip_seconds: u32,
    position_render_limiter: RenderLimiter,
}

impl PlaylistController {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        services: AppServices,
        sessions: SessionFactory,
        volume: f32,
        skip_seconds: u32,
        position_renders_per_second: u32,
    ) -> Self {
        let rate = NonZeroU32::new(position_renders_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            bus_consumer,
            bus_producer,
            services,
            sessions,
            session: None,
            active_playlist: None,
            cache: SnapshotCache::default(),
            issued_sequences: HashMap::new(),
            applied_sequences: HashMap::new(),
            pending_order_writes: HashMap::new(),
            deferred_snapshots: HashSet::new(),
            volume,
            skip_seconds: skip_seconds.max(1),
            position_render_limiter: RateLimiter::direct(Quota::per_second(rate)),
        }
    }

    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Playback(message)) => self.handle_playback(message),
                Ok(Message::Playlist(message)) => self.handle_playlist(message),
                Ok(Message::Settings(message)) => self.handle_settings(message),
                Ok(Message::Engine(event)) => self.handle_engine_event(&event),
                Ok(Message::Worker(message)) => self.handle_worker(message),
                Ok(Message::Shutdown) => {
                    info!("PlaylistController: shutting down");
                    self.close_session();
                    break;
                }
                Ok(_) => trace!("PlaylistController: ignoring unsupported message"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("PlaylistController lagged on bus, skipped {} messages", skipped);
                }
                Err(RecvError::Closed) => {
                    error!("PlaylistController: bus closed");
                    break;
                }
            }
        }
    }

    fn handle_playback(&mut self, message: PlaybackMessage) {
        if let PlaybackMessage::SetVolume(volume) = message {
            self.set_volume(volume);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            debug!("PlaylistController: no active session for {:?}", message);
            return;
        };
        match message {
            PlaybackMessage::PlayIndex(index) => session.load_track(index),
            PlaybackMessage::TogglePlayPause => session.toggle_play_pause(),
            PlaybackMessage::Next => session.next(),
            PlaybackMessage::Previous => session.previous(),
            PlaybackMessage::SkipForward => session.skip_forward(),
            PlaybackMessage::SkipBackward => session.skip_backward(),
            PlaybackMessage::SeekRelative(delta_secs) => session.seek_relative(delta_secs),
            PlaybackMessage::SeekAbsolute(position_ms) => session.seek_absolute(position_ms),
            PlaybackMessage::ToggleShuffle => {
                session.toggle_shuffle();
            }
            PlaybackMessage::ToggleLoop => {
                session.toggle_loop();
            }
            PlaybackMessage::SetVolume(_) => {}
        }
        self.render();
    }

    fn handle_playlist(&mut self, message: PlaylistMessage) {
        match message {
            PlaylistMessage::Open(name) => self.open_playlist(&name),
            PlaylistMessage::Refresh(name) => self.refresh(name),
            PlaylistMessage::Reorder { from, to } => self.reorder(from, to),
            PlaylistMessage::DeleteTrack(path) => self.delete_track(path),
            PlaylistMessage::ToggleFavourite(path) => self.toggle_favourite(path),
            PlaylistMessage::RenameTrack { path, title } => self.rename_track(path, title),
            PlaylistMessage::NavigateBack => self.navigate_back(),
            PlaylistMessage::RequestPlaylistList => self.request_playlist_list(),
            PlaylistMessage::CreatePlaylist { name, link } => self.create_playlist(name, link),
            PlaylistMessage::RenamePlaylist { old_name, new_name } => {
                self.rename_playlist(old_name, new_name)
            }
            PlaylistMessage::DeletePlaylist(name) => self.delete_playlist(name),
            PlaylistMessage::ImportFiles {
                playlist,
                link,
                paths,
            } => self.import_files(playlist, link, paths),
            PlaylistMessage::ResetApplicationData => self.reset_application_data(),
        }
    }

    fn handle_settings(&mut self, message: SettingsMessage) {
        match message {
            SettingsMessage::SetSkipSeconds(seconds) => {
                if seconds <= 0 {
                    self.notice(format!("Skip interval must be positive, got {}", seconds));
                    return;
                }
                let seconds = u32::try_from(seconds).unwrap_or(u32::MAX);
                self.skip_seconds = seconds;
                if let Some(session) = self.session.as_mut() {
                    session.set_skip_seconds(seconds);
                }
                let db = Arc::clone(&self.services.db);
                self.submit(move || {
                    if let Err(err) = db.set_skip_seconds(i64::from(seconds)) {
                        error!("Failed to persist skip interval: {}", err);
                    }
                });
            }
            SettingsMessage::SetPerformanceTier(tier) => {
                let db = Arc::clone(&self.services.db);
                self.submit(move || {
                    if let Err(err) = db.set_performance_tier(tier) {
                        error!("Failed to persist performance tier: {}", err);
                    }
                });
                self.notice(format!(
                    "Performance tier {:?} applies after restart",
                    tier
                ));
            }
        }
    }

    fn handle_engine_event(&mut self, event: &EngineEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.handle_engine_event(event) {
            return;
        }
        if matches!(event.kind, EngineEventKind::PositionChanged(_))
            && self.position_render_limiter.check().is_err()
        {
            return;
        }
        self.render();
    }

    fn handle_worker(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::SnapshotLoaded {
                playlist,
                sequence,
                tracks,
            } => {
                if sequence == self.latest_sequence(&playlist) {
                    self.cache.insert(&playlist, tracks.clone());
                }
                if self.accept_sequence(&playlist, sequence) {
                    self.apply_tracks(tracks);
                }
            }
            WorkerMessage::TrackDeleted {
                playlist,
                sequence,
                path,
                deleted,
                playlist_emptied,
                tracks,
            } => {
                if !deleted {
                    warn!("Track {} was not found in the store", path.display());
                }
                let accepted = self.accept_sequence(&playlist, sequence);
                if playlist_emptied && self.is_active(&playlist) {
                    info!("Playlist '{}' is empty, returning to the list", playlist);
                    self.navigate_back();
                } else if accepted {
                    if self.order_write_pending(&playlist) {
                        // This read may predate the pending order write.
                        self.deferred_snapshots.insert(playlist_key(&playlist));
                    } else {
                        self.apply_tracks(tracks);
                    }
                }
            }
            WorkerMessage::OrderPersisted { playlist } => self.finish_order_write(&playlist),
            WorkerMessage::FavouriteToggled {
                path,
                is_favourite,
                owning_playlist,
            } => {
                debug!("Favourite {} -> {}", path.display(), is_favourite);
                self.after_track_edit(owning_playlist.as_deref());
            }
            WorkerMessage::TrackRenamed {
                path,
                renamed,
                owning_playlist,
            } => {
                if !renamed {
                    self.notice(format!("Could not rename {}", path.display()));
                }
                self.after_track_edit(owning_playlist.as_deref());
            }
            WorkerMessage::ImportCompleted { playlist, imported } => {
                self.mark_dirty(&playlist);
                self.notice(format!("Imported {} tracks into '{}'", imported, playlist));
                if self.is_active(&playlist) {
                    self.request_snapshot(&playlist);
                } else if self.active_playlist.is_none() {
                    self.request_playlist_list();
                }
            }
            WorkerMessage::PlaylistListLoaded(summaries) => {
                self.publish(ViewMessage::PlaylistList(summaries));
            }
            WorkerMessage::LibraryChanged { renamed, deleted } => {
                if let Some((old_name, new_name)) = renamed {
                    self.mark_dirty(&old_name);
                    self.mark_dirty(&new_name);
                    self.mark_dirty(FAVOURITES_PLAYLIST_NAME);
                    if self.is_active(&old_name) {
                        self.refresh(Some(new_name));
                        return;
                    }
                }
                if let Some(name) = deleted {
                    self.mark_dirty(&name);
                    self.mark_dirty(FAVOURITES_PLAYLIST_NAME);
                }
                match self.active_playlist.clone() {
                    None => self.request_playlist_list(),
                    Some(active) if is_favourites_name(&active) => self.request_snapshot(&active),
                    Some(_) => {}
                }
            }
        }
    }

    fn open_playlist(&mut self, name: &str) {
        let name = canonical_name(name);
        if name.is_empty() {
            self.notice("Playlist name is empty".to_string());
            return;
        }
        self.close_session();
        let session = PlaybackSession::new(
            (self.sessions.engine)(),
            (self.sessions.picker)(),
            self.volume,
            self.skip_seconds,
        );
        self.session = Some(session);
        self.active_playlist = Some(name.clone());
        info!("Opened playlist '{}'", name);

        if let Some(tracks) = self.cache.get(&name) {
            debug!("Serving '{}' from snapshot cache", name);
            let sequence = self.next_sequence(&name);
            self.applied_sequences.insert(playlist_key(&name), sequence);
            self.apply_tracks(tracks);
            return;
        }
        self.request_snapshot(&name);
    }

    fn refresh(&mut self, name: Option<String>) {
        match name {
            Some(name) if self.session.is_none() => self.open_playlist(&name),
            Some(name) => {
                let name = canonical_name(&name);
                self.active_playlist = Some(name.clone());
                self.request_snapshot(&name);
            }
            None => match self.active_playlist.clone() {
                Some(active) => self.request_snapshot(&active),
                None => debug!("Refresh ignored: no active playlist"),
            },
        }
    }

    fn reorder(&mut self, from: usize, to: usize) {
        let Some(name) = self.active_playlist.clone() else {
            return;
        };
        if is_favourites_name(&name) {
            self.notice("Reordering is disabled in Favourites".to_string());
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.move_track(from, to) {
            debug!("Reorder {} -> {} rejected for '{}'", from, to, name);
            return;
        }
        let ordered_paths: Vec<String> = session.tracks().iter().map(Track::path_key).collect();

        // The in-memory order is authoritative; older fetches must not undo it.
        let sequence = self.next_sequence(&name);
        self.applied_sequences.insert(playlist_key(&name), sequence);
        self.cache.invalidate(&name);

        *self
            .pending_order_writes
            .entry(playlist_key(&name))
            .or_insert(0) += 1;

        let playlist = name.clone();
        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        let submitted = self.submit(move || {
            match db.reorder_tracks(&name, &ordered_paths) {
                Ok(true) => debug!("Persisted order of '{}'", name),
                Ok(false) => warn!("Order of '{}' was not persisted", name),
                Err(err) => error!("Failed to persist order of '{}': {}", name, err),
            }
            let _ = bus.send(Message::Worker(WorkerMessage::OrderPersisted { playlist: name }));
        });
        if !submitted {
            self.finish_order_write(&playlist);
        }
        self.render();
    }

    fn order_write_pending(&self, playlist: &str) -> bool {
        self.pending_order_writes
            .contains_key(&playlist_key(playlist))
    }

    fn finish_order_write(&mut self, playlist: &str) {
        let key = playlist_key(playlist);
        let remaining = match self.pending_order_writes.get_mut(&key) {
            Some(pending) => {
                *pending = pending.saturating_sub(1);
                *pending
            }
            None => return,
        };
        if remaining > 0 {
            return;
        }
        self.pending_order_writes.remove(&key);
        if !self.deferred_snapshots.remove(&key) {
            return;
        }
        // Outdate every read issued while the write was pending, then re-read.
        self.mark_dirty(playlist);
        let latest = self.latest_sequence(playlist);
        self.applied_sequences.insert(key, latest);
        if self.is_active(playlist) {
            debug!("Running read of '{}' deferred behind its order write", playlist);
            self.request_snapshot(playlist);
        }
    }

    fn delete_track(&mut self, path: PathBuf) {
        let Some(playlist) = self.active_playlist.clone() else {
            return;
        };
        let mut owning_playlist = None;
        if let Some(session) = self.session.as_mut() {
            owning_playlist = session
                .tracks()
                .iter()
                .find(|track| track.file_path == path)
                .map(|track| track.playlist_name.clone());
            if session.loaded_source() == Some(&path) {
                session.release();
            }
        }
        if let Some(owner) = owning_playlist.as_deref() {
            self.mark_dirty(owner);
        }
        self.mark_dirty(FAVOURITES_PLAYLIST_NAME);
        let sequence = self.next_sequence(&playlist);
        self.cache.invalidate(&playlist);
        if self.order_write_pending(&playlist) {
            self.deferred_snapshots.insert(playlist_key(&playlist));
        }

        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        self.submit(move || {
            let key = path.to_string_lossy().into_owned();
            let deleted = match db.delete_track(&key) {
                Ok(deleted) => deleted,
                Err(err) => {
                    error!("Failed to delete track {}: {}", key, err);
                    false
                }
            };
            let tracks = match db.get_ordered_tracks(&playlist) {
                Ok(tracks) => tracks,
                Err(err) => {
                    error!("Failed to re-read playlist '{}': {}", playlist, err);
                    return;
                }
            };
            let playlist_emptied = tracks.is_empty();
            if playlist_emptied && !is_favourites_name(&playlist) {
                if let Err(err) = db.delete_playlist(&playlist) {
                    error!("Failed to delete empty playlist '{}': {}", playlist, err);
                }
            }
            let _ = bus.send(Message::Worker(WorkerMessage::TrackDeleted {
                playlist,
                sequence,
                path,
                deleted,
                playlist_emptied,
                tracks,
            }));
        });
    }

    fn toggle_favourite(&mut self, path: PathBuf) {
        self.mark_dirty(FAVOURITES_PLAYLIST_NAME);
        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        self.submit(move || {
            let key = path.to_string_lossy().into_owned();
            let is_favourite = match db.toggle_favourite(&key) {
                Ok(is_favourite) => is_favourite,
                Err(err) => {
                    error!("Failed to toggle favourite {}: {}", key, err);
                    return;
                }
            };
            let owning_playlist = owning_playlist_of(&db, &key);
            let _ = bus.send(Message::Worker(WorkerMessage::FavouriteToggled {
                path,
                is_favourite,
                owning_playlist,
            }));
        });
    }

    fn rename_track(&mut self, path: PathBuf, title: String) {
        let title = title.trim().to_string();
        if title.is_empty() {
            self.notice("Track title is empty".to_string());
            return;
        }
        self.mark_dirty(FAVOURITES_PLAYLIST_NAME);
        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        self.submit(move || {
            let key = path.to_string_lossy().into_owned();
            let (renamed, owning_playlist) = match db.get_track_by_path(&key) {
                Ok(Some(track)) => match db.rename_track(track.id, &title) {
                    Ok(renamed) => (renamed, Some(track.playlist_name)),
                    Err(err) => {
                        error!("Failed to rename {}: {}", key, err);
                        (false, Some(track.playlist_name))
                    }
                },
                Ok(None) => (false, None),
                Err(err) => {
                    error!("Failed to look up {}: {}", key, err);
                    (false, None)
                }
            };
            let _ = bus.send(Message::Worker(WorkerMessage::TrackRenamed {
                path,
                renamed,
                owning_playlist,
            }));
        });
    }

    fn after_track_edit(&mut self, owning_playlist: Option<&str>) {
        if let Some(owner) = owning_playlist {
            self.mark_dirty(owner);
        }
        self.mark_dirty(FAVOURITES_PLAYLIST_NAME);
        if let Some(active) = self.active_playlist.clone() {
            self.request_snapshot(&active);
        }
    }

    fn navigate_back(&mut self) {
        self.close_session();
        self.request_playlist_list();
    }

    fn request_playlist_list(&mut self) {
        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        self.submit(move || match load_playlist_summaries(&db) {
            Ok(summaries) => {
                let _ = bus.send(Message::Worker(WorkerMessage::PlaylistListLoaded(summaries)));
            }
            Err(err) => error!("Failed to load playlist list: {}", err),
        });
    }

    fn create_playlist(&mut self, name: String, link: String) {
        if is_favourites_name(&name) || name.trim().is_empty() {
            self.notice(format!("'{}' is not a valid playlist name", name));
            return;
        }
        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        self.submit(move || {
            match db.create_playlist(&name, &link) {
                Ok(true) => info!("Created playlist '{}'", name.trim()),
                Ok(false) => warn!("Playlist '{}' already exists", name.trim()),
                Err(err) => error!("Failed to create playlist '{}': {}", name, err),
            }
            let _ = bus.send(Message::Worker(WorkerMessage::LibraryChanged {
                renamed: None,
                deleted: None,
            }));
        });
    }

    fn rename_playlist(&mut self, old_name: String, new_name: String) {
        if is_favourites_name(&old_name) || is_favourites_name(&new_name) {
            self.notice("Favourites cannot be renamed".to_string());
            return;
        }
        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        self.submit(move || {
            let new_name = new_name.trim().to_string();
            let renamed = match db.rename_playlist(&old_name, &new_name) {
                Ok(true) => Some((old_name, new_name)),
                Ok(false) => {
                    warn!("Rename of '{}' to '{}' rejected", old_name, new_name);
                    None
                }
                Err(err) => {
                    error!("Failed to rename playlist '{}': {}", old_name, err);
                    None
                }
            };
            let _ = bus.send(Message::Worker(WorkerMessage::LibraryChanged {
                renamed,
                deleted: None,
            }));
        });
    }

    fn delete_playlist(&mut self, name: String) {
        if is_favourites_name(&name) {
            self.notice("Favourites cannot be deleted".to_string());
            return;
        }
        if self.is_active(&name) {
            self.close_session();
        }
        self.mark_dirty(&name);
        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        self.submit(move || {
            let deleted = match db.delete_playlist(&name) {
                Ok(true) => Some(name),
                Ok(false) => {
                    warn!("Playlist '{}' not found", name);
                    None
                }
                Err(err) => {
                    error!("Failed to delete playlist '{}': {}", name, err);
                    None
                }
            };
            let _ = bus.send(Message::Worker(WorkerMessage::LibraryChanged {
                renamed: None,
                deleted,
            }));
        });
    }

    fn import_files(&mut self, playlist: String, link: String, paths: Vec<PathBuf>) {
        if is_favourites_name(&playlist) || playlist.trim().is_empty() {
            self.notice(format!("Cannot import into '{}'", playlist));
            return;
        }
        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        let downloads_dir = self.services.storage.downloads_dir.clone();
        self.submit(move || {
            match import_into_playlist(&db, &downloads_dir, &playlist, &link, &paths) {
                Ok((playlist, imported)) => {
                    let _ = bus.send(Message::Worker(WorkerMessage::ImportCompleted {
                        playlist,
                        imported,
                    }));
                }
                Err(err) => error!("Import into '{}' failed: {}", playlist, err),
            }
        });
    }

    fn reset_application_data(&mut self) {
        self.close_session();
        self.cache.clear();
        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        let media_dirs = reset_media_dirs(&self.services.storage);
        self.submit(move || {
            if let Err(err) = db.reset_application_data(&media_dirs) {
                error!("Failed to reset application data: {}", err);
            }
            let _ = bus.send(Message::Worker(WorkerMessage::LibraryChanged {
                renamed: None,
                deleted: None,
            }));
        });
    }

    fn set_volume(&mut self, volume: f32) {
        let applied = match self.session.as_mut() {
            Some(session) => session.set_volume(volume),
            None if volume.is_finite() => volume.clamp(0.0, 1.0),
            None => self.volume,
        };
        self.volume = applied;
        let db = Arc::clone(&self.services.db);
        self.submit(move || {
            if let Err(err) = db.set_volume(applied) {
                error!("Failed to persist volume: {}", err);
            }
        });
        self.render();
    }

    fn request_snapshot(&mut self, name: &str) {
        if self.order_write_pending(name) {
            debug!("Read of '{}' waits for its pending order write", name);
            self.deferred_snapshots.insert(playlist_key(name));
            return;
        }
        let sequence = self.next_sequence(name);
        let db = Arc::clone(&self.services.db);
        let bus = self.bus_producer.clone();
        let playlist = name.to_string();
        self.submit(move || match db.get_ordered_tracks(&playlist) {
            Ok(tracks) => {
                let _ = bus.send(Message::Worker(WorkerMessage::SnapshotLoaded {
                    playlist,
                    sequence,
                    tracks,
                }));
            }
            Err(err) => error!("Failed to load playlist '{}': {}", playlist, err),
        });
    }

    fn apply_tracks(&mut self, tracks: Vec<Track>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.replace_tracks(tracks);
        self.render();
    }

    fn render(&self) {
        let (Some(session), Some(name)) = (self.session.as_ref(), self.active_playlist.as_deref())
        else {
            return;
        };
        let model = PlayerRenderModel::from_session(name, session, !is_favourites_name(name));
        self.publish(ViewMessage::Player(Box::new(model)));
    }

    fn notice(&self, text: String) {
        info!("{}", text);
        self.publish(ViewMessage::Notice(text));
    }

    fn publish(&self, view: ViewMessage) {
        let _ = self.bus_producer.send(Message::View(view));
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.release();
        }
        self.active_playlist = None;
    }

    fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let submitted = self.services.workers.submit(job);
        if !submitted {
            error!("PlaylistController: worker pool rejected job");
        }
        submitted
    }

    fn is_active(&self, playlist: &str) -> bool {
        self.active_playlist
            .as_deref()
            .is_some_and(|active| playlist_key(active) == playlist_key(playlist))
    }

    fn next_sequence(&mut self, playlist: &str) -> u64 {
        let sequence = self.issued_sequences.entry(playlist_key(playlist)).or_insert(0);
        *sequence += 1;
        *sequence
    }

    fn latest_sequence(&self, playlist: &str) -> u64 {
        self.issued_sequences
            .get(&playlist_key(playlist))
            .copied()
            .unwrap_or(0)
    }

    /// Drops the cached snapshot and outdates in-flight reads of `playlist`.
    fn mark_dirty(&mut self, playlist: &str) {
        self.cache.invalidate(playlist);
        self.next_sequence(playlist);
    }

    fn accept_sequence(&mut self, playlist: &str, sequence: u64) -> bool {
        let key = playlist_key(playlist);
        let applied = self.applied_sequences.get(&key).copied().unwrap_or(0);
        if sequence <= applied || !self.is_active(playlist) {
            debug!(
                "Dropping stale snapshot of '{}' (sequence {}, applied {})",
                playlist, sequence, applied
            );
            return false;
        }
        self.applied_sequences.insert(key, sequence);
        true
    }
}

fn canonical_name(name: &str) -> String {
    if is_favourites_name(name) {
        FAVOURITES_PLAYLIST_NAME.to_string()
    } else {
        name.trim().to_string()
    }
}

fn owning_playlist_of(db: &DbManager, path: &str) -> Option<String> {
    match db.get_track_by_path(path) {
        Ok(track) => track.map(|track| track.playlist_name),
        Err(err) => {
            error!("Failed to look up {}: {}", path, err);
            None
        }
    }
}

/// Rows of the playlist list view: favourites first when non-empty, then the
/// stored playlists newest first.
pub fn load_playlist_summaries(db: &DbManager) -> Result<Vec<PlaylistSummary>, rusqlite::Error> {
    let mut summaries = Vec::new();

    let favourite_paths = db.get_favourite_paths()?;
    if let Some(first) = favourite_paths.first() {
        let thumbnail_path = db
            .get_track_by_path(first)?
            .and_then(|track| track.thumbnail_path);
        let total = db.get_playlist_total_duration(FAVOURITES_PLAYLIST_NAME)?;
        summaries.push(PlaylistSummary {
            name: FAVOURITES_PLAYLIST_NAME.to_string(),
            track_count: favourite_paths.len(),
            total_duration_text: format_duration_string(total),
            thumbnail_path,
            is_favourites: true,
        });
    }

    for (name, track_count) in db.get_playlists()? {
        let thumbnail_path = db
            .get_ordered_tracks(&name)?
            .into_iter()
            .next()
            .and_then(|track| track.thumbnail_path);
        let total = db.get_playlist_total_duration(&name)?;
        summaries.push(PlaylistSummary {
            name,
            track_count,
            total_duration_text: format_duration_string(total),
            thumbnail_path,
            is_favourites: false,
        });
    }
    Ok(summaries)
}

/// Copies audio files into the playlist's media folder and registers them.
/// The playlist is resolved by link first and created when missing. Returns
/// the resolved playlist name and the number of tracks added.
pub fn import_into_playlist(
    db: &DbManager,
    downloads_dir: &Path,
    playlist: &str,
    link: &str,
    paths: &[PathBuf],
) -> Result<(String, usize), rusqlite::Error> {
    let name = match db.get_playlist_by_link(link)? {
        Some(existing) => existing,
        None => {
            let name = playlist.trim().to_string();
            if !db.create_playlist(&name, link)? {
                debug!("Importing into existing playlist '{}'", name);
            }
            name
        }
    };
    match db.get_playlist_info(&name)? {
        None => {
            warn!("Import target '{}' could not be created", name);
            return Ok((name, 0));
        }
        Some(info) if info.link.is_empty() && !link.is_empty() => {
            db.update_playlist_link(&name, link)?;
        }
        Some(_) => {}
    }

    let target_dir = downloads_dir.join(folder_name(&name));
    if let Err(err) = std::fs::create_dir_all(&target_dir) {
        warn!("Could not create {}: {}", target_dir.display(), err);
        return Ok((name, 0));
    }

    let mut imported = 0;
    for source in media_files::collect_audio_files(paths) {
        let Some(file_name) = source.file_name() else {
            continue;
        };
        let target = target_dir.join(file_name);
        let key = target.to_string_lossy().into_owned();
        if db.track_exists(&name, &key)? {
            debug!("Skipping {}: already in '{}'", source.display(), name);
            continue;
        }
        if source != target {
            if let Err(err) = std::fs::copy(&source, &target) {
                warn!("Failed to copy {}: {}", source.display(), err);
                continue;
            }
        }
        let title = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.clone());
        let added = db.add_track(&NewTrack {
            playlist_name: name.clone(),
            title,
            file_path: target.clone(),
            duration_secs: media_files::probe_duration_secs(&target),
            ..Default::default()
        })?;
        if added {
            imported += 1;
        }
    }
    info!("Imported {} tracks into '{}'", imported, name);
    Ok((name, imported))
}

fn folder_name(playlist: &str) -> String {
    playlist
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, ' ' | '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Media folders wiped by a reset: the download root, each playlist folder
/// below it and the thumbnail folder. Each folder is listed once.
fn reset_media_dirs(storage: &StoragePaths) -> Vec<PathBuf> {
    let mut dirs = vec![storage.downloads_dir.clone()];
    if let Ok(entries) = std::fs::read_dir(&storage.downloads_dir) {
        dirs.extend(
            entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_dir()),
        );
    }
    dirs.push(storage.thumbnails_dir.clone());
    let mut seen = HashSet::new();
    dirs.retain(|dir| seen.insert(dir.canonicalize().unwrap_or_else(|_| dir.clone())));
    dirs
}
