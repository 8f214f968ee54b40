use crate::favourites;
use crate::media_files;
use crate::playlist::{is_favourites_name, PlaylistInfo, Track};
use crate::worker_pool::PerformanceTier;
use log::{debug, error, info, warn};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const SETTING_SKIP_SECONDS: &str = "skip_seconds";
pub const SETTING_VOLUME: &str = "volume";
pub const SETTING_FAVOURITES: &str = "favourites";
pub const SETTING_PERFORMANCE: &str = "performance";

pub const DEFAULT_SKIP_SECONDS: u32 = 10;
pub const DEFAULT_VOLUME: f32 = 0.4;

const DEFAULT_SETTINGS: [(&str, &str); 4] = [
    (SETTING_SKIP_SECONDS, "10"),
    (SETTING_VOLUME, "0.4"),
    (SETTING_FAVOURITES, "[]"),
    (SETTING_PERFORMANCE, "2"),
];

/// Rows fetched per `IN (...)` query when bulk-loading favourites.
const BULK_FETCH_CHUNK: usize = 500;

const TRACK_COLUMNS: &str = "f.id, p.name, f.title, f.original_title, f.file_path, f.duration, \
     f.thumbnail_path, f.link, f.song_index";

/// Input of [`DbManager::add_track`].
#[derive(Debug, Clone, Default)]
pub struct NewTrack {
    pub playlist_name: String,
    pub title: String,
    pub original_title: Option<String>,
    pub file_path: PathBuf,
    pub duration_secs: Option<u64>,
    pub thumbnail_path: Option<PathBuf>,
    pub link: Option<String>,
    /// Explicit ordinal; appended after the last track when absent.
    pub ordinal: Option<usize>,
}

/// Track store: playlists, tracks and settings behind a single connection.
pub struct DbManager {
    conn: Mutex<Connection>,
}

impl DbManager {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    warn!(
                        "Could not create data directory {}: {}",
                        parent.display(),
                        err
                    );
                }
            }
        }
        let conn = Connection::open(db_path)?;
        info!("Opened track store at {}", db_path.display());
        Self::from_connection(conn)
    }

    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        init_settings(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        read_setting(&self.connection(), key)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), rusqlite::Error> {
        write_setting(&self.connection(), key, value)
    }

    pub fn get_volume(&self) -> Result<f32, rusqlite::Error> {
        Ok(self
            .get_setting(SETTING_VOLUME)?
            .and_then(|value| value.trim().parse::<f32>().ok())
            .filter(|volume| volume.is_finite())
            .map(|volume| volume.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_VOLUME))
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), rusqlite::Error> {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            DEFAULT_VOLUME
        };
        self.set_setting(SETTING_VOLUME, &volume.to_string())
    }

    pub fn get_skip_seconds(&self) -> Result<u32, rusqlite::Error> {
        Ok(self
            .get_setting(SETTING_SKIP_SECONDS)?
            .and_then(|value| value.trim().parse::<u32>().ok())
            .filter(|seconds| *seconds > 0)
            .unwrap_or(DEFAULT_SKIP_SECONDS))
    }

    /// Stores the skip interval. Returns false for values that are not positive.
    pub fn set_skip_seconds(&self, seconds: i64) -> Result<bool, rusqlite::Error> {
        if seconds <= 0 {
            return Ok(false);
        }
        self.set_setting(SETTING_SKIP_SECONDS, &seconds.to_string())?;
        Ok(true)
    }

    pub fn get_performance_tier(&self) -> Result<PerformanceTier, rusqlite::Error> {
        let raw = self
            .get_setting(SETTING_PERFORMANCE)?
            .unwrap_or_else(|| "3".to_string());
        Ok(PerformanceTier::from_setting(&raw))
    }

    pub fn set_performance_tier(&self, tier: PerformanceTier) -> Result<(), rusqlite::Error> {
        self.set_setting(SETTING_PERFORMANCE, &tier.as_setting().to_string())
    }

    pub fn get_favourite_paths(&self) -> Result<Vec<String>, rusqlite::Error> {
        read_favourites(&self.connection())
    }

    /// Flips membership of `path` in the favourites set; returns the new state.
    pub fn toggle_favourite(&self, path: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.connection();
        let mut favourites = read_favourites(&conn)?;
        let is_favourite = favourites::toggle_membership(&mut favourites, path);
        write_favourites(&conn, &favourites)?;
        debug!("Favourite {} -> {}", path, is_favourite);
        Ok(is_favourite)
    }

    pub fn create_playlist(&self, name: &str, link: &str) -> Result<bool, rusqlite::Error> {
        let name = name.trim();
        if name.is_empty() || is_favourites_name(name) {
            warn!("Rejected playlist name '{}'", name);
            return Ok(false);
        }
        let inserted = self.connection().execute(
            "INSERT OR IGNORE INTO playlists (name, link) VALUES (?1, ?2)",
            params![name, link],
        )?;
        Ok(inserted > 0)
    }

    pub fn rename_playlist(&self, old_name: &str, new_name: &str) -> Result<bool, rusqlite::Error> {
        let new_name = new_name.trim();
        if new_name.is_empty() || is_favourites_name(new_name) || is_favourites_name(old_name) {
            warn!("Rejected playlist rename '{}' -> '{}'", old_name, new_name);
            return Ok(false);
        }
        let conn = self.connection();
        if playlist_id(&conn, new_name)?.is_some() {
            return Ok(false);
        }
        let updated = conn.execute(
            "UPDATE playlists SET name = ?1 WHERE name = ?2",
            params![new_name, old_name],
        )?;
        Ok(updated > 0)
    }

    pub fn update_playlist_link(&self, name: &str, link: &str) -> Result<(), rusqlite::Error> {
        self.connection().execute(
            "UPDATE playlists SET link = ?1 WHERE name = ?2",
            params![link, name],
        )?;
        Ok(())
    }

    pub fn get_playlist_info(&self, name: &str) -> Result<Option<PlaylistInfo>, rusqlite::Error> {
        self.connection()
            .query_row(
                "SELECT name, link FROM playlists WHERE name = ?1",
                params![name],
                |row| {
                    Ok(PlaylistInfo {
                        name: row.get(0)?,
                        link: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    })
                },
            )
            .optional()
    }

    pub fn get_playlist_by_link(&self, link: &str) -> Result<Option<String>, rusqlite::Error> {
        if link.trim().is_empty() {
            return Ok(None);
        }
        self.connection()
            .query_row(
                "SELECT name FROM playlists WHERE link = ?1 ORDER BY id DESC LIMIT 1",
                params![link],
                |row| row.get(0),
            )
            .optional()
    }

    /// Stored playlists with their track counts, newest first.
    pub fn get_playlists(&self) -> Result<Vec<(String, usize)>, rusqlite::Error> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT p.name, COUNT(f.id) FROM playlists p
             LEFT JOIN files f ON f.playlist_id = p.id
             GROUP BY p.id
             ORDER BY p.id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as usize))
        })?;

        let mut playlists = Vec::new();
        for playlist in rows {
            playlists.push(playlist?);
        }
        Ok(playlists)
    }

    /// Appends (or places) a track. Returns false when the playlist is unknown.
    pub fn add_track(&self, track: &NewTrack) -> Result<bool, rusqlite::Error> {
        let conn = self.connection();
        let Some(playlist_id) = playlist_id(&conn, &track.playlist_name)? else {
            warn!("Cannot add track to unknown playlist '{}'", track.playlist_name);
            return Ok(false);
        };
        let ordinal = match track.ordinal {
            Some(ordinal) => ordinal as i64,
            None => conn.query_row(
                "SELECT COALESCE(MAX(song_index), -1) + 1 FROM files WHERE playlist_id = ?1",
                params![playlist_id],
                |row| row.get::<_, i64>(0),
            )?,
        };
        let original_title = track
            .original_title
            .clone()
            .unwrap_or_else(|| track.title.clone());
        conn.execute(
            "INSERT INTO files
             (playlist_id, title, original_title, file_path, duration, thumbnail_path, link, song_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                playlist_id,
                track.title,
                original_title,
                track.file_path.to_string_lossy().into_owned(),
                track.duration_secs.map(|secs| secs as i64),
                track
                    .thumbnail_path
                    .as_ref()
                    .map(|path| path.to_string_lossy().into_owned()),
                track.link,
                ordinal,
            ],
        )?;
        Ok(true)
    }

    pub fn track_exists(&self, playlist_name: &str, path: &str) -> Result<bool, rusqlite::Error> {
        let found: Option<i64> = self
            .connection()
            .query_row(
                "SELECT f.id FROM files f JOIN playlists p ON p.id = f.playlist_id
                 WHERE p.name = ?1 AND f.file_path = ?2",
                params![playlist_name, path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Looks a track up by file path; a row whose media file is gone reads as
    /// absent.
    pub fn get_track_by_path(&self, path: &str) -> Result<Option<Track>, rusqlite::Error> {
        let track = self
            .connection()
            .query_row(
                &format!(
                    "SELECT {TRACK_COLUMNS} FROM files f JOIN playlists p ON p.id = f.playlist_id
                     WHERE f.file_path = ?1"
                ),
                params![path],
                track_from_row,
            )
            .optional()?;
        Ok(track.filter(|track| track.file_path.exists()))
    }

    pub fn rename_track(&self, id: i64, title: &str) -> Result<bool, rusqlite::Error> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(false);
        }
        let updated = self.connection().execute(
            "UPDATE files SET title = ?1 WHERE id = ?2",
            params![title, id],
        )?;
        Ok(updated > 0)
    }

    /// Deletes a track row and its files, drops it from favourites and closes
    /// the ordinal gap it leaves. Returns false when no row matches.
    pub fn delete_track(&self, path: &str) -> Result<bool, rusqlite::Error> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let row: Option<(i64, i64, Option<String>)> = tx
            .query_row(
                "SELECT playlist_id, song_index, thumbnail_path FROM files WHERE file_path = ?1",
                params![path],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((playlist_id, song_index, thumbnail)) = row else {
            debug!("Delete ignored, no track at {}", path);
            return Ok(false);
        };

        let mut favourite_paths = read_favourites(&tx)?;
        let removed: HashSet<String> = HashSet::from([path.to_string()]);
        if favourites::purge(&mut favourite_paths, &removed) {
            write_favourites(&tx, &favourite_paths)?;
        }
        tx.execute("DELETE FROM files WHERE file_path = ?1", params![path])?;
        tx.execute(
            "UPDATE files SET song_index = song_index - 1
             WHERE playlist_id = ?1 AND song_index > ?2",
            params![playlist_id, song_index],
        )?;
        tx.commit()?;
        drop(conn);

        media_files::safe_remove(Path::new(path));
        if let Some(thumbnail) = thumbnail.filter(|thumbnail| !thumbnail.is_empty()) {
            media_files::safe_remove(Path::new(&thumbnail));
        }
        info!("Deleted track {}", path);
        Ok(true)
    }

    /// Rewrites ordinals so each path's ordinal is its index in `ordered_paths`.
    /// Returns false (and changes nothing) when the playlist is unknown.
    pub fn reorder_tracks(
        &self,
        playlist_name: &str,
        ordered_paths: &[String],
    ) -> Result<bool, rusqlite::Error> {
        let mut conn = self.connection();
        let Some(playlist_id) = playlist_id(&conn, playlist_name)? else {
            warn!("Reorder ignored for unknown playlist '{}'", playlist_name);
            return Ok(false);
        };
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE files SET song_index = ?1 WHERE file_path = ?2 AND playlist_id = ?3",
            )?;
            for (index, path) in ordered_paths.iter().enumerate() {
                stmt.execute(params![index as i64, path, playlist_id])?;
            }
        }
        tx.commit()?;
        Ok(true)
    }

    /// Materialized, playable track list of a playlist or of the favourites
    /// projection. Unknown playlists read as empty.
    pub fn get_ordered_tracks(&self, name: &str) -> Result<Vec<Track>, rusqlite::Error> {
        if is_favourites_name(name) {
            return self.get_favourite_tracks();
        }

        let (rows, favourite_paths) = {
            let conn = self.connection();
            let Some(playlist_id) = playlist_id(&conn, name)? else {
                return Ok(Vec::new());
            };
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRACK_COLUMNS} FROM files f JOIN playlists p ON p.id = f.playlist_id
                 WHERE f.playlist_id = ?1 ORDER BY f.song_index ASC"
            ))?;
            let rows = stmt
                .query_map(params![playlist_id], track_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            (rows, read_favourites(&conn)?)
        };

        let paths: Vec<&Path> = rows.iter().map(|track| track.file_path.as_path()).collect();
        let existence = media_files::existence_mask(&paths);
        Ok(favourites::annotate_playlist_tracks(
            rows,
            &existence,
            &favourite_paths,
        ))
    }

    fn get_favourite_tracks(&self) -> Result<Vec<Track>, rusqlite::Error> {
        let known = self.get_favourite_paths()?;
        Ok(favourites::materialize(
            &known,
            media_files::existence_mask::<String>,
            |paths| match self.fetch_tracks_by_paths(paths) {
                Ok(rows) => rows,
                Err(err) => {
                    error!("Failed to load favourite tracks: {}", err);
                    Vec::new()
                }
            },
        ))
    }

    fn fetch_tracks_by_paths(&self, paths: &[String]) -> Result<Vec<Track>, rusqlite::Error> {
        let conn = self.connection();
        let mut tracks = Vec::with_capacity(paths.len());
        for chunk in paths.chunks(BULK_FETCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRACK_COLUMNS} FROM files f JOIN playlists p ON p.id = f.playlist_id
                 WHERE f.file_path IN ({placeholders})"
            ))?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), track_from_row)?;
            for track in rows {
                tracks.push(track?);
            }
        }
        Ok(tracks)
    }

    /// Sum of known durations in seconds.
    pub fn get_playlist_total_duration(&self, name: &str) -> Result<u64, rusqlite::Error> {
        if is_favourites_name(name) {
            return Ok(self
                .get_favourite_tracks()?
                .iter()
                .filter_map(|track| track.duration_secs)
                .sum());
        }
        let total: i64 = self.connection().query_row(
            "SELECT COALESCE(SUM(f.duration), 0) FROM files f
             JOIN playlists p ON p.id = f.playlist_id WHERE p.name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    /// Deletes a playlist with all member rows and their files, and prunes the
    /// removed paths from favourites.
    pub fn delete_playlist(&self, name: &str) -> Result<bool, rusqlite::Error> {
        if is_favourites_name(name) {
            return Ok(false);
        }
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let Some(playlist_id) = playlist_id(&tx, name)? else {
            return Ok(false);
        };
        let members = {
            let mut stmt =
                tx.prepare("SELECT file_path, thumbnail_path FROM files WHERE playlist_id = ?1")?;
            let members = stmt
                .query_map(params![playlist_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            members
        };

        let removed: HashSet<String> = members.iter().map(|(path, _)| path.clone()).collect();
        let mut favourite_paths = read_favourites(&tx)?;
        if favourites::purge(&mut favourite_paths, &removed) {
            write_favourites(&tx, &favourite_paths)?;
        }
        tx.execute("DELETE FROM files WHERE playlist_id = ?1", params![playlist_id])?;
        tx.execute("DELETE FROM playlists WHERE id = ?1", params![playlist_id])?;
        tx.commit()?;
        drop(conn);

        let mut doomed_files: Vec<PathBuf> = Vec::with_capacity(members.len() * 2);
        for (path, thumbnail) in members {
            doomed_files.push(PathBuf::from(path));
            if let Some(thumbnail) = thumbnail.filter(|thumbnail| !thumbnail.is_empty()) {
                doomed_files.push(PathBuf::from(thumbnail));
            }
        }
        let removed_count = media_files::safe_remove_all(&doomed_files);
        debug!(
            "Removed {} of {} files for playlist '{}'",
            removed_count,
            doomed_files.len(),
            name
        );
        info!("Deleted playlist '{}'", name);
        Ok(true)
    }

    /// Removes downloaded media and thumbnails, drops every row and restores the
    /// default schema and settings.
    pub fn reset_application_data(&self, media_dirs: &[PathBuf]) -> Result<(), rusqlite::Error> {
        let mut doomed_files = Vec::new();
        for dir in media_dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            doomed_files.extend(
                entries
                    .flatten()
                    .map(|entry| entry.path())
                    .filter(|path| path.is_file()),
            );
        }
        let removed_count = media_files::safe_remove_all(&doomed_files);
        info!("Reset removed {} media files", removed_count);

        let conn = self.connection();
        conn.execute_batch(
            "DROP TABLE IF EXISTS files;
             DROP TABLE IF EXISTS playlists;
             DROP TABLE IF EXISTS settings;",
        )?;
        initialize_schema(&conn)?;
        init_settings(&conn)
    }
}

fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS playlists (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            link TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            playlist_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            original_title TEXT,
            file_path TEXT UNIQUE NOT NULL,
            duration INTEGER,
            thumbnail_path TEXT,
            link TEXT,
            song_index INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(playlist_id) REFERENCES playlists(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        )",
        [],
    )?;
    Ok(())
}

fn init_settings(conn: &Connection) -> Result<(), rusqlite::Error> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")?;
    for (key, value) in DEFAULT_SETTINGS {
        stmt.execute(params![key, value])?;
    }
    Ok(())
}

fn read_setting(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    let value: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.flatten())
}

fn write_setting(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn read_favourites(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    Ok(read_setting(conn, SETTING_FAVOURITES)?
        .map(|serialized| favourites::decode(&serialized))
        .unwrap_or_default())
}

fn write_favourites(conn: &Connection, paths: &[String]) -> Result<(), rusqlite::Error> {
    write_setting(conn, SETTING_FAVOURITES, &favourites::encode(paths))
}

fn playlist_id(conn: &Connection, name: &str) -> Result<Option<i64>, rusqlite::Error> {
    conn.query_row(
        "SELECT id FROM playlists WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
}

fn track_from_row(row: &Row<'_>) -> Result<Track, rusqlite::Error> {
    let title: String = row.get(2)?;
    Ok(Track {
        id: row.get(0)?,
        playlist_name: row.get(1)?,
        original_title: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| title.clone()),
        title,
        file_path: PathBuf::from(row.get::<_, String>(4)?),
        duration_secs: row
            .get::<_, Option<i64>>(5)?
            .map(|secs| secs.max(0) as u64),
        thumbnail_path: row
            .get::<_, Option<String>>(6)?
            .filter(|path| !path.is_empty())
            .map(PathBuf::from),
        link: row.get(7)?,
        ordinal: row.get::<_, i64>(8)?.max(0) as usize,
        is_favourite: false,
    })
}
