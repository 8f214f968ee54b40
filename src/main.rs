mod app_context;
mod audio_decoder;
mod audio_engine;
mod audio_player;
mod config;
mod db_manager;
mod favourites;
mod media_files;
mod playback_session;
mod playlist;
mod playlist_controller;
mod protocol;
mod render_model;
mod snapshot_cache;
mod worker_pool;

use std::{
    io::BufRead,
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use app_context::{AppServices, SessionFactory, StoragePaths};
use audio_engine::AudioEngine;
use audio_player::LocalAudioEngine;
use config::{config_root, load_or_create_config};
use db_manager::{DbManager, DEFAULT_SKIP_SECONDS, DEFAULT_VOLUME};
use log::{debug, error, info, warn};
use playback_session::{IndexPicker, RandomIndexPicker};
use playlist_controller::PlaylistController;
use protocol::{Message, PlaybackMessage, PlaylistMessage, SettingsMessage, ViewMessage};
use render_model::PlayerRenderModel;
use tokio::sync::broadcast::{self, error::RecvError, Receiver};
use worker_pool::{PerformanceTier, WorkerPool};

const HELP_TEXT: &str = "commands: open <name> | list | close | refresh | play [n] | pause | next | prev \
     | fwd | back | seek <+/-secs|secs> | vol <0-100> | shuffle | loop | move <from> <to> \
     | del <n> | fav <n> | rename <n> <title> | import <playlist> <path>... | create <name> \
     | rename-playlist <old> | <new> | delete <name> | skip <secs> | tier <1-3> | reset | quit";

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

/// One parsed line of the text front-end.
#[derive(Debug)]
enum Command {
    Send(Message),
    Help,
    Quit,
}

/// Parses a front-end line. Track numbers are one-based and resolved against
/// the rows of the last rendered player view.
fn parse_command(line: &str, rows: &[PathBuf]) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let playback = |message| Ok(Command::Send(Message::Playback(message)));
    let playlist = |message| Ok(Command::Send(Message::Playlist(message)));

    match verb {
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        "open" => playlist(PlaylistMessage::Open(required(rest, "playlist name")?.to_string())),
        "list" => playlist(PlaylistMessage::RequestPlaylistList),
        "close" => playlist(PlaylistMessage::NavigateBack),
        "refresh" => playlist(PlaylistMessage::Refresh(None)),
        "play" if rest.is_empty() => playback(PlaybackMessage::TogglePlayPause),
        "play" => playback(PlaybackMessage::PlayIndex(track_number(rest)?)),
        "pause" => playback(PlaybackMessage::TogglePlayPause),
        "next" => playback(PlaybackMessage::Next),
        "prev" => playback(PlaybackMessage::Previous),
        "fwd" => playback(PlaybackMessage::SkipForward),
        "back" => playback(PlaybackMessage::SkipBackward),
        "seek" => {
            let value = required(rest, "position")?;
            let seconds: f64 = value
                .parse()
                .map_err(|_| format!("invalid position '{}'", value))?;
            if !seconds.is_finite() {
                return Err(format!("invalid position '{}'", value));
            }
            if value.starts_with('+') || value.starts_with('-') {
                playback(PlaybackMessage::SeekRelative(seconds))
            } else {
                playback(PlaybackMessage::SeekAbsolute((seconds.max(0.0) * 1000.0) as u64))
            }
        }
        "vol" => {
            let value = required(rest, "volume")?;
            let percent: f32 = value
                .parse()
                .map_err(|_| format!("invalid volume '{}'", value))?;
            playback(PlaybackMessage::SetVolume(percent / 100.0))
        }
        "shuffle" => playback(PlaybackMessage::ToggleShuffle),
        "loop" => playback(PlaybackMessage::ToggleLoop),
        "move" => {
            let mut parts = rest.split_whitespace();
            let from = track_number(parts.next().unwrap_or_default())?;
            let to = track_number(parts.next().unwrap_or_default())?;
            playlist(PlaylistMessage::Reorder { from, to })
        }
        "del" => playlist(PlaylistMessage::DeleteTrack(row_path(rest, rows)?)),
        "fav" => playlist(PlaylistMessage::ToggleFavourite(row_path(rest, rows)?)),
        "rename" => {
            let (number, title) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: rename <n> <title>".to_string())?;
            playlist(PlaylistMessage::RenameTrack {
                path: row_path(number, rows)?,
                title: title.trim().to_string(),
            })
        }
        "import" => {
            let mut parts = rest.split_whitespace();
            let name = parts
                .next()
                .ok_or_else(|| "usage: import <playlist> <path>...".to_string())?;
            let paths: Vec<PathBuf> = parts.map(PathBuf::from).collect();
            if paths.is_empty() {
                return Err("usage: import <playlist> <path>...".to_string());
            }
            playlist(PlaylistMessage::ImportFiles {
                playlist: name.to_string(),
                link: format!("local://{}", name),
                paths,
            })
        }
        "create" => {
            let name = required(rest, "playlist name")?;
            playlist(PlaylistMessage::CreatePlaylist {
                name: name.to_string(),
                link: format!("local://{}", name),
            })
        }
        "rename-playlist" => {
            let (old_name, new_name) = rest
                .split_once('|')
                .ok_or_else(|| "usage: rename-playlist <old> | <new>".to_string())?;
            playlist(PlaylistMessage::RenamePlaylist {
                old_name: old_name.trim().to_string(),
                new_name: new_name.trim().to_string(),
            })
        }
        "delete" => playlist(PlaylistMessage::DeletePlaylist(
            required(rest, "playlist name")?.to_string(),
        )),
        "reset" => playlist(PlaylistMessage::ResetApplicationData),
        "skip" => {
            let value = required(rest, "seconds")?;
            let seconds: i64 = value
                .parse()
                .map_err(|_| format!("invalid seconds '{}'", value))?;
            Ok(Command::Send(Message::Settings(
                SettingsMessage::SetSkipSeconds(seconds),
            )))
        }
        "tier" => {
            let value = required(rest, "tier")?;
            Ok(Command::Send(Message::Settings(
                SettingsMessage::SetPerformanceTier(PerformanceTier::from_setting(value)),
            )))
        }
        "" => Err("empty command".to_string()),
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn required<'a>(value: &'a str, what: &str) -> Result<&'a str, String> {
    if value.is_empty() {
        Err(format!("missing {}", what))
    } else {
        Ok(value)
    }
}

fn track_number(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(number) if number > 0 => Ok(number - 1),
        _ => Err(format!("invalid track number '{}'", value)),
    }
}

fn row_path(value: &str, rows: &[PathBuf]) -> Result<PathBuf, String> {
    let index = track_number(value)?;
    rows.get(index)
        .cloned()
        .ok_or_else(|| format!("no track {} in the current view", index + 1))
}

/// Prints render output and remembers the rows of the latest player view.
struct ViewPrinter {
    bus_consumer: Receiver<Message>,
    rows: Arc<Mutex<Vec<PathBuf>>>,
    last_rows: Vec<(String, bool, bool)>,
}

impl ViewPrinter {
    fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::View(ViewMessage::Player(model))) => self.print_player(&model),
                Ok(Message::View(ViewMessage::PlaylistList(summaries))) => {
                    info!("Playlists ({}):", summaries.len());
                    for summary in &summaries {
                        info!(
                            "  {}{} - {} tracks {}",
                            if summary.is_favourites { "* " } else { "" },
                            summary.name,
                            summary.track_count,
                            summary.total_duration_text
                        );
                    }
                }
                Ok(Message::View(ViewMessage::Notice(text))) => info!("> {}", text),
                Ok(Message::Shutdown) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("View printer lagged on bus, skipped {} messages", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    fn print_player(&mut self, model: &PlayerRenderModel) {
        let rows: Vec<(String, bool, bool)> = model
            .rows
            .iter()
            .map(|row| (row.title.clone(), row.is_favourite, row.is_current))
            .collect();
        if rows != self.last_rows {
            info!("{} ({})", model.playlist_title, model.track_count_text);
            for row in &model.rows {
                info!(
                    "{} {:>3}. {}{} [{}]",
                    if row.is_current { ">" } else { " " },
                    row.display_index,
                    row.title,
                    if row.is_favourite { " *" } else { "" },
                    row.duration_text
                );
            }
            if let Ok(mut shared) = self.rows.lock() {
                *shared = model.rows.iter().map(|row| row.file_path.clone()).collect();
            }
            self.last_rows = rows;
        }
        info!(
            "{:?} {} - {} / {} vol={:.0}% shuffle={} loop={}",
            model.state,
            model.now_playing_title,
            model.position_text,
            model.duration_text,
            model.volume * 100.0,
            model.shuffle,
            model.loop_enabled
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Trace);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_file = config_root().join("config.toml");
    let config = load_or_create_config(&config_file);
    log::set_max_level(config.logging.level.to_level_filter());

    let db = Arc::new(DbManager::new(&config.storage.resolved_database_path())?);
    let volume = db.get_volume().unwrap_or_else(|err| {
        warn!("Failed to read volume: {}", err);
        DEFAULT_VOLUME
    });
    let skip_seconds = db.get_skip_seconds().unwrap_or_else(|err| {
        warn!("Failed to read skip interval: {}", err);
        DEFAULT_SKIP_SECONDS
    });
    let tier = db.get_performance_tier().unwrap_or_else(|err| {
        warn!("Failed to read performance tier: {}", err);
        PerformanceTier::Minimal
    });

    let storage = StoragePaths {
        downloads_dir: config.storage.resolved_downloads_dir(),
        thumbnails_dir: config.storage.resolved_thumbnails_dir(),
    };
    for dir in [&storage.downloads_dir, &storage.thumbnails_dir] {
        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!("Could not create {}: {}", dir.display(), err);
        }
    }
    let workers = WorkerPool::for_tier(tier);
    debug!("Performance tier {:?} runs {} workers", tier, workers.size());
    let services = AppServices::new(Arc::clone(&db), workers, storage);

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(config.runtime.bus_capacity);

    let engine = LocalAudioEngine::spawn(
        bus_sender.clone(),
        Duration::from_millis(config.runtime.position_poll_interval_ms),
    );
    let session_engine = engine.clone();
    let sessions = SessionFactory {
        engine: Box::new(move || Box::new(session_engine.clone()) as Box<dyn AudioEngine>),
        picker: Box::new(|| Box::new(RandomIndexPicker::new()) as Box<dyn IndexPicker>),
    };

    // Setup view printer
    let rows = Arc::new(Mutex::new(Vec::new()));
    let mut view_printer = ViewPrinter {
        bus_consumer: bus_sender.subscribe(),
        rows: Arc::clone(&rows),
        last_rows: Vec::new(),
    };
    let view_thread = thread::Builder::new()
        .name("view-printer".to_string())
        .spawn(move || view_printer.run())?;

    // Setup playlist controller
    let controller_bus_receiver = bus_sender.subscribe();
    let controller_bus_sender = bus_sender.clone();
    let render_rate = config.runtime.render_updates_per_second;
    let controller_thread = thread::Builder::new()
        .name("playlist-controller".to_string())
        .spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let mut controller = PlaylistController::new(
                    controller_bus_receiver,
                    controller_bus_sender,
                    services,
                    sessions,
                    volume,
                    skip_seconds,
                    render_rate,
                );
                controller.run();
            }));
            if let Err(payload) = run_result {
                error!(
                    "PlaylistController thread terminated due to panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })?;

    let _ = bus_sender.send(Message::Playlist(PlaylistMessage::RequestPlaylistList));
    info!("{}", HELP_TEXT);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                error!("Failed to read stdin: {}", err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let current_rows = rows.lock().map(|rows| rows.clone()).unwrap_or_default();
        match parse_command(&line, &current_rows) {
            Ok(Command::Send(message)) => {
                debug!("Front-end sending {:?}", message);
                let _ = bus_sender.send(message);
            }
            Ok(Command::Help) => info!("{}", HELP_TEXT),
            Ok(Command::Quit) => break,
            Err(err) => warn!("{}", err),
        }
    }

    let _ = bus_sender.send(Message::Shutdown);
    if controller_thread.join().is_err() {
        error!("PlaylistController thread did not shut down cleanly");
    }
    engine.shutdown();
    let _ = view_thread.join();

    info!("Application exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<PathBuf> {
        vec![PathBuf::from("/music/a.mp3"), PathBuf::from("/music/b.mp3")]
    }

    #[test]
    fn test_track_numbers_are_one_based() {
        match parse_command("play 2", &rows()) {
            Ok(Command::Send(Message::Playback(PlaybackMessage::PlayIndex(1)))) => {}
            other => panic!("unexpected parse result: {:?}", other),
        }
        match parse_command("move 1 2", &rows()) {
            Ok(Command::Send(Message::Playlist(PlaylistMessage::Reorder { from: 0, to: 1 }))) => {}
            other => panic!("unexpected parse result: {:?}", other),
        }
        assert!(parse_command("play 0", &rows()).is_err());
    }

    #[test]
    fn test_row_commands_resolve_paths_from_last_view() {
        match parse_command("fav 2", &rows()) {
            Ok(Command::Send(Message::Playlist(PlaylistMessage::ToggleFavourite(path)))) => {
                assert_eq!(path, PathBuf::from("/music/b.mp3"));
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
        match parse_command("rename 1 New title", &rows()) {
            Ok(Command::Send(Message::Playlist(PlaylistMessage::RenameTrack { path, title }))) => {
                assert_eq!(path, PathBuf::from("/music/a.mp3"));
                assert_eq!(title, "New title");
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
        assert!(parse_command("del 3", &rows()).is_err());
    }

    #[test]
    fn test_seek_distinguishes_relative_and_absolute() {
        match parse_command("seek -5", &[]) {
            Ok(Command::Send(Message::Playback(PlaybackMessage::SeekRelative(delta)))) => {
                assert_eq!(delta, -5.0);
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
        match parse_command("seek 42", &[]) {
            Ok(Command::Send(Message::Playback(PlaybackMessage::SeekAbsolute(42_000)))) => {}
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn test_library_commands() {
        match parse_command("refresh", &[]) {
            Ok(Command::Send(Message::Playlist(PlaylistMessage::Refresh(None)))) => {}
            other => panic!("unexpected parse result: {:?}", other),
        }
        match parse_command("rename-playlist Old Name | New Name", &[]) {
            Ok(Command::Send(Message::Playlist(PlaylistMessage::RenamePlaylist {
                old_name,
                new_name,
            }))) => {
                assert_eq!(old_name, "Old Name");
                assert_eq!(new_name, "New Name");
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
        match parse_command("import Road /tmp/a.mp3 /tmp/dir", &[]) {
            Ok(Command::Send(Message::Playlist(PlaylistMessage::ImportFiles {
                playlist,
                link,
                paths,
            }))) => {
                assert_eq!(playlist, "Road");
                assert_eq!(link, "local://Road");
                assert_eq!(paths.len(), 2);
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
        assert!(matches!(parse_command("quit", &[]), Ok(Command::Quit)));
        assert!(parse_command("bogus", &[]).is_err());
    }
}
