//! Favourites projection.
//!
//! The favourites "playlist" is not stored as a playlist: it is an ordered list
//! of file paths kept in the settings table and intersected with the track rows
//! that still exist at read time.

use std::collections::{HashMap, HashSet};

use crate::playlist::Track;

/// Builds the favourites view from the persisted path list.
///
/// `existence` returns one flag per path (in order) telling whether the media
/// file is still on disk; `fetch_rows` bulk-loads store rows for the surviving
/// paths in any order. The output follows `known_paths` order, skips missing
/// files and stale references, and flags every record as a favourite.
pub fn materialize<E, F>(known_paths: &[String], existence: E, fetch_rows: F) -> Vec<Track>
where
    E: FnOnce(&[String]) -> Vec<bool>,
    F: FnOnce(&[String]) -> Vec<Track>,
{
    if known_paths.is_empty() {
        return Vec::new();
    }

    let mask = existence(known_paths);
    let existing: Vec<String> = known_paths
        .iter()
        .zip(mask)
        .filter_map(|(path, exists)| exists.then(|| path.clone()))
        .collect();
    if existing.is_empty() {
        return Vec::new();
    }

    let mut rows_by_path: HashMap<String, Track> = fetch_rows(&existing)
        .into_iter()
        .map(|track| (track.path_key(), track))
        .collect();

    existing
        .iter()
        .filter_map(|path| rows_by_path.remove(path))
        .map(|mut track| {
            track.is_favourite = true;
            track
        })
        .collect()
}

/// Annotates rows of a stored playlist (already in ordinal order) with their
/// favourite flag and drops the ones whose media file is gone. Ordinals are left
/// untouched; the gap is only skipped in the view.
pub fn annotate_playlist_tracks(
    rows: Vec<Track>,
    existence: &[bool],
    favourites: &[String],
) -> Vec<Track> {
    let favourite_set: HashSet<&str> = favourites.iter().map(String::as_str).collect();
    rows.into_iter()
        .zip(existence.iter().copied())
        .filter_map(|(mut track, exists)| {
            if !exists {
                return None;
            }
            track.is_favourite = favourite_set.contains(track.path_key().as_str());
            Some(track)
        })
        .collect()
}

/// Adds `path` at the end when absent, removes it when present. Returns the new
/// membership.
pub fn toggle_membership(favourites: &mut Vec<String>, path: &str) -> bool {
    if let Some(position) = favourites.iter().position(|existing| existing == path) {
        favourites.remove(position);
        false
    } else {
        favourites.push(path.to_string());
        true
    }
}

/// Drops every entry contained in `removed`. Returns true when anything changed.
pub fn purge(favourites: &mut Vec<String>, removed: &HashSet<String>) -> bool {
    let before = favourites.len();
    favourites.retain(|path| !removed.contains(path));
    favourites.len() != before
}

/// Decodes the persisted favourites list; malformed data reads as empty.
pub fn decode(serialized: &str) -> Vec<String> {
    serde_json::from_str(serialized).unwrap_or_default()
}

pub fn encode(favourites: &[String]) -> String {
    serde_json::to_string(favourites).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn track(path: &str, ordinal: usize) -> Track {
        Track {
            id: ordinal as i64 + 1,
            playlist_name: "Mix".to_string(),
            title: format!("title {path}"),
            original_title: format!("title {path}"),
            file_path: PathBuf::from(path),
            duration_secs: Some(60),
            thumbnail_path: None,
            link: None,
            ordinal,
            is_favourite: false,
        }
    }

    fn paths(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn test_materialize_drops_missing_files_and_stale_rows() {
        let known = paths(&["/m/p1.mp3", "/m/p2.mp3", "/m/p3.mp3"]);
        let result = materialize(
            &known,
            |candidates| {
                candidates
                    .iter()
                    .map(|path| path != "/m/p2.mp3")
                    .collect()
            },
            |surviving| {
                assert_eq!(surviving, paths(&["/m/p1.mp3", "/m/p3.mp3"]).as_slice());
                vec![track("/m/p1.mp3", 0)]
            },
        );

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].file_path, PathBuf::from("/m/p1.mp3"));
        assert!(result[0].is_favourite);
    }

    #[test]
    fn test_materialize_follows_favourites_order_not_fetch_order() {
        let known = paths(&["/m/c.mp3", "/m/a.mp3", "/m/b.mp3"]);
        let result = materialize(
            &known,
            |candidates| vec![true; candidates.len()],
            |_| {
                vec![
                    track("/m/a.mp3", 0),
                    track("/m/b.mp3", 1),
                    track("/m/c.mp3", 2),
                ]
            },
        );

        let order: Vec<String> = result.iter().map(Track::path_key).collect();
        assert_eq!(order, paths(&["/m/c.mp3", "/m/a.mp3", "/m/b.mp3"]));
        assert!(result.iter().all(|track| track.is_favourite));
    }

    #[test]
    fn test_materialize_skips_fetch_when_nothing_exists() {
        let known = paths(&["/m/gone.mp3"]);
        let result = materialize(
            &known,
            |candidates| vec![false; candidates.len()],
            |_| panic!("rows must not be fetched when no file exists"),
        );
        assert!(result.is_empty());
    }

    #[test]
    fn test_annotate_marks_favourites_and_skips_missing_media() {
        let rows = vec![
            track("/m/a.mp3", 0),
            track("/m/b.mp3", 1),
            track("/m/c.mp3", 2),
        ];
        let annotated =
            annotate_playlist_tracks(rows, &[true, false, true], &paths(&["/m/c.mp3"]));

        assert_eq!(annotated.len(), 2);
        assert_eq!(annotated[0].ordinal, 0);
        assert!(!annotated[0].is_favourite);
        assert_eq!(annotated[1].ordinal, 2);
        assert!(annotated[1].is_favourite);
    }

    #[test]
    fn test_toggle_twice_restores_membership_and_readds_at_end() {
        let mut favourites = paths(&["/m/a.mp3", "/m/b.mp3", "/m/c.mp3"]);
        assert!(!toggle_membership(&mut favourites, "/m/a.mp3"));
        assert_eq!(favourites, paths(&["/m/b.mp3", "/m/c.mp3"]));
        assert!(toggle_membership(&mut favourites, "/m/a.mp3"));
        assert_eq!(favourites, paths(&["/m/b.mp3", "/m/c.mp3", "/m/a.mp3"]));
    }

    #[test]
    fn test_purge_reports_changes() {
        let mut favourites = paths(&["/m/a.mp3", "/m/b.mp3"]);
        let removed: HashSet<String> = paths(&["/m/b.mp3", "/m/z.mp3"]).into_iter().collect();
        assert!(purge(&mut favourites, &removed));
        assert_eq!(favourites, paths(&["/m/a.mp3"]));
        assert!(!purge(&mut favourites, &removed));
    }

    #[test]
    fn test_decode_malformed_favourites_is_empty() {
        assert!(decode("not json").is_empty());
        assert_eq!(decode("[\"/m/a.mp3\"]"), paths(&["/m/a.mp3"]));
        assert_eq!(encode(&paths(&["/m/a.mp3"])), "[\"/m/a.mp3\"]");
    }
}
