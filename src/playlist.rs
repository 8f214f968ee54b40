//! Playlist and track value types shared by the store, the playback session
//! and the controller.

use std::path::PathBuf;

/// Display name of the synthetic favourites playlist.
pub const FAVOURITES_PLAYLIST_NAME: &str = "Favourites";

/// Returns true when `name` addresses the favourites projection rather than a
/// stored playlist. Matching is case-insensitive.
pub fn is_favourites_name(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(FAVOURITES_PLAYLIST_NAME)
}

/// One playable media item as materialized from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Store row id.
    pub id: i64,
    /// Owning playlist name.
    pub playlist_name: String,
    pub title: String,
    pub original_title: String,
    /// Stable identity of the track and join key for favourites.
    pub file_path: PathBuf,
    /// Length in whole seconds, when known.
    pub duration_secs: Option<u64>,
    pub thumbnail_path: Option<PathBuf>,
    /// Provenance link of the media item.
    pub link: Option<String>,
    /// Zero-based position inside the owning playlist.
    pub ordinal: usize,
    pub is_favourite: bool,
}

impl Track {
    /// File path as the string key used by the favourites set and the store.
    pub fn path_key(&self) -> String {
        self.file_path.to_string_lossy().into_owned()
    }
}

/// Stored playlist header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistInfo {
    pub name: String,
    pub link: String,
}

/// Entry of the playlist list view.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSummary {
    pub name: String,
    pub track_count: usize,
    pub total_duration_text: String,
    pub thumbnail_path: Option<PathBuf>,
    /// Synthetic favourites entry; it cannot be edited or deleted.
    pub is_favourites: bool,
}

/// Moves the element at `from` to `to`, shifting the elements in between.
/// Returns false and leaves `items` untouched when an index is out of range.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) -> bool {
    if from >= items.len() || to >= items.len() {
        return false;
    }
    let item = items.remove(from);
    items.insert(to, item);
    true
}

/// Maps `current` through the permutation produced by `move_item(from, to)` so
/// it keeps pointing at the same logical element.
pub fn remap_index_after_move(current: usize, from: usize, to: usize) -> usize {
    if current == from {
        to
    } else if from < current && current <= to {
        current - 1
    } else if to <= current && current < from {
        current + 1
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_favourites_name_matching_ignores_case_and_whitespace() {
        assert!(is_favourites_name("Favourites"));
        assert!(is_favourites_name("favourites"));
        assert!(is_favourites_name("  FAVOURITES "));
        assert!(!is_favourites_name("Favourite"));
        assert!(!is_favourites_name("My Favourites"));
    }

    #[test]
    fn test_move_item_to_end_shifts_intermediate_items() {
        let mut items = vec!["A", "B", "C", "D"];
        assert!(move_item(&mut items, 0, 3));
        assert_eq!(items, vec!["B", "C", "D", "A"]);
    }

    #[test]
    fn test_move_item_rejects_out_of_range_indices() {
        let mut items = vec!["A", "B"];
        assert!(!move_item(&mut items, 2, 0));
        assert!(!move_item(&mut items, 0, 2));
        assert_eq!(items, vec!["A", "B"]);
    }

    #[test]
    fn test_remap_follows_current_track_across_moves() {
        // [A,B,C,D] with C current, A moved to the end => [B,C,D,A], C at 1.
        assert_eq!(remap_index_after_move(2, 0, 3), 1);
        // Current item itself moved.
        assert_eq!(remap_index_after_move(2, 2, 0), 0);
        // Item moved from after current to before it.
        assert_eq!(remap_index_after_move(1, 3, 0), 2);
        // Move entirely outside the current position.
        assert_eq!(remap_index_after_move(0, 2, 3), 0);
    }

    #[test]
    fn test_remap_matches_actual_permutation_for_all_moves() {
        let base: Vec<usize> = (0..5).collect();
        for from in 0..5 {
            for to in 0..5 {
                for current in 0..5 {
                    let mut items = base.clone();
                    move_item(&mut items, from, to);
                    let remapped = remap_index_after_move(current, from, to);
                    assert_eq!(items[remapped], base[current]);
                }
            }
        }
    }
}
