//! Bounded cache of materialized playlist snapshots, owned by the controller.

use std::collections::VecDeque;

use crate::playlist::{is_favourites_name, Track, FAVOURITES_PLAYLIST_NAME};

pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 16;

/// Canonical cache and sequence key for a playlist name.
pub fn playlist_key(name: &str) -> String {
    if is_favourites_name(name) {
        FAVOURITES_PLAYLIST_NAME.to_string()
    } else {
        name.to_string()
    }
}

/// Least-recently-used snapshot store. Entries are replaced wholesale and
/// dropped explicitly whenever the playlist they describe is mutated.
pub struct SnapshotCache {
    entries: VecDeque<(String, Vec<Track>)>,
    capacity: usize,
}

impl SnapshotCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&mut self, name: &str) -> Option<Vec<Track>> {
        let key = playlist_key(name);
        let position = self.entries.iter().position(|(entry, _)| *entry == key)?;
        let entry = self.entries.remove(position)?;
        let tracks = entry.1.clone();
        self.entries.push_back(entry);
        Some(tracks)
    }

    pub fn insert(&mut self, name: &str, tracks: Vec<Track>) {
        let key = playlist_key(name);
        self.entries.retain(|(entry, _)| *entry != key);
        self.entries.push_back((key, tracks));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn invalidate(&mut self, name: &str) {
        let key = playlist_key(name);
        self.entries.retain(|(entry, _)| *entry != key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_recently_used_entry_is_evicted() {
        let mut cache = SnapshotCache::new(2);
        cache.insert("a", Vec::new());
        cache.insert("b", Vec::new());
        assert!(cache.get("a").is_some());
        cache.insert("c", Vec::new());

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_favourites_key_is_case_insensitive() {
        let mut cache = SnapshotCache::default();
        cache.insert("favourites", Vec::new());
        assert!(cache.get("Favourites").is_some());
        cache.invalidate("FAVOURITES");
        assert!(cache.get("FAVOURITES").is_none());
    }

    #[test]
    fn test_invalidate_only_drops_the_named_playlist() {
        let mut cache = SnapshotCache::default();
        cache.insert("Mix", Vec::new());
        cache.insert("Other", Vec::new());
        cache.invalidate("Mix");
        assert!(cache.get("Mix").is_none());
        assert!(cache.get("Other").is_some());
        cache.clear();
        assert!(cache.get("Other").is_none());
    }
}
