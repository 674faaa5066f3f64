use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::media::OutputFormat;

#[derive(Debug, Clone)]
pub struct GalleryImage {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub request_id: u64,
    pub model: String,
    pub prompt_used: String,
    pub aspect_ratio: String,
    pub person_generation: String,
    pub image_count: usize,
    pub format: OutputFormat,
    pub created_at: DateTime<Utc>,
}

/// Session-scoped store for everything the interactive session
/// accumulates: the current gallery, the append-only request history and
/// the last enhanced-prompt preview. Created at session start, dropped at
/// exit; the gallery is also cleared on explicit user action. The prompt
/// composer never reads or writes this.
#[derive(Debug, Default)]
struct SessionInner {
    gallery: Vec<GalleryImage>,
    history: Vec<HistoryEntry>,
    enhanced_preview: String,
    generation_counter: u64,
}

#[derive(Clone, Default)]
pub struct SessionState {
    inner: Arc<Mutex<SessionInner>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the id for the next generation request.
    pub fn next_generation_id(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.generation_counter += 1;
        inner.generation_counter
    }

    /// Each successful generation replaces the gallery wholesale.
    pub fn replace_gallery(&self, images: Vec<GalleryImage>) {
        self.inner.lock().gallery = images;
    }

    pub fn clear_gallery(&self) {
        self.inner.lock().gallery.clear();
    }

    pub fn gallery(&self) -> Vec<GalleryImage> {
        self.inner.lock().gallery.clone()
    }

    pub fn gallery_len(&self) -> usize {
        self.inner.lock().gallery.len()
    }

    pub fn gallery_item(&self, index: usize) -> Option<GalleryImage> {
        self.inner.lock().gallery.get(index).cloned()
    }

    pub fn push_history(&self, entry: HistoryEntry) {
        self.inner.lock().history.push(entry);
    }

    /// Most recent entries first, at most `limit` of them.
    pub fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        let inner = self.inner.lock();
        inner.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn set_enhanced_preview(&self, preview: String) {
        self.inner.lock().enhanced_preview = preview;
    }

    pub fn enhanced_preview(&self) -> String {
        self.inner.lock().enhanced_preview.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64) -> HistoryEntry {
        HistoryEntry {
            request_id: id,
            model: "imagen-4.0-generate-preview-06-06".to_string(),
            prompt_used: "a red fox in snow".to_string(),
            aspect_ratio: "1:1".to_string(),
            person_generation: "allow_adult".to_string(),
            image_count: 1,
            format: OutputFormat::Png,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn generation_ids_are_monotonic() {
        let state = SessionState::new();
        assert_eq!(state.next_generation_id(), 1);
        assert_eq!(state.next_generation_id(), 2);
        assert_eq!(state.next_generation_id(), 3);
    }

    #[test]
    fn replace_gallery_discards_previous_results() {
        let state = SessionState::new();
        state.replace_gallery(vec![GalleryImage {
            bytes: vec![1, 2, 3],
            file_name: "old.png".to_string(),
            format: OutputFormat::Png,
        }]);
        state.replace_gallery(vec![GalleryImage {
            bytes: vec![4],
            file_name: "new.png".to_string(),
            format: OutputFormat::Png,
        }]);
        let gallery = state.gallery();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].file_name, "new.png");
    }

    #[test]
    fn clearing_the_gallery_keeps_history() {
        let state = SessionState::new();
        state.replace_gallery(vec![GalleryImage {
            bytes: vec![1],
            file_name: "a.png".to_string(),
            format: OutputFormat::Png,
        }]);
        state.push_history(entry(1));
        state.clear_gallery();
        assert_eq!(state.gallery_len(), 0);
        assert_eq!(state.history_len(), 1);
    }

    #[test]
    fn recent_history_is_newest_first_and_bounded() {
        let state = SessionState::new();
        for id in 1..=5 {
            state.push_history(entry(id));
        }
        let recent = state.recent_history(3);
        let ids: Vec<u64> = recent.iter().map(|entry| entry.request_id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }
}
