//! Keyed storage for AI preview chapters.

use super::AiPreviewChapter;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Transient per-fork list of preview chapters, ordered by chapter number.
///
/// Entries may disappear at any time (eviction); callers treat a missing
/// preview as "regenerate", never as an error.
#[async_trait]
pub trait PreviewStore: Send + Sync {
    async fn list(&self, fork_id: i64) -> Result<Vec<AiPreviewChapter>>;

    /// Insert or replace the chapter with the same number
    async fn upsert(&self, fork_id: i64, chapter: AiPreviewChapter) -> Result<()>;

    async fn remove_chapter(
        &self,
        fork_id: i64,
        chapter_number: i32,
    ) -> Result<Option<AiPreviewChapter>>;

    async fn clear(&self, fork_id: i64) -> Result<()>;

    /// Returns `false` when the chapter is not present
    async fn set_summary_generating(
        &self,
        fork_id: i64,
        chapter_number: i32,
        generating: bool,
    ) -> Result<bool>;

    /// Attach a summary if the chapter still holds `source_content`.
    ///
    /// A chapter overwritten while its summary was being produced keeps its
    /// newer content and the stale summary is dropped.
    async fn attach_summary(
        &self,
        fork_id: i64,
        chapter_number: i32,
        source_content: &str,
        summary: String,
    ) -> Result<bool>;
}

struct PreviewEntry {
    chapters: Vec<AiPreviewChapter>,
    expires_at: Instant,
}

impl PreviewEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn chapter_mut(&mut self, chapter_number: i32) -> Option<&mut AiPreviewChapter> {
        self.chapters
            .iter_mut()
            .find(|chapter| chapter.chapter_number == chapter_number)
    }
}

/// In-process store; each fork's entry expires `ttl` after its last save.
pub struct MemoryPreviewStore {
    ttl: Duration,
    entries: RwLock<HashMap<i64, PreviewEntry>>,
}

impl MemoryPreviewStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop expired entries, returning how many forks were evicted
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = store.purge_expired().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "Evicted expired AI previews");
                }
            }
        })
    }
}

#[async_trait]
impl PreviewStore for MemoryPreviewStore {
    async fn list(&self, fork_id: i64) -> Result<Vec<AiPreviewChapter>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&fork_id)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.chapters.clone())
            .unwrap_or_default())
    }

    async fn upsert(&self, fork_id: i64, chapter: AiPreviewChapter) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let entry = entries.entry(fork_id).or_insert_with(|| PreviewEntry {
            chapters: Vec::new(),
            expires_at: now,
        });
        if entry.is_expired(now) {
            entry.chapters.clear();
        }
        match entry.chapter_mut(chapter.chapter_number) {
            Some(existing) => *existing = chapter,
            None => {
                entry.chapters.push(chapter);
                entry.chapters.sort_by_key(|c| c.chapter_number);
            }
        }
        entry.expires_at = now + self.ttl;
        Ok(())
    }

    async fn remove_chapter(
        &self,
        fork_id: i64,
        chapter_number: i32,
    ) -> Result<Option<AiPreviewChapter>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&fork_id) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            entries.remove(&fork_id);
            return Ok(None);
        }
        let removed = entry
            .chapters
            .iter()
            .position(|c| c.chapter_number == chapter_number)
            .map(|index| entry.chapters.remove(index));
        if entry.chapters.is_empty() {
            entries.remove(&fork_id);
        }
        Ok(removed)
    }

    async fn clear(&self, fork_id: i64) -> Result<()> {
        self.entries.write().await.remove(&fork_id);
        Ok(())
    }

    async fn set_summary_generating(
        &self,
        fork_id: i64,
        chapter_number: i32,
        generating: bool,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let chapter = entries
            .get_mut(&fork_id)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.chapter_mut(chapter_number));
        Ok(match chapter {
            Some(chapter) => {
                chapter.summary_generating = generating;
                true
            }
            None => false,
        })
    }

    async fn attach_summary(
        &self,
        fork_id: i64,
        chapter_number: i32,
        source_content: &str,
        summary: String,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let chapter = entries
            .get_mut(&fork_id)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.chapter_mut(chapter_number))
            .filter(|chapter| chapter.content_markdown == source_content);
        Ok(match chapter {
            Some(chapter) => {
                chapter.summary = Some(summary);
                chapter.summary_generating = false;
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(number: i32, content: &str) -> AiPreviewChapter {
        AiPreviewChapter {
            chapter_number: number,
            title: None,
            content_markdown: content.to_string(),
            summary: None,
            summary_generating: false,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_chapter() {
        let store = MemoryPreviewStore::new(Duration::from_secs(60));
        store.upsert(42, chapter(5, "first")).await.unwrap();
        store.upsert(42, chapter(3, "other")).await.unwrap();
        store.upsert(42, chapter(5, "second")).await.unwrap();

        let chapters = store.list(42).await.unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].chapter_number, 3);
        assert_eq!(chapters[1].content_markdown, "second");
        assert!(store.list(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryPreviewStore::new(Duration::from_millis(20));
        store.upsert(1, chapter(1, "draft")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.list(1).await.unwrap().is_empty());
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = MemoryPreviewStore::new(Duration::from_secs(60));
        store.upsert(1, chapter(1, "a")).await.unwrap();
        store.upsert(1, chapter(2, "b")).await.unwrap();

        let removed = store.remove_chapter(1, 1).await.unwrap();
        assert_eq!(removed.unwrap().content_markdown, "a");
        assert!(store.remove_chapter(1, 1).await.unwrap().is_none());

        store.clear(1).await.unwrap();
        assert!(store.list(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attach_summary_requires_matching_content() {
        let store = MemoryPreviewStore::new(Duration::from_secs(60));
        store.upsert(1, chapter(1, "original")).await.unwrap();
        assert!(store.set_summary_generating(1, 1, true).await.unwrap());
        assert!(!store.set_summary_generating(1, 9, true).await.unwrap());

        store.upsert(1, chapter(1, "rewritten")).await.unwrap();
        assert!(!store
            .attach_summary(1, 1, "original", "old".into())
            .await
            .unwrap());
        assert!(store
            .attach_summary(1, 1, "rewritten", "new".into())
            .await
            .unwrap());

        let chapters = store.list(1).await.unwrap();
        assert_eq!(chapters[0].summary.as_deref(), Some("new"));
        assert!(!chapters[0].summary_generating);
    }
}
