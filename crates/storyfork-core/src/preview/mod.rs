//! AI Preview Cache
//!
//! Staging area for AI-drafted chapters keyed by `(fork id, chapter number)`.
//! Nothing here is durable: a preview becomes part of a fork's history only
//! when it is promoted into a commit.

pub mod store;
pub mod summary;

use crate::agent::{GenerationConfig, ModelProvider};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use storyfork_config::config::PreviewConfig;
use tokio::task::JoinHandle;

pub use store::{MemoryPreviewStore, PreviewStore};
pub use summary::{SummaryJob, SummaryQueue, SummaryWorker};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiPreviewChapter {
    pub chapter_number: i32,
    pub title: Option<String>,
    pub content_markdown: String,
    pub summary: Option<String>,
    pub summary_generating: bool,
    /// Epoch milliseconds of the last save
    pub created_at: i64,
}

/// Client payload for saving a preview chapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewDraft {
    pub chapter_number: i32,
    #[serde(default)]
    pub title: Option<String>,
    pub content_markdown: String,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Returned immediately by `generate_summary`; the summary shows up on a later `get`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryAck {
    pub fork_id: i64,
    pub chapter_number: i32,
    pub status: String,
}

#[derive(Clone)]
pub struct PreviewCache {
    store: Arc<dyn PreviewStore>,
    summaries: SummaryQueue,
}

impl PreviewCache {
    pub fn new(store: Arc<dyn PreviewStore>, summaries: SummaryQueue) -> Self {
        Self { store, summaries }
    }

    /// Build an in-memory cache with its summary worker and eviction sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_in_memory(
        config: &PreviewConfig,
        provider: Arc<dyn ModelProvider>,
        generation: GenerationConfig,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let ttl = Duration::from_secs(config.ttl_secs.max(1));
        let store = Arc::new(MemoryPreviewStore::new(ttl));
        let sweeper = store.spawn_sweeper(ttl.min(Duration::from_secs(60)));
        let worker = SummaryWorker::new(
            store.clone(),
            provider,
            generation,
            config.summary_max_chars,
        );
        let (queue, worker_handle) = worker.spawn(config.summary_queue_capacity);
        (Self::new(store, queue), vec![sweeper, worker_handle])
    }

    pub async fn save(&self, fork_id: i64, draft: PreviewDraft) -> EngineResult<AiPreviewChapter> {
        if draft.chapter_number < 1 {
            return Err(EngineError::invalid_input("chapterNumber must be at least 1"));
        }
        if draft.content_markdown.trim().is_empty() {
            return Err(EngineError::invalid_input("contentMarkdown must not be empty"));
        }
        let chapter = AiPreviewChapter {
            chapter_number: draft.chapter_number,
            title: draft.title,
            content_markdown: draft.content_markdown,
            summary: draft.summary,
            summary_generating: false,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.store.upsert(fork_id, chapter.clone()).await?;
        tracing::debug!(fork_id, chapter = chapter.chapter_number, "AI preview saved");
        Ok(chapter)
    }

    pub async fn get(&self, fork_id: i64) -> EngineResult<Vec<AiPreviewChapter>> {
        Ok(self.store.list(fork_id).await?)
    }

    pub async fn chapter(
        &self,
        fork_id: i64,
        chapter_number: i32,
    ) -> EngineResult<Option<AiPreviewChapter>> {
        Ok(self
            .get(fork_id)
            .await?
            .into_iter()
            .find(|chapter| chapter.chapter_number == chapter_number))
    }

    pub async fn delete(&self, fork_id: i64) -> EngineResult<()> {
        self.store.clear(fork_id).await?;
        tracing::debug!(fork_id, "AI previews cleared");
        Ok(())
    }

    pub async fn delete_chapter(&self, fork_id: i64, chapter_number: i32) -> EngineResult<bool> {
        Ok(self
            .store
            .remove_chapter(fork_id, chapter_number)
            .await?
            .is_some())
    }

    /// Queue summarization of one preview chapter and return at once.
    pub async fn generate_summary(
        &self,
        fork_id: i64,
        chapter_number: i32,
    ) -> EngineResult<SummaryAck> {
        if !self
            .store
            .set_summary_generating(fork_id, chapter_number, true)
            .await?
        {
            return Err(EngineError::NotFound("preview chapter"));
        }
        let job = SummaryJob {
            fork_id,
            chapter_number,
        };
        if let Err(err) = self.summaries.enqueue(job) {
            self.store
                .set_summary_generating(fork_id, chapter_number, false)
                .await?;
            return Err(err);
        }
        tracing::info!(fork_id, chapter = chapter_number, "Preview summary queued");
        Ok(SummaryAck {
            fork_id,
            chapter_number,
            status: "queued".to_string(),
        })
    }
}
