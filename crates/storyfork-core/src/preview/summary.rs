//! Background summarization of preview chapters.

use super::store::PreviewStore;
use crate::agent::{GenerationConfig, ModelProvider};
use crate::engine::prompt;
use crate::error::{EngineError, EngineResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryJob {
    pub fork_id: i64,
    pub chapter_number: i32,
}

/// Sending half of the summary worker's queue
#[derive(Clone)]
pub struct SummaryQueue {
    tx: mpsc::Sender<SummaryJob>,
}

impl SummaryQueue {
    pub fn enqueue(&self, job: SummaryJob) -> EngineResult<()> {
        self.tx.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                EngineError::UpstreamFailure("summary queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                EngineError::UpstreamFailure("summary worker is not running".to_string())
            }
        })
    }
}

pub struct SummaryWorker {
    store: Arc<dyn PreviewStore>,
    provider: Arc<dyn ModelProvider>,
    generation: GenerationConfig,
    max_chars: usize,
}

impl SummaryWorker {
    pub fn new(
        store: Arc<dyn PreviewStore>,
        provider: Arc<dyn ModelProvider>,
        generation: GenerationConfig,
        max_chars: usize,
    ) -> Self {
        Self {
            store,
            provider,
            generation,
            max_chars,
        }
    }

    /// Start the worker task. It exits once every queue handle is dropped.
    pub fn spawn(self, capacity: usize) -> (SummaryQueue, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(err) = self.process(job).await {
                    tracing::error!(
                        fork_id = job.fork_id,
                        chapter = job.chapter_number,
                        "Summary generation failed: {err:#}"
                    );
                    if let Err(err) = self
                        .store
                        .set_summary_generating(job.fork_id, job.chapter_number, false)
                        .await
                    {
                        tracing::warn!(
                            fork_id = job.fork_id,
                            chapter = job.chapter_number,
                            "Failed to clear summary flag: {err:#}"
                        );
                    }
                }
            }
            tracing::debug!("Summary worker stopped");
        });
        (SummaryQueue { tx }, handle)
    }

    async fn process(&self, job: SummaryJob) -> anyhow::Result<()> {
        let chapter = self
            .store
            .list(job.fork_id)
            .await?
            .into_iter()
            .find(|chapter| chapter.chapter_number == job.chapter_number);
        let Some(chapter) = chapter else {
            tracing::debug!(
                fork_id = job.fork_id,
                chapter = job.chapter_number,
                "Preview gone before summary ran"
            );
            return Ok(());
        };

        let summary = self.summarize(&chapter.content_markdown).await;
        let attached = self
            .store
            .attach_summary(
                job.fork_id,
                job.chapter_number,
                &chapter.content_markdown,
                summary,
            )
            .await?;
        if attached {
            tracing::info!(
                fork_id = job.fork_id,
                chapter = job.chapter_number,
                "Preview summary attached"
            );
        } else {
            tracing::debug!(
                fork_id = job.fork_id,
                chapter = job.chapter_number,
                "Preview changed while summarizing, summary discarded"
            );
        }
        Ok(())
    }

    async fn summarize(&self, content: &str) -> String {
        let prompt = prompt::summary_prompt(content, self.max_chars);
        match self.provider.generate(&prompt, &self.generation).await {
            Ok(response) if !response.content.trim().is_empty() => {
                response.content.trim().to_string()
            }
            Ok(_) => {
                tracing::warn!("Provider returned an empty summary, using excerpt");
                fallback_summary(content, self.max_chars)
            }
            Err(err) => {
                tracing::warn!("Summary provider failed, using excerpt: {err:#}");
                fallback_summary(content, self.max_chars)
            }
        }
    }
}

/// Leading `max_chars` characters of the content, with `...` when cut
pub fn fallback_summary(content: &str, max_chars: usize) -> String {
    let content = content.trim();
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", content[..cut].trim_end()),
        None => content.to_string(),
    }
}
