//! Reader fork versioning engine.
//!
//! `StoryEngine` owns the durable store, the model provider and the preview
//! cache. Its operations are split by concern:
//!
//! - `seeds`: canonical stories, chapters and authored branch points
//! - `forks`: per-reader forks
//! - `commits`: commit log, frontier, choose (plain and streamed) and rollback
//! - `bookmarks`: bookmark CRUD
//! - `pull_requests`: pull request workflow
//! - `previews`: fork-scoped access to the AI preview cache
//!
//! Every operation that acts on a fork takes the caller's username and
//! refuses forks the caller does not own.

mod bookmarks;
mod commits;
mod forks;
mod previews;
pub mod prompt;
mod pull_requests;
mod seeds;

pub use bookmarks::{BookmarkPatch, BookmarkView};
pub use commits::{Choice, ChoiceEvent, ChoiceStream, Frontier};
pub use pull_requests::{LoggingMergeListener, MergeListener};
pub use seeds::slugify;

use crate::agent::{GenerationConfig, ModelProvider};
use crate::error::{EngineError, EngineResult};
use crate::preview::PreviewCache;
use std::collections::HashMap;
use std::sync::Arc;
use storyfork_config::persistence::Persistence;
use storyfork_config::types::{Commit, ReaderFork, StorySeed};

pub struct StoryEngine {
    persistence: Persistence,
    provider: Arc<dyn ModelProvider>,
    generation: GenerationConfig,
    previews: PreviewCache,
    merge_listener: Arc<dyn MergeListener>,
}

impl StoryEngine {
    pub fn new(
        persistence: Persistence,
        provider: Arc<dyn ModelProvider>,
        previews: PreviewCache,
    ) -> Self {
        Self {
            persistence,
            provider,
            generation: GenerationConfig::default(),
            previews,
            merge_listener: Arc::new(LoggingMergeListener),
        }
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_merge_listener(mut self, listener: Arc<dyn MergeListener>) -> Self {
        self.merge_listener = listener;
        self
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    fn seed(&self, seed_id: i64) -> EngineResult<StorySeed> {
        self.persistence
            .get_seed(seed_id)?
            .ok_or(EngineError::NotFound("story seed"))
    }

    /// Forks owned by someone else are reported as missing.
    fn owned_fork(&self, reader: &str, fork_id: i64) -> EngineResult<ReaderFork> {
        match self.persistence.get_fork(fork_id)? {
            Some(fork) if fork.reader == reader => Ok(fork),
            _ => Err(EngineError::NotFound("fork")),
        }
    }

    /// Commits from the root to the fork's head, in path order.
    fn active_path(&self, fork: &ReaderFork) -> EngineResult<Vec<Commit>> {
        let commits = self.persistence.list_commits(fork.id)?;
        path_to(fork.head_commit_id, commits)
    }

    /// Run a generation and reject empty output.
    async fn generate_text(&self, prompt: &str) -> EngineResult<String> {
        let response = self
            .provider
            .generate(prompt, &self.generation)
            .await
            .map_err(|err| {
                tracing::warn!("Model provider failed: {err:#}");
                EngineError::UpstreamFailure(format!("story generation failed: {err}"))
            })?;
        let content = response.content.trim();
        if content.is_empty() {
            return Err(EngineError::UpstreamFailure(
                "story generation returned no content".to_string(),
            ));
        }
        Ok(content.to_string())
    }
}

/// Walk parent links from `head` back to the root.
///
/// Each commit is visited once, so a broken or cyclic chain surfaces as a
/// storage error.
fn path_to(head: Option<i64>, commits: Vec<Commit>) -> EngineResult<Vec<Commit>> {
    let mut by_id: HashMap<i64, Commit> = commits.into_iter().map(|c| (c.id, c)).collect();
    let mut path = Vec::new();
    let mut cursor = head;
    while let Some(id) = cursor {
        let commit = by_id.remove(&id).ok_or_else(|| {
            EngineError::Storage(anyhow::anyhow!("commit {id} missing from its fork's history"))
        })?;
        cursor = commit.parent_commit_id;
        path.push(commit);
    }
    path.reverse();
    Ok(path)
}
