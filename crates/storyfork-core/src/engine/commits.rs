//! Commit log, frontier and branch point resolution for a fork.
//!
//! A fork's commits form a tree linked by parent ids. The fork's head is the
//! frontier; the active path is the chain from the root to the head, and its
//! length is the frontier depth. The branch points offered next are the ones
//! positioned at `depth + 1`.

use super::{prompt, StoryEngine};
use crate::error::{EngineError, EngineResult};
use async_stream::stream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use storyfork_config::types::{BranchPoint, Chapter, Commit, NewCommit, NewStoryOption, ReaderFork};

/// Where a fork currently stands
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontier {
    pub fork: ReaderFork,
    /// Depth of the head commit, 0 before the first choice
    pub position: i32,
    pub head: Option<Commit>,
    /// Root to head
    pub path: Vec<Commit>,
    /// Decisions available at `position + 1`
    pub branch_points: Vec<BranchPoint>,
}

/// Result of a successful `choose`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub commit: Commit,
    pub fork: ReaderFork,
}

/// Event of a streamed `choose`: text chunks, then exactly one of
/// `Committed` or `Failed`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChoiceEvent {
    Chunk {
        text: String,
    },
    Committed(Choice),
    #[serde(rename_all = "camelCase")]
    Failed {
        error: String,
        message: String,
        retryable: bool,
    },
}

impl ChoiceEvent {
    fn failed(err: &EngineError) -> Self {
        ChoiceEvent::Failed {
            error: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            ChoiceEvent::Chunk { .. } => "chunk",
            ChoiceEvent::Committed(_) => "committed",
            ChoiceEvent::Failed { .. } => "failed",
        }
    }
}

pub type ChoiceStream = Pin<Box<dyn Stream<Item = ChoiceEvent> + Send>>;

/// A validated choice waiting for its generated text
struct PendingChoice {
    fork: ReaderFork,
    branch_point_id: i64,
    option_id: i64,
    position: i32,
    prompt: String,
}

impl StoryEngine {
    /// Every commit of the fork in creation order, including ones left off
    /// the active path by rollbacks.
    pub fn list_commits(&self, reader: &str, fork_id: i64) -> EngineResult<Vec<Commit>> {
        let fork = self.owned_fork(reader, fork_id)?;
        Ok(self.persistence.list_commits(fork.id)?)
    }

    pub fn frontier(&self, reader: &str, fork_id: i64) -> EngineResult<Frontier> {
        let fork = self.owned_fork(reader, fork_id)?;
        let path = self.active_path(&fork)?;
        let position = path.len() as i32;
        let branch_points =
            self.persistence
                .list_branch_points(fork.story_seed_id, Some(fork.id), Some(position + 1))?;
        Ok(Frontier {
            head: path.last().cloned(),
            fork,
            position,
            path,
            branch_points,
        })
    }

    /// Authored and fork-generated branch points visible to a fork
    pub fn fork_branch_points(
        &self,
        reader: &str,
        fork_id: i64,
        position: Option<i32>,
    ) -> EngineResult<Vec<BranchPoint>> {
        let fork = self.owned_fork(reader, fork_id)?;
        Ok(self
            .persistence
            .list_branch_points(fork.story_seed_id, Some(fork.id), position)?)
    }

    /// Take `option_id` at `branch_point_id` and append the generated
    /// continuation on the frontier.
    ///
    /// The branch point must sit right after the frontier. When
    /// `expected_version` is given it must match the fork's version. Of two
    /// concurrent calls against the same frontier only one commits; the
    /// other gets `InvalidState`.
    pub async fn choose(
        &self,
        reader: &str,
        fork_id: i64,
        branch_point_id: i64,
        option_id: i64,
        expected_version: Option<i64>,
    ) -> EngineResult<Choice> {
        let pending =
            self.prepare_choice(reader, fork_id, branch_point_id, option_id, expected_version)?;
        let content = self.generate_text(&pending.prompt).await?;
        self.commit_choice(&pending, content)
    }

    /// Same contract as `choose`, but the continuation is streamed as it is
    /// generated and committed once the provider finishes.
    ///
    /// Validation errors are returned before any event is produced. Failures
    /// after that arrive as a final `ChoiceEvent::Failed` and commit nothing.
    pub async fn stream_choose(
        self: &Arc<Self>,
        reader: &str,
        fork_id: i64,
        branch_point_id: i64,
        option_id: i64,
        expected_version: Option<i64>,
    ) -> EngineResult<ChoiceStream> {
        let pending =
            self.prepare_choice(reader, fork_id, branch_point_id, option_id, expected_version)?;
        let mut chunks = self
            .provider
            .stream(&pending.prompt, &self.generation)
            .await
            .map_err(|err| {
                tracing::warn!("Model provider failed to start streaming: {err:#}");
                EngineError::UpstreamFailure(format!("story generation failed: {err}"))
            })?;

        let engine = Arc::clone(self);
        let events = stream! {
            let mut content = String::new();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(text) => {
                        content.push_str(&text);
                        yield ChoiceEvent::Chunk { text };
                    }
                    Err(err) => {
                        tracing::warn!(fork_id, "Model stream failed: {err:#}");
                        let err = EngineError::UpstreamFailure(format!("story generation failed: {err}"));
                        yield ChoiceEvent::failed(&err);
                        return;
                    }
                }
            }

            let content = content.trim().to_string();
            if content.is_empty() {
                let err = EngineError::UpstreamFailure(
                    "story generation returned no content".to_string(),
                );
                yield ChoiceEvent::failed(&err);
                return;
            }
            match engine.commit_choice(&pending, content) {
                Ok(choice) => yield ChoiceEvent::Committed(choice),
                Err(err) => yield ChoiceEvent::failed(&err),
            }
        };
        Ok(Box::pin(events))
    }

    fn prepare_choice(
        &self,
        reader: &str,
        fork_id: i64,
        branch_point_id: i64,
        option_id: i64,
        expected_version: Option<i64>,
    ) -> EngineResult<PendingChoice> {
        let fork = self.owned_fork(reader, fork_id)?;
        if let Some(expected) = expected_version {
            if expected != fork.version {
                return Err(EngineError::invalid_state(format!(
                    "fork is at version {}, not {expected}; reload and retry",
                    fork.version
                )));
            }
        }

        let point = self
            .persistence
            .get_branch_point(branch_point_id)?
            .filter(|point| {
                point.story_seed_id == fork.story_seed_id
                    && point.fork_id.map_or(true, |owner| owner == fork.id)
            })
            .ok_or(EngineError::NotFound("branch point"))?;
        let option = point
            .option(option_id)
            .cloned()
            .ok_or_else(|| {
                EngineError::invalid_input(format!(
                    "option {option_id} does not belong to branch point {branch_point_id}"
                ))
            })?;

        let path = self.active_path(&fork)?;
        let next_position = path.len() as i32 + 1;
        if point.sort_order != next_position {
            return Err(EngineError::invalid_state(format!(
                "branch point {} is at position {}, but the fork's next position is {next_position}",
                point.id, point.sort_order
            )));
        }

        let seed = self.seed(fork.story_seed_id)?;
        let chapters = self.context_chapters(&fork)?;
        let prompt = prompt::continuation_prompt(&seed, &chapters, &path, &point, &option);
        Ok(PendingChoice {
            fork,
            branch_point_id: point.id,
            option_id: option.id,
            position: next_position,
            prompt,
        })
    }

    /// Append the generated text if the fork is still at the version the
    /// choice was prepared against.
    fn commit_choice(&self, pending: &PendingChoice, content: String) -> EngineResult<Choice> {
        let fork = &pending.fork;
        let new_commit = NewCommit {
            parent_commit_id: fork.head_commit_id,
            branch_point_id: Some(pending.branch_point_id),
            option_id: Some(pending.option_id),
            content_markdown: content,
            sort_order: pending.position,
        };
        let commit = self
            .persistence
            .append_commit(fork.id, fork.version, &new_commit)?
            .ok_or_else(|| {
                EngineError::invalid_state("fork frontier moved during choose; reload and retry")
            })?;

        tracing::info!(
            fork_id = fork.id,
            commit_id = commit.id,
            branch_point_id = pending.branch_point_id,
            option_id = pending.option_id,
            position = pending.position,
            "Commit appended"
        );
        let fork = self
            .persistence
            .get_fork(fork.id)?
            .ok_or(EngineError::NotFound("fork"))?;
        Ok(Choice { commit, fork })
    }

    /// Move the frontier to any commit of the fork. No commit is deleted;
    /// choosing from there starts a divergent path.
    pub fn rollback(&self, reader: &str, fork_id: i64, commit_id: i64) -> EngineResult<ReaderFork> {
        let fork = self.owned_fork(reader, fork_id)?;
        let commit = self
            .persistence
            .get_commit(commit_id)?
            .filter(|commit| commit.fork_id == fork.id)
            .ok_or(EngineError::NotFound("commit"))?;
        let fork = self.move_head(&fork, Some(commit.id))?;
        tracing::info!(fork_id, commit_id, "Fork rolled back");
        Ok(fork)
    }

    /// Roll back to the commit at position `branch_point_sort_order` on the
    /// active path; `0` clears the frontier back to the fork origin.
    pub fn rollback_to_branch_point(
        &self,
        reader: &str,
        fork_id: i64,
        branch_point_sort_order: i32,
    ) -> EngineResult<ReaderFork> {
        let fork = self.owned_fork(reader, fork_id)?;
        let path = self.active_path(&fork)?;
        let depth = path.len() as i32;
        if branch_point_sort_order < 0 || branch_point_sort_order > depth {
            return Err(EngineError::invalid_input(format!(
                "branchPointSortOrder must be between 0 and {depth}"
            )));
        }
        let target = path
            .iter()
            .rev()
            .find(|commit| commit.sort_order <= branch_point_sort_order)
            .map(|commit| commit.id);
        let fork = self.move_head(&fork, target)?;
        tracing::info!(
            fork_id,
            position = branch_point_sort_order,
            head = ?target,
            "Fork rolled back to branch point"
        );
        Ok(fork)
    }

    /// Record the commit the reader last read. `None` clears it.
    pub fn update_reading_progress(
        &self,
        reader: &str,
        fork_id: i64,
        commit_id: Option<i64>,
    ) -> EngineResult<ReaderFork> {
        let fork = self.owned_fork(reader, fork_id)?;
        if let Some(commit_id) = commit_id {
            self.persistence
                .get_commit(commit_id)?
                .filter(|commit| commit.fork_id == fork.id)
                .ok_or(EngineError::NotFound("commit"))?;
        }
        self.persistence
            .set_last_read(fork.id, commit_id)?
            .ok_or(EngineError::NotFound("fork"))
    }

    /// Ask the model for options at the fork's next position when no branch
    /// point exists there yet. Existing branch points are returned unchanged.
    pub async fn generate_branch_point(
        &self,
        reader: &str,
        fork_id: i64,
    ) -> EngineResult<Vec<BranchPoint>> {
        let fork = self.owned_fork(reader, fork_id)?;
        let path = self.active_path(&fork)?;
        let position = path.len() as i32 + 1;
        let existing =
            self.persistence
                .list_branch_points(fork.story_seed_id, Some(fork.id), Some(position))?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        let seed = self.seed(fork.story_seed_id)?;
        let chapters = self.context_chapters(&fork)?;
        let reply = self
            .generate_text(&prompt::options_prompt(&seed, &chapters, &path))
            .await?;
        let labels = prompt::parse_option_lines(&reply);
        if labels.is_empty() {
            return Err(EngineError::UpstreamFailure(
                "model reply contained no usable options".to_string(),
            ));
        }

        // Another request may have filled the position while we were generating.
        let existing =
            self.persistence
                .list_branch_points(fork.story_seed_id, Some(fork.id), Some(position))?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        let options: Vec<NewStoryOption> = labels
            .into_iter()
            .enumerate()
            .map(|(index, label)| NewStoryOption {
                label,
                sort_order: index as i32 + 1,
                ..Default::default()
            })
            .collect();
        let point = self.persistence.insert_branch_point(
            fork.story_seed_id,
            Some(fork.id),
            position,
            None,
            &options,
        )?;
        tracing::info!(
            fork_id,
            branch_point_id = point.id,
            position,
            options = point.options.len(),
            "Generated branch point"
        );
        Ok(vec![point])
    }

    /// Canonical chapters the fork was taken from
    pub(super) fn context_chapters(&self, fork: &ReaderFork) -> EngineResult<Vec<Chapter>> {
        Ok(self
            .persistence
            .list_chapters(fork.story_seed_id, fork.from_chapter_sort_order)?)
    }

    pub(super) fn move_head(&self, fork: &ReaderFork, head: Option<i64>) -> EngineResult<ReaderFork> {
        self.persistence
            .move_head(fork.id, fork.version, head)?
            .ok_or_else(|| EngineError::invalid_state("fork frontier moved; reload and retry"))
    }
}
