//! Pull request workflow.
//!
//! A fork owner proposes their continuation back to the seed; the seed's
//! author moves it from `open` to `merged` or `closed`, once.

use super::StoryEngine;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use storyfork_config::types::{Commit, PullRequest, PullRequestStatus};

const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 2000;

/// Collaborator told about merged pull requests. Promoting the fork's
/// commits into the canonical story is its job, not the workflow's.
#[async_trait]
pub trait MergeListener: Send + Sync {
    /// `commits` is the fork's active path from the merge point onward.
    async fn on_merged(&self, pull_request: &PullRequest, commits: &[Commit]) -> anyhow::Result<()>;
}

/// Records merges in the log and does nothing else.
pub struct LoggingMergeListener;

#[async_trait]
impl MergeListener for LoggingMergeListener {
    async fn on_merged(&self, pull_request: &PullRequest, commits: &[Commit]) -> anyhow::Result<()> {
        tracing::info!(
            pull_request_id = pull_request.id,
            seed_id = pull_request.story_seed_id,
            fork_id = pull_request.fork_id,
            commits = commits.len(),
            "Merge requested for canonical story"
        );
        Ok(())
    }
}

fn optional_text(value: Option<&str>, field: &str, max_chars: usize) -> EngineResult<Option<String>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) if v.chars().count() > max_chars => Err(EngineError::invalid_input(format!(
            "{field} must be at most {max_chars} characters"
        ))),
        other => Ok(other.map(str::to_string)),
    }
}

impl StoryEngine {
    pub fn create_pull_request(
        &self,
        caller: &str,
        seed_id: i64,
        fork_id: i64,
        from_commit_id: Option<i64>,
        title: Option<&str>,
        description: Option<&str>,
    ) -> EngineResult<PullRequest> {
        let fork = self.owned_fork(caller, fork_id)?;
        if fork.story_seed_id != seed_id {
            return Err(EngineError::invalid_input(format!(
                "fork {fork_id} was not forked from story seed {seed_id}"
            )));
        }
        self.seed(seed_id)?;
        if let Some(commit_id) = from_commit_id {
            self.persistence
                .get_commit(commit_id)?
                .filter(|commit| commit.fork_id == fork.id)
                .ok_or(EngineError::NotFound("commit"))?;
        }
        let title = optional_text(title, "title", MAX_TITLE_CHARS)?;
        let description = optional_text(description, "description", MAX_DESCRIPTION_CHARS)?;

        let pull_request = self.persistence.insert_pull_request(
            seed_id,
            fork.id,
            from_commit_id,
            title.as_deref(),
            description.as_deref(),
        )?
        .ok_or(EngineError::NotFound("fork"))?;
        tracing::info!(
            pull_request_id = pull_request.id,
            seed_id,
            fork_id,
            from_commit = ?from_commit_id,
            "Pull request opened"
        );
        Ok(pull_request)
    }

    /// Pull requests against a seed, newest first. Author only.
    pub fn list_pull_requests(&self, caller: &str, seed_id: i64) -> EngineResult<Vec<PullRequest>> {
        let seed = self.seed(seed_id)?;
        if seed.author != caller {
            return Err(EngineError::Unauthorized(
                "only the story author may list its pull requests",
            ));
        }
        Ok(self.persistence.list_pull_requests(seed_id)?)
    }

    /// Visible to the seed author and to the owner of the source fork.
    pub fn get_pull_request(&self, caller: &str, id: i64) -> EngineResult<PullRequest> {
        let pull_request = self
            .persistence
            .get_pull_request(id)?
            .ok_or(EngineError::NotFound("pull request"))?;
        if self.may_view(caller, &pull_request)? {
            Ok(pull_request)
        } else {
            Err(EngineError::NotFound("pull request"))
        }
    }

    /// Move an open pull request to `merged` or `closed`.
    ///
    /// Only the seed's author may do this. Terminal states never change
    /// again; a request that lost a race to another reviewer reports
    /// `InvalidTransition` from the state the winner left it in.
    pub async fn update_pull_request_status(
        &self,
        caller: &str,
        id: i64,
        status: PullRequestStatus,
    ) -> EngineResult<PullRequest> {
        let current = self.get_pull_request(caller, id)?;
        let seed = self.seed(current.story_seed_id)?;
        if seed.author != caller {
            return Err(EngineError::Unauthorized(
                "only the story author may review pull requests",
            ));
        }
        if !current.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let Some(updated) = self.persistence.transition_pull_request(id, status, caller)? else {
            let from = self
                .persistence
                .get_pull_request(id)?
                .map(|pr| pr.status)
                .unwrap_or(current.status);
            return Err(EngineError::InvalidTransition { from, to: status });
        };
        tracing::info!(
            pull_request_id = id,
            from = %current.status,
            to = %status,
            reviewer = caller,
            "Pull request status changed"
        );

        if status == PullRequestStatus::Merged {
            let commits = self.merge_commits(&updated)?;
            if let Err(err) = self.merge_listener.on_merged(&updated, &commits).await {
                tracing::warn!(pull_request_id = id, "Merge listener failed: {err:#}");
            }
        }
        Ok(updated)
    }

    fn may_view(&self, caller: &str, pull_request: &PullRequest) -> EngineResult<bool> {
        if let Some(seed) = self.persistence.get_seed(pull_request.story_seed_id)? {
            if seed.author == caller {
                return Ok(true);
            }
        }
        Ok(self
            .persistence
            .get_fork(pull_request.fork_id)?
            .is_some_and(|fork| fork.reader == caller))
    }

    /// The fork's active path from `from_commit_id` (inclusive) to its head.
    /// The whole path when no merge point was given. Empty if the fork is gone.
    fn merge_commits(&self, pull_request: &PullRequest) -> EngineResult<Vec<Commit>> {
        let Some(fork) = self.persistence.get_fork(pull_request.fork_id)? else {
            return Ok(Vec::new());
        };
        let path = self.active_path(&fork)?;
        Ok(match pull_request.from_commit_id {
            Some(from) => match path.iter().position(|commit| commit.id == from) {
                Some(start) => path[start..].to_vec(),
                None => Vec::new(),
            },
            None => path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEngine;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingListener {
        merged: Mutex<Vec<(i64, Vec<i64>)>>,
    }

    #[async_trait]
    impl MergeListener for RecordingListener {
        async fn on_merged(&self, pr: &PullRequest, commits: &[Commit]) -> anyhow::Result<()> {
            self.merged
                .lock()
                .unwrap()
                .push((pr.id, commits.iter().map(|c| c.id).collect()));
            Ok(())
        }
    }

    async fn forked_with_commit(t: &TestEngine) -> (i64, i64, Commit) {
        let seed = t.published_seed("tale", 1);
        let fork = t.fork(&seed);
        let frontier = t.engine.frontier("reader", fork.id).unwrap();
        let point = &frontier.branch_points[0];
        let commit = t
            .engine
            .choose("reader", fork.id, point.id, point.options[0].id, None)
            .await
            .unwrap()
            .commit;
        (seed.id, fork.id, commit)
    }

    #[tokio::test]
    async fn test_open_then_merge_once() {
        let t = TestEngine::new();
        let (seed_id, fork_id, commit) = forked_with_commit(&t).await;
        let pr = t
            .engine
            .create_pull_request(
                "reader",
                seed_id,
                fork_id,
                Some(commit.id),
                Some("  My ending  "),
                None,
            )
            .unwrap();
        assert_eq!(pr.status, PullRequestStatus::Open);
        assert_eq!(pr.title.as_deref(), Some("My ending"));

        let merged = t
            .engine
            .update_pull_request_status("author", pr.id, PullRequestStatus::Merged)
            .await
            .unwrap();
        assert_eq!(merged.status, PullRequestStatus::Merged);
        assert_eq!(merged.reviewed_by.as_deref(), Some("author"));

        let err = t
            .engine
            .update_pull_request_status("author", pr.id, PullRequestStatus::Closed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: PullRequestStatus::Merged,
                to: PullRequestStatus::Closed
            }
        ));
    }

    #[tokio::test]
    async fn test_merge_notifies_listener_with_path_from_merge_point() {
        let listener = Arc::new(RecordingListener::default());
        let t = TestEngine::with_merge_listener(listener.clone());
        let (seed_id, fork_id, commit) = forked_with_commit(&t).await;
        let pr = t
            .engine
            .create_pull_request("reader", seed_id, fork_id, Some(commit.id), None, None)
            .unwrap();
        t.engine
            .update_pull_request_status("author", pr.id, PullRequestStatus::Merged)
            .await
            .unwrap();

        let merged = listener.merged.lock().unwrap().clone();
        assert_eq!(merged, vec![(pr.id, vec![commit.id])]);
    }

    #[tokio::test]
    async fn test_only_author_reviews() {
        let t = TestEngine::new();
        let (seed_id, fork_id, _) = forked_with_commit(&t).await;
        let pr = t
            .engine
            .create_pull_request("reader", seed_id, fork_id, None, None, None)
            .unwrap();

        assert!(matches!(
            t.engine
                .update_pull_request_status("reader", pr.id, PullRequestStatus::Merged)
                .await,
            Err(EngineError::Unauthorized(_))
        ));
        assert!(matches!(
            t.engine.list_pull_requests("reader", seed_id),
            Err(EngineError::Unauthorized(_))
        ));
        assert!(matches!(
            t.engine.get_pull_request("stranger", pr.id),
            Err(EngineError::NotFound(_))
        ));
        assert_eq!(t.engine.get_pull_request("reader", pr.id).unwrap().id, pr.id);
        assert_eq!(t.engine.list_pull_requests("author", seed_id).unwrap().len(), 1);

        let closed = t
            .engine
            .update_pull_request_status("author", pr.id, PullRequestStatus::Closed)
            .await
            .unwrap();
        assert_eq!(closed.status, PullRequestStatus::Closed);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let t = TestEngine::new();
        let (seed_id, fork_id, _) = forked_with_commit(&t).await;
        let other_seed = t.published_seed("other", 0);

        assert!(matches!(
            t.engine
                .create_pull_request("reader", other_seed.id, fork_id, None, None, None),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            t.engine
                .create_pull_request("reader", seed_id, fork_id, Some(9999), None, None),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            t.engine
                .create_pull_request("stranger", seed_id, fork_id, None, None, None),
            Err(EngineError::NotFound(_))
        ));
        let long_title = "t".repeat(201);
        assert!(matches!(
            t.engine.create_pull_request(
                "reader",
                seed_id,
                fork_id,
                None,
                Some(&long_title),
                None
            ),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_reopening_is_rejected() {
        let t = TestEngine::new();
        let (seed_id, fork_id, _) = forked_with_commit(&t).await;
        let pr = t
            .engine
            .create_pull_request("reader", seed_id, fork_id, None, None, None)
            .unwrap();
        assert!(matches!(
            t.engine
                .update_pull_request_status("author", pr.id, PullRequestStatus::Open)
                .await,
            Err(EngineError::InvalidTransition { .. })
        ));
    }
}
