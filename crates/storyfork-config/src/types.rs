//! Domain records shared by the persistence layer, the engine and the HTTP API.
//!
//! Every record serializes with camelCase field names, matching the JSON
//! contract the reader frontend consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical, author-owned story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySeed {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub opening: Option<String>,
    pub author: String,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A published chapter of a story seed. Chapters are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: i64,
    pub story_seed_id: i64,
    pub sort_order: i32,
    pub title: String,
    pub content_markdown: String,
    pub created_at: DateTime<Utc>,
}

/// A decision location in a story.
///
/// Authored branch points have `fork_id == None` and are visible to every
/// fork of the seed. Generated branch points belong to a single fork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchPoint {
    pub id: i64,
    pub story_seed_id: i64,
    pub fork_id: Option<i64>,
    pub sort_order: i32,
    pub anchor_text: Option<String>,
    pub options: Vec<StoryOption>,
    pub created_at: DateTime<Utc>,
}

impl BranchPoint {
    pub fn option(&self, option_id: i64) -> Option<&StoryOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    pub fn is_generated(&self) -> bool {
        self.fork_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryOption {
    pub id: i64,
    pub branch_point_id: i64,
    pub label: String,
    pub sort_order: i32,
    pub influence_notes: Option<String>,
    pub plot_hint: Option<String>,
    pub selection_count: i64,
}

/// Option payload used when a branch point is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStoryOption {
    pub label: String,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub influence_notes: Option<String>,
    #[serde(default)]
    pub plot_hint: Option<String>,
}

/// A reader's personal branch of a story seed.
///
/// `head_commit_id` is the frontier pointer; `version` increases every time
/// the frontier moves and backs the compare-and-set used by writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderFork {
    pub id: i64,
    pub story_seed_id: i64,
    pub reader: String,
    pub title: String,
    pub from_chapter_sort_order: Option<i32>,
    pub head_commit_id: Option<i64>,
    pub last_read_commit_id: Option<i64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable node in a fork's history tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: i64,
    pub fork_id: i64,
    pub parent_commit_id: Option<i64>,
    pub branch_point_id: Option<i64>,
    pub option_id: Option<i64>,
    pub option_label: Option<String>,
    pub content_markdown: String,
    /// Depth on the commit's own path, the root commit is 1.
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCommit {
    pub parent_commit_id: Option<i64>,
    pub branch_point_id: Option<i64>,
    pub option_id: Option<i64>,
    pub content_markdown: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: i64,
    pub fork_id: i64,
    pub reader: String,
    pub commit_id: Option<i64>,
    pub chapter_sort_order: Option<i32>,
    pub bookmark_name: Option<String>,
    pub notes: Option<String>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Writable bookmark fields. `sort_order == None` keeps the stored value on
/// update and appends after the last bookmark on insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookmarkFields {
    pub commit_id: Option<i64>,
    pub chapter_sort_order: Option<i32>,
    pub bookmark_name: Option<String>,
    pub notes: Option<String>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestStatus {
    Open,
    Merged,
    Closed,
}

impl PullRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullRequestStatus::Open => "open",
            PullRequestStatus::Merged => "merged",
            PullRequestStatus::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PullRequestStatus::Open)
    }

    /// `open -> merged` and `open -> closed` are the only legal moves.
    pub fn can_transition_to(&self, next: PullRequestStatus) -> bool {
        matches!(
            (self, next),
            (PullRequestStatus::Open, PullRequestStatus::Merged)
                | (PullRequestStatus::Open, PullRequestStatus::Closed)
        )
    }
}

impl fmt::Display for PullRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pull request status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for PullRequestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(PullRequestStatus::Open),
            "merged" => Ok(PullRequestStatus::Merged),
            "closed" => Ok(PullRequestStatus::Closed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: i64,
    pub story_seed_id: i64,
    pub fork_id: i64,
    pub from_commit_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: PullRequestStatus,
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an insert guarded by a uniqueness rule.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome<T> {
    Created(T),
    Existing(T),
}

impl<T> InsertOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            InsertOutcome::Created(value) | InsertOutcome::Existing(value) => value,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, InsertOutcome::Created(_))
    }
}

/// Outcome of deleting a fork together with its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkDeletion {
    Deleted,
    Missing,
    /// Nothing was deleted; the fork still has this many open pull requests.
    OpenPullRequests(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(PullRequestStatus::Open.can_transition_to(PullRequestStatus::Merged));
        assert!(PullRequestStatus::Open.can_transition_to(PullRequestStatus::Closed));
        assert!(!PullRequestStatus::Open.can_transition_to(PullRequestStatus::Open));
        assert!(!PullRequestStatus::Merged.can_transition_to(PullRequestStatus::Closed));
        assert!(!PullRequestStatus::Closed.can_transition_to(PullRequestStatus::Merged));
        assert!(!PullRequestStatus::Closed.can_transition_to(PullRequestStatus::Open));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("merged".parse::<PullRequestStatus>(), Ok(PullRequestStatus::Merged));
        assert_eq!(" Closed ".parse::<PullRequestStatus>(), Ok(PullRequestStatus::Closed));
        assert!("reopened".parse::<PullRequestStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&PullRequestStatus::Merged).unwrap();
        assert_eq!(json, "\"merged\"");
    }
}
