//! Bookmarks: named pointers into a fork's history.
//!
//! A bookmark must point at the active path when written. Rollbacks may later
//! leave it off the path; it is kept and reported with `resolvable: false`.

use super::StoryEngine;
use crate::error::{EngineError, EngineResult};
use crate::preview::summary::fallback_summary;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use storyfork_config::types::{Bookmark, BookmarkFields, Commit, ReaderFork};

const MAX_SORT_ORDER: i32 = 1000;
const MAX_NAME_CHARS: usize = 200;
const MAX_NOTES_CHARS: usize = 2000;
const SUMMARY_CHARS: usize = 100;

/// Bookmark fields sent by a client. On update, absent fields keep their
/// stored value and a blank `bookmarkName` or `notes` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkPatch {
    pub commit_id: Option<i64>,
    pub chapter_sort_order: Option<i32>,
    pub bookmark_name: Option<String>,
    pub notes: Option<String>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkView {
    #[serde(flatten)]
    pub bookmark: Bookmark,
    pub commit_title: Option<String>,
    pub commit_summary: Option<String>,
    /// Whether the bookmarked commit is still on the fork's active path
    pub resolvable: bool,
}

/// Apply a text field from a patch: absent keeps `current`, blank clears.
fn merge_text(
    value: Option<String>,
    current: Option<String>,
    field: &str,
    max_chars: usize,
) -> EngineResult<Option<String>> {
    let Some(value) = value else {
        return Ok(current);
    };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if value.chars().count() > max_chars {
        return Err(EngineError::invalid_input(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(Some(value.to_string()))
}

impl StoryEngine {
    pub fn list_bookmarks(&self, reader: &str, fork_id: i64) -> EngineResult<Vec<BookmarkView>> {
        let fork = self.owned_fork(reader, fork_id)?;
        let bookmarks = self.persistence.list_bookmarks(fork.id)?;
        let commits: HashMap<i64, Commit> = self
            .persistence
            .list_commits(fork.id)?
            .into_iter()
            .map(|commit| (commit.id, commit))
            .collect();
        let on_path: HashSet<i64> = self.active_path(&fork)?.iter().map(|c| c.id).collect();
        Ok(bookmarks
            .into_iter()
            .map(|bookmark| present(bookmark, &commits, &on_path))
            .collect())
    }

    pub fn create_bookmark(
        &self,
        reader: &str,
        fork_id: i64,
        patch: BookmarkPatch,
    ) -> EngineResult<BookmarkView> {
        let fork = self.owned_fork(reader, fork_id)?;
        let fields = self.validated_fields(&fork, patch, None)?;
        let bookmark = self.persistence.insert_bookmark(fork.id, reader, &fields)?;
        tracing::debug!(fork_id, bookmark_id = bookmark.id, "Bookmark created");
        self.view(&fork, bookmark)
    }

    pub fn update_bookmark(
        &self,
        reader: &str,
        fork_id: i64,
        bookmark_id: i64,
        patch: BookmarkPatch,
    ) -> EngineResult<BookmarkView> {
        let fork = self.owned_fork(reader, fork_id)?;
        let existing = self.fork_bookmark(&fork, bookmark_id)?;
        let fields = self.validated_fields(&fork, patch, Some(&existing))?;
        let bookmark = self
            .persistence
            .update_bookmark(bookmark_id, &fields)?
            .ok_or(EngineError::NotFound("bookmark"))?;
        tracing::debug!(fork_id, bookmark_id, "Bookmark updated");
        self.view(&fork, bookmark)
    }

    pub fn delete_bookmark(&self, reader: &str, fork_id: i64, bookmark_id: i64) -> EngineResult<()> {
        let fork = self.owned_fork(reader, fork_id)?;
        self.fork_bookmark(&fork, bookmark_id)?;
        if !self.persistence.delete_bookmark(bookmark_id)? {
            return Err(EngineError::NotFound("bookmark"));
        }
        tracing::debug!(fork_id, bookmark_id, "Bookmark deleted");
        Ok(())
    }

    fn fork_bookmark(&self, fork: &ReaderFork, bookmark_id: i64) -> EngineResult<Bookmark> {
        self.persistence
            .get_bookmark(bookmark_id)?
            .filter(|bookmark| bookmark.fork_id == fork.id)
            .ok_or(EngineError::NotFound("bookmark"))
    }

    /// Merge `patch` over `existing` and check the result.
    ///
    /// Position fields are only checked when they change, so an already
    /// stale bookmark can still be renamed. A new commit must be on the
    /// active path; the chapter must match the commit, or without one lie
    /// within the fork's current depth.
    fn validated_fields(
        &self,
        fork: &ReaderFork,
        patch: BookmarkPatch,
        existing: Option<&Bookmark>,
    ) -> EngineResult<BookmarkFields> {
        if let Some(sort_order) = patch.sort_order {
            if !(0..=MAX_SORT_ORDER).contains(&sort_order) {
                return Err(EngineError::invalid_input(format!(
                    "sortOrder must be between 0 and {MAX_SORT_ORDER}"
                )));
            }
        }
        if let Some(chapter) = patch.chapter_sort_order {
            if chapter < 1 {
                return Err(EngineError::invalid_input(
                    "chapterSortOrder must be at least 1",
                ));
            }
        }

        let stored_commit = existing.and_then(|b| b.commit_id);
        let stored_chapter = existing.and_then(|b| b.chapter_sort_order);
        let commit_changed = patch.commit_id.is_some() && patch.commit_id != stored_commit;
        let chapter_changed =
            patch.chapter_sort_order.is_some() && patch.chapter_sort_order != stored_chapter;
        let commit_id = patch.commit_id.or(stored_commit);
        let mut chapter_sort_order = patch.chapter_sort_order.or(stored_chapter);

        if commit_changed || chapter_changed {
            let path = self.active_path(fork)?;
            match commit_id {
                Some(commit_id) => {
                    let commit = self
                        .persistence
                        .get_commit(commit_id)?
                        .filter(|commit| commit.fork_id == fork.id)
                        .ok_or(EngineError::NotFound("commit"))?;
                    if commit_changed && !path.iter().any(|c| c.id == commit.id) {
                        return Err(EngineError::invalid_state(format!(
                            "commit {commit_id} is not on the fork's current path"
                        )));
                    }
                    if commit_changed && patch.chapter_sort_order.is_none() {
                        chapter_sort_order = Some(commit.sort_order);
                    }
                    if let Some(chapter) = chapter_sort_order {
                        if chapter != commit.sort_order {
                            return Err(EngineError::invalid_input(format!(
                                "chapterSortOrder {chapter} does not match commit {commit_id} at position {}",
                                commit.sort_order
                            )));
                        }
                    }
                }
                None => {
                    if let Some(chapter) = chapter_sort_order {
                        if chapter as usize > path.len() {
                            return Err(EngineError::invalid_state(format!(
                                "chapter {chapter} is beyond the fork's current position {}",
                                path.len()
                            )));
                        }
                    }
                }
            }
        }

        let (stored_name, stored_notes) = match existing {
            Some(b) => (b.bookmark_name.clone(), b.notes.clone()),
            None => (None, None),
        };
        Ok(BookmarkFields {
            commit_id,
            chapter_sort_order,
            bookmark_name: merge_text(patch.bookmark_name, stored_name, "bookmarkName", MAX_NAME_CHARS)?,
            notes: merge_text(patch.notes, stored_notes, "notes", MAX_NOTES_CHARS)?,
            sort_order: patch.sort_order,
        })
    }

    fn view(&self, fork: &ReaderFork, bookmark: Bookmark) -> EngineResult<BookmarkView> {
        let path = self.active_path(fork)?;
        let on_path: HashSet<i64> = path.iter().map(|c| c.id).collect();
        let commits: HashMap<i64, Commit> = match bookmark.commit_id {
            Some(id) => self
                .persistence
                .get_commit(id)?
                .map(|commit| (commit.id, commit))
                .into_iter()
                .collect(),
            None => HashMap::new(),
        };
        Ok(present(bookmark, &commits, &on_path))
    }
}

fn present(bookmark: Bookmark, commits: &HashMap<i64, Commit>, on_path: &HashSet<i64>) -> BookmarkView {
    let commit = bookmark.commit_id.and_then(|id| commits.get(&id));
    let commit_title = match commit {
        Some(commit) => Some(
            commit
                .option_label
                .clone()
                .unwrap_or_else(|| format!("Chapter {}", commit.sort_order)),
        ),
        None => bookmark.chapter_sort_order.map(|n| format!("Chapter {n}")),
    };
    let commit_summary = commit.map(|c| fallback_summary(&c.content_markdown, SUMMARY_CHARS));
    let resolvable = bookmark.commit_id.map_or(true, |id| on_path.contains(&id));
    BookmarkView {
        bookmark,
        commit_title,
        commit_summary,
        resolvable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::providers::MockProvider;
    use crate::test_utils::TestEngine;

    async fn advance(t: &TestEngine, fork_id: i64) -> Commit {
        let frontier = t.engine.frontier("reader", fork_id).unwrap();
        let point = &frontier.branch_points[0];
        t.engine
            .choose("reader", fork_id, point.id, point.options[0].id, None)
            .await
            .unwrap()
            .commit
    }

    fn at(commit_id: i64) -> BookmarkPatch {
        BookmarkPatch {
            commit_id: Some(commit_id),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_list_bookmarks() {
        let long_text = "x".repeat(150);
        let t = TestEngine::with_provider(MockProvider::new(&long_text));
        let seed = t.published_seed("tale", 1);
        let fork = t.fork(&seed);
        let commit = advance(&t, fork.id).await;

        let first = t
            .engine
            .create_bookmark(
                "reader",
                fork.id,
                BookmarkPatch {
                    bookmark_name: Some("  The gate ".into()),
                    ..at(commit.id)
                },
            )
            .unwrap();
        assert_eq!(first.bookmark.sort_order, 0);
        assert_eq!(first.bookmark.bookmark_name.as_deref(), Some("The gate"));
        assert_eq!(first.commit_title.as_deref(), Some("Continue the story"));
        assert_eq!(first.commit_summary.as_deref().map(|s| s.len()), Some(103));
        assert!(first.resolvable);

        let second = t
            .engine
            .create_bookmark(
                "reader",
                fork.id,
                BookmarkPatch {
                    chapter_sort_order: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(second.bookmark.sort_order, 1);
        assert_eq!(second.commit_title.as_deref(), Some("Chapter 1"));

        let listed = t.engine.list_bookmarks("reader", fork.id).unwrap();
        let ids: Vec<_> = listed.iter().map(|b| b.bookmark.id).collect();
        assert_eq!(ids, vec![first.bookmark.id, second.bookmark.id]);
    }

    #[tokio::test]
    async fn test_bookmark_validation() {
        let t = TestEngine::new();
        let seed = t.published_seed("tale", 1);
        let fork = t.fork(&seed);

        assert!(matches!(
            t.engine.create_bookmark(
                "reader",
                fork.id,
                BookmarkPatch {
                    sort_order: Some(1001),
                    ..Default::default()
                }
            ),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            t.engine.create_bookmark("reader", fork.id, at(12345)),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            t.engine.create_bookmark("intruder", fork.id, BookmarkPatch::default()),
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bookmark_chapter_must_match_position() {
        let t = TestEngine::new();
        let seed = t.published_seed("tale", 1);
        let fork = t.fork(&seed);
        let commit = advance(&t, fork.id).await;
        assert_eq!(commit.sort_order, 1);

        assert!(matches!(
            t.engine.create_bookmark(
                "reader",
                fork.id,
                BookmarkPatch {
                    chapter_sort_order: Some(7),
                    ..at(commit.id)
                }
            ),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            t.engine.create_bookmark(
                "reader",
                fork.id,
                BookmarkPatch {
                    chapter_sort_order: Some(99),
                    ..Default::default()
                }
            ),
            Err(EngineError::InvalidState(_))
        ));
        assert!(t.engine.list_bookmarks("reader", fork.id).unwrap().is_empty());

        // The chapter follows the commit when left out.
        let bookmark = t.engine.create_bookmark("reader", fork.id, at(commit.id)).unwrap();
        assert_eq!(bookmark.bookmark.chapter_sort_order, Some(1));
        assert!(matches!(
            t.engine.update_bookmark(
                "reader",
                fork.id,
                bookmark.bookmark.id,
                BookmarkPatch {
                    chapter_sort_order: Some(2),
                    ..Default::default()
                }
            ),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_text_clears_bookmark_fields() {
        let t = TestEngine::new();
        let seed = t.published_seed("tale", 0);
        let fork = t.fork(&seed);
        let bookmark = t
            .engine
            .create_bookmark(
                "reader",
                fork.id,
                BookmarkPatch {
                    bookmark_name: Some("Gate".into()),
                    notes: Some("Come back here".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let kept = t
            .engine
            .update_bookmark(
                "reader",
                fork.id,
                bookmark.bookmark.id,
                BookmarkPatch {
                    notes: Some("  ".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(kept.bookmark.bookmark_name.as_deref(), Some("Gate"));
        assert!(kept.bookmark.notes.is_none());

        let cleared = t
            .engine
            .update_bookmark(
                "reader",
                fork.id,
                bookmark.bookmark.id,
                BookmarkPatch {
                    bookmark_name: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(cleared.bookmark.bookmark_name.is_none());
        assert!(cleared.bookmark.notes.is_none());
    }

    #[tokio::test]
    async fn test_stale_bookmark_is_kept_but_unresolvable() {
        let t = TestEngine::new();
        let seed = t.published_seed("tale", 0);
        t.engine
            .create_branch_point(
                "author",
                seed.id,
                2,
                None,
                vec![storyfork_config::types::NewStoryOption {
                    label: "Onward".into(),
                    ..Default::default()
                }],
            )
            .unwrap();
        let fork = t.fork(&seed);
        let first = advance(&t, fork.id).await;
        let second = advance(&t, fork.id).await;

        let bookmark = t.engine.create_bookmark("reader", fork.id, at(second.id)).unwrap();
        t.engine.rollback("reader", fork.id, first.id).unwrap();

        let listed = t.engine.list_bookmarks("reader", fork.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].resolvable);

        // Off-path commits cannot be bookmarked anew.
        assert!(matches!(
            t.engine.create_bookmark("reader", fork.id, at(second.id)),
            Err(EngineError::InvalidState(_))
        ));

        // Renaming the stale bookmark still works.
        let renamed = t
            .engine
            .update_bookmark(
                "reader",
                fork.id,
                bookmark.bookmark.id,
                BookmarkPatch {
                    bookmark_name: Some("Lost ending".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.bookmark.bookmark_name.as_deref(), Some("Lost ending"));
        assert_eq!(renamed.bookmark.commit_id, Some(second.id));
        assert_eq!(renamed.bookmark.sort_order, bookmark.bookmark.sort_order);
    }

    #[tokio::test]
    async fn test_delete_bookmark() {
        let t = TestEngine::new();
        let seed = t.published_seed("tale", 0);
        let fork = t.fork(&seed);
        let bookmark = t
            .engine
            .create_bookmark("reader", fork.id, BookmarkPatch::default())
            .unwrap();

        t.engine
            .delete_bookmark("reader", fork.id, bookmark.bookmark.id)
            .unwrap();
        assert!(t.engine.list_bookmarks("reader", fork.id).unwrap().is_empty());
        assert!(matches!(
            t.engine.delete_bookmark("reader", fork.id, bookmark.bookmark.id),
            Err(EngineError::NotFound(_))
        ));
    }
}
