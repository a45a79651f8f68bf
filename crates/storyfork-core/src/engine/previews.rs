use super::StoryEngine;
use crate::error::{EngineError, EngineResult};
use crate::preview::{AiPreviewChapter, PreviewDraft, SummaryAck};
use storyfork_config::types::{Commit, NewCommit};

impl StoryEngine {
    pub async fn save_preview(
        &self,
        reader: &str,
        fork_id: i64,
        draft: PreviewDraft,
    ) -> EngineResult<AiPreviewChapter> {
        let fork = self.owned_fork(reader, fork_id)?;
        self.previews.save(fork.id, draft).await
    }

    /// Preview chapters of a fork. An evicted cache reads as empty.
    pub async fn get_previews(
        &self,
        reader: &str,
        fork_id: i64,
    ) -> EngineResult<Vec<AiPreviewChapter>> {
        let fork = self.owned_fork(reader, fork_id)?;
        self.previews.get(fork.id).await
    }

    pub async fn delete_previews(&self, reader: &str, fork_id: i64) -> EngineResult<()> {
        let fork = self.owned_fork(reader, fork_id)?;
        self.previews.delete(fork.id).await
    }

    /// Returns whether the chapter was present.
    pub async fn delete_preview_chapter(
        &self,
        reader: &str,
        fork_id: i64,
        chapter_number: i32,
    ) -> EngineResult<bool> {
        let fork = self.owned_fork(reader, fork_id)?;
        self.previews.delete_chapter(fork.id, chapter_number).await
    }

    pub async fn generate_preview_summary(
        &self,
        reader: &str,
        fork_id: i64,
        chapter_number: i32,
    ) -> EngineResult<SummaryAck> {
        let fork = self.owned_fork(reader, fork_id)?;
        self.previews.generate_summary(fork.id, chapter_number).await
    }

    /// Turn a preview chapter into a commit on the frontier and drop it from
    /// the cache.
    pub async fn promote_preview(
        &self,
        reader: &str,
        fork_id: i64,
        chapter_number: i32,
    ) -> EngineResult<Commit> {
        let fork = self.owned_fork(reader, fork_id)?;
        let preview = self
            .previews
            .chapter(fork.id, chapter_number)
            .await?
            .ok_or(EngineError::NotFound("preview chapter"))?;
        let path = self.active_path(&fork)?;

        let new_commit = NewCommit {
            parent_commit_id: fork.head_commit_id,
            branch_point_id: None,
            option_id: None,
            content_markdown: preview.content_markdown,
            sort_order: path.len() as i32 + 1,
        };
        let commit = self
            .persistence
            .append_commit(fork.id, fork.version, &new_commit)?
            .ok_or_else(|| {
                EngineError::invalid_state("fork frontier moved during promotion; reload and retry")
            })?;
        self.previews.delete_chapter(fork.id, chapter_number).await?;
        tracing::info!(
            fork_id,
            commit_id = commit.id,
            chapter = chapter_number,
            "AI preview promoted"
        );
        Ok(commit)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::EngineError;
    use crate::preview::PreviewDraft;
    use crate::test_utils::TestEngine;

    fn draft(number: i32, content: &str) -> PreviewDraft {
        PreviewDraft {
            chapter_number: number,
            content_markdown: content.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_previews_are_owner_scoped() {
        let t = TestEngine::new();
        let seed = t.published_seed("tale", 1);
        let fork = t.fork(&seed);
        t.engine.save_preview("reader", fork.id, draft(2, "draft")).await.unwrap();

        assert!(matches!(
            t.engine.get_previews("intruder", fork.id).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            t.engine.save_preview("intruder", fork.id, draft(2, "mine")).await,
            Err(EngineError::NotFound(_))
        ));
        assert_eq!(t.engine.get_previews("reader", fork.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_preview_chapter_and_clear() {
        let t = TestEngine::new();
        let seed = t.published_seed("tale", 1);
        let fork = t.fork(&seed);
        t.engine.save_preview("reader", fork.id, draft(2, "two")).await.unwrap();
        t.engine.save_preview("reader", fork.id, draft(3, "three")).await.unwrap();

        assert!(t.engine.delete_preview_chapter("reader", fork.id, 2).await.unwrap());
        assert!(!t.engine.delete_preview_chapter("reader", fork.id, 2).await.unwrap());
        let left = t.engine.get_previews("reader", fork.id).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].chapter_number, 3);

        t.engine.delete_previews("reader", fork.id).await.unwrap();
        assert!(t.engine.get_previews("reader", fork.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_promote_preview_appends_commit() {
        let t = TestEngine::new();
        let seed = t.published_seed("tale", 1);
        let fork = t.fork(&seed);
        t.engine
            .save_preview("reader", fork.id, draft(2, "The drafted chapter."))
            .await
            .unwrap();

        let commit = t.engine.promote_preview("reader", fork.id, 2).await.unwrap();
        assert_eq!(commit.content_markdown, "The drafted chapter.");
        assert!(commit.parent_commit_id.is_none());
        assert!(commit.option_id.is_none());
        assert_eq!(commit.sort_order, 1);

        let fork = t.engine.get_fork("reader", fork.id).unwrap();
        assert_eq!(fork.head_commit_id, Some(commit.id));
        assert!(t.engine.get_previews("reader", fork.id).await.unwrap().is_empty());
        assert!(matches!(
            t.engine.promote_preview("reader", fork.id, 2).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_summary_for_missing_chapter() {
        let t = TestEngine::new();
        let seed = t.published_seed("tale", 1);
        let fork = t.fork(&seed);
        assert!(matches!(
            t.engine.generate_preview_summary("reader", fork.id, 9).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
