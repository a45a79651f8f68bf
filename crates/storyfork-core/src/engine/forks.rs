use super::StoryEngine;
use crate::error::{EngineError, EngineResult};
use storyfork_config::types::{ForkDeletion, InsertOutcome, ReaderFork, StorySeed};

impl StoryEngine {
    /// Fork a published seed for `reader`.
    ///
    /// A reader holds at most one fork per seed; asking again returns the
    /// existing fork as `InsertOutcome::Existing`. Without an explicit
    /// chapter the fork starts at the seed's latest chapter.
    pub fn create_fork(
        &self,
        reader: &str,
        seed_id: i64,
        from_chapter_sort_order: Option<i32>,
    ) -> EngineResult<InsertOutcome<ReaderFork>> {
        let seed = self.forkable_seed(reader, seed_id)?;
        self.fork_seed(reader, &seed, from_chapter_sort_order)
    }

    pub fn create_fork_by_slug(
        &self,
        reader: &str,
        slug: &str,
        from_chapter_sort_order: Option<i32>,
    ) -> EngineResult<InsertOutcome<ReaderFork>> {
        let seed = self.get_seed_by_slug(reader, slug)?;
        let seed = self.forkable_seed(reader, seed.id)?;
        self.fork_seed(reader, &seed, from_chapter_sort_order)
    }

    /// The caller's fork of a seed, if any
    pub fn find_fork(&self, reader: &str, seed_id: i64) -> EngineResult<Option<ReaderFork>> {
        self.get_seed(reader, seed_id)?;
        Ok(self.persistence.find_fork(reader, seed_id)?)
    }

    pub fn list_forks(&self, reader: &str) -> EngineResult<Vec<ReaderFork>> {
        Ok(self.persistence.list_forks_by_reader(reader)?)
    }

    pub fn get_fork(&self, reader: &str, fork_id: i64) -> EngineResult<ReaderFork> {
        self.owned_fork(reader, fork_id)
    }

    /// Delete a fork with its commits, bookmarks, generated branch points and
    /// previews. Refused while the fork has an open pull request.
    pub async fn delete_fork(&self, reader: &str, fork_id: i64) -> EngineResult<()> {
        let fork = self.owned_fork(reader, fork_id)?;
        match self.persistence.delete_fork_cascade(fork.id)? {
            ForkDeletion::Deleted => {}
            ForkDeletion::Missing => return Err(EngineError::NotFound("fork")),
            ForkDeletion::OpenPullRequests(open) => {
                return Err(EngineError::invalid_state(format!(
                    "fork has {open} open pull request(s); close them before deleting"
                )));
            }
        }
        self.previews.delete(fork.id).await?;
        tracing::info!(fork_id, reader, "Fork deleted");
        Ok(())
    }

    fn forkable_seed(&self, reader: &str, seed_id: i64) -> EngineResult<StorySeed> {
        let seed = self.get_seed(reader, seed_id)?;
        if !seed.published {
            return Err(EngineError::NotFound("story seed"));
        }
        Ok(seed)
    }

    fn fork_seed(
        &self,
        reader: &str,
        seed: &StorySeed,
        from_chapter_sort_order: Option<i32>,
    ) -> EngineResult<InsertOutcome<ReaderFork>> {
        let chapters = self.persistence.count_chapters(seed.id)?;
        let origin = match from_chapter_sort_order {
            Some(n) if n < 1 || n > chapters => {
                return Err(EngineError::invalid_input(format!(
                    "fromChapterSortOrder must be between 1 and {chapters}"
                )));
            }
            Some(n) => Some(n),
            None if chapters > 0 => Some(chapters),
            None => None,
        };

        let outcome = self
            .persistence
            .insert_fork(seed.id, reader, &seed.title, origin)?;
        match &outcome {
            InsertOutcome::Created(fork) => tracing::info!(
                fork_id = fork.id,
                seed_id = seed.id,
                reader,
                from_chapter = ?fork.from_chapter_sort_order,
                "Fork created"
            ),
            InsertOutcome::Existing(fork) => {
                tracing::debug!(fork_id = fork.id, reader, "Reusing existing fork")
            }
        }
        Ok(outcome)
    }
}
