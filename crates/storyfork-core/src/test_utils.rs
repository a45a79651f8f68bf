use crate::agent::providers::MockProvider;
use crate::agent::GenerationConfig;
use crate::engine::{MergeListener, StoryEngine};
use crate::preview::PreviewCache;
use std::sync::Arc;
use storyfork_config::config::PreviewConfig;
use storyfork_config::persistence::Persistence;
use storyfork_config::types::{ReaderFork, StorySeed};
use tempfile::TempDir;

/// Engine over a throwaway database, driven by a mock provider.
///
/// Must be created inside a tokio runtime (the preview worker is spawned).
pub struct TestEngine {
    pub engine: Arc<StoryEngine>,
    pub provider: MockProvider,
    _dir: TempDir,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_provider(MockProvider::new("The story continues."))
    }

    pub fn with_provider(provider: MockProvider) -> Self {
        Self::build(provider, None)
    }

    pub fn with_merge_listener(listener: Arc<dyn MergeListener>) -> Self {
        Self::build(MockProvider::new("The story continues."), Some(listener))
    }

    fn build(provider: MockProvider, listener: Option<Arc<dyn MergeListener>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Persistence::new(dir.path().join("test.duckdb")).unwrap();
        let shared: Arc<MockProvider> = Arc::new(provider.clone());
        let (previews, _handles) = PreviewCache::spawn_in_memory(
            &PreviewConfig::default(),
            shared.clone(),
            GenerationConfig::default(),
        );
        let mut engine = StoryEngine::new(persistence, shared, previews);
        if let Some(listener) = listener {
            engine = engine.with_merge_listener(listener);
        }
        Self {
            engine: Arc::new(engine),
            provider,
            _dir: dir,
        }
    }

    /// Published seed by "author" with `chapters` chapters
    pub fn published_seed(&self, slug: &str, chapters: usize) -> StorySeed {
        let seed = self
            .engine
            .create_seed("author", slug, Some(slug), Some("Once upon a time."))
            .unwrap();
        for i in 1..=chapters {
            self.engine
                .append_chapter("author", seed.id, &format!("Chapter {i}"), &format!("Text {i}"))
                .unwrap();
        }
        self.engine.publish_seed("author", seed.id).unwrap()
    }

    /// Fork of `seed` owned by "reader"
    pub fn fork(&self, seed: &StorySeed) -> ReaderFork {
        self.engine
            .create_fork("reader", seed.id, None)
            .unwrap()
            .into_inner()
    }
}
