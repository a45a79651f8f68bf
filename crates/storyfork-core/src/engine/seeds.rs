use super::StoryEngine;
use crate::engine::prompt::MAX_OPTION_LABEL_CHARS;
use crate::error::{EngineError, EngineResult};
use storyfork_config::types::{BranchPoint, Chapter, NewStoryOption, StorySeed};

const MAX_TITLE_CHARS: usize = 200;

fn default_opening_options() -> Vec<NewStoryOption> {
    vec![
        NewStoryOption {
            label: "Continue the story".to_string(),
            sort_order: 1,
            influence_notes: Some("Follow the plot where the opening leads".to_string()),
            plot_hint: None,
        },
        NewStoryOption {
            label: "Explore a new direction".to_string(),
            sort_order: 2,
            influence_notes: Some("Take the story somewhere unexpected".to_string()),
            plot_hint: None,
        },
    ]
}

/// Lowercase ASCII slug: letters and digits kept, runs of spaces, hyphens
/// and underscores collapsed into one hyphen, everything else dropped.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_hyphen = false;
    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_hyphen = true;
        }
    }
    slug
}

fn require_text(value: &str, field: &str, max_chars: usize) -> EngineResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::invalid_input(format!("{field} must not be empty")));
    }
    if value.chars().count() > max_chars {
        return Err(EngineError::invalid_input(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(value.to_string())
}

impl StoryEngine {
    /// Published seeds are public; drafts are visible to their author only.
    fn visible_seed(&self, caller: &str, seed_id: i64) -> EngineResult<StorySeed> {
        let seed = self.seed(seed_id)?;
        if seed.published || seed.author == caller {
            Ok(seed)
        } else {
            Err(EngineError::NotFound("story seed"))
        }
    }

    fn authored_seed(&self, caller: &str, seed_id: i64) -> EngineResult<StorySeed> {
        let seed = self.visible_seed(caller, seed_id)?;
        if seed.author != caller {
            return Err(EngineError::Unauthorized("only the story author may do this"));
        }
        Ok(seed)
    }

    /// Create a draft seed with an opening branch point offering two options.
    pub fn create_seed(
        &self,
        author: &str,
        title: &str,
        slug: Option<&str>,
        opening: Option<&str>,
    ) -> EngineResult<StorySeed> {
        let title = require_text(title, "title", MAX_TITLE_CHARS)?;
        let mut slug = slugify(slug.unwrap_or(title.as_str()));
        if slug.is_empty() {
            slug = format!("story-{}", chrono::Utc::now().timestamp_millis());
        }
        let opening = opening.map(str::trim).filter(|o| !o.is_empty());

        let seed = self
            .persistence
            .insert_seed(author, &slug, &title, opening)?
            .ok_or_else(|| EngineError::AlreadyExists {
                entity: "story seed",
                key: slug.clone(),
            })?;
        self.persistence
            .insert_branch_point(seed.id, None, 1, None, &default_opening_options())?;
        tracing::info!(seed_id = seed.id, slug = %seed.slug, author, "Story seed created");
        Ok(seed)
    }

    pub fn get_seed(&self, caller: &str, seed_id: i64) -> EngineResult<StorySeed> {
        self.visible_seed(caller, seed_id)
    }

    pub fn get_seed_by_slug(&self, caller: &str, slug: &str) -> EngineResult<StorySeed> {
        let seed = self
            .persistence
            .get_seed_by_slug(slug)?
            .ok_or(EngineError::NotFound("story seed"))?;
        self.visible_seed(caller, seed.id)
    }

    pub fn publish_seed(&self, author: &str, seed_id: i64) -> EngineResult<StorySeed> {
        let seed = self.authored_seed(author, seed_id)?;
        if seed.published {
            return Ok(seed);
        }
        let seed = self
            .persistence
            .set_seed_published(seed_id, true)?
            .ok_or(EngineError::NotFound("story seed"))?;
        tracing::info!(seed_id, "Story seed published");
        Ok(seed)
    }

    /// Append a chapter after the last one; chapters are never rewritten.
    pub fn append_chapter(
        &self,
        author: &str,
        seed_id: i64,
        title: &str,
        content_markdown: &str,
    ) -> EngineResult<Chapter> {
        self.authored_seed(author, seed_id)?;
        let title = require_text(title, "title", MAX_TITLE_CHARS)?;
        if content_markdown.trim().is_empty() {
            return Err(EngineError::invalid_input("contentMarkdown must not be empty"));
        }
        let chapter = self
            .persistence
            .insert_chapter(seed_id, &title, content_markdown)?;
        tracing::info!(seed_id, chapter = chapter.sort_order, "Chapter appended");
        Ok(chapter)
    }

    pub fn list_chapters(&self, caller: &str, seed_id: i64) -> EngineResult<Vec<Chapter>> {
        self.visible_seed(caller, seed_id)?;
        Ok(self.persistence.list_chapters(seed_id, None)?)
    }

    /// Author a branch point visible to every fork of the seed.
    pub fn create_branch_point(
        &self,
        author: &str,
        seed_id: i64,
        sort_order: i32,
        anchor_text: Option<&str>,
        options: Vec<NewStoryOption>,
    ) -> EngineResult<BranchPoint> {
        self.authored_seed(author, seed_id)?;
        if sort_order < 1 {
            return Err(EngineError::invalid_input("sortOrder must be at least 1"));
        }
        if options.is_empty() {
            return Err(EngineError::invalid_input(
                "a branch point needs at least one option",
            ));
        }
        let options = options
            .into_iter()
            .enumerate()
            .map(|(index, option)| {
                Ok(NewStoryOption {
                    label: require_text(&option.label, "option label", MAX_OPTION_LABEL_CHARS)?,
                    sort_order: if option.sort_order == 0 {
                        index as i32 + 1
                    } else {
                        option.sort_order
                    },
                    ..option
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        let anchor_text = anchor_text.map(str::trim).filter(|a| !a.is_empty());

        let point = self.persistence.insert_branch_point(
            seed_id,
            None,
            sort_order,
            anchor_text,
            &options,
        )?;
        tracing::info!(seed_id, branch_point_id = point.id, sort_order, "Branch point authored");
        Ok(point)
    }

    /// Authored branch points of a seed, optionally at one position.
    pub fn get_branch_points_for_position(
        &self,
        caller: &str,
        seed_id: i64,
        position: Option<i32>,
    ) -> EngineResult<Vec<BranchPoint>> {
        self.visible_seed(caller, seed_id)?;
        Ok(self.persistence.list_branch_points(seed_id, None, position)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEngine;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Dragon Realm"), "dragon-realm");
        assert_eq!(slugify("  The  Fall -- of  Rome! "), "the-fall-of-rome");
        assert_eq!(slugify("snake_case_title"), "snake-case-title");
        assert_eq!(slugify("龙"), "");
    }

    #[tokio::test]
    async fn test_create_seed_adds_opening_branch_point() {
        let t = TestEngine::new();
        let seed = t
            .engine
            .create_seed("author", "Dragon Realm", None, Some("Smoke rose."))
            .unwrap();
        assert_eq!(seed.slug, "dragon-realm");
        assert!(!seed.published);

        let points = t
            .engine
            .get_branch_points_for_position("author", seed.id, Some(1))
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].options.len(), 2);
        assert_eq!(points[0].options[0].label, "Continue the story");
    }

    #[tokio::test]
    async fn test_duplicate_slug_is_rejected() {
        let t = TestEngine::new();
        t.engine.create_seed("author", "Tale", None, None).unwrap();
        let err = t
            .engine
            .create_seed("other", "Another", Some("tale"), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_drafts_are_private_to_author() {
        let t = TestEngine::new();
        let seed = t.engine.create_seed("author", "Tale", None, None).unwrap();
        assert!(matches!(
            t.engine.get_seed("reader", seed.id),
            Err(EngineError::NotFound(_))
        ));
        t.engine.publish_seed("author", seed.id).unwrap();
        assert!(t.engine.get_seed_by_slug("reader", "tale").is_ok());
    }

    #[tokio::test]
    async fn test_only_author_appends_chapters() {
        let t = TestEngine::new();
        let seed = t.published_seed("dragon-realm", 0);
        assert!(matches!(
            t.engine.append_chapter("reader", seed.id, "Ch", "text"),
            Err(EngineError::Unauthorized(_))
        ));
        let first = t.engine.append_chapter("author", seed.id, "One", "text").unwrap();
        let second = t.engine.append_chapter("author", seed.id, "Two", "text").unwrap();
        assert_eq!((first.sort_order, second.sort_order), (1, 2));
        assert_eq!(t.engine.list_chapters("reader", seed.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_branch_point_validates_options() {
        let t = TestEngine::new();
        let seed = t.published_seed("tale", 0);
        assert!(matches!(
            t.engine.create_branch_point("author", seed.id, 2, None, vec![]),
            Err(EngineError::InvalidInput(_))
        ));
        let point = t
            .engine
            .create_branch_point(
                "author",
                seed.id,
                2,
                Some(" The bridge "),
                vec![
                    NewStoryOption {
                        label: "Cross".into(),
                        ..Default::default()
                    },
                    NewStoryOption {
                        label: "Turn back".into(),
                        ..Default::default()
                    },
                ],
            )
            .unwrap();
        assert_eq!(point.anchor_text.as_deref(), Some("The bridge"));
        assert_eq!(point.options[1].sort_order, 2);
    }
}
