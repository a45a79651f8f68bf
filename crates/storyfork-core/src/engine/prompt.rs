//! Prompt construction for continuation, option generation and summaries.

use storyfork_config::types::{BranchPoint, Chapter, Commit, StoryOption, StorySeed};

pub const STORY_SYSTEM_PROMPT: &str = "You are a collaborative fiction writer. \
Continue stories in the established voice, keep characters consistent, \
and write in Markdown without headings or commentary.";

/// Generated branch points carry at most this many options
pub const MAX_GENERATED_OPTIONS: usize = 4;
pub const MAX_OPTION_LABEL_CHARS: usize = 200;

/// Story so far: opening, canonical chapters, then the fork's active path.
fn story_context(seed: &StorySeed, chapters: &[Chapter], path: &[Commit]) -> String {
    let mut out = format!("Title: {}\n\n", seed.title);
    if let Some(opening) = seed.opening.as_deref().filter(|o| !o.trim().is_empty()) {
        out.push_str("[Opening]\n");
        out.push_str(opening.trim());
        out.push_str("\n\n");
    }
    for chapter in chapters {
        out.push_str(&format!("[Chapter {}: {}]\n", chapter.sort_order, chapter.title));
        out.push_str(chapter.content_markdown.trim());
        out.push_str("\n\n");
    }
    if !path.is_empty() {
        out.push_str("[Story so far]\n");
        for commit in path {
            out.push_str(commit.content_markdown.trim());
            out.push_str("\n\n");
        }
    }
    out
}

pub fn continuation_prompt(
    seed: &StorySeed,
    chapters: &[Chapter],
    path: &[Commit],
    branch_point: &BranchPoint,
    option: &StoryOption,
) -> String {
    let mut prompt = story_context(seed, chapters, path);
    prompt.push_str(&format!("[Reader choice] Decision {}", branch_point.sort_order));
    if let Some(anchor) = branch_point.anchor_text.as_deref() {
        prompt.push_str(&format!(" ({anchor})"));
    }
    prompt.push_str(&format!(": \"{}\"", option.label));
    if let Some(notes) = option.influence_notes.as_deref() {
        prompt.push_str(&format!("\nInfluence: {notes}"));
    }
    if let Some(hint) = option.plot_hint.as_deref() {
        prompt.push_str(&format!("\nPlot hint: {hint}"));
    }
    prompt.push_str("\n\nWrite the next passage of the story following the reader's choice.");
    prompt
}

pub fn options_prompt(seed: &StorySeed, chapters: &[Chapter], path: &[Commit]) -> String {
    let mut prompt = story_context(seed, chapters, path);
    prompt.push_str(&format!(
        "Suggest up to {MAX_GENERATED_OPTIONS} distinct directions the story could take next. \
         Reply with one short option per line and nothing else."
    ));
    prompt
}

pub fn summary_prompt(content: &str, max_chars: usize) -> String {
    format!(
        "Summarize the following chapter in at most {max_chars} characters. \
         Reply with the summary only.\n\n{}",
        content.trim()
    )
}

/// Extract option labels from a provider reply, one per line.
///
/// List markers (`-`, `*`, `1.`, `2)`) are stripped, blank and duplicate
/// lines skipped, labels truncated to the label limit.
pub fn parse_option_lines(reply: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for line in reply.lines() {
        let label = strip_list_marker(line.trim()).trim().trim_matches('"').trim();
        if label.is_empty() {
            continue;
        }
        let label: String = label.chars().take(MAX_OPTION_LABEL_CHARS).collect();
        if labels.iter().any(|existing| existing.eq_ignore_ascii_case(&label)) {
            continue;
        }
        labels.push(label);
        if labels.len() == MAX_GENERATED_OPTIONS {
            break;
        }
    }
    labels
}

fn strip_list_marker(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix(['-', '*', '•']) {
        return rest;
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(['.', ')', ':']) {
            return rest;
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn seed() -> StorySeed {
        StorySeed {
            id: 1,
            slug: "dragon-realm".into(),
            title: "Dragon Realm".into(),
            opening: Some("The mountain smoked.".into()),
            author: "author".into(),
            published: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_option_lines() {
        let reply = "1. Follow the river\n2) Climb the ridge\n\n- follow the river\n* \"Wait for dawn\"\n• Light a fire\n6. Too many";
        assert_eq!(
            parse_option_lines(reply),
            vec!["Follow the river", "Climb the ridge", "Wait for dawn", "Light a fire"]
        );
        assert!(parse_option_lines("   \n").is_empty());
    }

    #[test]
    fn test_continuation_prompt_mentions_choice() {
        let point = BranchPoint {
            id: 1,
            story_seed_id: 1,
            fork_id: None,
            sort_order: 1,
            anchor_text: Some("At the gate".into()),
            options: vec![],
            created_at: Utc::now(),
        };
        let option = StoryOption {
            id: 2,
            branch_point_id: 1,
            label: "Open the gate".into(),
            sort_order: 1,
            influence_notes: Some("bolder hero".into()),
            plot_hint: None,
            selection_count: 0,
        };
        let prompt = continuation_prompt(&seed(), &[], &[], &point, &option);
        assert!(prompt.contains("The mountain smoked."));
        assert!(prompt.contains("(At the gate)"));
        assert!(prompt.contains("\"Open the gate\""));
        assert!(prompt.contains("Influence: bolder hero"));
        assert!(!prompt.contains("Plot hint"));
    }

    #[test]
    fn test_summary_prompt() {
        let prompt = summary_prompt("  body  ", 200);
        assert!(prompt.contains("200 characters"));
        assert!(prompt.ends_with("body"));
    }
}
