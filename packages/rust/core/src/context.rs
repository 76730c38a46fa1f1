//! Rolling narrative context carried between scene generations.
//!
//! Each field holds at most [`CONTEXT_WINDOW_CHARS`] characters; when it grows
//! past that, the oldest text is dropped and the most recent kept.

use storyboard_shared::Scene;

/// Per-field budget, in characters.
pub const CONTEXT_WINDOW_CHARS: usize = 4000;

/// Appended to the summary before the last scene is generated.
pub const FINAL_SCENE_MARKER: &str = "\n\nThis is the final scene.";

/// Summary and script text accumulated from previously generated scenes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub summary: String,
    pub script: String,
}

impl Context {
    /// Empty context used at the start of every run.
    pub fn initial() -> Self {
        Self::default()
    }

    /// Flag that the next scene closes the story.
    ///
    /// The marker is not trimmed to the window, so the context handed to the
    /// generator for the last scene may exceed the budget by the marker length.
    pub fn mark_final(mut self) -> Self {
        self.summary.push_str(FINAL_SCENE_MARKER);
        self
    }

    /// Fold a freshly generated scene into the context.
    pub fn advance(&self, generated: &Scene) -> Self {
        Self {
            summary: append_bounded(&self.summary, &generated.summary),
            script: append_bounded(&self.script, &generated.script),
        }
    }
}

/// `"{current} {addition}"`, keeping only the last [`CONTEXT_WINDOW_CHARS`] chars.
fn append_bounded(current: &str, addition: &str) -> String {
    let joined = format!("{current} {addition}");
    keep_tail(&joined, CONTEXT_WINDOW_CHARS)
}

fn keep_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated(summary: &str, script: &str) -> Scene {
        Scene {
            name: "n".into(),
            description: "d".into(),
            summary: summary.into(),
            script: script.into(),
        }
    }

    #[test]
    fn initial_is_empty() {
        let ctx = Context::initial();
        assert!(ctx.summary.is_empty());
        assert!(ctx.script.is_empty());
    }

    #[test]
    fn advance_joins_with_a_space() {
        let ctx = Context::initial().advance(&generated("first", "INT. ROOM"));
        assert_eq!(ctx.summary, " first");
        assert_eq!(ctx.script, " INT. ROOM");

        let ctx = ctx.advance(&generated("second", "EXT. STREET"));
        assert_eq!(ctx.summary, " first second");
        assert_eq!(ctx.script, " INT. ROOM EXT. STREET");
    }

    #[test]
    fn advance_length_is_bounded_sum() {
        for (l, m) in [(0, 0), (10, 20), (3990, 5), (3990, 9), (3990, 200), (4000, 1), (4000, 4000)] {
            let ctx = Context {
                summary: "a".repeat(l),
                script: String::new(),
            };
            let next = ctx.advance(&generated(&"b".repeat(m), ""));
            assert_eq!(
                next.summary.chars().count(),
                CONTEXT_WINDOW_CHARS.min(l + 1 + m),
                "L={l} M={m}"
            );
        }
    }

    #[test]
    fn truncation_keeps_the_most_recent_text() {
        let ctx = Context {
            summary: format!("OLD{}", "x".repeat(3997)),
            script: String::new(),
        };
        let next = ctx.advance(&generated("NEWEST", ""));
        assert_eq!(next.summary.chars().count(), CONTEXT_WINDOW_CHARS);
        assert!(next.summary.ends_with(" NEWEST"));
        assert!(!next.summary.starts_with("OLD"));
    }

    #[test]
    fn long_generated_text_alone_is_cut_from_the_front() {
        let long: String = (0..5000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let next = Context::initial().advance(&generated("", &long));
        assert_eq!(next.script.chars().count(), CONTEXT_WINDOW_CHARS);
        assert!(long.ends_with(&next.script));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let ctx = Context {
            summary: "é".repeat(3999),
            script: String::new(),
        };
        let next = ctx.advance(&generated("ü", ""));
        assert_eq!(next.summary.chars().count(), CONTEXT_WINDOW_CHARS);
        assert!(next.summary.ends_with(" ü"));
    }

    #[test]
    fn fields_stay_within_budget_over_many_scenes() {
        let mut ctx = Context::initial();
        for i in 0..50 {
            ctx = ctx.advance(&generated(&format!("summary {i} {}", "s".repeat(300)), &"p".repeat(700)));
            assert!(ctx.summary.chars().count() <= CONTEXT_WINDOW_CHARS);
            assert!(ctx.script.chars().count() <= CONTEXT_WINDOW_CHARS);
        }
    }

    #[test]
    fn mark_final_appends_marker_to_summary_only() {
        let ctx = Context {
            summary: " so far".into(),
            script: " script".into(),
        }
        .mark_final();
        assert_eq!(ctx.summary, " so far\n\nThis is the final scene.");
        assert_eq!(ctx.script, " script");
    }
}
