//! Prompts for the rewrite stage.
//!
//! Every prompt lives here so that changing the default behaviour requires
//! editing exactly one place, and so unit tests can inspect prompts directly
//! without a live model.
//!
//! Callers override only the *instruction* (see
//! [`crate::process::process`]); the rules in [`REWRITE_RULES`] are always
//! appended, because the pipeline's image-preservation guarantee depends on
//! them.

/// Default rewrite instruction, used when the caller supplies none.
pub const DEFAULT_INSTRUCTION: &str =
    "Rewrite the following Markdown article so that it reads more concisely and fluently. \
Improve sentence structure and clarity while keeping the author's voice.";

/// Rules appended to every rewrite prompt, whatever the instruction.
pub const REWRITE_RULES: &str = r#"Follow these rules precisely:

1. Keep the Markdown structure unchanged: headings, lists, code blocks, tables, quotes.
2. Keep every image reference (![alt](url)) exactly as written, in its original place.
3. Do not add commentary or content unrelated to the article.
4. Keep the core ideas and information of the original.
5. Return ONLY the rewritten Markdown body: no preamble, no explanation, no ```markdown fences."#;

/// Opening delimiter around the article text.
pub const CONTENT_START: &str = "<<<ARTICLE>>>";

/// Closing delimiter around the article text.
pub const CONTENT_END: &str = "<<<END ARTICLE>>>";

/// Trivial prompt used to check that a model candidate is reachable.
pub const PROBE_PROMPT: &str = "Reply with the single word: ok";

/// Build the full prompt for one rewrite call.
///
/// `instruction` replaces [`DEFAULT_INSTRUCTION`] when given and non-blank.
pub fn build_rewrite_prompt(instruction: Option<&str>, text: &str) -> String {
    let instruction = instruction
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_INSTRUCTION);

    format!(
        "{instruction}\n\n{REWRITE_RULES}\n\nThe article is between the markers below.\n\
{CONTENT_START}\n{text}\n{CONTENT_END}\n\n\
Return the rewritten Markdown directly."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_instruction_used_when_none() {
        let p = build_rewrite_prompt(None, "# T\n\nHello");
        assert!(p.starts_with(DEFAULT_INSTRUCTION));
        assert!(p.contains(REWRITE_RULES));
        assert!(p.contains(&format!("{CONTENT_START}\n# T\n\nHello\n{CONTENT_END}")));
    }

    #[test]
    fn custom_instruction_keeps_mandatory_rules() {
        let p = build_rewrite_prompt(Some("Translate to plain English."), "body");
        assert!(p.starts_with("Translate to plain English."));
        assert!(!p.contains(DEFAULT_INSTRUCTION));
        assert!(p.contains("exactly as written"));
    }

    #[test]
    fn blank_instruction_falls_back_to_default() {
        let p = build_rewrite_prompt(Some("   "), "body");
        assert!(p.starts_with(DEFAULT_INSTRUCTION));
    }
}
