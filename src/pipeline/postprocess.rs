//! Post-processing: deterministic cleanup of model output.
//!
//! Even with explicit rules in the prompt, models occasionally wrap the
//! answer in a ` ```markdown ` fence, echo the article delimiters back, use
//! CRLF line endings or sprinkle zero-width characters. These rules remove
//! such artefacts without touching content. Image references are never
//! altered here: the relocated URLs must survive the rewrite verbatim.
//!
//! Rule order matters: fences are stripped before line endings are
//! normalised so the fence regex sees the raw output, and delimiter lines are
//! removed before blank-line collapsing so no gap is left behind.

use crate::prompts::{CONTENT_END, CONTENT_START};
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one model response.
///
/// `source` is the text that was sent for rewriting. An outer fence is only
/// stripped when the source itself was not a fenced block.
///
/// Rules (applied in order):
/// 1. Strip an outer ```` ``` ````/```` ```markdown ```` fence
/// 2. Normalise line endings (CRLF → LF)
/// 3. Remove echoed article delimiters
/// 4. Trim trailing whitespace per line
/// 5. Collapse runs of blank lines to one
/// 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 7. Trim leading and trailing blank space
pub fn clean_rewrite(raw: &str, source: &str) -> String {
    let s = if source.trim_start().starts_with("```") {
        raw.to_string()
    } else {
        strip_outer_fence(raw)
    };
    let s = normalise_line_endings(&s);
    let s = remove_delimiters(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip outer fence ────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove echoed delimiters ────────────────────────────────────────

fn remove_delimiters(input: &str) -> String {
    input
        .lines()
        .filter(|line| {
            let t = line.trim();
            t != CONTENT_START && t != CONTENT_END
        })
        .collect::<Vec<_>>()
        .join("\n")
        .replace(CONTENT_START, "")
        .replace(CONTENT_END, "")
}

// ── Rule 4: Trim trailing whitespace ─────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 6: Remove invisible Unicode ─────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fence() {
        let raw = "```markdown\n# Hello\n\nWorld\n```";
        assert_eq!(clean_rewrite(raw, "# Hello\n\nworld"), "# Hello\n\nWorld");
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(clean_rewrite("```\nbody\n```\n", "body"), "body");
    }

    #[test]
    fn keeps_fence_when_source_was_fenced() {
        let src = "```rust\nfn main() {}\n```";
        let raw = "```\nfn main() {}\n```";
        assert_eq!(clean_rewrite(raw, src), raw);
    }

    #[test]
    fn inner_code_blocks_survive() {
        let raw = "Intro\n\n```rust\nlet x = 1;\n```\n\nOutro";
        assert_eq!(clean_rewrite(raw, "Intro"), raw);
    }

    #[test]
    fn removes_echoed_delimiters() {
        let raw = format!("{CONTENT_START}\n# T\n\nHi there\n{CONTENT_END}");
        let out = clean_rewrite(&raw, "# T\n\nHello");
        assert_eq!(out, "# T\n\nHi there");
        assert!(!out.contains("<<<"));
    }

    #[test]
    fn normalises_whitespace() {
        let raw = "a  \r\n\r\n\r\n\r\nb\u{200B}c  ";
        assert_eq!(clean_rewrite(raw, "x"), "a\n\nbc");
    }

    #[test]
    fn image_references_untouched() {
        let raw = "Text\n\n![chart](chart.png)\n\n![cdn](https://res.cloudinary.com/x/a.jpg)";
        assert_eq!(clean_rewrite(raw, "x"), raw);
    }
}
