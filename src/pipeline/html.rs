//! Rendered-page → Markdown: the deterministic half of the browser fallback.
//!
//! The browser only navigates and hands back the rendered DOM as HTML. The
//! remaining steps run here, in-process, so they can be tested without a
//! browser:
//!
//! ```text
//! rendered HTML ──▶ locate ──▶ sanitize ──▶ coerce ──▶ "# title\n\nbody"
//!        └────────▶ resolve_title ─────────────┘
//! ```
//!
//! Selector probing is an ordered list with early exit. Locating content and
//! resolving the title never fail: each has a permissive last resort (the
//! page body, a placeholder title).

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use scraper::{Html, Selector};
use tracing::debug;

/// Content containers, most specific first.
pub const CONTENT_SELECTORS: &[&str] = &[
    ".rich_media_content",
    ".article-content",
    ".content",
    ".article",
    ".post-content",
];

/// Non-content elements removed from the located subtree.
pub const NOISE_SELECTORS: &[&str] = &[
    "script",
    "style",
    "iframe",
    "noscript",
    ".ad",
    ".advertisement",
    ".share-btn",
    ".like-btn",
    ".comment-section",
];

/// Title sources, in probe order. The meta tag is read from its `content`.
pub const TITLE_SELECTORS: &[&str] = &[
    "h1",
    ".rich_media_title",
    ".article-title",
    ".title",
    r#"meta[property="og:title"]"#,
];

/// Title used when no probe yields text.
pub const PLACEHOLDER_TITLE: &str = "Untitled";

/// The subtree chosen as article content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedContent {
    pub html: String,
    /// Selector that matched, or `None` when the body fallback was used.
    pub selector: Option<&'static str>,
}

static CONTENT_PROBES: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| parse_all(CONTENT_SELECTORS));
static TITLE_PROBES: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| parse_all(TITLE_SELECTORS));
static BODY: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("body").ok());

fn parse_all(selectors: &'static [&'static str]) -> Vec<(&'static str, Selector)> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok().map(|sel| (*s, sel)))
        .collect()
}

/// Pick the article container: the first content selector that matches,
/// else `<body>`, else the whole document.
pub fn locate_content(page_html: &str) -> LocatedContent {
    let doc = Html::parse_document(page_html);

    for (name, selector) in CONTENT_PROBES.iter() {
        if let Some(el) = doc.select(selector).next() {
            debug!("Content located with '{}'", name);
            return LocatedContent {
                html: el.inner_html(),
                selector: Some(name),
            };
        }
    }

    debug!("No content selector matched, using page body");
    let html = BODY
        .as_ref()
        .and_then(|body| doc.select(body).next())
        .map(|el| el.inner_html())
        .unwrap_or_else(|| page_html.to_string());
    LocatedContent {
        html,
        selector: None,
    }
}

/// Remove [`NOISE_SELECTORS`] elements (and their children) from `html`.
///
/// Returns the input unchanged if the rewriter rejects it.
pub fn sanitize(html: &str) -> String {
    let mut output = String::new();
    let mut rewriter = lol_html::HtmlRewriter::new(
        lol_html::Settings {
            element_content_handlers: NOISE_SELECTORS
                .iter()
                .map(|sel| {
                    lol_html::element!(*sel, |el| {
                        el.remove();
                        Ok(())
                    })
                })
                .collect(),
            ..Default::default()
        },
        |c: &[u8]| {
            output.push_str(&String::from_utf8_lossy(c));
        },
    );

    if rewriter.write(html.as_bytes()).is_err() {
        return html.to_string();
    }
    if rewriter.end().is_err() {
        return html.to_string();
    }

    output
}

/// First non-empty title among [`TITLE_SELECTORS`], else [`PLACEHOLDER_TITLE`].
pub fn resolve_title(page_html: &str) -> String {
    let doc = Html::parse_document(page_html);

    for (name, selector) in TITLE_PROBES.iter() {
        let Some(el) = doc.select(selector).next() else {
            continue;
        };
        let raw = match el.value().attr("content") {
            Some(content) if el.value().name() == "meta" => content.to_string(),
            _ => el.text().collect::<String>(),
        };
        let title = collapse_inline_whitespace(&raw);
        if !title.is_empty() {
            debug!("Title resolved with '{}'", name);
            return title;
        }
    }

    PLACEHOLDER_TITLE.to_string()
}

// ── Coercion ─────────────────────────────────────────────────────────────

static RE_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static RE_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static RE_HEADING_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<h([1-6])\b[^>]*>").unwrap());
static RE_HEADING_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</h[1-6]\s*>").unwrap());
static RE_P_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<p\b[^>]*>").unwrap());
static RE_P_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</p\s*>").unwrap());
static RE_BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\b[^>]*>").unwrap());
static RE_STRONG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</?(?:strong|b)\b[^>]*>").unwrap());
static RE_EM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</?(?:em|i)\b[^>]*>").unwrap());
static RE_IMG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<img\b([^>]*)>").unwrap());
static RE_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static RE_HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{00A0}\u{3000}]+").unwrap());
static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_SOURCE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]*[\r\n]+[ \t]*").unwrap());

static ATTR_SRC: Lazy<Regex> = Lazy::new(|| attr_regex("src"));
static ATTR_DATA_SRC: Lazy<Regex> = Lazy::new(|| attr_regex("data-src"));
static ATTR_HREF: Lazy<Regex> = Lazy::new(|| attr_regex("href"));

fn attr_regex(name: &str) -> Regex {
    Regex::new(&format!(
        r#"(?i)(?:^|\s){}\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
        regex::escape(name)
    ))
    .unwrap()
}

/// Convert a sanitized HTML fragment to Markdown and prepend `# title`.
///
/// Tag substitution only: headings → `#`..`###`, paragraphs → blank lines,
/// bold/italic → `**`/`*`, links → `[text](href)`, images → `![src](src)`.
/// Every other tag is dropped and whitespace runs are collapsed.
pub fn coerce_to_markdown(html: &str, title: &str) -> String {
    let s = RE_SCRIPT.replace_all(html, "");
    let s = RE_STYLE.replace_all(&s, "");
    let s = RE_COMMENT.replace_all(&s, "");
    // Line breaks in the markup are not line breaks in the text.
    let s = RE_SOURCE_BREAK.replace_all(&s, " ");

    let s = RE_HEADING_OPEN.replace_all(&s, |caps: &Captures<'_>| {
        let level: usize = caps[1].parse().unwrap_or(3);
        format!("\n\n{} ", "#".repeat(level.min(3)))
    });
    let s = RE_HEADING_CLOSE.replace_all(&s, "\n\n");
    let s = RE_P_OPEN.replace_all(&s, "");
    let s = RE_P_CLOSE.replace_all(&s, "\n\n");
    let s = RE_BR.replace_all(&s, "\n");
    let s = RE_STRONG.replace_all(&s, "**");
    let s = RE_EM.replace_all(&s, "*");

    let s = RE_IMG.replace_all(&s, |caps: &Captures<'_>| {
        match attr(&ATTR_DATA_SRC, &caps[1]).or_else(|| attr(&ATTR_SRC, &caps[1])) {
            Some(src) => format!("![{src}]({src})"),
            None => String::new(),
        }
    });
    let s = RE_ANCHOR.replace_all(&s, |caps: &Captures<'_>| {
        let text = caps[2].trim();
        match attr(&ATTR_HREF, &caps[1]) {
            Some(href) if !href.is_empty() => format!("[{text}]({href})"),
            _ => text.to_string(),
        }
    });

    let s = RE_TAG.replace_all(&s, "");
    let body = collapse_whitespace(&decode_entities(&s));

    if body.is_empty() {
        format!("# {title}\n")
    } else {
        format!("# {title}\n\n{body}\n")
    }
}

/// Run locate → sanitize → title → coerce over a rendered page.
pub fn page_to_markdown(page_html: &str) -> String {
    let located = locate_content(page_html);
    let clean = sanitize(&located.html);
    let title = resolve_title(page_html);
    coerce_to_markdown(&clean, &title)
}

/// Value of the attribute matched by `re` inside a raw attribute string.
fn attr(re: &Regex, attrs: &str) -> Option<String> {
    let caps = re.captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().trim().to_string())
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn collapse_inline_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collapse_whitespace(s: &str) -> String {
    let s = RE_HSPACE.replace_all(s, " ");
    let s = s
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    RE_BLANK_RUN.replace_all(&s, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WECHAT_PAGE: &str = r#"<html><head>
        <meta property="og:title" content="Meta Title">
        <script>var tracking = 1;</script>
      </head><body>
        <div class="header">Site header</div>
        <h2 class="rich_media_title">  Rust in
           Production </h2>
        <div class="rich_media_content">
          <p>First <strong>bold</strong> and <em>soft</em> words.</p>
          <div class="share-btn">Share me</div>
          <p><img data-src="https://mmbiz.qpic.cn/a.jpg" src="data:image/gif;base64,xx"></p>
          <p>See <a href="https://example.org/x?a=1&amp;b=2">the docs</a>.</p>
          <script>alert(1)</script>
        </div>
      </body></html>"#;

    #[test]
    fn locate_prefers_most_specific_selector() {
        let html = r#"<body><div class="content">generic</div><div class="rich_media_content">specific</div></body>"#;
        let located = locate_content(html);
        assert_eq!(located.selector, Some(".rich_media_content"));
        assert_eq!(located.html, "specific");
    }

    #[test]
    fn locate_falls_back_to_body() {
        let located = locate_content("<html><body><main>hello</main></body></html>");
        assert_eq!(located.selector, None);
        assert!(located.html.contains("<main>hello</main>"));
    }

    #[test]
    fn sanitize_removes_noise_subtrees() {
        let html = r#"<p>keep</p><div class="ad"><p>buy</p></div><script>x()</script><div class="comment-section">c</div>"#;
        let clean = sanitize(html);
        assert!(clean.contains("<p>keep</p>"));
        assert!(!clean.contains("buy"));
        assert!(!clean.contains("x()"));
        assert!(!clean.contains("comment-section"));
    }

    #[test]
    fn title_first_non_empty_probe_wins() {
        // h1 exists but is empty, so the next probe is used.
        let html = r#"<body><h1>  </h1><div class="article-title">Second</div></body>"#;
        assert_eq!(resolve_title(html), "Second");
    }

    #[test]
    fn title_from_meta_tag() {
        let html = r#"<head><meta property="og:title" content="From Meta"></head><body></body>"#;
        assert_eq!(resolve_title(html), "From Meta");
    }

    #[test]
    fn title_placeholder_when_nothing_matches() {
        assert_eq!(resolve_title("<body><p>x</p></body>"), PLACEHOLDER_TITLE);
    }

    #[test]
    fn coerce_substitutes_tags() {
        let md = coerce_to_markdown(
            r#"<h2>Intro</h2><p>Some <b>bold</b> and <i>it</i>.</p><p>Line<br/>break</p>"#,
            "T",
        );
        assert!(md.starts_with("# T\n\n## Intro\n\n"), "got: {md:?}");
        assert!(md.contains("Some **bold** and *it*."));
        assert!(md.contains("Line\nbreak"));
    }

    #[test]
    fn coerce_keeps_images_and_links() {
        let md = coerce_to_markdown(
            r#"<p><a href="https://a.example/p">link <span>text</span></a></p><img src="https://img.example/1.png" alt="x">"#,
            "T",
        );
        assert!(md.contains("[link text](https://a.example/p)"), "got: {md}");
        assert!(md.contains("![https://img.example/1.png](https://img.example/1.png)"));
    }

    #[test]
    fn coerce_does_not_confuse_similar_tags() {
        let md = coerce_to_markdown("<blockquote>q</blockquote><pre>code</pre><body>b</body>", "T");
        assert!(!md.contains("**"));
        assert!(md.contains("q"));
        assert!(md.contains("code"));
    }

    #[test]
    fn source_line_breaks_are_collapsed() {
        let md = coerce_to_markdown(
            "<p>A sentence that\n   wraps in the\r\n markup.</p>\n\n<p>Next<br>line</p>",
            "T",
        );
        assert_eq!(md, "# T\n\nA sentence that wraps in the markup.\n\nNext\nline\n");
    }

    #[test]
    fn attribute_lookup_prefers_lazy_source() {
        let attrs = r#" class="x" data-src='https://lazy/a.jpg' src="data:x""#;
        assert_eq!(attr(&ATTR_DATA_SRC, attrs).as_deref(), Some("https://lazy/a.jpg"));
        assert_eq!(attr(&ATTR_SRC, attrs).as_deref(), Some("data:x"));
        assert_eq!(attr(&ATTR_HREF, attrs), None);
    }

    #[test]
    fn whole_page_pipeline() {
        let md = page_to_markdown(WECHAT_PAGE);
        assert!(md.starts_with("# Rust in Production\n\n"), "got: {md}");
        assert!(md.contains("First **bold** and *soft* words."));
        assert!(md.contains("![https://mmbiz.qpic.cn/a.jpg](https://mmbiz.qpic.cn/a.jpg)"));
        assert!(md.contains("[the docs](https://example.org/x?a=1&b=2)"));
        assert!(!md.contains("Share me"));
        assert!(!md.contains("alert"));
        assert!(!md.contains("Site header"));
        assert!(!md.contains("\n\n\n"));
    }
}
