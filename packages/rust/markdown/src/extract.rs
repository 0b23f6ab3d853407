//! Content extraction from fetched HTML pages.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::codeblock::{canonical_language, detect_language};

/// Elements removed before anything else looks at the page.
static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<(script|style|noscript|svg|iframe|template)\b[^>]*>.*?</(script|style|noscript|svg|iframe|template)\s*>").unwrap()
});

/// Content containers in priority order.
const CONTENT_SELECTORS: &[&str] = &[
    "article .markdown", // Docusaurus
    ".vp-doc",           // VitePress
    ".markdown-section", // GitBook
    "main",
    "[role=\"main\"]",
    "article",
    ".content",
    "#content",
];

/// Strip scripts, styles and comments, then return the inner HTML of the
/// most specific content container (falling back to `<body>`).
pub fn extract_content_html(html: &str) -> String {
    let cleaned = NOISE_RE.replace_all(html, "");
    let doc = Html::parse_document(&cleaned);

    let container = CONTENT_SELECTORS.iter().find_map(|sel| {
        let selector = Selector::parse(sel).ok()?;
        doc.select(&selector).next()
    });
    if let Some(el) = container {
        return el.inner_html().trim().to_string();
    }

    let body = Selector::parse("body").unwrap();
    match doc.select(&body).next() {
        Some(el) => el.inner_html().trim().to_string(),
        None => cleaned.trim().to_string(),
    }
}

/// Page title from `<title>`, falling back to the first `<h1>`.
pub fn extract_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    ["title", "h1"].iter().find_map(|sel| {
        let selector = Selector::parse(sel).ok()?;
        let text = doc.select(&selector).next()?.text().collect::<String>();
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    })
}

/// Title from the first `# ` heading of converted Markdown.
pub fn title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").unwrap());

    H1_RE
        .captures(md)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Languages of the `<pre>` blocks in an HTML chunk, in document order and
/// without repeats. Class names win over content detection.
pub fn code_language_hints(html: &str) -> Vec<String> {
    let doc = Html::parse_fragment(html);
    let pre = Selector::parse("pre").unwrap();

    let mut hints: Vec<String> = Vec::new();
    for el in doc.select(&pre) {
        let from_class = el
            .descendent_elements()
            .flat_map(|e| e.value().classes())
            .find(|c| c.starts_with("language-") || c.starts_with("lang-"))
            .and_then(canonical_language);
        let language = from_class.or_else(|| {
            let text = el.text().collect::<String>();
            detect_language(&text).map(str::to_string)
        });
        match language {
            Some(language) if !hints.contains(&language) => hints.push(language),
            _ => {}
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_main_and_drops_chrome() {
        let html = r#"<html><head><title>T</title><style>p{}</style></head><body>
            <nav><a href="/">Home</a></nav>
            <main><h1>Content</h1><!-- hidden --><p>Text</p><script>track()</script></main>
            <footer>Copyright</footer></body></html>"#;
        let content = extract_content_html(html);
        assert!(content.contains("<h1>Content</h1>"));
        assert!(!content.contains("Copyright"));
        assert!(!content.contains("track()"));
        assert!(!content.contains("hidden"));
    }

    #[test]
    fn falls_back_to_body() {
        let content = extract_content_html("<html><body><p>Only body</p></body></html>");
        assert_eq!(content, "<p>Only body</p>");
    }

    #[test]
    fn title_prefers_title_tag() {
        let html = "<html><head><title> Guide \n Intro </title></head><body><h1>H</h1></body></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Guide Intro"));
        let html = "<html><body><h1>Heading</h1></body></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Heading"));
        assert_eq!(extract_title("<p>none</p>"), None);
    }

    #[test]
    fn markdown_title() {
        assert_eq!(title_from_markdown("intro\n# Hello\n").as_deref(), Some("Hello"));
        assert_eq!(title_from_markdown("## Sub only"), None);
    }

    #[test]
    fn language_hints_from_classes_and_content() {
        let html = r#"<pre><code class="language-py">x = 1</code></pre>
            <pre>fn main() { println!("hi"); }</pre>
            <pre><code class="lang-python">y = 2</code></pre>"#;
        assert_eq!(code_language_hints(html), vec!["python", "rust"]);
    }
}
