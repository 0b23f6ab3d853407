//! Post-conversion cleanup pipeline for Markdown output.
//!
//! Each pass is a function `&str -> String` applied to the prose between
//! fenced code blocks. Fences pass through verbatim; the code block
//! correction in [`crate::fences`] owns their contents.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::fences::{Segment, split_segments};

/// Run the full cleanup pipeline on converted Markdown.
pub fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let md = md.replace("\r\n", "\n");
    let mut seen_h1 = false;
    let mut parts = Vec::new();

    for segment in split_segments(&md) {
        match segment {
            Segment::Prose(lines) => {
                let mut text = lines.join("\n");
                text = normalize_headings(&text, &mut seen_h1);
                text = strip_leftover_html(&text);
                text = resolve_links(&text, base_url);
                text = normalize_whitespace(&text);
                text = clean_blank_lines(&text);
                parts.push(text);
            }
            Segment::Fence(block) => parts.push(block.verbatim()),
        }
    }

    ensure_trailing_newline(parts.join("\n").trim_start_matches('\n'))
}

// ---------------------------------------------------------------------------
// Pass 1: Normalize heading levels
// ---------------------------------------------------------------------------

/// Keep the first H1 and demote any later ones to H2.
fn normalize_headings(md: &str, seen_h1: &mut bool) -> String {
    static H1_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\s+(.+)$").unwrap());

    md.split('\n')
        .map(|line| match H1_RE.captures(line) {
            Some(caps) if *seen_h1 => format!("## {}", &caps[1]),
            Some(_) => {
                *seen_h1 = true;
                line.to_string()
            }
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Strip leftover HTML wrappers
// ---------------------------------------------------------------------------

/// Remove layout tags that survived conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary|main|nav)(?:\s[^>]*)?>",
        )
        .unwrap()
    });

    HTML_TAG_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Resolve relative links
// ---------------------------------------------------------------------------

/// Resolve relative link targets against the page URL. Images are left
/// alone, as are absolute, anchor and `mailto:` targets.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").unwrap());

    let Some(base) = base_url else {
        return md.to_string();
    };

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let (bang, text, href) = (&caps[1], &caps[2], &caps[3]);
            let absolute = href.starts_with("http://")
                || href.starts_with("https://")
                || href.starts_with('#')
                || href.starts_with("mailto:");
            if !bang.is_empty() || absolute {
                return caps[0].to_string();
            }
            match base.join(href) {
                Ok(resolved) => format!("[{text}]({resolved})"),
                Err(_) => caps[0].to_string(),
            }
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Whitespace
// ---------------------------------------------------------------------------

fn normalize_whitespace(md: &str) -> String {
    md.split('\n').map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// Collapse runs of 3+ blank lines into 2.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{4,}").unwrap());

    MULTI_BLANK_RE.replace_all(md, "\n\n\n").to_string()
}

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    format!("{}\n", md.trim_end_matches('\n'))
}
