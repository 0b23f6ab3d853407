//! Splitting large HTML into conversion-sized chunks.
//!
//! Pages at or under the threshold stay whole. Larger pages are cut at
//! top-level element boundaries and packed greedily. Layout containers that
//! are too big on their own are opened up; code, tables and lists never are.

use scraper::{ElementRef, Html, Node};
use tracing::debug;

use sitescribe_shared::{ConversionChunk, Result, SiteScribeError};

/// Elements that may be opened up when they exceed the threshold.
const CONTAINERS: &[&str] = &[
    "html", "body", "main", "article", "section", "div", "aside", "header", "footer", "nav",
    "details",
];

/// Split `html` into ordered chunks for conversion.
///
/// Fails with `OversizedChunk` when a piece that cannot be split further is
/// larger than `max_chunk_bytes`.
pub fn split_into_chunks(
    parent_url: &str,
    html: &str,
    threshold_bytes: usize,
    max_chunk_bytes: usize,
) -> Result<Vec<ConversionChunk>> {
    let pieces = if html.len() <= threshold_bytes {
        vec![html.to_string()]
    } else {
        let fragment = Html::parse_fragment(html);
        let mut units = Vec::new();
        collect_units(fragment.root_element(), threshold_bytes, &mut units);
        pack(units, threshold_bytes)
    };

    let biggest = pieces.iter().map(String::len).max().unwrap_or(0);
    if biggest > max_chunk_bytes {
        return Err(SiteScribeError::OversizedChunk {
            size: biggest,
            limit: max_chunk_bytes,
        });
    }

    debug!(url = %parent_url, chunks = pieces.len(), bytes = html.len(), "split page");

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, chunk_text)| ConversionChunk {
            parent_url: parent_url.to_string(),
            chunk_index,
            chunk_text,
        })
        .collect())
}

/// Serialize the children of `parent` as split units, opening up oversized
/// containers along the way.
fn collect_units(parent: ElementRef<'_>, threshold: usize, units: &mut Vec<String>) {
    for child in parent.children() {
        match child.value() {
            Node::Element(el) => {
                let Some(element) = ElementRef::wrap(child) else {
                    continue;
                };
                let html = element.html();
                if html.len() > threshold && CONTAINERS.contains(&el.name()) {
                    collect_units(element, threshold, units);
                } else {
                    units.push(html);
                }
            }
            Node::Text(text) if !text.trim().is_empty() => units.push(escape_text(text)),
            _ => {}
        }
    }
}

/// Greedy packing: a unit joins the current chunk while the total stays
/// within the threshold. A single unit over the threshold becomes its own
/// chunk.
fn pack(units: Vec<String>, threshold: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for unit in units {
        if !current.is_empty() && current.len() + 1 + unit.len() > threshold {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&unit);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.com/page";

    fn paragraphs(n: usize, size: usize) -> String {
        (0..n)
            .map(|i| format!("<p>{i}:{}</p>", "x".repeat(size)))
            .collect()
    }

    #[test]
    fn small_page_is_one_chunk() {
        let html = "<h1>Hi</h1><p>short</p>";
        let chunks = split_into_chunks(URL, html, 1000, 5000).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_text, html);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].parent_url, URL);
    }

    #[test]
    fn splits_on_element_boundaries_in_order() {
        let html = paragraphs(10, 100);
        let chunks = split_into_chunks(URL, &html, 350, 5000).unwrap();
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert!(chunk.chunk_text.len() <= 350);
            assert!(chunk.chunk_text.starts_with("<p>"));
            assert!(chunk.chunk_text.ends_with("</p>"));
        }
        let joined: String = chunks.iter().map(|c| c.chunk_text.as_str()).collect();
        for i in 0..10 {
            assert!(joined.contains(&format!("<p>{i}:")));
        }
        let first = joined.find("<p>0:").unwrap();
        let last = joined.find("<p>9:").unwrap();
        assert!(first < last);
    }

    #[test]
    fn opens_oversized_containers() {
        let html = format!("<main><div>{}</div></main>", paragraphs(6, 200));
        let chunks = split_into_chunks(URL, &html, 500, 5000).unwrap();
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.chunk_text.len() <= 500));
    }

    #[test]
    fn never_splits_code_blocks() {
        let code = format!("<pre><code>{}</code></pre>", "let x = 1;\n".repeat(100));
        let html = format!("<p>intro</p>{code}<p>outro</p>");
        let chunks = split_into_chunks(URL, &html, 300, 10_000).unwrap();
        assert!(chunks.iter().any(|c| c.chunk_text == code));
    }

    #[test]
    fn unsplittable_piece_over_limit_fails() {
        let code = format!("<pre>{}</pre>", "y".repeat(2000));
        let err = split_into_chunks(URL, &code, 500, 1000).unwrap_err();
        assert!(matches!(err, SiteScribeError::OversizedChunk { limit: 1000, .. }));
        assert!(err.to_string().starts_with("OversizedChunkError"));
    }

    #[test]
    fn text_nodes_are_escaped() {
        let html = format!("a &lt; b{}", paragraphs(3, 200));
        let chunks = split_into_chunks(URL, &html, 300, 5000).unwrap();
        assert!(chunks[0].chunk_text.starts_with("a &lt; b"));
    }
}
