//! HTML-to-Markdown conversion support: content extraction, chunking, local
//! conversion, code block correction, cleanup passes and frontmatter.
//!
//! The conversion backends in `sitescribe-core` call into this crate for
//! everything deterministic. The local converter below uses the `htmd`
//! crate; remote output goes through the same [`finish_markdown`] pass.

pub mod chunk;
pub mod cleanup;
pub mod codeblock;
pub mod extract;
pub mod fences;
pub mod frontmatter;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use sitescribe_shared::{Result, SiteScribeError};

pub use chunk::split_into_chunks;
pub use codeblock::{
    FALLBACK_LANGUAGE, canonical_language, detect_language, normalize_code, process_code,
    reconcile_language,
};
pub use extract::{code_language_hints, extract_content_html, extract_title, title_from_markdown};
pub use fences::{CorrectedBlock, CorrectedMarkdown, correct_code_blocks};
pub use frontmatter::{DocumentFacts, parse_frontmatter, render_document, render_frontmatter, synthesize};

// ---------------------------------------------------------------------------
// Local conversion
// ---------------------------------------------------------------------------

/// Convert an HTML fragment to Markdown without any remote service.
///
/// Tables are converted to pipe tables separately, since `htmd` leaves them
/// as HTML. The result has not been through [`finish_markdown`] yet.
#[instrument(skip_all, fields(bytes = html.len()))]
pub fn convert_html(html: &str) -> Result<String> {
    let (html, tables) = extract_tables(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();

    let mut markdown = converter
        .convert(&html)
        .map_err(|e| SiteScribeError::ConversionService(format!("htmd conversion failed: {e}")))?;

    for (i, table) in tables.iter().enumerate() {
        markdown = markdown.replacen(&table_placeholder(i), table, 1);
    }

    debug!(markdown_len = markdown.len(), tables = tables.len(), "local conversion complete");
    Ok(markdown)
}

/// Final pass over converted Markdown: cleanup, then code block correction.
///
/// Both steps are idempotent, so finishing finished Markdown is a no-op.
pub fn finish_markdown(markdown: &str, base_url: Option<&Url>) -> CorrectedMarkdown {
    let cleaned = cleanup::run_pipeline(markdown, base_url);
    correct_code_blocks(&cleaned)
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

fn table_placeholder(index: usize) -> String {
    format!("SITESCRIBETABLE{index}PLACEHOLDER")
}

/// Swap each top-level `<table>` for a placeholder paragraph and return the
/// pipe-table Markdown for each, in order.
fn extract_tables(html: &str) -> (String, Vec<String>) {
    let doc = Html::parse_fragment(html);
    let table_sel = Selector::parse("table").unwrap();
    if doc.select(&table_sel).next().is_none() {
        return (html.to_string(), Vec::new());
    }

    let mut result = doc.root_element().inner_html();
    let mut tables = Vec::new();
    for table in doc.select(&table_sel) {
        let source = table.html();
        if !result.contains(&source) {
            // Nested inside a table that was already replaced.
            continue;
        }
        let placeholder = format!("<p>{}</p>", table_placeholder(tables.len()));
        result = result.replacen(&source, &placeholder, 1);
        tables.push(html_table_to_markdown(&table));
    }
    (result, tables)
}

fn html_table_to_markdown(table: &ElementRef<'_>) -> String {
    let tr_sel = Selector::parse("tr").unwrap();
    let cell_sel = Selector::parse("th, td").unwrap();

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;
    for (i, tr) in table.select(&tr_sel).enumerate() {
        let cells: Vec<String> = tr
            .select(&cell_sel)
            .map(|cell| {
                cell.text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .replace('|', "\\|")
            })
            .collect();
        if cells.is_empty() {
            continue;
        }
        if i == 0 && tr.children().filter_map(ElementRef::wrap).all(|c| c.value().name() == "th") {
            has_header = true;
        }
        rows.push(cells);
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let line = |cells: &[String]| format!("| {} |\n", cells.join(" | "));
    let mut md = String::new();
    let header = if has_header {
        rows.remove(0)
    } else {
        vec![String::new(); col_count]
    };
    md.push_str(&line(&header));
    md.push_str(&line(&vec!["---".to_string(); col_count]));
    for row in &rows {
        md.push_str(&line(row));
    }
    md.truncate(md.trim_end().len());
    md
}
