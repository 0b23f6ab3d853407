//! YAML frontmatter: synthesis, rendering and parsing.
//!
//! Keys are always written in the same order and values are quoted the same
//! way, so an unchanged page renders to identical bytes on every run.

use chrono::{DateTime, SecondsFormat, Utc};

use sitescribe_shared::{ConversionStatus, DocumentStatus, Frontmatter, Result, SiteScribeError};

/// Everything known about a page once conversion has finished.
#[derive(Debug, Clone)]
pub struct DocumentFacts<'a> {
    pub url: &'a str,
    pub domain: &'a str,
    pub title: Option<&'a str>,
    /// When the source HTML was fetched. Used as the document date.
    pub fetched_at: DateTime<Utc>,
    pub code_block_count: usize,
    pub chunk_count: usize,
    pub status: &'a ConversionStatus,
    pub converter: &'a str,
}

/// Build the frontmatter for a converted (or failed) page.
pub fn synthesize(facts: &DocumentFacts<'_>) -> Frontmatter {
    let error = match facts.status {
        ConversionStatus::Success => None,
        ConversionStatus::Failed(reason) => Some(reason.clone()),
    };
    Frontmatter {
        url: facts.url.to_string(),
        domain: facts.domain.to_string(),
        title: facts
            .title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        date: facts.fetched_at,
        code_block_count: facts.code_block_count,
        chunk_count: facts.chunk_count,
        status: DocumentStatus::from(facts.status),
        error,
        converter: facts.converter.to_string(),
    }
}

/// Render frontmatter as a `---` delimited YAML block ending in a newline.
pub fn render_frontmatter(fm: &Frontmatter) -> String {
    let mut out = String::from("---\n");
    out.push_str(&format!("url: {}\n", quote(&fm.url)));
    out.push_str(&format!("domain: {}\n", quote(&fm.domain)));
    out.push_str(&format!("title: {}\n", quote_opt(fm.title.as_deref())));
    out.push_str(&format!(
        "date: {}\n",
        quote(&fm.date.to_rfc3339_opts(SecondsFormat::Secs, true))
    ));
    out.push_str(&format!("code_block_count: {}\n", fm.code_block_count));
    out.push_str(&format!("chunk_count: {}\n", fm.chunk_count));
    out.push_str(&format!("status: {}\n", fm.status));
    out.push_str(&format!("error: {}\n", quote_opt(fm.error.as_deref())));
    out.push_str(&format!("converter: {}\n", quote(&fm.converter)));
    out.push_str("---\n");
    out
}

/// Frontmatter, a blank line, then the body.
pub fn render_document(fm: &Frontmatter, body: &str) -> String {
    let header = render_frontmatter(fm);
    if body.trim().is_empty() {
        header
    } else {
        format!("{header}\n{}\n", body.trim_end_matches('\n'))
    }
}

/// Split a rendered document into its frontmatter and body.
pub fn parse_frontmatter(doc: &str) -> Result<(Frontmatter, &str)> {
    let rest = doc
        .strip_prefix("---\n")
        .ok_or_else(|| invalid("missing opening delimiter"))?;
    let end = rest
        .find("\n---\n")
        .ok_or_else(|| invalid("missing closing delimiter"))?;
    let (yaml, body) = (&rest[..end], &rest[end + "\n---\n".len()..]);

    let mut fields = std::collections::HashMap::new();
    for line in yaml.lines() {
        let (key, value) = line
            .split_once(": ")
            .ok_or_else(|| invalid(&format!("malformed line `{line}`")))?;
        fields.insert(key, value);
    }
    let field = |key: &str| {
        fields
            .get(key)
            .copied()
            .ok_or_else(|| invalid(&format!("missing key `{key}`")))
    };
    let count = |key: &str| -> Result<usize> {
        field(key)?
            .parse()
            .map_err(|_| invalid(&format!("`{key}` is not a number")))
    };

    let date = unquote(field("date")?)?;
    let date = DateTime::parse_from_rfc3339(&date)
        .map_err(|e| invalid(&format!("bad date: {e}")))?
        .with_timezone(&Utc);
    let status = match field("status")? {
        "success" => DocumentStatus::Success,
        "failed" => DocumentStatus::Failed,
        other => return Err(invalid(&format!("unknown status `{other}`"))),
    };

    let frontmatter = Frontmatter {
        url: unquote(field("url")?)?,
        domain: unquote(field("domain")?)?,
        title: unquote_opt(field("title")?)?,
        date,
        code_block_count: count("code_block_count")?,
        chunk_count: count("chunk_count")?,
        status,
        error: unquote_opt(field("error")?)?,
        converter: unquote(field("converter")?)?,
    };
    Ok((frontmatter, body.strip_prefix('\n').unwrap_or(body)))
}

// ---------------------------------------------------------------------------
// Quoting
// ---------------------------------------------------------------------------

/// Escape special characters in a double-quoted YAML string.
fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

fn quote(s: &str) -> String {
    format!("\"{}\"", escape_yaml_string(s))
}

fn quote_opt(s: Option<&str>) -> String {
    s.map_or_else(|| "null".to_string(), quote)
}

fn unquote(raw: &str) -> Result<String> {
    let inner = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .ok_or_else(|| invalid(&format!("expected quoted string, got `{raw}`")))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => return Err(invalid("dangling escape")),
        }
    }
    Ok(out)
}

fn unquote_opt(raw: &str) -> Result<Option<String>> {
    if raw == "null" {
        Ok(None)
    } else {
        unquote(raw).map(Some)
    }
}

fn invalid(message: &str) -> SiteScribeError {
    SiteScribeError::validation(format!("invalid frontmatter: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn facts(status: &ConversionStatus) -> DocumentFacts<'_> {
        DocumentFacts {
            url: "https://docs.example.com/guide/intro",
            domain: "docs.example.com",
            title: Some("Intro \"quoted\""),
            fetched_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap(),
            code_block_count: 2,
            chunk_count: 1,
            status,
            converter: "openrouter",
        }
    }

    #[test]
    fn renders_keys_in_fixed_order() {
        let fm = synthesize(&facts(&ConversionStatus::Success));
        let rendered = render_frontmatter(&fm);
        assert_eq!(
            rendered,
            "---\n\
             url: \"https://docs.example.com/guide/intro\"\n\
             domain: \"docs.example.com\"\n\
             title: \"Intro \\\"quoted\\\"\"\n\
             date: \"2025-03-01T12:30:00Z\"\n\
             code_block_count: 2\n\
             chunk_count: 1\n\
             status: success\n\
             error: null\n\
             converter: \"openrouter\"\n\
             ---\n"
        );
    }

    #[test]
    fn failure_records_reason() {
        let status = ConversionStatus::Failed("PermanentFetchError: 404".into());
        let fm = synthesize(&facts(&status));
        assert_eq!(fm.status, DocumentStatus::Failed);
        assert_eq!(fm.error.as_deref(), Some("PermanentFetchError: 404"));
        assert!(render_frontmatter(&fm).contains("error: \"PermanentFetchError: 404\"\n"));
    }

    #[test]
    fn blank_title_becomes_null() {
        let status = ConversionStatus::Success;
        let mut f = facts(&status);
        f.title = Some("   ");
        let fm = synthesize(&f);
        assert_eq!(fm.title, None);
        assert!(render_frontmatter(&fm).contains("title: null\n"));
    }

    #[test]
    fn rendered_document_parses_back() {
        let status = ConversionStatus::Failed("line one\nline \"two\"".into());
        let fm = synthesize(&facts(&status));
        let doc = render_document(&fm, "# Body\n\ntext\n");
        let (parsed, body) = parse_frontmatter(&doc).unwrap();
        assert_eq!(parsed, fm);
        assert_eq!(body, "# Body\n\ntext\n");
    }

    #[test]
    fn rendering_is_deterministic() {
        let status = ConversionStatus::Success;
        let a = render_document(&synthesize(&facts(&status)), "body");
        let b = render_document(&synthesize(&facts(&status)), "body");
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_documents_without_frontmatter() {
        assert!(parse_frontmatter("# just markdown\n").is_err());
        assert!(parse_frontmatter("---\nurl: \"x\"\n").is_err());
    }
}
