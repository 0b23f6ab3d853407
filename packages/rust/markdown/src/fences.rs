//! Fenced code block parsing and post-conversion correction.
//!
//! Converted Markdown is split into prose runs and fenced blocks (both
//! backtick and tilde fences). Correction rewrites every fence with a
//! normalized body and a reconciled language label; prose is left alone.

use std::sync::LazyLock;

use regex::Regex;

use sitescribe_shared::CodeBlock;

use crate::codeblock::{process_code, reconcile_language};

static OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^( {0,3})(`{3,}|~{3,})(.*)$").unwrap());

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

/// One fenced block as it appears in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FencedBlock<'a> {
    /// Spaces before the opening fence (0 to 3).
    pub indent: usize,
    pub marker: char,
    pub fence_len: usize,
    /// Text after the opening fence, trimmed.
    pub info: &'a str,
    pub opener: &'a str,
    pub lines: Vec<&'a str>,
    /// `None` when the document ended inside the block.
    pub closer: Option<&'a str>,
}

impl<'a> FencedBlock<'a> {
    /// First word of the info string, if any.
    pub fn declared_language(&self) -> Option<&'a str> {
        self.info.split_whitespace().next()
    }

    /// Body with the opener's indentation removed from each line.
    pub fn content(&self) -> String {
        self.lines
            .iter()
            .map(|line| {
                let spaces = line.len() - line.trim_start_matches(' ').len();
                &line[spaces.min(self.indent)..]
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The block exactly as it was written.
    pub fn verbatim(&self) -> String {
        let mut out = Vec::with_capacity(self.lines.len() + 2);
        out.push(self.opener);
        out.extend(self.lines.iter().copied());
        if let Some(closer) = self.closer {
            out.push(closer);
        }
        out.join("\n")
    }

    fn is_closed_by(&self, line: &str) -> bool {
        let spaces = line.len() - line.trim_start_matches(' ').len();
        if spaces > 3 {
            return false;
        }
        let rest = line[spaces..].trim_end();
        rest.len() >= self.fence_len && rest.chars().all(|c| c == self.marker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Prose(Vec<&'a str>),
    Fence(FencedBlock<'a>),
}

/// Split Markdown into alternating prose and fenced-block segments.
pub(crate) fn split_segments(md: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut prose: Vec<&str> = Vec::new();
    let mut open: Option<FencedBlock<'_>> = None;

    for line in md.split('\n') {
        if let Some(block) = open.as_mut() {
            if block.is_closed_by(line) {
                block.closer = Some(line);
                if let Some(done) = open.take() {
                    segments.push(Segment::Fence(done));
                }
            } else {
                block.lines.push(line);
            }
            continue;
        }

        match parse_opener(line) {
            Some(block) => {
                if !prose.is_empty() {
                    segments.push(Segment::Prose(std::mem::take(&mut prose)));
                }
                open = Some(block);
            }
            None => prose.push(line),
        }
    }

    if let Some(unclosed) = open {
        segments.push(Segment::Fence(unclosed));
    }
    if !prose.is_empty() {
        segments.push(Segment::Prose(prose));
    }
    segments
}

fn parse_opener(line: &str) -> Option<FencedBlock<'_>> {
    let caps = OPEN_RE.captures(line)?;
    let fence = caps.get(2)?.as_str();
    let info = caps.get(3).map_or("", |m| m.as_str()).trim();
    let marker = fence.chars().next()?;
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some(FencedBlock {
        indent: caps.get(1).map_or(0, |m| m.as_str().len()),
        marker,
        fence_len: fence.len(),
        info,
        opener: line,
        lines: Vec::new(),
        closer: None,
    })
}

// ---------------------------------------------------------------------------
// Correction
// ---------------------------------------------------------------------------

/// A code block after correction, with the label written to its fence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectedBlock {
    pub block: CodeBlock,
    pub language: String,
}

/// Markdown with every fenced block rewritten.
#[derive(Debug, Clone)]
pub struct CorrectedMarkdown {
    pub markdown: String,
    pub blocks: Vec<CorrectedBlock>,
}

impl CorrectedMarkdown {
    pub fn code_block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Normalize and relabel all fenced code blocks.
///
/// The detector's answer replaces whatever label the converter wrote when it
/// is confident. Otherwise the declared label is kept in canonical form, and
/// unlabelled blocks become `text`. Unclosed fences are closed. Running the
/// correction on its own output changes nothing.
pub fn correct_code_blocks(md: &str) -> CorrectedMarkdown {
    let md = md.replace("\r\n", "\n");
    let mut out = Vec::new();
    let mut blocks = Vec::new();

    for segment in split_segments(&md) {
        match segment {
            Segment::Prose(lines) => out.push(lines.join("\n")),
            Segment::Fence(fence) => {
                let block = process_code(&fence.content());
                let language =
                    reconcile_language(fence.declared_language(), block.detected_language.as_deref());
                out.push(render_fence(fence.marker, fence.fence_len, &language, &block.normalized_text));
                blocks.push(CorrectedBlock { block, language });
            }
        }
    }

    CorrectedMarkdown {
        markdown: out.join("\n"),
        blocks,
    }
}

/// Write a fence long enough that no body line can close it early.
fn render_fence(marker: char, min_len: usize, language: &str, body: &str) -> String {
    let longest_run = body
        .lines()
        .map(|line| line.trim_start().chars().take_while(|&c| c == marker).count())
        .max()
        .unwrap_or(0);
    let fence = marker.to_string().repeat(min_len.max(longest_run + 1).max(3));
    if body.is_empty() {
        format!("{fence}{language}\n{fence}")
    } else {
        format!("{fence}{language}\n{body}\n{fence}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_prose_and_fences() {
        let md = "intro\n```rust\nfn a() {}\n```\noutro";
        let segments = split_segments(md);
        assert_eq!(segments.len(), 3);
        match &segments[1] {
            Segment::Fence(block) => {
                assert_eq!(block.declared_language(), Some("rust"));
                assert_eq!(block.content(), "fn a() {}");
                assert_eq!(block.closer, Some("```"));
            }
            other => panic!("expected fence, got {other:?}"),
        }
    }

    #[test]
    fn tilde_fence_ignores_backtick_lines() {
        let md = "~~~\n```\nstill code\n~~~\nafter";
        let segments = split_segments(md);
        match &segments[0] {
            Segment::Fence(block) => assert_eq!(block.lines, vec!["```", "still code"]),
            other => panic!("expected fence, got {other:?}"),
        }
        assert_eq!(segments[1], Segment::Prose(vec!["after"]));
    }

    #[test]
    fn shorter_fence_does_not_close() {
        let md = "````\n```\ninner\n```\n````";
        let segments = split_segments(md);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn indented_opener_strips_body_indent() {
        let md = "  ```\n  a = 1\n    b = 2\n  ```";
        let Segment::Fence(block) = &split_segments(md)[0] else {
            panic!("expected fence");
        };
        assert_eq!(block.content(), "a = 1\n  b = 2");
    }

    #[test]
    fn verbatim_round_trips_source() {
        let md = "```js\n  x();\n```";
        let Segment::Fence(block) = &split_segments(md)[0] else {
            panic!("expected fence");
        };
        assert_eq!(block.verbatim(), md);
    }

    #[test]
    fn corrects_labels_and_whitespace() {
        let md = "# Title\n\n```javascript\n    def run():\n        pass\n```\n\n```\n$ npm install\n```\n";
        let corrected = correct_code_blocks(md);
        assert_eq!(corrected.code_block_count(), 2);
        assert_eq!(corrected.blocks[0].language, "python");
        assert_eq!(corrected.blocks[1].language, "bash");
        assert!(corrected.markdown.contains("```python\ndef run():\n    pass\n```"));
        assert!(corrected.markdown.starts_with("# Title\n\n"));
    }

    #[test]
    fn keeps_declared_label_when_detector_unsure() {
        let md = "```language-kotlin\nval x = listOf(1)\n```";
        let corrected = correct_code_blocks(md);
        assert_eq!(corrected.blocks[0].language, "kotlin");
        assert!(corrected.markdown.starts_with("```kotlin\n"));
    }

    #[test]
    fn unlabelled_unknown_block_is_text() {
        let corrected = correct_code_blocks("```\nsome output here\n```");
        assert_eq!(corrected.markdown, "```text\nsome output here\n```");
    }

    #[test]
    fn closes_unterminated_fence() {
        let corrected = correct_code_blocks("text\n```py\nprint(1)");
        assert_eq!(corrected.markdown, "text\n```python\nprint(1)\n```");
    }

    #[test]
    fn lengthens_fence_around_nested_fences() {
        let md = "````markdown\n    ```\n    nested\n    ```\n````";
        let corrected = correct_code_blocks(md);
        assert!(corrected.markdown.starts_with("````markdown\n```\nnested\n```\n````"));
        assert_eq!(correct_code_blocks(&corrected.markdown).code_block_count(), 1);
    }

    #[test]
    fn correction_is_idempotent() {
        let md = "intro\n\n```sh\n   ls -la   \n```\n\n~~~\n{\"a\": 1}\n~~~\n\n```\n```\n";
        let once = correct_code_blocks(md).markdown;
        let twice = correct_code_blocks(&once).markdown;
        assert_eq!(once, twice);
    }

    #[test]
    fn prose_is_untouched() {
        let md = "Some  text   with spaces\n\n| a | b |\n|---|---|";
        assert_eq!(correct_code_blocks(md).markdown, md);
    }
}
