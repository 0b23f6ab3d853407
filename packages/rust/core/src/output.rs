//! Output store: one Markdown file per URL under a per-domain directory.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};
use uuid::Uuid;

use sitescribe_markdown::{parse_frontmatter, render_document};
use sitescribe_shared::{DocumentStatus, MarkdownDocument, Result, SiteScribeError, UrlKey};

/// What a write did to the output store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// Identical bytes were already on disk.
    Unchanged,
    /// A successful document is on disk and this one failed; the good copy
    /// was kept.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct OutputWriter {
    root: PathBuf,
}

impl OutputWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<domain>/<page_id>.md`
    pub fn path_for(&self, key: &UrlKey) -> PathBuf {
        self.root
            .join(&key.domain)
            .join(format!("{}.md", key.page_id))
    }

    /// Whether a document for `key` exists and reports `status: success`.
    pub async fn is_complete(&self, key: &UrlKey) -> bool {
        matches!(
            self.existing_status(&self.path_for(key)).await,
            Some(DocumentStatus::Success)
        )
    }

    /// Write `doc` atomically (temporary sibling + rename).
    #[instrument(skip_all, fields(url = %doc.url))]
    pub async fn write(&self, doc: &MarkdownDocument) -> Result<WriteOutcome> {
        let path = self.path_for(&doc.key);
        let rendered = render_document(&doc.frontmatter, &doc.body);

        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(persistence(&path, e)),
        };

        let outcome = match &existing {
            None => WriteOutcome::Created,
            Some(text) if *text == rendered => {
                debug!(path = %path.display(), "output unchanged");
                return Ok(WriteOutcome::Unchanged);
            }
            Some(text) => {
                let keeps_success = doc.frontmatter.status == DocumentStatus::Failed
                    && matches!(
                        parse_frontmatter(text).map(|(fm, _)| fm.status),
                        Ok(DocumentStatus::Success)
                    );
                if keeps_success {
                    debug!(path = %path.display(), "keeping earlier successful output");
                    return Ok(WriteOutcome::Skipped);
                }
                WriteOutcome::Updated
            }
        };

        let dir = path
            .parent()
            .ok_or_else(|| SiteScribeError::Persistence(format!("no parent for {}", path.display())))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| persistence(dir, e))?;

        let tmp = dir.join(format!(".{}.{}.tmp", doc.key.page_id, Uuid::now_v7()));
        if let Err(e) = tokio::fs::write(&tmp, rendered.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(persistence(&tmp, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(persistence(&path, e));
        }

        debug!(path = %path.display(), ?outcome, bytes = rendered.len(), "output written");
        Ok(outcome)
    }

    async fn existing_status(&self, path: &Path) -> Option<DocumentStatus> {
        let text = tokio::fs::read_to_string(path).await.ok()?;
        parse_frontmatter(&text).ok().map(|(fm, _)| fm.status)
    }
}

fn persistence(path: &Path, err: std::io::Error) -> SiteScribeError {
    SiteScribeError::Persistence(format!("{}: {err}", path.display()))
}
