//! Query template loading. Templates are reloaded at every scrape start;
//! operator overrides in the profile's `queries/` directory win over the
//! bundled defaults.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use reportscope_core_types::{CoreError, QueryTemplatePair};

use crate::config::ScopeConfig;

pub const DEFAULT_METADATA_QUERY: &str = include_str!("../queries/metadata.txt");
pub const DEFAULT_TIMELINE_QUERY: &str = include_str!("../queries/timeline.txt");

/// Source of the per-run query template pair.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn load(&self) -> Result<QueryTemplatePair, CoreError>;
}

/// Loads from the profile's `queries/` directory, falling back to the
/// bundled templates file by file.
pub struct FileTemplateSource {
    metadata_path: std::path::PathBuf,
    timeline_path: std::path::PathBuf,
}

impl FileTemplateSource {
    pub fn new(cfg: &ScopeConfig) -> Self {
        let dir = cfg.queries_dir();
        Self {
            metadata_path: dir.join("metadata.txt"),
            timeline_path: dir.join("timeline.txt"),
        }
    }
}

async fn read_or_default(path: &Path, default: &str) -> Result<String, CoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            debug!(path = %path.display(), "using query template override");
            Ok(contents)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(default.to_string()),
        Err(err) => Err(CoreError::new(format!(
            "failed to read query template {}: {err}",
            path.display()
        ))),
    }
}

#[async_trait]
impl TemplateSource for FileTemplateSource {
    async fn load(&self) -> Result<QueryTemplatePair, CoreError> {
        let metadata = read_or_default(&self.metadata_path, DEFAULT_METADATA_QUERY).await?;
        let timeline = read_or_default(&self.timeline_path, DEFAULT_TIMELINE_QUERY).await?;
        QueryTemplatePair::new(metadata, timeline)
    }
}

/// Fixed template pair, for tests and scripted sessions.
pub struct StaticTemplateSource(pub QueryTemplatePair);

#[async_trait]
impl TemplateSource for StaticTemplateSource {
    async fn load(&self) -> Result<QueryTemplatePair, CoreError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_templates_are_valid() {
        let pair =
            QueryTemplatePair::new(DEFAULT_METADATA_QUERY, DEFAULT_TIMELINE_QUERY).unwrap();
        assert!(pair.metadata.contains("[report_id]"));
        assert!(pair.timeline.contains("[report_id]"));
        // Both must be valid JSON once the placeholder is substituted.
        let item = reportscope_core_types::WorkItem::parse("1").unwrap();
        for template in [&pair.metadata, &pair.timeline] {
            let filled = reportscope_scrape_agent::template::fill_template(template, &item);
            serde_json::from_str::<serde_json::Value>(&filled).unwrap();
        }
    }

    #[tokio::test]
    async fn missing_override_falls_back_to_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileTemplateSource {
            metadata_path: dir.path().join("metadata.txt"),
            timeline_path: dir.path().join("timeline.txt"),
        };
        let pair = source.load().await.unwrap();
        assert_eq!(pair.metadata, DEFAULT_METADATA_QUERY.trim());
    }

    #[tokio::test]
    async fn override_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("metadata.txt");
        tokio::fs::write(&meta, "custom [report_id]").await.unwrap();
        let source = FileTemplateSource {
            metadata_path: meta,
            timeline_path: dir.path().join("timeline.txt"),
        };
        let pair = source.load().await.unwrap();
        assert_eq!(pair.metadata, "custom [report_id]");
        assert_eq!(pair.timeline, DEFAULT_TIMELINE_QUERY.trim());
    }
}
