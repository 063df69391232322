//! Shared primitives for the reportscope pipeline.
//!
//! Everything that crosses a crate boundary lives here: tab/run identifiers,
//! the report data model, the control-protocol message shapes, and the input
//! normalizer that turns raw operator text into work items.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lowest-common-denominator error carried across crate seams.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("{message}")]
    Message { message: String },
}

impl CoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Identifier of a browser tab (CDP target) managed by the tab broker.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TabId(pub String);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one scrape run, used for log correlation.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One report identifier to be scraped. Always a non-empty decimal string.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(String);

impl WorkItem {
    /// Accepts only all-digit strings; anything else is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static REPORT_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"reports/(\d+)").expect("static regex"));

/// Normalizes free-form operator input into an ordered, deduplicated list of
/// work items.
///
/// Tokens are split on whitespace and commas. A token contributes an id if it
/// embeds a `reports/<digits>` path segment or is itself all digits; anything
/// else is dropped silently. First occurrence wins on duplicates.
pub fn normalize_report_input(text: &str) -> Vec<WorkItem> {
    let mut seen = std::collections::HashSet::new();
    let mut items = Vec::new();
    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let id = REPORT_PATH_RE
            .captures(token)
            .map(|c| c[1].to_string())
            .or_else(|| WorkItem::parse(token).map(WorkItem::into_string));
        if let Some(id) = id {
            if seen.insert(id.clone()) {
                items.push(WorkItem(id));
            }
        }
    }
    items
}

/// The pair of parametrized GraphQL bodies used per work item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryTemplatePair {
    pub metadata: String,
    pub timeline: String,
}

impl QueryTemplatePair {
    pub fn new(
        metadata: impl Into<String>,
        timeline: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let metadata = metadata.into().trim().to_string();
        let timeline = timeline.into().trim().to_string();
        if metadata.is_empty() || timeline.is_empty() {
            return Err(CoreError::new("query template empty after trimming"));
        }
        Ok(Self { metadata, timeline })
    }
}

/// Handle to the tab hosting a scrape run. `created` marks tabs the pipeline
/// opened itself; only those may be repurposed as the results destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TabHandle {
    pub id: TabId,
    pub created: bool,
}

/// Sentinel rendered for unavailable fields at presentation boundaries.
pub const SENTINEL: &str = "N/A";

/// Serde adapter mapping `None` <-> the `"N/A"` sentinel so the stored JSON
/// keeps the shape the results view consumes, while in-memory code keeps a
/// real `Option`.
pub mod sentinel {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value.as_deref().unwrap_or(super::SENTINEL))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(if raw == super::SENTINEL { None } else { Some(raw) })
    }
}

/// Aggregated row for one report: metadata fields plus the most recent
/// timeline activity and the most recent substantive message.
///
/// `report_id` is always the original work-item value, even when every other
/// field failed to resolve. Absent or failed fields are `None` in memory and
/// serialize as the `"N/A"` sentinel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResult {
    pub report_id: String,
    #[serde(with = "sentinel")]
    pub status: Option<String>,
    #[serde(with = "sentinel")]
    pub researcher: Option<String>,
    #[serde(with = "sentinel")]
    pub title: Option<String>,
    #[serde(with = "sentinel")]
    pub program: Option<String>,
    #[serde(with = "sentinel")]
    pub last_action: Option<String>,
    #[serde(with = "sentinel")]
    pub last_action_author: Option<String>,
    #[serde(with = "sentinel")]
    pub last_action_date: Option<String>,
    #[serde(with = "sentinel")]
    pub last_message: Option<String>,
    #[serde(with = "sentinel")]
    pub last_message_author: Option<String>,
    #[serde(with = "sentinel")]
    pub last_message_date: Option<String>,
}

impl ReportResult {
    /// Sentinel-filled row for a work item whose retrieval failed entirely.
    pub fn failed(report_id: &WorkItem) -> Self {
        Self {
            report_id: report_id.as_str().to_string(),
            status: None,
            researcher: None,
            title: None,
            program: None,
            last_action: None,
            last_action_author: None,
            last_action_date: None,
            last_message: None,
            last_message_author: None,
            last_message_date: None,
        }
    }

    /// Field values in column order, sentinel-rendered.
    pub fn rendered_fields(&self) -> [&str; 11] {
        fn render(field: &Option<String>) -> &str {
            field.as_deref().unwrap_or(SENTINEL)
        }
        [
            &self.report_id,
            render(&self.status),
            render(&self.researcher),
            render(&self.title),
            render(&self.program),
            render(&self.last_action),
            render(&self.last_action_author),
            render(&self.last_action_date),
            render(&self.last_message),
            render(&self.last_message_author),
            render(&self.last_message_date),
        ]
    }
}

/// Column headers matching [`ReportResult::rendered_fields`].
pub const RESULT_COLUMNS: [&str; 11] = [
    "reportId",
    "status",
    "researcher",
    "title",
    "program",
    "lastAction",
    "lastActionAuthor",
    "lastActionDate",
    "lastMessage",
    "lastMessageAuthor",
    "lastMessageDate",
];

/// Requests accepted by the orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlRequest {
    #[serde(rename = "BEGIN_SCRAPE")]
    BeginScrape {
        #[serde(rename = "reportsRaw")]
        reports_raw: String,
    },
    #[serde(rename = "SCRAPE_DONE")]
    ScrapeDone,
    #[serde(rename = "OPEN_DEFERRED")]
    OpenDeferred { url: String },
}

/// Command delivered into the host tab to kick off a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScrape {
    pub report_ids: Vec<WorkItem>,
    pub batch_size: usize,
    pub metadata_template: String,
    pub timeline_template: String,
}

/// Response to `BEGIN_SCRAPE`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeginScrapeResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Response to `SCRAPE_DONE`, reporting which routing path was taken.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeDoneResponse {
    pub ok: bool,
    pub reused: bool,
}

/// Response to `OPEN_DEFERRED`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDeferredResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
