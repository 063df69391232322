//! Batched retrieval with per-item fault isolation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::sleep;
use tracing::{info, warn};

use reportscope_core_types::{
    CoreError, QueryTemplatePair, ReportResult, StartScrape, WorkItem,
};
use reportscope_result_store::ResultStore;

use crate::extract::{extract_metadata, extract_timeline};
use crate::metrics;
use crate::template::fill_template;
use crate::token::wait_for_token;
use crate::transport::{GraphQlTransport, PageHost};
use crate::AgentError;

/// Progress/status reporting seam. The CDP wiring mirrors updates into an
/// on-page overlay; tests capture them directly.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn update(&self, text: &str);
}

/// Sink that only logs, for headless or stub sessions.
pub struct LogStatusSink;

#[async_trait]
impl StatusSink for LogStatusSink {
    async fn update(&self, text: &str) {
        info!(status = text, "scrape status");
    }
}

/// One run's workload.
#[derive(Clone, Debug)]
pub struct ScrapeJob {
    pub work_items: Vec<WorkItem>,
    pub templates: QueryTemplatePair,
    pub batch_size: usize,
}

impl ScrapeJob {
    /// Builds a job from the wire command, re-validating the templates.
    pub fn from_command(cmd: StartScrape) -> Result<Self, CoreError> {
        Ok(Self {
            work_items: cmd.report_ids,
            templates: QueryTemplatePair::new(cmd.metadata_template, cmd.timeline_template)?,
            batch_size: cmd.batch_size,
        })
    }
}

/// Timing knobs; defaults match the original pipeline.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub token_timeout: Duration,
    pub token_poll: Duration,
    pub batch_pause: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            token_timeout: Duration::from_secs(7),
            token_poll: Duration::from_millis(100),
            batch_pause: Duration::from_millis(120),
        }
    }
}

/// Executes the retrieval workload inside the host tab.
pub struct ScrapeAgent {
    host: Arc<dyn PageHost>,
    transport: Arc<dyn GraphQlTransport>,
    status: Arc<dyn StatusSink>,
    store: Arc<ResultStore>,
    cfg: AgentConfig,
}

impl ScrapeAgent {
    pub fn new(
        host: Arc<dyn PageHost>,
        transport: Arc<dyn GraphQlTransport>,
        status: Arc<dyn StatusSink>,
        store: Arc<ResultStore>,
    ) -> Self {
        Self {
            host,
            transport,
            status,
            store,
            cfg: AgentConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AgentConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Retrieves and extracts one report: both substituted queries issued
    /// concurrently, jointly awaited.
    pub async fn scrape_one(
        &self,
        item: &WorkItem,
        token: &str,
        templates: &QueryTemplatePair,
    ) -> Result<ReportResult, AgentError> {
        let meta_body = fill_template(&templates.metadata, item);
        let time_body = fill_template(&templates.timeline, item);
        let (meta_json, time_json) = tokio::try_join!(
            self.transport.post(&meta_body, token),
            self.transport.post(&time_body, token)
        )?;

        let meta = extract_metadata(&meta_json);
        let time = extract_timeline(&time_json);
        Ok(ReportResult {
            report_id: item.as_str().to_string(),
            status: meta.status,
            researcher: meta.researcher,
            title: meta.title,
            program: meta.program,
            last_action: time.last_action,
            last_action_author: time.last_action_author,
            last_action_date: time.last_action_date,
            last_message: time.last_message,
            last_message_author: time.last_message_author,
            last_message_date: time.last_message_date,
        })
    }

    /// Runs the whole workload: token, batches, publish, in that order.
    ///
    /// Result order always matches input order, whatever the network does;
    /// each group is awaited jointly and appended in index order, and groups
    /// run strictly one after another. A token timeout fails the run with no
    /// results published; per-item failures degrade to sentinel rows.
    pub async fn run(&self, job: ScrapeJob) -> Result<Vec<ReportResult>, AgentError> {
        self.status.update("Loading security token…").await;
        let token = match wait_for_token(
            self.host.as_ref(),
            self.cfg.token_timeout,
            self.cfg.token_poll,
        )
        .await
        {
            Ok(token) => token,
            Err(err) => {
                metrics::record_run_failed();
                self.status.update(&format!("Error: {err}")).await;
                return Err(err);
            }
        };

        let total = job.work_items.len();
        let batch_size = job.batch_size.max(1);
        self.status
            .update(&format!("Scraping {total} reports…"))
            .await;

        let mut results: Vec<ReportResult> = Vec::with_capacity(total);
        let groups: Vec<&[WorkItem]> = job.work_items.chunks(batch_size).collect();
        // Shared by every per-item future in the fan-out.
        let token = &token;
        let templates = &job.templates;
        for (index, group) in groups.iter().enumerate() {
            let rows = join_all(group.iter().map(|item| async move {
                match self.scrape_one(item, token, templates).await {
                    Ok(row) => {
                        metrics::record_report_scraped();
                        row
                    }
                    Err(err) => {
                        warn!(report = %item, %err, "report scrape failed");
                        metrics::record_report_failed();
                        ReportResult::failed(item)
                    }
                }
            }))
            .await;
            results.extend(rows);
            metrics::record_batch_completed();
            self.status
                .update(&format!("Processed {} / {}…", results.len(), total))
                .await;
            if index + 1 < groups.len() {
                sleep(self.cfg.batch_pause).await;
            }
        }

        self.store.publish(&results).await?;
        metrics::record_run_completed();
        self.status.update("Done. Opening results…").await;
        Ok(results)
    }
}
