//! Run orchestration: the control-request surface tying tab acquisition,
//! command delivery, result routing and deferred opens together.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use reportscope_core_types::{
    normalize_report_input, BeginScrapeResponse, ControlRequest, OpenDeferredResponse, RunId,
    ScrapeDoneResponse, StartScrape, TabId,
};
use reportscope_result_store::ResultStore;
use reportscope_tab_broker::{acquire_host_tab, DeferredNavigator, TabDriver};

use crate::config::ScopeConfig;
use crate::errors::AppResult;
use crate::queries::TemplateSource;

/// Delivers the start command into the host tab's agent.
#[async_trait]
pub trait AgentEndpoint: Send + Sync {
    async fn deliver(&self, tab: &TabId, command: StartScrape) -> AppResult<()>;
}

pub struct Orchestrator {
    driver: Arc<dyn TabDriver>,
    endpoint: Arc<dyn AgentEndpoint>,
    store: Arc<ResultStore>,
    templates: Arc<dyn TemplateSource>,
    deferred: Arc<DeferredNavigator>,
    cfg: ScopeConfig,
    /// Tab opened by the last `begin_scrape` and not yet consumed; eligible
    /// for reuse as the results destination. Pre-existing tabs never land
    /// here.
    pending_reuse: Mutex<Option<TabId>>,
}

impl Orchestrator {
    pub fn new(
        driver: Arc<dyn TabDriver>,
        endpoint: Arc<dyn AgentEndpoint>,
        store: Arc<ResultStore>,
        templates: Arc<dyn TemplateSource>,
        deferred: Arc<DeferredNavigator>,
        cfg: ScopeConfig,
    ) -> Self {
        Self {
            driver,
            endpoint,
            store,
            templates,
            deferred,
            cfg,
            pending_reuse: Mutex::new(None),
        }
    }

    /// Starts a run from raw operator input. Unusable input is a rejection,
    /// not an error; infrastructure failures (tab acquisition, store reset)
    /// propagate.
    pub async fn begin_scrape(&self, reports_raw: &str) -> AppResult<BeginScrapeResponse> {
        let report_ids = normalize_report_input(reports_raw);
        if report_ids.is_empty() {
            return Ok(BeginScrapeResponse {
                ok: false,
                reason: Some("no report ids".into()),
            });
        }

        let host = acquire_host_tab(self.driver.as_ref(), &self.cfg.acquire_config()).await?;
        *self.pending_reuse.lock().await = host.created.then(|| host.id.clone());

        // Templates reload every run so operator edits apply without restart.
        let templates = self.templates.load().await?;

        self.store.clear().await?;

        let command = StartScrape {
            report_ids,
            batch_size: self.cfg.batch_size,
            metadata_template: templates.metadata,
            timeline_template: templates.timeline,
        };
        let run = RunId::new();
        info!(run = %run, tab = %host.id, reports = command.report_ids.len(), "starting scrape run");
        self.deliver_with_retry(&host.id, command).await;

        Ok(BeginScrapeResponse {
            ok: true,
            reason: None,
        })
    }

    /// Delivery failures after the configured retries do not fail the run;
    /// the host tab may still pick the command up through other means, and
    /// the operator sees the outcome via the store either way.
    async fn deliver_with_retry(&self, tab: &TabId, command: StartScrape) {
        let policy = &self.cfg.delivery_retry;
        let mut last_err = match self.endpoint.deliver(tab, command.clone()).await {
            Ok(()) => return,
            Err(err) => err,
        };
        for attempt in 1..=policy.attempts {
            sleep(policy.delay).await;
            match self.endpoint.deliver(tab, command.clone()).await {
                Ok(()) => return,
                Err(err) => {
                    warn!(tab = %tab, attempt, error = %last_err, "command delivery retry failed");
                    last_err = err;
                }
            }
        }
        warn!(tab = %tab, error = %last_err, "giving up on command delivery");
    }

    /// Routes the browser to the results view once a run completes. The tab
    /// opened for the run is reused when it still exists; otherwise a fresh
    /// foreground tab is opened. The reuse slot is consumed either way.
    pub async fn scrape_done(&self) -> AppResult<ScrapeDoneResponse> {
        let pending = self.pending_reuse.lock().await.take();

        if let Some(tab) = pending {
            if self.driver.tab_exists(&tab).await? {
                match self.reroute(&tab).await {
                    Ok(()) => {
                        return Ok(ScrapeDoneResponse {
                            ok: true,
                            reused: true,
                        })
                    }
                    Err(err) => {
                        warn!(tab = %tab, error = %err, "results reroute failed, opening new tab");
                    }
                }
            }
        }

        self.driver.create_tab(&self.cfg.results_url, true).await?;
        Ok(ScrapeDoneResponse {
            ok: true,
            reused: false,
        })
    }

    async fn reroute(&self, tab: &TabId) -> AppResult<()> {
        self.driver.navigate(tab, &self.cfg.results_url).await?;
        self.driver.activate(tab).await?;
        Ok(())
    }

    /// Registers a background tab that navigates to `url` on first focus.
    /// Failures are reported in the response rather than propagated.
    pub async fn open_deferred(&self, url: &str) -> OpenDeferredResponse {
        match self.deferred.open_deferred(url).await {
            Ok(tab_id) => OpenDeferredResponse {
                ok: true,
                tab_id: Some(tab_id),
                error: None,
            },
            Err(err) => OpenDeferredResponse {
                ok: false,
                tab_id: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Control-message dispatcher, returning the JSON response envelope.
    pub async fn handle(&self, request: ControlRequest) -> AppResult<Value> {
        let value = match request {
            ControlRequest::BeginScrape { reports_raw } => {
                serde_json::to_value(self.begin_scrape(&reports_raw).await?)?
            }
            ControlRequest::ScrapeDone => serde_json::to_value(self.scrape_done().await?)?,
            ControlRequest::OpenDeferred { url } => {
                serde_json::to_value(self.open_deferred(&url).await)?
            }
        };
        Ok(value)
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.cfg
    }
}
