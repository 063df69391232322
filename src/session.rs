//! Session wiring: builds the store, deferred-navigation watcher, in-page
//! agent endpoint and orchestrator around a driver, and runs complete
//! scrape cycles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use reportscope_core_types::{ScrapeDoneResponse, StartScrape, TabId};
use reportscope_result_store::{JsonFileStore, KvStore, ResultStore, StoredResults};
use reportscope_scrape_agent::{
    AgentConfig, AgentError, OverlayStatusSink, PageFetchTransport, PageHost, ScrapeAgent,
    ScrapeJob, StatusSink,
};
use reportscope_tab_broker::{DeferredNavigator, TabDriver};

use crate::config::ScopeConfig;
use crate::errors::{AppError, AppResult};
use crate::orchestrator::{AgentEndpoint, Orchestrator};
use crate::page::DriverPageHost;
use crate::queries::FileTemplateSource;
use crate::render;

/// Overlay lingers briefly after completion so the operator sees the final
/// status before the tab is rerouted.
const OVERLAY_LINGER: Duration = Duration::from_millis(600);

/// Endpoint that runs the scrape agent inside the host tab. Delivery fails
/// when the page's document is not ready yet, which lets the orchestrator's
/// retry policy cover the load race after tab creation.
pub struct InPageAgentEndpoint {
    driver: Arc<dyn TabDriver>,
    store: Arc<ResultStore>,
    graphql_endpoint: String,
    agent_cfg: AgentConfig,
    done_tx: mpsc::Sender<Result<(), AgentError>>,
}

#[async_trait]
impl AgentEndpoint for InPageAgentEndpoint {
    async fn deliver(&self, tab: &TabId, command: StartScrape) -> AppResult<()> {
        let host = Arc::new(DriverPageHost::new(self.driver.clone(), tab.clone()));

        let ready = host.eval("document.readyState").await?;
        match ready.as_str() {
            Some("complete") | Some("interactive") => {}
            other => {
                return Err(AppError::message(format!(
                    "host page not ready: {}",
                    other.unwrap_or("unknown")
                )))
            }
        }

        let job = ScrapeJob::from_command(command)?;
        let transport = Arc::new(PageFetchTransport::new(
            host.clone(),
            self.graphql_endpoint.clone(),
        ));
        let overlay = Arc::new(OverlayStatusSink::new(host.clone()));
        let agent = ScrapeAgent::new(
            host as Arc<dyn PageHost>,
            transport,
            overlay.clone() as Arc<dyn StatusSink>,
            self.store.clone(),
        )
        .with_config(self.agent_cfg.clone());

        let done_tx = self.done_tx.clone();
        let tab = tab.clone();
        tokio::spawn(async move {
            match agent.run(job).await {
                Ok(rows) => {
                    info!(tab = %tab, rows = rows.len(), "scrape run finished");
                    let _ = done_tx.send(Ok(())).await;
                    overlay.dismiss_after(OVERLAY_LINGER).await;
                }
                Err(err) => {
                    // The failure status stays on the overlay for the
                    // operator; no results are published.
                    warn!(tab = %tab, error = %err, "scrape run failed");
                    let _ = done_tx.send(Err(err)).await;
                }
            }
        });
        Ok(())
    }
}

/// One wired-up pipeline over a driver. Owns the orchestrator, the durable
/// store and the background watchers.
pub struct Session {
    orchestrator: Arc<Orchestrator>,
    store: Arc<ResultStore>,
    cfg: ScopeConfig,
    done_rx: Mutex<mpsc::Receiver<Result<(), AgentError>>>,
    _deferred_watcher: JoinHandle<()>,
}

impl Session {
    pub fn start(driver: Arc<dyn TabDriver>, cfg: ScopeConfig) -> AppResult<Self> {
        std::fs::create_dir_all(&cfg.profile_dir)?;
        let kv: Arc<dyn KvStore> = Arc::new(JsonFileStore::new(cfg.store_path()));
        Self::start_with_kv(driver, kv, cfg)
    }

    /// Same wiring over an arbitrary key-value store; tests use the
    /// in-memory one.
    pub fn start_with_kv(
        driver: Arc<dyn TabDriver>,
        kv: Arc<dyn KvStore>,
        cfg: ScopeConfig,
    ) -> AppResult<Self> {
        let store = Arc::new(ResultStore::new(kv.clone()));
        let deferred = DeferredNavigator::new(driver.clone(), kv);
        let watcher = deferred.spawn_watcher();

        let (done_tx, done_rx) = mpsc::channel(4);
        let endpoint = Arc::new(InPageAgentEndpoint {
            driver: driver.clone(),
            store: store.clone(),
            graphql_endpoint: cfg.graphql_endpoint.clone(),
            agent_cfg: cfg.agent.clone(),
            done_tx,
        });
        let templates = Arc::new(FileTemplateSource::new(&cfg));

        let orchestrator = Arc::new(Orchestrator::new(
            driver,
            endpoint,
            store.clone(),
            templates,
            deferred,
            cfg.clone(),
        ));

        Ok(Self {
            orchestrator,
            store,
            cfg,
            done_rx: Mutex::new(done_rx),
            _deferred_watcher: watcher,
        })
    }

    /// Runs one full cycle: start the run, wait for the agent to publish,
    /// render the results page and route the browser to it.
    pub async fn scrape(&self, reports_raw: &str) -> AppResult<ScrapeOutcome> {
        let begin = self.orchestrator.begin_scrape(reports_raw).await?;
        if !begin.ok {
            return Err(AppError::message(
                begin.reason.unwrap_or_else(|| "scrape rejected".into()),
            ));
        }

        self.done_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| AppError::message("scrape run ended without a completion signal"))?
            .map_err(AppError::from)?;

        let results = self
            .store
            .load()
            .await?
            .ok_or_else(|| AppError::message("run completed but no results were stored"))?;
        render::write_results_page(&self.cfg.results_page_path(), &results)?;

        let routed = self.orchestrator.scrape_done().await?;
        Ok(ScrapeOutcome { results, routed })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.cfg
    }
}

/// What one completed cycle produced.
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub results: StoredResults,
    pub routed: ScrapeDoneResponse,
}
