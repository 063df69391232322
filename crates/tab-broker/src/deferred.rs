//! Deferred navigation: open tabs inert on `about:blank` and only point them
//! at their real destination once the operator actually focuses them.
//!
//! The tab-to-URL map lives in the durable store under `deferredTabs` so it
//! survives orchestrator restarts within a session. Every access re-reads the
//! store; the persisted map is the only source of truth across event
//! invocations.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use reportscope_core_types::TabId;
use reportscope_result_store::{KvStore, KEY_DEFERRED_TABS};

use crate::driver::{TabDriver, TabEvent};
use crate::{BrokerError, BLANK_URL};

/// Registry of tabs opened without their destination loaded.
pub struct DeferredNavigator {
    driver: Arc<dyn TabDriver>,
    kv: Arc<dyn KvStore>,
}

impl DeferredNavigator {
    pub fn new(driver: Arc<dyn TabDriver>, kv: Arc<dyn KvStore>) -> Arc<Self> {
        Arc::new(Self { driver, kv })
    }

    /// Creates an inactive blank tab and records its pending destination.
    /// Returns the new tab id once both steps succeed.
    pub async fn open_deferred(&self, url: &str) -> Result<TabId, BrokerError> {
        let id = self.driver.create_tab(BLANK_URL, false).await?;
        self.remember(&id, url).await?;
        debug!(tab = %id, url, "deferred tab opened");
        Ok(id)
    }

    /// Starts the background watcher that resolves activations and abandons
    /// closed tabs. Runs until the driver's event stream closes.
    pub fn spawn_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut events = this.driver.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TabEvent::Activated(id)) => this.on_activated(&id).await,
                    Ok(TabEvent::Removed(id)) => this.on_removed(&id).await,
                    Ok(TabEvent::LoadComplete(_)) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "deferred watcher lagged behind tab events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn on_activated(&self, id: &TabId) {
        let url = match self.take(id).await {
            Ok(url) => url,
            Err(err) => {
                warn!(tab = %id, %err, "deferred map read failed");
                return;
            }
        };
        if let Some(url) = url {
            // Entry is already removed; a failed navigation is not retried.
            if let Err(err) = self.driver.navigate(id, &url).await {
                warn!(tab = %id, %err, "deferred navigation failed");
            } else {
                debug!(tab = %id, url, "deferred navigation resolved");
            }
        }
    }

    async fn on_removed(&self, id: &TabId) {
        if let Err(err) = self.take(id).await {
            warn!(tab = %id, %err, "failed to drop deferred entry for closed tab");
        }
    }

    async fn remember(&self, id: &TabId, url: &str) -> Result<(), BrokerError> {
        let mut map = self.read_map().await?;
        map.insert(id.as_str().to_string(), Value::from(url));
        self.write_map(map).await
    }

    /// Removes and returns the pending URL for a tab, if any.
    async fn take(&self, id: &TabId) -> Result<Option<String>, BrokerError> {
        let mut map = self.read_map().await?;
        let taken = map.remove(id.as_str());
        if taken.is_some() {
            self.write_map(map).await?;
        }
        Ok(taken.and_then(|v| v.as_str().map(str::to_string)))
    }

    async fn read_map(&self) -> Result<serde_json::Map<String, Value>, BrokerError> {
        Ok(self
            .kv
            .get(KEY_DEFERRED_TABS)
            .await?
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default())
    }

    async fn write_map(&self, map: serde_json::Map<String, Value>) -> Result<(), BrokerError> {
        self.kv
            .set(KEY_DEFERRED_TABS, Value::Object(map))
            .await
            .map_err(Into::into)
    }

    #[cfg(test)]
    async fn pending(&self, id: &TabId) -> Option<String> {
        self.read_map()
            .await
            .ok()?
            .get(id.as_str())
            .and_then(|v| v.as_str().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::StubTabDriver;
    use reportscope_result_store::MemoryStore;
    use std::time::Duration;
    use tokio::time::sleep;

    fn setup() -> (Arc<StubTabDriver>, Arc<DeferredNavigator>) {
        let driver = Arc::new(StubTabDriver::new());
        let nav = DeferredNavigator::new(
            driver.clone() as Arc<dyn TabDriver>,
            Arc::new(MemoryStore::new()),
        );
        (driver, nav)
    }

    #[tokio::test]
    async fn open_deferred_parks_on_blank() {
        let (driver, nav) = setup();
        let id = nav.open_deferred("https://target.test/reports/1").await.unwrap();
        assert_eq!(driver.tab_url(&id).unwrap(), BLANK_URL);
        assert_eq!(
            nav.pending(&id).await.as_deref(),
            Some("https://target.test/reports/1")
        );
    }

    #[tokio::test]
    async fn activation_navigates_exactly_once() {
        let (driver, nav) = setup();
        let _watcher = nav.spawn_watcher();
        let id = nav.open_deferred("https://target.test/reports/2").await.unwrap();

        driver.simulate_activate(&id).await;
        sleep(Duration::from_millis(50)).await;

        // Second activation must not renavigate.
        driver.simulate_activate(&id).await;
        sleep(Duration::from_millis(50)).await;

        let navs = driver.navigations();
        assert_eq!(navs.len(), 1);
        assert_eq!(navs[0].0, id);
        assert_eq!(navs[0].1, "https://target.test/reports/2");
        assert!(nav.pending(&id).await.is_none());
    }

    #[tokio::test]
    async fn close_before_activation_abandons_entry() {
        let (driver, nav) = setup();
        let _watcher = nav.spawn_watcher();
        let id = nav.open_deferred("https://target.test/reports/3").await.unwrap();

        driver.simulate_close(&id).await;
        sleep(Duration::from_millis(50)).await;

        assert!(driver.navigations().is_empty());
        assert!(nav.pending(&id).await.is_none());
    }

    #[tokio::test]
    async fn create_failure_surfaces() {
        let (driver, nav) = setup();
        driver.reject_creates(true);
        assert!(nav.open_deferred("https://target.test/").await.is_err());
    }

    #[tokio::test]
    async fn entries_are_independent_per_tab() {
        let (driver, nav) = setup();
        let _watcher = nav.spawn_watcher();
        let a = nav.open_deferred("https://target.test/reports/10").await.unwrap();
        let b = nav.open_deferred("https://target.test/reports/11").await.unwrap();

        driver.simulate_activate(&b).await;
        sleep(Duration::from_millis(50)).await;

        assert_eq!(driver.navigations().len(), 1);
        assert_eq!(nav.pending(&a).await.as_deref(), Some("https://target.test/reports/10"));
    }
}
