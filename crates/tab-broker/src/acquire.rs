//! Host-tab acquisition: reuse the operator's tab when it is already on the
//! target site, otherwise open a landing tab and wait for it to load.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use reportscope_core_types::TabHandle;

use crate::driver::{TabDriver, TabEvent};
use crate::BrokerError;

/// Where and how to acquire the execution host tab.
#[derive(Clone, Debug)]
pub struct AcquireConfig {
    /// Origin prefix that qualifies an existing tab for reuse.
    pub origin: String,
    /// Landing URL used when a new tab has to be opened.
    pub landing_url: String,
    /// Ceiling on the wait for the new tab's load-complete event.
    pub load_deadline: Duration,
}

impl AcquireConfig {
    pub fn new(origin: impl Into<String>, landing_url: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            landing_url: landing_url.into(),
            load_deadline: Duration::from_secs(30),
        }
    }
}

/// Returns a tab usable as the execution host.
///
/// If the foreground tab already sits on the target origin it is reused with
/// `created=false`; such a tab belongs to the operator and is never
/// repurposed later. Otherwise a new active tab is opened at the landing URL
/// and the call suspends until that tab reports load completion. Driver
/// failures propagate; the scrape start aborts with them.
pub async fn acquire_host_tab(
    driver: &dyn TabDriver,
    cfg: &AcquireConfig,
) -> Result<TabHandle, BrokerError> {
    if let Some(active) = driver.active_tab().await? {
        if active.url.starts_with(&cfg.origin) {
            debug!(tab = %active.id, url = %active.url, "reusing operator tab as host");
            return Ok(TabHandle {
                id: active.id,
                created: false,
            });
        }
    }

    // Subscribe before creating so the load event cannot slip past us.
    let mut events = driver.events();
    let id = driver.create_tab(&cfg.landing_url, true).await?;
    info!(tab = %id, url = %cfg.landing_url, "opened host tab, waiting for load");

    let wait = async {
        loop {
            match events.recv().await {
                Ok(TabEvent::LoadComplete(loaded)) if loaded == id => return Ok(()),
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return Err(BrokerError::EventsClosed)
                }
            }
        }
    };
    timeout(cfg.load_deadline, wait)
        .await
        .map_err(|_| BrokerError::LoadTimeout)??;

    Ok(TabHandle { id, created: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::StubTabDriver;

    fn cfg() -> AcquireConfig {
        AcquireConfig::new("https://target.test/", "https://target.test/landing")
    }

    #[tokio::test]
    async fn reuses_active_tab_on_target_origin() {
        let driver = StubTabDriver::new();
        let existing = driver.seed_active_tab("https://target.test/reports").await;

        let handle = acquire_host_tab(&driver, &cfg()).await.unwrap();
        assert_eq!(handle.id, existing);
        assert!(!handle.created);
        assert_eq!(driver.open_tab_count(), 1);
    }

    #[tokio::test]
    async fn opens_landing_tab_when_elsewhere() {
        let driver = StubTabDriver::new();
        driver.seed_active_tab("https://unrelated.test/").await;

        let handle = acquire_host_tab(&driver, &cfg()).await.unwrap();
        assert!(handle.created);
        assert_eq!(
            driver.tab_url(&handle.id).unwrap(),
            "https://target.test/landing"
        );
    }

    #[tokio::test]
    async fn opens_landing_tab_when_no_active_tab() {
        let driver = StubTabDriver::new();
        let handle = acquire_host_tab(&driver, &cfg()).await.unwrap();
        assert!(handle.created);
    }

    #[tokio::test]
    async fn creation_failure_propagates() {
        let driver = StubTabDriver::new();
        driver.reject_creates(true);
        let err = acquire_host_tab(&driver, &cfg()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Driver(_)));
    }
}
