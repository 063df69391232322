//! Tab acquisition and deferred navigation for the scrape pipeline.
//!
//! The [`TabDriver`] trait is the capability surface the pipeline needs from a
//! browser: inspect the foreground tab, open/activate/navigate tabs, and watch
//! tab lifecycle events. Two implementations are provided: a Chromium DevTools
//! Protocol driver for real runs and an in-memory stub used by tests and by
//! stub-mode sessions.

pub mod acquire;
pub mod deferred;
pub mod driver;

pub use acquire::{acquire_host_tab, AcquireConfig};
pub use deferred::DeferredNavigator;
pub use driver::{BrokerConfig, CdpTabDriver, StubTabDriver, TabDriver, TabEvent, TabInfo};

use reportscope_core_types::TabId;
use reportscope_result_store::StoreError;
use thiserror::Error;

/// Neutral placeholder a deferred tab parks on until it is activated.
pub const BLANK_URL: &str = "about:blank";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("browser driver failure: {0}")]
    Driver(String),
    #[error("tab {0} not found")]
    TabNotFound(TabId),
    #[error("timed out waiting for tab load")]
    LoadTimeout,
    #[error("tab event stream closed")]
    EventsClosed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BrokerError {
    pub fn driver(err: impl std::fmt::Display) -> Self {
        Self::Driver(err.to_string())
    }
}
