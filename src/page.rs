//! Adapter giving the scrape agent a page-evaluation handle on one tab.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use reportscope_core_types::TabId;
use reportscope_scrape_agent::{AgentError, PageHost};
use reportscope_tab_broker::TabDriver;

/// `PageHost` bound to a single tab of a `TabDriver`.
pub struct DriverPageHost {
    driver: Arc<dyn TabDriver>,
    tab: TabId,
}

impl DriverPageHost {
    pub fn new(driver: Arc<dyn TabDriver>, tab: TabId) -> Self {
        Self { driver, tab }
    }

    pub fn tab(&self) -> &TabId {
        &self.tab
    }
}

#[async_trait]
impl PageHost for DriverPageHost {
    async fn eval(&self, expression: &str) -> Result<Value, AgentError> {
        self.driver
            .eval(&self.tab, expression)
            .await
            .map_err(|err| AgentError::Eval(err.to_string()))
    }
}
