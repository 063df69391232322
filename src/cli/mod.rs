pub mod open;
pub mod results;
pub mod scrape;

pub use open::{cmd_open, OpenArgs};
pub use results::{cmd_results, ResultsArgs};
pub use scrape::{cmd_scrape, ScrapeArgs};

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use reportscope_tab_broker::{BrokerConfig, CdpTabDriver, StubTabDriver, TabDriver};

pub fn init_logging(level: &str) -> Result<()> {
    let level: tracing::Level = level.parse().context("invalid log level")?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

/// Builds the browser driver. The stub driver keeps everything in memory,
/// for dry runs and tests.
pub async fn build_driver(stub: bool) -> Result<Arc<dyn TabDriver>> {
    if stub {
        return Ok(Arc::new(StubTabDriver::new()));
    }
    let driver = CdpTabDriver::start(BrokerConfig::default())
        .await
        .context("failed to attach to a browser; set REPORTSCOPE_CDP_URL or install Chrome")?;
    Ok(driver)
}
