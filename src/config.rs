//! Runtime configuration: target-site addresses, batch/timing knobs and the
//! profile directory holding the durable store. Environment variables
//! override every default.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reportscope_scrape_agent::AgentConfig;
use reportscope_tab_broker::AcquireConfig;

/// Policy for re-delivering the start command when the host tab's agent is
/// not yet attached.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay: Duration::from_millis(300),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScopeConfig {
    /// Origin prefix of the target site; tabs on it qualify for host reuse.
    pub origin: String,
    /// Landing page opened when no suitable tab exists.
    pub landing_url: String,
    /// GraphQL endpoint path, resolved against the host page's origin.
    pub graphql_endpoint: String,
    /// Destination the operator is routed to after a completed run.
    pub results_url: String,
    pub batch_size: usize,
    pub delivery_retry: RetryPolicy,
    /// Timing knobs for the in-page agent (token poll, batch pause).
    pub agent: AgentConfig,
    /// Directory for the durable store, rendered results page and query
    /// template overrides.
    pub profile_dir: PathBuf,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        let origin =
            env_or("REPORTSCOPE_ORIGIN", "https://hackerone.com/");
        let landing_url = env_or(
            "REPORTSCOPE_LANDING_URL",
            &format!("{}hacktivity/overview", origin),
        );
        let profile_dir = resolve_profile_dir();
        let results_url = env::var("REPORTSCOPE_RESULTS_URL").unwrap_or_else(|_| {
            format!("file://{}", profile_dir.join("results.html").display())
        });
        Self {
            origin,
            landing_url,
            graphql_endpoint: env_or("REPORTSCOPE_GRAPHQL_ENDPOINT", "/graphql"),
            results_url,
            batch_size: env::var("REPORTSCOPE_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            delivery_retry: RetryPolicy::default(),
            agent: AgentConfig::default(),
            profile_dir,
        }
    }
}

impl ScopeConfig {
    pub fn acquire_config(&self) -> AcquireConfig {
        AcquireConfig::new(&self.origin, &self.landing_url)
    }

    pub fn store_path(&self) -> PathBuf {
        self.profile_dir.join("store.json")
    }

    pub fn results_page_path(&self) -> PathBuf {
        self.profile_dir.join("results.html")
    }

    /// Directory checked for operator-supplied query template overrides.
    pub fn queries_dir(&self) -> PathBuf {
        self.profile_dir.join("queries")
    }

    /// Canonical URL of one report on the target site.
    pub fn report_url(&self, report_id: &str) -> String {
        format!("{}reports/{}", self.origin, report_id)
    }
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn resolve_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("REPORTSCOPE_PROFILE") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    dirs::data_local_dir()
        .map(|base| base.join("reportscope"))
        .unwrap_or_else(|| Path::new("./.reportscope-profile").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let cfg = ScopeConfig::default();
        assert!(cfg.landing_url.starts_with(&cfg.origin));
        assert_eq!(cfg.batch_size, 5);
        assert_eq!(cfg.delivery_retry.attempts, 1);
        assert_eq!(cfg.report_url("7"), format!("{}reports/7", cfg.origin));
    }
}
