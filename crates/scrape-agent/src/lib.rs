//! The execution agent: runs the retrieval workload with page-level
//! privileges inside the acquired host tab.
//!
//! The agent never talks CDP directly. It sees the page through the
//! [`PageHost`] seam (evaluate script, read the security token) and the
//! network through the [`GraphQlTransport`] seam, which keeps the batching,
//! fault-isolation and extraction logic testable against mocks.

pub mod agent;
pub mod extract;
pub mod metrics;
pub mod overlay;
pub mod template;
pub mod token;
pub mod transport;

pub use agent::{AgentConfig, ScrapeAgent, ScrapeJob, StatusSink};
pub use overlay::OverlayStatusSink;
pub use token::wait_for_token;
pub use transport::{GraphQlTransport, PageFetchTransport, PageHost};

use reportscope_result_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The page never exposed its security token within the deadline.
    #[error("security token not found on page")]
    TokenNotFound,
    #[error("page evaluation failed: {0}")]
    Eval(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
