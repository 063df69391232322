//! Unified error type for the orchestration layer.

use thiserror::Error;

use reportscope_core_types::CoreError;
use reportscope_result_store::StoreError;
use reportscope_scrape_agent::AgentError;
use reportscope_tab_broker::BrokerError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("csv output failure: {0}")]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

pub type AppResult<T> = Result<T, AppError>;
