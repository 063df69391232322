//! Reportscope: bulk report metadata/timeline scraping through an
//! authenticated browser session.

pub mod cli;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod page;
pub mod queries;
pub mod render;
pub mod session;

pub use config::ScopeConfig;
pub use errors::{AppError, AppResult};
pub use orchestrator::Orchestrator;
pub use session::Session;
