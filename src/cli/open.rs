use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use tracing::info;

use crate::config::ScopeConfig;
use crate::session::Session;

/// Spacing between consecutive deferred opens, so a large batch does not
/// flood the browser with simultaneous target creations.
const OPEN_SPACING: Duration = Duration::from_millis(60);

#[derive(Args, Clone, Debug)]
pub struct OpenArgs {
    /// Report ids or full URLs to open as deferred background tabs.
    pub targets: Vec<String>,

    /// Use the in-memory stub driver instead of a real browser.
    #[arg(long)]
    pub stub: bool,
}

pub async fn cmd_open(args: OpenArgs) -> Result<()> {
    if args.targets.is_empty() {
        bail!("no targets given");
    }

    let cfg = ScopeConfig::default();
    let driver = super::build_driver(args.stub).await?;
    let session = Session::start(driver, cfg)?;

    let mut opened = 0usize;
    for (i, target) in args.targets.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(OPEN_SPACING).await;
        }
        let url = if target.bytes().all(|b| b.is_ascii_digit()) {
            session.config().report_url(target)
        } else {
            target.clone()
        };
        let resp = session.orchestrator().open_deferred(&url).await;
        if resp.ok {
            opened += 1;
        } else {
            eprintln!(
                "failed to open {url}: {}",
                resp.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    println!("Opened {opened} deferred tab(s); they navigate on first focus.");
    info!("waiting; press Ctrl-C to stop watching tab activations");
    tokio::signal::ctrl_c().await?;
    Ok(())
}
