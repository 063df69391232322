use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::config::ScopeConfig;
use crate::session::Session;

#[derive(Args, Clone, Debug)]
pub struct ScrapeArgs {
    /// Report ids or report URLs, space or comma separated. Reads stdin
    /// when neither ids nor --file are given.
    pub input: Vec<String>,

    /// Read report ids from a file instead.
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Reports retrieved concurrently per batch.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Use the in-memory stub driver instead of a real browser.
    #[arg(long)]
    pub stub: bool,
}

fn gather_input(args: &ScrapeArgs) -> Result<String> {
    if let Some(path) = &args.file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()));
    }
    if !args.input.is_empty() {
        return Ok(args.input.join(" "));
    }
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read report ids from stdin")?;
    Ok(raw)
}

pub async fn cmd_scrape(args: ScrapeArgs) -> Result<()> {
    let raw = gather_input(&args)?;
    if raw.trim().is_empty() {
        bail!("no report ids given");
    }

    let mut cfg = ScopeConfig::default();
    if let Some(batch_size) = args.batch_size {
        if batch_size == 0 {
            bail!("--batch-size must be at least 1");
        }
        cfg.batch_size = batch_size;
    }

    let driver = super::build_driver(args.stub).await?;
    let session = Session::start(driver, cfg)?;
    let outcome = session.scrape(&raw).await?;

    println!(
        "Scraped {} report(s); results page: {}",
        outcome.results.rows.len(),
        session.config().results_page_path().display()
    );
    if outcome.routed.reused {
        println!("Rerouted the scrape tab to the results view.");
    } else {
        println!("Opened a new tab on the results view.");
    }
    Ok(())
}
