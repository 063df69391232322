use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};

use reportscope_result_store::{JsonFileStore, ResultStore};

use crate::config::ScopeConfig;
use crate::render::{self, ExcludeFilter};

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
}

#[derive(Args, Clone, Debug)]
pub struct ResultsArgs {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Exclude rows whose last action and author both match, as
    /// "Action name:author". Repeatable.
    #[arg(long = "exclude", value_name = "ACTION:AUTHOR")]
    pub exclude: Vec<String>,
}

pub async fn cmd_results(args: ResultsArgs) -> Result<()> {
    let mut filters = Vec::with_capacity(args.exclude.len());
    for raw in &args.exclude {
        match ExcludeFilter::parse(raw) {
            Some(filter) => filters.push(filter),
            None => bail!("invalid exclude filter {raw:?}; expected \"Action:author\""),
        }
    }

    let cfg = ScopeConfig::default();
    let store = ResultStore::new(Arc::new(JsonFileStore::new(cfg.store_path())));
    let Some(stored) = store.load().await? else {
        bail!("no stored results; run `reportscope scrape` first");
    };

    let rows = render::apply_filters(&stored.rows, &filters);
    match args.format {
        OutputFormat::Table => print!("{}", render::render_table(&rows)),
        OutputFormat::Csv => render::write_csv(std::io::stdout().lock(), &rows)?,
        OutputFormat::Json => println!("{}", render::render_json(&rows)?),
    }
    Ok(())
}
