use anyhow::Result;
use clap::{Parser, Subcommand};

use reportscope_cli::cli::{self, OpenArgs, ResultsArgs, ScrapeArgs};

#[derive(Parser, Debug)]
#[command(
    name = "reportscope",
    version,
    about = "Bulk report metadata and timeline retrieval through an authenticated browser session"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scrape over a set of report ids and open the results view.
    Scrape(ScrapeArgs),
    /// Print the last stored results.
    Results(ResultsArgs),
    /// Open reports as deferred background tabs that load on first focus.
    Open(OpenArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    cli::init_logging(&args.log_level)?;

    match args.command {
        Command::Scrape(a) => cli::cmd_scrape(a).await,
        Command::Results(a) => cli::cmd_results(a).await,
        Command::Open(a) => cli::cmd_open(a).await,
    }
}
