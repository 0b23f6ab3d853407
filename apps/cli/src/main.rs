//! SiteScribe CLI: turn a documentation sitemap into clean Markdown files.
//!
//! Fetches every page a sitemap lists, stores the raw HTML, converts it to
//! Markdown with corrected code blocks, and writes one file per page.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
