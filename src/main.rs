use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use inplace_translator::{Config, run};

#[derive(Parser, Debug)]
#[command(
    name = "inplace-translator",
    version,
    about = "Translate a PDF's text in place, preserving layout and imagery"
)]
struct Cli {
    /// Source PDF
    input: PathBuf,

    /// Output PDF
    output: PathBuf,

    /// Target language, as a plain name (e.g. French, Japanese)
    #[arg(short = 'l', long = "lang")]
    lang: String,

    /// Rewrite model name (default: gpt-4o-mini)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides OPENAI_API_KEY)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Background strategy: sampled (default) or flat
    #[arg(short = 'b', long = "background")]
    background: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    inplace_translator::logging::init(cli.verbose)?;

    let summary = run(Config {
        input: cli.input,
        output: cli.output,
        lang: cli.lang,
        model: cli.model,
        key: cli.key,
        background: cli.background,
        settings_path: cli.read_settings,
    })
    .await?;

    println!(
        "translated {} page(s), {} line(s) ({} kept original text, {} overflowed)",
        summary.pages, summary.lines, summary.degraded, summary.overflowed
    );
    Ok(())
}
