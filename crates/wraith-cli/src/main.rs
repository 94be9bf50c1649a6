use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wraith_client::{CssSelect, Markdownify, OpenAiProvider, ReqwestFetcher, StripTags};
use wraith_core::response::Payload;
use wraith_core::request::RetryPolicy;
use wraith_core::scraper::SchemaScraper;
use wraith_core::traits::Preprocessor;
use wraith_core::{count_tokens, lookup, SchemaSource};

#[derive(Parser)]
#[command(name = "wraith", version, about = "Schema-guided LLM extraction from HTML")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args)]
struct SchemaArgs {
    /// Inline schema, e.g. '{"name": "string", "url": "url"}'
    #[arg(long, conflicts_with = "schema_file")]
    schema: Option<String>,

    /// Path to a schema file
    #[arg(long)]
    schema_file: Option<PathBuf>,
}

impl SchemaArgs {
    fn resolve(&self) -> Result<SchemaSource> {
        if let Some(inline) = &self.schema {
            return Ok(SchemaSource::from(inline.clone()));
        }
        if let Some(path) = &self.schema_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read schema file {}", path.display()))?;
            return Ok(SchemaSource::from(text));
        }
        bail!("provide --schema or --schema-file");
    }
}

#[derive(Args)]
struct SelectionArgs {
    /// CSS selector to narrow the scrape
    #[arg(long)]
    css: Option<String>,

    /// Convert the page to Markdown before extraction (reduces tokens)
    #[arg(long, default_value_t = false)]
    markdown: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract structured data from a page
    Scrape {
        /// Target URL (or a raw HTML string)
        url: String,

        #[command(flatten)]
        schema: SchemaArgs,

        #[command(flatten)]
        selection: SelectionArgs,

        /// Candidate models, in fallback order
        #[arg(short, long, env = "WRAITH_MODEL", default_values_t = [String::from("gpt-4o-mini")])]
        model: Vec<String>,

        /// OpenAI-compatible API base URL
        #[arg(
            long,
            env = "WRAITH_BASE_URL",
            default_value = "https://api.openai.com/v1"
        )]
        base_url: String,

        /// API key (reads WRAITH_API_KEY if not provided)
        #[arg(long, env = "WRAITH_API_KEY", hide_env_values = true)]
        api_key: String,

        /// Token threshold for splitting the page into chunks (0 = off)
        #[arg(long, default_value_t = 0)]
        split: usize,

        /// Hard ceiling on total spend, in dollars
        #[arg(long, default_value_t = 1.0)]
        max_cost: f64,

        /// Retries per chunk for transient provider errors
        #[arg(long, default_value_t = 1)]
        retries: u32,

        /// Seconds to wait between same-model retries
        #[arg(long, default_value_t = 30)]
        retry_wait: u64,
    },

    /// Estimate token usage and prompt cost without calling the API
    Estimate {
        /// Target URL (or a raw HTML string)
        url: String,

        #[command(flatten)]
        selection: SelectionArgs,

        /// Models to estimate against
        #[arg(short, long, default_values_t = [String::from("gpt-4o-mini")])]
        model: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_directive = match cli.verbose {
        0 => "wraith=warn",
        1 => "wraith=info",
        _ => "wraith=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_directive.parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Scrape {
            url,
            schema,
            selection,
            model,
            base_url,
            api_key,
            split,
            max_cost,
            retries,
            retry_wait,
        } => {
            cmd_scrape(
                &url, &schema, &selection, model, &base_url, &api_key, split, max_cost, retries,
                retry_wait,
            )
            .await
        }
        Commands::Estimate {
            url,
            selection,
            model,
        } => cmd_estimate(&url, &selection, &model).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_scrape(
    url: &str,
    schema: &SchemaArgs,
    selection: &SelectionArgs,
    models: Vec<String>,
    base_url: &str,
    api_key: &str,
    split: usize,
    max_cost: f64,
    retries: u32,
    retry_wait: u64,
) -> Result<()> {
    let provider = OpenAiProvider::with_base_url(api_key, base_url)?;
    let fetcher = ReqwestFetcher::new()?;

    let mut scraper = SchemaScraper::new(provider, schema.resolve()?)?
        .with_models(models)
        .with_max_cost(max_cost)
        .with_retry(RetryPolicy::new(retries, Duration::from_secs(retry_wait)))
        .with_auto_split(split)?
        .with_fetcher(fetcher)
        .with_preprocessor(Arc::new(StripTags));
    if let Some(css) = &selection.css {
        scraper = scraper.with_preprocessor(Arc::new(CssSelect::new(css)?));
    }
    if selection.markdown {
        scraper = scraper.with_preprocessor(Arc::new(Markdownify::new()));
    }

    let response = scraper.scrape(url).await?;

    let data = match response.data {
        Payload::Json(value) => value,
        Payload::Text(text) => serde_json::Value::String(text),
        Payload::Empty => serde_json::Value::Null,
    };
    println!("{}", serde_json::to_string_pretty(&data)?);

    let stats = scraper.stats();
    tracing::info!(
        prompt_tokens = stats.prompt_tokens,
        completion_tokens = stats.completion_tokens,
        cost = format!("${:.4}", stats.cost).as_str(),
        api_time_ms = response.api_time.as_millis() as u64,
        "scrape complete"
    );
    Ok(())
}

async fn cmd_estimate(url: &str, selection: &SelectionArgs, models: &[String]) -> Result<()> {
    let html = if url.starts_with("http") {
        use wraith_core::traits::Fetcher;
        ReqwestFetcher::new()?.fetch(url).await?
    } else {
        url.to_string()
    };

    let mut fragments = StripTags.apply(&html)?;
    if let Some(css) = &selection.css {
        let stage = CssSelect::new(css)?;
        let mut next = Vec::new();
        for fragment in &fragments {
            next.extend(stage.apply(fragment)?);
        }
        fragments = next;
    }
    if selection.markdown {
        let stage = Markdownify::new();
        let mut next = Vec::new();
        for fragment in &fragments {
            next.extend(stage.apply(fragment)?);
        }
        fragments = next;
    }
    let document = fragments.join("\n");

    for model in models {
        let spec = lookup(model)?;
        let tokens = count_tokens(model, &document);
        let prompt_cost = spec.cost(tokens as u64, 0);
        println!(
            "{model}: {tokens} tokens, ~${prompt_cost:.4} prompt cost{}",
            if tokens > spec.max_tokens as usize {
                " (over the model's token budget — will fall back or need --split)"
            } else {
                ""
            }
        );
    }
    Ok(())
}
