//! CLI binary for edgequake-article2md.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! secrets to `PipelineConfig` + `Credentials` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_article2md::{
    process, process_to_file, Credentials, ExtractionStrategy, PipelineConfig, PipelineProgressCallback,
    ProgressCallback, Stage, StorageCredentials,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner naming the current stage, with
/// log lines for fallbacks, images and chunks printed above it.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        let (prefix, msg) = match stage {
            Stage::Extraction => ("Extracting", "fetching article…"),
            Stage::Relocation => ("Images", "uploading…"),
            Stage::Rewrite => ("Rewriting", "selecting model…"),
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg);
    }

    fn on_stage_complete(&self, stage: Stage, markdown_len: usize) {
        self.bar.println(format!(
            "  {} {:<18} {}",
            green("✓"),
            stage.to_string(),
            dim(&format!("{markdown_len:>6} bytes")),
        ));
    }

    fn on_extraction_fallback(&self, reason: &str) {
        self.bar.println(format!(
            "  {} scrape service unavailable, using browser {}",
            cyan("⚠"),
            dim(&format!("({reason})"))
        ));
        self.bar.set_message("rendering in browser…");
    }

    fn on_extracted(&self, strategy: ExtractionStrategy) {
        self.bar.set_message(format!("done via {strategy}"));
    }

    fn on_asset_relocated(&self, original: &str, _relocated: &str) {
        self.bar.set_message(truncate(original, 60));
    }

    fn on_asset_error(&self, location: &str, error: &str) {
        self.bar.println(format!(
            "  {} image kept at original location: {}  {}",
            red("✗"),
            truncate(location, 60),
            red(&truncate(error, 60)),
        ));
    }

    fn on_model_selected(&self, model: &str) {
        self.bar.set_message(format!("model {}", bold(model)));
    }

    fn on_chunk_complete(&self, chunk: usize, total_chunks: usize) {
        if total_chunks > 1 {
            self.bar.set_message(format!("chunk {chunk}/{total_chunks}"));
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rewrite an article (stdout)
  article2md https://mp.weixin.qq.com/s/XXXXXXXX

  # Write to a file
  article2md https://example.org/post -o post.md

  # Custom rewrite instruction
  article2md --instruction-file tone.txt https://example.org/post

  # Only try specific Gemini models
  article2md --models gemini-2.0-flash,gemini-1.5-flash https://example.org/post

  # Use another provider through edgequake-llm
  article2md --provider openai --models gpt-4.1-mini https://example.org/post

  # Never launch a browser; fail if the scrape service fails
  article2md --no-fallback https://example.org/post

  # JSON output (content, strategy, image failures, stats)
  article2md --json https://example.org/post > article.json

ENVIRONMENT VARIABLES:
  FIRECRAWL_API_KEY        Scrape service key (absent → browser extraction)
  CLOUDINARY_CLOUD_NAME    Image storage account name
  CLOUDINARY_API_KEY       Image storage API key
  CLOUDINARY_API_SECRET    Image storage API secret
  GEMINI_API_KEY           Gemini API key for the rewrite stage
  RUST_LOG                 Override log filter (e.g. edgequake_article2md=debug)

Storage credentials are only required when the article contains images.
"#;

/// Turn web articles into rewritten Markdown with relocated images.
#[derive(Parser, Debug)]
#[command(
    name = "article2md",
    version,
    about = "Turn web articles into rewritten Markdown with relocated images",
    long_about = "Extract a web article (scrape service first, headless browser as fallback), \
copy its images to your own storage, and rewrite the text with a language model.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// HTTP/HTTPS URL of the article.
    url: String,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "ARTICLE2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Rewrite instruction (replaces the default one).
    #[arg(long, conflicts_with = "instruction_file")]
    instruction: Option<String>,

    /// Path to a text file containing the rewrite instruction.
    #[arg(long, env = "ARTICLE2MD_INSTRUCTION_FILE")]
    instruction_file: Option<PathBuf>,

    /// Model candidates, tried in order (comma-separated).
    #[arg(long, env = "ARTICLE2MD_MODELS", value_delimiter = ',')]
    models: Vec<String>,

    /// edgequake-llm provider (openai, anthropic, gemini, ollama, …).
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "Route model calls through edgequake-llm instead of the Gemini REST API.\n\
          The provider reads its own API key variable (OPENAI_API_KEY, …)."
    )]
    provider: Option<String>,

    /// Do not fall back to the headless browser.
    #[arg(long, env = "ARTICLE2MD_NO_FALLBACK")]
    no_fallback: bool,

    /// Image storage folder.
    #[arg(long, env = "ARTICLE2MD_UPLOAD_FOLDER", default_value = "wechat_articles")]
    upload_folder: String,

    /// Character budget per rewrite call; longer articles are chunked.
    #[arg(long, env = "ARTICLE2MD_MAX_CHUNK_CHARS", default_value_t = 8000)]
    max_chunk_chars: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "ARTICLE2MD_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Scrape service timeout in seconds.
    #[arg(long, env = "ARTICLE2MD_SCRAPE_TIMEOUT", default_value_t = 30)]
    scrape_timeout: u64,

    /// Total browser extraction timeout in seconds.
    #[arg(long, env = "ARTICLE2MD_BROWSER_TIMEOUT", default_value_t = 60)]
    browser_timeout: u64,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "ARTICLE2MD_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Output structured JSON (ProcessedArticle) instead of Markdown.
    #[arg(long, env = "ARTICLE2MD_JSON")]
    json: bool,

    /// Disable progress spinner.
    #[arg(long, env = "ARTICLE2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "ARTICLE2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "ARTICLE2MD_QUIET")]
    quiet: bool,

    #[arg(long, env = "FIRECRAWL_API_KEY", hide_env_values = true, hide = true)]
    firecrawl_api_key: Option<String>,

    #[arg(long, env = "CLOUDINARY_CLOUD_NAME", hide = true)]
    cloudinary_cloud_name: Option<String>,

    #[arg(long, env = "CLOUDINARY_API_KEY", hide_env_values = true, hide = true)]
    cloudinary_api_key: Option<String>,

    #[arg(long, env = "CLOUDINARY_API_SECRET", hide_env_values = true, hide = true)]
    cloudinary_api_secret: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, hide = true)]
    gemini_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are suppressed while the spinner is active; it
    // already shows what matters.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress: Option<Arc<CliProgressCallback>> = show_progress.then(CliProgressCallback::new);
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback))?;
    let credentials = credentials(&cli);
    let instruction = read_instruction(&cli).await?;

    // ── Run pipeline ─────────────────────────────────────────────────────
    let result = match cli.output {
        Some(ref path) if !cli.json => {
            process_to_file(&cli.url, path, &credentials, instruction.as_deref(), &config).await
        }
        _ => process(&cli.url, &credentials, instruction.as_deref(), &config).await,
    };
    if let Some(ref p) = progress {
        p.bar.finish_and_clear();
    }
    let article = result.context("Processing failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&article).context("Failed to serialise output")?;
        println!("{json}");
    } else if cli.output.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(article.content.as_bytes())
            .context("Failed to write to stdout")?;
        if !article.content.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet && !cli.json {
        let s = &article.stats;
        let tick = if article.asset_failures.is_empty() {
            green("✔")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{}  {}  via {}  {}ms{}",
            tick,
            bold(&article.title()),
            article.strategy,
            s.total_duration_ms,
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
        eprintln!(
            "   {} images ({} relocated, {} kept)  /  {} chunk(s) with {}",
            dim(&s.images_found.to_string()),
            dim(&s.images_relocated.to_string()),
            dim(&s.images_failed.to_string()),
            dim(&s.chunks.to_string()),
            dim(&s.model),
        );
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .allow_fallback(!cli.no_fallback)
        .upload_folder(cli.upload_folder.clone())
        .max_chunk_chars(cli.max_chunk_chars)
        .temperature(cli.temperature)
        .scrape_timeout_secs(cli.scrape_timeout)
        .browser_timeout_secs(cli.browser_timeout)
        .api_timeout_secs(cli.api_timeout);

    let models: Vec<&str> = cli
        .models
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .collect();
    if !models.is_empty() {
        builder = builder.models(models);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Secrets come from flags or the environment only here; the library never
/// reads them itself.
fn credentials(cli: &Cli) -> Credentials {
    Credentials {
        scrape_api_key: cli.firecrawl_api_key.clone(),
        storage: StorageCredentials {
            cloud_name: cli.cloudinary_cloud_name.clone(),
            api_key: cli.cloudinary_api_key.clone(),
            api_secret: cli.cloudinary_api_secret.clone(),
        },
        model_api_key: cli.gemini_api_key.clone(),
    }
}

async fn read_instruction(cli: &Cli) -> Result<Option<String>> {
    if let Some(ref path) = cli.instruction_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instruction from {:?}", path))?;
        return Ok(Some(text));
    }
    Ok(cli.instruction.clone())
}
