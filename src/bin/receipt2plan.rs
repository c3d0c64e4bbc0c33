//! CLI binary for receipt2plan.
//!
//! A thin shim over the library: maps flags to `PlannerConfig` and a
//! `ProviderConfig`, drives one `WorkflowController` session and prints the
//! resulting plan.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use receipt2plan::pipeline::input::resolve_input;
use receipt2plan::pipeline::ocr::{EngineSlot, EngineStatus, OcrPipeline};
use receipt2plan::pipeline::tesseract::{TesseractEngine, DEFAULT_TESSERACT_BINARY};
use receipt2plan::settings::{
    default_settings_path, load_provider_config, save_provider_config, SETTINGS_PATH_ENV,
};
use receipt2plan::{
    JsonFileSettingsStore, MemorySettingsStore, PlannerConfig, ProgressCallback, ProviderConfig,
    ProviderGateway, ProviderId, SettingsStore, WorkflowController, WorkflowError,
    WorkflowProgressCallback,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────

/// Percentage bar during OCR, spinner while waiting for the provider.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl WorkflowProgressCallback for CliProgressCallback {
    fn on_ocr_start(&self) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  ⏱ {elapsed}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix("Reading receipt");
        self.bar.set_position(0);
        self.bar.reset_elapsed();
    }

    fn on_ocr_progress(&self, percent: u8) {
        self.bar.set_position(u64::from(percent));
    }

    fn on_ocr_complete(&self, text_len: usize) {
        self.bar.set_position(100);
        self.bar.println(format!(
            "  {} Receipt read  {}",
            green("✓"),
            dim(&format!("{text_len} chars"))
        ));
    }

    fn on_generation_start(&self, provider: ProviderId) {
        self.bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        self.bar.set_prefix("Planning");
        self.bar.set_message(format!("asking {provider}…"));
        self.bar.reset_elapsed();
    }

    fn on_generation_complete(&self, provider: ProviderId) {
        self.bar.finish_and_clear();
        eprintln!("{} Meal plan ready {}", green("✔"), dim(&format!("({provider})")));
    }

    fn on_error(&self, error: &str) {
        self.bar.println(format!("  {} {}", red("✘"), error));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scan a receipt and print the plan as Markdown
  receipt2plan run receipt.jpg

  # Correct the OCR text before generating
  receipt2plan run --review receipt.jpg

  # Skip OCR and use a text file
  receipt2plan run --text-file groceries.txt

  # Use OpenAI for this run and remember the choice
  receipt2plan run --provider openai --api-key sk-... --save-settings receipt.jpg

  # Inspect or change the stored provider
  receipt2plan settings show
  receipt2plan settings set --provider deepseek --api-key sk-...

PROVIDERS:
  gemini     gemini-2.5-flash-preview-09-2025   key optional (GEMINI_API_KEY)
  deepseek   deepseek-chat                      key required
  openai     gpt-4o-mini                        key required

ENVIRONMENT VARIABLES:
  RECEIPT2PLAN_PROVIDER    Provider for this run (gemini, deepseek, openai)
  RECEIPT2PLAN_API_KEY     API key for this run
  GEMINI_API_KEY           Fallback key for Gemini when none is stored
  RECEIPT2PLAN_SETTINGS    Settings file location
  RECEIPT2PLAN_TESSERACT   Path to the tesseract binary
  RECEIPT2PLAN_OCR_LANG    Tesseract language, e.g. eng or eng+deu
"#;

/// Turn a grocery receipt photo into a three-day meal plan.
#[derive(Parser, Debug)]
#[command(
    name = "receipt2plan",
    version,
    about = "Turn a grocery receipt photo into a three-day meal plan",
    long_about = "Reads a receipt photo with Tesseract OCR, lets you correct the text, and asks \
Gemini, DeepSeek or OpenAI for a zero-waste breakfast/lunch/dinner plan built from what you bought.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (default: <config dir>/receipt2plan/settings.json).
    #[arg(long, global = true, env = SETTINGS_PATH_ENV)]
    settings_file: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "RECEIPT2PLAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "RECEIPT2PLAN_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a receipt and generate a meal plan.
    Run(RunArgs),

    /// Show or change the stored provider settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Receipt image path or HTTP/HTTPS URL.
    #[arg(required_unless_present = "text_file")]
    input: Option<String>,

    /// Read the receipt text from a file instead of running OCR.
    #[arg(long, conflicts_with = "input")]
    text_file: Option<PathBuf>,

    /// Pause after OCR to correct the text on stdin.
    #[arg(long)]
    review: bool,

    /// Provider for this run.
    #[arg(long, value_enum, env = "RECEIPT2PLAN_PROVIDER")]
    provider: Option<ProviderArg>,

    /// API key for this run.
    #[arg(long, env = "RECEIPT2PLAN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Key used for Gemini when no key is configured.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_key: Option<String>,

    /// Persist --provider/--api-key to the settings file.
    #[arg(long)]
    save_settings: bool,

    /// Print the plan as JSON instead of Markdown.
    #[arg(long, env = "RECEIPT2PLAN_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "RECEIPT2PLAN_NO_PROGRESS")]
    no_progress: bool,

    /// Tesseract binary.
    #[arg(long, env = "RECEIPT2PLAN_TESSERACT", default_value = DEFAULT_TESSERACT_BINARY)]
    tesseract: PathBuf,

    /// Tesseract language code(s), e.g. eng or eng+deu.
    #[arg(long, env = "RECEIPT2PLAN_OCR_LANG", default_value = "eng")]
    lang: String,

    /// Convert the photo to grayscale before OCR.
    #[arg(long, env = "RECEIPT2PLAN_GRAYSCALE")]
    grayscale: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "RECEIPT2PLAN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Provider call timeout in seconds.
    #[arg(long, env = "RECEIPT2PLAN_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Print the stored provider and a masked key.
    Show,

    /// Store a provider and/or key.
    Set {
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,

        #[arg(long, conflicts_with = "clear_key")]
        api_key: Option<String>,

        /// Remove the stored key.
        #[arg(long)]
        clear_key: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ProviderArg {
    Gemini,
    Deepseek,
    Openai,
}

impl From<ProviderArg> for ProviderId {
    fn from(v: ProviderArg) -> Self {
        match v {
            ProviderArg::Gemini => ProviderId::Gemini,
            ProviderArg::Deepseek => ProviderId::DeepSeek,
            ProviderArg::Openai => ProviderId::OpenAI,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar covers what INFO logs would say.
    let show_progress = match &cli.command {
        Command::Run(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Settings(_) => false,
    };
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

    let settings_path = cli
        .settings_file
        .clone()
        .unwrap_or_else(default_settings_path);
    let file_store = JsonFileSettingsStore::new(settings_path);

    match cli.command {
        Command::Settings(cmd) => run_settings(cmd, &file_store),
        Command::Run(args) => run(args, file_store, show_progress, cli.quiet).await,
    }
}

async fn run(
    args: RunArgs,
    file_store: JsonFileSettingsStore,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let mut builder = PlannerConfig::builder()
        .ocr_language(args.lang.clone())
        .ocr_grayscale(args.grayscale)
        .api_timeout_secs(args.api_timeout)
        .download_timeout_secs(args.download_timeout);
    if let Some(key) = &args.gemini_key {
        builder = builder.gemini_default_key(key.clone());
    }
    let config = builder.build().context("Invalid configuration")?;

    // Overrides only reach the file when --save-settings is given.
    let stored = load_provider_config(&file_store)
        .with_context(|| format!("Failed to read {}", file_store.path().display()))?;
    let store: Arc<dyn SettingsStore> = if args.save_settings {
        Arc::new(file_store)
    } else {
        let mem = MemorySettingsStore::new();
        save_provider_config(&mem, &stored)?;
        Arc::new(mem)
    };

    let slot = Arc::new(EngineSlot::new());
    let gateway = ProviderGateway::from_config(&config)?;
    let mut controller =
        WorkflowController::new(OcrPipeline::new(slot.clone(), &config), gateway, store)
            .map_err(explain)?;

    if args.provider.is_some() || args.api_key.is_some() {
        let provider_id = args.provider.map(ProviderId::from).unwrap_or(stored.provider_id);
        let api_key = args.api_key.clone().or_else(|| {
            // A stored key belongs to the stored provider.
            (provider_id == stored.provider_id)
                .then(|| stored.api_key().map(str::to_string))
                .flatten()
        });
        controller
            .update_settings(ProviderConfig::new(provider_id, api_key))
            .map_err(explain)?;
    }

    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        controller = controller.with_progress(cb);
    }

    // ── Receipt text ─────────────────────────────────────────────────────
    if let Some(path) = &args.text_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read receipt text from {}", path.display()))?;
        controller.submit_text(text).map_err(explain)?;
    } else {
        let input = args.input.as_deref().unwrap_or_default();
        let binary = args.tesseract.clone();
        if let EngineStatus::Unavailable(reason) =
            slot.load(|| TesseractEngine::detect(binary)).await
        {
            bail!("OCR engine unavailable: {reason}\nInstall tesseract or pass --tesseract <path>.");
        }

        let image = resolve_input(input, config.download_timeout_secs)
            .await
            .context("Failed to load receipt image")?;
        controller.submit_image(image).await.map_err(explain)?;
    }

    if args.review {
        review(&controller).await?;
    }

    // ── Generate ─────────────────────────────────────────────────────────
    controller.confirm_text().await.map_err(explain)?;

    let state = controller.state();
    let Some(plan) = state.meal_plan else {
        bail!("No meal plan was produced");
    };

    if args.json {
        let json = serde_json::to_string_pretty(&plan).context("Failed to serialise plan")?;
        println!("{json}");
    } else {
        let md = plan.to_markdown();
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(md.as_bytes())
            .context("Failed to write to stdout")?;
    }

    if !quiet && !show_progress && !args.json {
        eprintln!(
            "Planned {} meals from {} ingredients",
            plan.days().len() * 3,
            plan.pantry_summary().len()
        );
    }
    Ok(())
}

/// Show the OCR text and let the user paste a replacement.
async fn review(controller: &WorkflowController) -> Result<()> {
    let current = controller.state().extracted_text;
    eprintln!("{}", bold("── Receipt text ──"));
    eprintln!("{current}");
    eprintln!("{}", bold("──────────────────"));
    eprintln!(
        "{}",
        dim("Paste corrected text and finish with an empty line, or press Enter to keep it:")
    );

    let replacement = tokio::task::spawn_blocking(read_until_blank_line)
        .await
        .context("Review prompt failed")?
        .context("Failed to read from stdin")?;

    if !replacement.trim().is_empty() {
        controller.edit_text(replacement).map_err(explain)?;
    }
    Ok(())
}

fn read_until_blank_line() -> io::Result<String> {
    let stdin = io::stdin();
    let mut text = String::new();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            break;
        }
        text.push_str(&line);
        text.push('\n');
    }
    Ok(text)
}

fn run_settings(cmd: SettingsCommand, store: &JsonFileSettingsStore) -> Result<()> {
    let current = load_provider_config(store)
        .with_context(|| format!("Failed to read {}", store.path().display()))?;

    match cmd {
        SettingsCommand::Show => {
            println!("File:      {}", store.path().display());
            println!("Provider:  {}", current.provider_id);
            println!(
                "API key:   {}",
                current.api_key().map(mask_key).unwrap_or_else(|| "(not set)".into())
            );
        }
        SettingsCommand::Set {
            provider,
            api_key,
            clear_key,
        } => {
            let provider_id = provider.map(ProviderId::from).unwrap_or(current.provider_id);
            let api_key = if clear_key {
                None
            } else {
                api_key.or_else(|| current.api_key().map(str::to_string))
            };
            let updated = ProviderConfig::new(provider_id, api_key);
            save_provider_config(store, &updated)
                .with_context(|| format!("Failed to write {}", store.path().display()))?;
            eprintln!(
                "{} Saved provider {}{}",
                green("✔"),
                bold(updated.provider_id.as_str()),
                if updated.api_key().is_some() { " with API key" } else { "" }
            );
        }
    }
    Ok(())
}

/// `sk-abcdef123` → `sk-a…123`.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}…{tail}")
}

/// Carry the user-facing wording alongside the error chain.
fn explain(e: WorkflowError) -> anyhow::Error {
    let message = e.user_message();
    anyhow::Error::new(e).context(message)
}
