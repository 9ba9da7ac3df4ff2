use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use loraforge::run::{DEFAULT_ASPECT_RATIO, DEFAULT_CONCURRENT, DEFAULT_COUNT};
use loraforge::{
    default_export_dir, estimate, export_dataset, load_settings, save_settings, settings_path,
    CredentialStore, FalClient, GenerationMode, Generator, LogLevel, Resolution, RunObserver,
    RunOptions,
};

#[derive(Debug, Parser)]
#[command(name = "loraforge", version, about = "AI dataset generator for LoRA training")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plan prompts with AI and generate a dataset batch.
    Generate(GenerateArgs),
    /// Print the estimated cost of a run without calling any endpoint.
    Estimate(EstimateArgs),
    /// Manage stored credentials and defaults.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Kind of dataset to produce.
    #[arg(long, value_enum, default_value = "pair")]
    mode: GenerationMode,
    /// Theme the prompts are planned around.
    #[arg(long)]
    theme: String,
    /// Pair mode: the edit transformation the dataset teaches.
    #[arg(long, default_value = "")]
    transformation: String,
    /// Pair mode: fixed action name; omit to let the model pick one.
    #[arg(long, default_value = "")]
    action_name: String,
    /// Prefixed to every caption, e.g. a rare trigger token.
    #[arg(long, default_value = "")]
    trigger_word: String,
    #[arg(long, default_value_t = DEFAULT_COUNT)]
    count: usize,
    #[arg(long, default_value_t = DEFAULT_CONCURRENT)]
    max_concurrent: usize,
    #[arg(long, default_value = DEFAULT_ASPECT_RATIO)]
    aspect_ratio: String,
    #[arg(long, value_enum, default_value = "2K")]
    resolution: Resolution,
    /// Caption finished images with the vision model.
    #[arg(long)]
    caption: bool,
    /// Planning model; defaults to the configured or built-in one.
    #[arg(long)]
    text_model: Option<String>,
    /// Vision model for captions; defaults to the text model.
    #[arg(long)]
    caption_model: Option<String>,
    /// Replace the built-in planning system prompt.
    #[arg(long)]
    system_prompt: Option<String>,
    /// Reference mode: image file the variations derive from.
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Export directory. Defaults to lora_dataset_<timestamp>.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct EstimateArgs {
    #[arg(long, value_enum, default_value = "pair")]
    mode: GenerationMode,
    #[arg(long, default_value_t = DEFAULT_COUNT)]
    count: usize,
    #[arg(long, value_enum, default_value = "2K")]
    resolution: Resolution,
    #[arg(long)]
    caption: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Store the FAL API key in the settings file.
    SetKey { key: String },
    /// Print the settings file location and current values.
    Show,
    /// Remove the stored API key.
    Clear,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("loraforge error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Log to stderr so stdout stays clean for progress output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args).await,
        Command::Estimate(args) => run_estimate(args),
        Command::Config(cmd) => run_config(cmd),
    }
}

async fn run_generate(args: GenerateArgs) -> Result<()> {
    let settings = load_settings();
    let credentials = CredentialStore::new(Some(settings.api_key.clone()));
    let client = FalClient::new(
        settings.base_url.clone(),
        settings.storage_url.clone(),
        credentials,
    );

    let observer = RunObserver::new()
        .with_progress(|update| println!("{}", update.status))
        .with_log(|level, message| match level {
            LogLevel::Warn => eprintln!("warning: {message}"),
            LogLevel::Error => eprintln!("error: {message}"),
            _ => println!("{message}"),
        });

    let est = estimate::estimate_run(args.mode, args.count, args.resolution, args.caption);
    println!("Estimated cost: ~${:.2}", est.total());

    let mut opts = RunOptions::new(args.mode, args.theme);
    opts.transformation = args.transformation;
    opts.action_name = args.action_name;
    opts.trigger_word = args.trigger_word;
    opts.count = args.count;
    opts.max_concurrent = args.max_concurrent;
    opts.aspect_ratio = args.aspect_ratio;
    opts.resolution = args.resolution;
    opts.caption = args.caption;
    opts.text_model = args.text_model.or(settings.default_text_model);
    opts.caption_model = args.caption_model;
    opts.system_prompt = args.system_prompt;
    opts.reference_image = args.reference;

    let generator = Generator::new(client).with_observer(observer.clone());
    let handle = generator.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Stopped by user");
            handle.request_stop();
        }
    });

    let summary = generator.start_run(opts).await?;
    if summary.completed == 0 {
        println!("No items were generated; nothing to export.");
        return Ok(());
    }

    let items = generator.results().await;
    let out_dir = args.out.unwrap_or_else(default_export_dir);
    let export = export_dataset(&items, &out_dir, &observer).await?;
    println!(
        "Exported {} items ({} files) to {}",
        export.exported,
        export.files,
        export.dir.display()
    );

    Ok(())
}

fn run_estimate(args: EstimateArgs) -> Result<()> {
    let est = estimate::estimate_run(args.mode, args.count, args.resolution, args.caption);
    println!("Images ({}): ${:.2}", est.images, est.image_cost);
    if args.caption {
        println!("Captions ({}): ${:.2}", args.count, est.caption_cost);
    }
    println!("Planning: ${:.2}", est.plan_cost);
    println!("Total: ~${:.2}", est.total());
    Ok(())
}

fn run_config(cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::SetKey { key } => {
            let mut settings = load_settings();
            settings.api_key = key.trim().to_string();
            let path = save_settings(&settings)?;
            println!("API key saved to {}", path.display());
        }
        ConfigCommand::Show => {
            match settings_path() {
                Some(path) => println!("Settings file: {}", path.display()),
                None => println!("Settings file: <no config directory on this platform>"),
            }
            let settings = load_settings();
            if settings.api_key.is_empty() {
                println!("API key: <not set>");
            } else {
                println!("API key: {}", redact(&settings.api_key));
            }
            println!("Base URL: {}", settings.base_url);
            println!("Storage URL: {}", settings.storage_url);
            println!(
                "Default text model: {}",
                settings.default_text_model.as_deref().unwrap_or("<unset>")
            );
        }
        ConfigCommand::Clear => {
            let mut settings = load_settings();
            settings.api_key = String::new();
            save_settings(&settings)?;
            println!("API key cleared");
        }
    }
    Ok(())
}

fn redact(key: &str) -> String {
    if key.chars().count() <= 8 {
        return "*".repeat(key.chars().count());
    }
    let head: String = key.chars().take(8).collect();
    format!("{head}...")
}
