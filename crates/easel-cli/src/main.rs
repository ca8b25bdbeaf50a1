use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use easel_contracts::events::EventWriter;
use easel_contracts::request::{EditForm, GenerateForm};
use easel_contracts::status::ActionOutcome;
use easel_engine::{
    ArtifactStore, DryrunService, ImageService, OpenAiImageService, ServiceConfig, Studio,
};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "easel-rs", version, about = "Prompt-driven image generation and editing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new image from a text prompt.
    Generate(GenerateArgs),
    /// Rework one or more source images under an edit prompt.
    Edit(EditArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Text description of the image to create.
    #[arg(long)]
    prompt: String,
    /// Output dimensions: auto, 1024x1024, 1536x1024, or 1024x1536.
    #[arg(long, default_value = "auto")]
    size: String,
    /// Rendering quality: auto, high, medium, or low.
    #[arg(long, default_value = "auto")]
    quality: String,
    /// Background style: auto, transparent, or opaque.
    #[arg(long, default_value = "auto")]
    background: String,
    /// Directory artifacts are saved into.
    #[arg(long, default_value = "output")]
    out: PathBuf,
    /// Event log path (default: events.jsonl inside the output directory).
    #[arg(long)]
    events: Option<PathBuf>,
    /// Use the offline service instead of the hosted one.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Parser)]
struct EditArgs {
    /// Source image to edit; repeat for up to 16 images.
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    /// Instructions for the edit.
    #[arg(long)]
    prompt: String,
    /// Number of edited variants to request (1-10).
    #[arg(long, default_value_t = 1)]
    count: u32,
    /// Optional mask; white regions are editable, black regions are kept.
    #[arg(long)]
    mask: Option<PathBuf>,
    /// Output dimensions: auto, 1024x1024, 1536x1024, or 1024x1536.
    #[arg(long, default_value = "auto")]
    size: String,
    /// Rendering quality: auto, high, medium, or low.
    #[arg(long, default_value = "auto")]
    quality: String,
    /// Background style: auto, transparent, or opaque.
    #[arg(long, default_value = "auto")]
    background: String,
    /// Directory artifacts are saved into.
    #[arg(long, default_value = "output")]
    out: PathBuf,
    /// Event log path (default: events.jsonl inside the output directory).
    #[arg(long)]
    events: Option<PathBuf>,
    /// Use the offline service instead of the hosted one.
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("easel-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Edit(args) => run_edit(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let studio = build_studio(&args.out, args.events, args.dry_run)?;
    let form = GenerateForm {
        prompt: args.prompt,
        size: args.size,
        quality: args.quality,
        background: args.background,
    };
    finish(studio.generate(&form))
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let studio = build_studio(&args.out, args.events, args.dry_run)?;
    let form = EditForm {
        images: args.images,
        prompt: args.prompt,
        count: args.count,
        mask: args.mask,
        size: args.size,
        quality: args.quality,
        background: args.background,
    };
    finish(studio.edit(&form))
}

fn build_studio(out: &Path, events: Option<PathBuf>, dry_run: bool) -> Result<Studio> {
    let store = ArtifactStore::new(out)?;
    let events_path = events.unwrap_or_else(|| out.join("events.jsonl"));
    let writer = EventWriter::new(events_path, Uuid::new_v4().to_string());
    let service: Box<dyn ImageService> = if dry_run {
        Box::new(DryrunService)
    } else {
        Box::new(OpenAiImageService::new(ServiceConfig::from_env()?))
    };
    Ok(Studio::new(service, store, writer)?)
}

fn finish(outcome: ActionOutcome) -> Result<i32> {
    println!("{}", outcome.status.message);
    Ok(if outcome.status.succeeded { 0 } else { 1 })
}
