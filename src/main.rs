//! Command-line entry point: turn one track into a beat plus lyrics.
//!
//! # Run sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] (defaults on first run, or `--config`).
//! 3. Build the stores and the generative-text backend from config.
//! 4. create project → upload → transform → lyrics → export.
//! 5. Write `beat.wav`, `lyrics.txt` and `manifest.json` to `--out`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use lyrics_beats::{
    config::AppConfig,
    lyrics::{ApiTextGenerator, StyleSpec},
    pipeline::{JobHandle, JobStatus, PipelineOrchestrator},
    store::{BlobStore, FsBlobStore, MemoryMetadataStore},
    transform::StylePreset,
};

#[derive(Parser)]
#[command(name = "lyrics-beats", about = "Rework a track into a styled beat with lyrics")]
struct Args {
    /// Source audio (wav, mp3 or flac)
    input: PathBuf,

    /// Style preset: trap, drill, boom_bap, conscious, lofi
    #[arg(long, default_value = "trap")]
    style: StylePreset,

    /// What the lyrics should be about
    #[arg(long)]
    topic: Option<String>,

    /// Project name (defaults to the input file stem)
    #[arg(long)]
    name: Option<String>,

    /// Write lyrics in a custom style built from these sample lyrics
    #[arg(long = "sample")]
    samples: Vec<String>,

    /// Description of the custom style, used with --sample
    #[arg(long, default_value = "")]
    style_description: String,

    /// Settings file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

fn content_type_for(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    Ok(match ext.as_str() {
        "wav" | "wave" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        other => bail!("unsupported file extension '{other}'"),
    })
}

/// Log each stage change, then return once the job is done.
async fn follow(label: &str, handle: &JobHandle) -> Result<()> {
    let mut rx = handle.subscribe();
    let mut last = None;
    loop {
        let snapshot = rx.borrow_and_update().clone();
        if snapshot.stage != last || snapshot.status.is_terminal() {
            match snapshot.stage {
                Some(stage) => log::info!("{label}: {stage} ({}%)", snapshot.progress),
                None => log::info!("{label}: {}%", snapshot.progress),
            }
            last = snapshot.stage;
        }
        match snapshot.status {
            JobStatus::Succeeded => return Ok(()),
            JobStatus::Failed { kind, message } => bail!("{label} failed ({kind:?}): {message}"),
            _ => {}
        }
        if rx.changed().await.is_err() {
            bail!("{label} job vanished");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };

    let blobs = Arc::new(FsBlobStore::new(config.assets_dir()));
    let orchestrator = PipelineOrchestrator::new(
        config.clone(),
        blobs.clone(),
        Arc::new(MemoryMetadataStore::new()),
        Arc::new(ApiTextGenerator::from_config(&config.llm)),
    );

    let name = args.name.clone().unwrap_or_else(|| {
        args.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".into())
    });
    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;

    let project = orchestrator.create_project(&name, args.style).await?;
    log::info!("project {} ({name}, {})", project.id, args.style);
    orchestrator
        .upload(project.id, bytes, content_type_for(&args.input)?)
        .await?;

    let transform = orchestrator.submit_transform(project.id).await?;
    follow("transform", &transform).await?;

    let lyrics_style = if args.samples.is_empty() {
        StyleSpec::Preset(args.style)
    } else {
        let style = orchestrator.create_user_style(
            &format!("{name} custom"),
            &args.style_description,
            args.samples.clone(),
        )?;
        StyleSpec::User(style.id)
    };
    let lyrics = orchestrator
        .submit_lyrics(project.id, lyrics_style, args.topic.clone())
        .await?;
    follow("lyrics", &lyrics).await?;

    let manifest = orchestrator.export(project.id).await?;

    std::fs::create_dir_all(&args.out)?;
    let beat = blobs.get(&manifest.audio.storage_ref).await?;
    std::fs::write(args.out.join("beat.wav"), beat)?;
    std::fs::write(args.out.join("lyrics.txt"), manifest.lyrics_document())?;
    std::fs::write(args.out.join("manifest.json"), manifest.to_json()?)?;

    println!("{}", manifest.lyrics_document());
    log::info!(
        "wrote {:.2}s beat and lyrics to {}",
        manifest.audio.duration_secs,
        args.out.display()
    );
    Ok(())
}
