use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use content_fingerprint::{
    Alignment, ContentFingerprint, FingerprintConfig, FingerprintSet, JobPaths,
    MediaTransformPipeline, TransformSettings,
};

#[derive(Parser, Debug)]
#[command(name = "content-fingerprint")]
#[command(about = "Fingerprint, compare and edit audio and video files")]
#[command(version)]
struct Args {
    /// Fingerprinting configuration (JSON)
    #[arg(long, global = true, env = "CONTENT_FINGERPRINT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the fingerprint of a media file as JSON
    Fingerprint {
        input: PathBuf,

        /// Write the fingerprint here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare a media file against another file or a saved fingerprint
    Compare {
        input: PathBuf,

        /// Media file, or a `.json` fingerprint written by `fingerprint`
        other: PathBuf,

        #[arg(long, value_enum)]
        align: Option<AlignArg>,

        /// Time bins an audio peak may drift and still match
        #[arg(long)]
        peak_tolerance: Option<u32>,

        /// Largest Hamming distance at which two frame hashes match
        #[arg(long)]
        hash_distance: Option<u32>,
    },

    /// Export every decoded frame of a video as an image
    Keyframes {
        input: PathBuf,
        dir: PathBuf,

        #[arg(long, default_value = "jpg")]
        ext: String,
    },

    /// Apply modify.json-style edits to a video
    Modify {
        #[arg(required_unless_present = "job")]
        input: Option<PathBuf>,

        #[arg(required_unless_present = "job")]
        output: Option<PathBuf>,

        #[arg(long, default_value = "modify.json")]
        settings: PathBuf,

        /// JSON file with `input_video_path` and `output_video_path`
        #[arg(long, conflicts_with_all = ["input", "output"])]
        job: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum AlignArg {
    Truncate,
    Sequence,
}

impl From<AlignArg> for Alignment {
    fn from(arg: AlignArg) -> Self {
        match arg {
            AlignArg::Truncate => Alignment::Truncate,
            AlignArg::Sequence => Alignment::Sequence,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "content_fingerprint=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FingerprintConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FingerprintConfig::default(),
    };

    match args.command {
        Command::Fingerprint { input, output } => {
            let item = open(&input, config)?;
            let set =
                FingerprintSet::from(item.fingerprint().context("Failed to fingerprint input")?);
            match output {
                Some(path) => {
                    fs::write(&path, serde_json::to_string(&set)?)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Fingerprint written to {}", path.display());
                }
                None => print_json(&set)?,
            }
        }

        Command::Compare {
            input,
            other,
            align,
            peak_tolerance,
            hash_distance,
        } => {
            if let Some(align) = align {
                config.scoring.alignment = align.into();
            }
            if let Some(tolerance) = peak_tolerance {
                config.scoring.peak_time_tolerance = tolerance;
            }
            if let Some(distance) = hash_distance {
                config.scoring.max_hash_distance = distance;
            }

            let item = open(&input, config.clone())?;
            let report = if is_json(&other) {
                let text = fs::read_to_string(&other)
                    .with_context(|| format!("Failed to read {}", other.display()))?;
                let set: FingerprintSet = serde_json::from_str(&text)
                    .with_context(|| format!("Invalid fingerprint file {}", other.display()))?;
                item.compare(&set)?
            } else {
                let theirs = open(&other, config)?
                    .fingerprint()
                    .context("Failed to fingerprint comparison target")?;
                item.compare_fingerprint(&theirs)?
            };
            print_json(&report)?;
        }

        Command::Keyframes { input, dir, ext } => {
            let item = open(&input, config)?;
            let written = item
                .save_keyframes(&dir, &ext)
                .with_context(|| format!("Failed to export frames to {}", dir.display()))?;
            info!("Saved {} frames to {}", written.len(), dir.display());
        }

        Command::Modify {
            input,
            output,
            settings,
            job,
        } => {
            let (input, output) = match (job, input, output) {
                (Some(job), _, _) => {
                    let paths = JobPaths::from_json_file(&job)
                        .with_context(|| format!("Failed to load job {}", job.display()))?;
                    (paths.input_video_path, paths.output_video_path)
                }
                (None, Some(input), Some(output)) => (input, output),
                _ => bail!("modify needs INPUT and OUTPUT, or --job"),
            };

            let settings = TransformSettings::from_json_file(&settings)
                .with_context(|| format!("Failed to load settings {}", settings.display()))?;
            MediaTransformPipeline::new(settings)?
                .run(&input, &output)
                .with_context(|| format!("Failed to modify {}", input.display()))?;
            info!("Edited video saved to {}", output.display());
        }
    }

    Ok(())
}

fn open(path: &Path, config: FingerprintConfig) -> Result<ContentFingerprint> {
    ContentFingerprint::open(path, config)
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
