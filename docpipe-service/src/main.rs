use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use strum::IntoEnumIterator;
use tracing::{debug, info};

use docpipe_service::{
    Anchor, DeferredDeletions, DocumentPipeline, I18n, JobInput, JobOutput, PageSelector,
    PipelineConfig, PipelineError, PipelineResult, SignaturePlacement, StageOutcome,
    TokioProcessRunner, Tool, WatermarkConfig, load_config, start_sweeper,
};

#[derive(Parser)]
#[command(name = "docpipe", version, about = "Convert, compress, protect and stamp documents")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the staging directory
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,

    /// Locale for user-facing messages
    #[arg(long, global = true)]
    locale: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a document with the office converter
    Convert {
        input: PathBuf,
        /// Target extension, e.g. pdf, docx, png
        #[arg(long)]
        to: String,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Compress a PDF with the rasterizer
    Compress {
        input: PathBuf,
        /// screen, ebook, printer, prepress or default
        #[arg(long, default_value = "ebook")]
        level: String,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Password-protect a PDF
    Protect {
        input: PathBuf,
        #[arg(long)]
        password: String,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Remove password protection from a PDF
    Unlock {
        input: PathBuf,
        #[arg(long)]
        password: String,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Stamp a text or image watermark
    Watermark {
        input: PathBuf,
        #[arg(long, conflicts_with = "image", required_unless_present = "image")]
        text: Option<String>,
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long, default_value_t = 0.5)]
        opacity: f32,
        #[arg(long, default_value_t = 0.0)]
        rotation: f32,
        #[arg(long)]
        font_size: Option<f32>,
        #[arg(long, default_value = "center")]
        position: String,
        /// "all" or a comma-separated list of 1-based page numbers
        #[arg(long, default_value = "all")]
        pages: String,
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Strip watermark-like overlays from a document
    RemoveWatermark {
        input: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Stamp signature images described by a JSON placements file
    Sign {
        input: PathBuf,
        #[arg(long)]
        placements: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Delete staging entries older than the given age
    Sweep {
        #[arg(long)]
        max_age_secs: Option<u64>,
        /// Keep sweeping on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Show how each external tool resolves on this host
    Which,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let i18n = I18n::new();

    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let locale = cli.locale.as_deref().unwrap_or("en");
            return report(Err(e), &i18n, locale);
        }
    };
    if let Some(dir) = cli.staging_dir {
        config.staging.dir = dir;
    }
    let locale = cli.locale.unwrap_or_else(|| config.locale.clone());

    debug!(staging = %config.staging.dir.display(), locale = %locale, "Configuration loaded");

    let sweep_interval = config.staging.sweep_interval();
    let deletions = Arc::new(DeferredDeletions::new());
    let pipeline = DocumentPipeline::new(
        Arc::new(config),
        Arc::new(TokioProcessRunner),
        deletions.clone(),
    );

    let sweeper = start_sweeper(deletions.clone(), sweep_interval);
    let result = run(&pipeline, cli.command, &i18n, &locale).await;
    sweeper.abort();

    let removed = deletions.flush();
    if removed > 0 {
        debug!(removed, "Flushed scheduled deletions");
    }

    report(result, &i18n, &locale)
}

async fn run(
    pipeline: &DocumentPipeline,
    command: Command,
    i18n: &I18n,
    locale: &str,
) -> PipelineResult<Value> {
    let config = pipeline.config();
    let staging = pipeline.artifacts().ensure_staging_dir()?.to_path_buf();
    let out = |dir: Option<PathBuf>| dir.unwrap_or_else(|| staging.clone());

    match command {
        Command::Convert { input, to, out_dir } => {
            validate(&input, config)?;
            let output = pipeline.convert(&input, &out(out_dir), &to).await?;
            Ok(success(&output, i18n.get(locale, "result-converted", None)))
        }
        Command::Compress {
            input,
            level,
            out_dir,
        } => {
            validate_pdf(&input, config)?;
            let output = pipeline.compress(&input, &out(out_dir), &level).await?;
            Ok(success(&output, i18n.get(locale, "result-compressed", None)))
        }
        Command::Protect {
            input,
            password,
            out_dir,
        } => {
            validate_pdf(&input, config)?;
            let output = pipeline.protect(&input, &out(out_dir), &password).await?;
            Ok(success(&output, i18n.get(locale, "result-protected", None)))
        }
        Command::Unlock {
            input,
            password,
            out_dir,
        } => {
            validate_pdf(&input, config)?;
            let output = pipeline.unlock(&input, &out(out_dir), &password).await?;
            Ok(success(&output, i18n.get(locale, "result-unlocked", None)))
        }
        Command::Watermark {
            input,
            text,
            image,
            opacity,
            rotation,
            font_size,
            position,
            pages,
            scale,
            out_dir,
        } => {
            validate_pdf(&input, config)?;
            let mut wm = match (text, image) {
                (_, Some(path)) => {
                    let image = validate(&path, config)?;
                    if !image.is_image() {
                        return Err(PipelineError::InvalidInput {
                            message: format!("not an image: {}", path.display()),
                        });
                    }
                    WatermarkConfig::image(path)
                }
                (Some(text), None) => WatermarkConfig::text(text),
                (None, None) => {
                    return Err(PipelineError::InvalidInput {
                        message: "either --text or --image is required".to_string(),
                    });
                }
            };
            wm.opacity = opacity;
            wm.rotation_degrees = rotation;
            if let Some(size) = font_size {
                wm.font_size = size;
            }
            wm.position = Anchor::parse_lenient(&position);
            wm.pages = parse_pages(&pages)?;
            wm.scale = scale;

            let output = pipeline.watermark(&input, &out(out_dir), &wm).await?;
            Ok(success(&output, i18n.get(locale, "result-watermarked", None)))
        }
        Command::RemoveWatermark { input, out_dir } => {
            validate(&input, config)?;
            let report = pipeline.clean_document(&input, &out(out_dir)).await?;
            let stages: Vec<Value> = report
                .stages
                .iter()
                .map(|record| match &record.outcome {
                    StageOutcome::Succeeded(_) => {
                        json!({ "stage": record.stage.to_string(), "status": "succeeded" })
                    }
                    StageOutcome::Skipped(reason) => json!({
                        "stage": record.stage.to_string(),
                        "status": "skipped",
                        "reason": reason,
                    }),
                })
                .collect();
            let mut body = success(&report.output, i18n.get(locale, "result-cleaned", None));
            body["stages"] = Value::Array(stages);
            Ok(body)
        }
        Command::Sign {
            input,
            placements,
            out_dir,
        } => {
            validate_pdf(&input, config)?;
            let placements = read_placements(&placements)?;
            let output = pipeline.sign(&input, &out(out_dir), &placements).await?;
            Ok(success(&output, i18n.get(locale, "result-signed", None)))
        }
        Command::Sweep {
            max_age_secs,
            watch,
        } => {
            let max_age = max_age_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.staging.output_ttl());
            let mut removed = pipeline.artifacts().sweep_stale(max_age)?;
            info!(removed, "Staging sweep finished");

            if watch {
                let every = config.staging.sweep_interval();
                info!(interval_secs = every.as_secs(), "Watching staging directory");
                let mut interval = tokio::time::interval(every);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match pipeline.artifacts().sweep_stale(max_age) {
                                Ok(count) => removed += count,
                                Err(e) => tracing::warn!(error = %e, "Staging sweep failed"),
                            }
                        }
                        _ = tokio::signal::ctrl_c() => {
                            info!(removed, "Stopping staging watch");
                            break;
                        }
                    }
                }
            }
            Ok(json!({ "success": true, "removed": removed }))
        }
        Command::Which => {
            let tools: Vec<Value> = Tool::iter()
                .map(|tool| {
                    let resolved = pipeline.locator().locate(tool);
                    json!({
                        "tool": tool.to_string(),
                        "name": tool.product_name(),
                        "program": resolved.program.display().to_string(),
                        "resolution": format!("{:?}", resolved.resolution).to_lowercase(),
                    })
                })
                .collect();
            Ok(json!({ "success": true, "tools": tools }))
        }
    }
}

fn validate(input: &Path, config: &PipelineConfig) -> PipelineResult<JobInput> {
    let job = JobInput::validate(input, &config.limits)?;
    debug!(path = %input.display(), mime = %job.mime, size = job.size, "Input accepted");
    Ok(job)
}

fn validate_pdf(input: &Path, config: &PipelineConfig) -> PipelineResult<JobInput> {
    let job = validate(input, config)?;
    if !job.is_pdf() {
        return Err(PipelineError::InvalidInput {
            message: format!("expected a PDF, got {}", job.mime),
        });
    }
    Ok(job)
}

fn parse_pages(value: &str) -> PipelineResult<PageSelector> {
    if value.trim().eq_ignore_ascii_case("all") {
        return Ok(PageSelector::All);
    }
    value
        .split(',')
        .map(|part| {
            part.trim().parse::<i64>().map_err(|_| PipelineError::InvalidInput {
                message: format!("invalid page number \"{}\"", part.trim()),
            })
        })
        .collect::<PipelineResult<Vec<_>>>()
        .map(PageSelector::Pages)
}

fn read_placements(path: &Path) -> PipelineResult<Vec<SignaturePlacement>> {
    let raw = std::fs::read_to_string(path).map_err(|e| PipelineError::InvalidInput {
        message: format!("cannot read placements file {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&raw).map_err(|e| PipelineError::InvalidInput {
        message: format!("invalid placements file {}: {}", path.display(), e),
    })
}

fn success(output: &JobOutput, message: String) -> Value {
    json!({
        "success": true,
        "filename": output.filename,
        "path": output.output_path.display().to_string(),
        "message": message,
    })
}

fn report(result: PipelineResult<Value>, i18n: &I18n, locale: &str) -> ExitCode {
    match result {
        Ok(body) => {
            println!("{}", body);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(code = e.code(), error = %e, "Job failed");
            let mut body = json!({
                "success": false,
                "code": e.code(),
                "message": e.user_message(i18n, locale),
            });
            if let Some(stderr) = e.stderr() {
                body["stderr"] = Value::String(stderr.to_string());
            }
            println!("{}", body);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docpipe_service=info,docpipe=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
