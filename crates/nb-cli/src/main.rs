use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use nb_contracts::events::{EventWriter, RUN_FINISHED, RUN_STARTED};
use nb_contracts::models::{Capability, ModelSelector};
use nb_contracts::{AspectRatio, ImageFormat, NanoError, ProcessingOptions, Resize};
use nb_engine::pipeline::{DEFAULT_ICON_SIZES, DEFAULT_OUTPUT_DIR, DEFAULT_STORY_SCENES};
use nb_engine::{
    backend_for_model, BackendConfig, BatchReport, DiagramJob, EditJob, FailurePolicy,
    GenerateJob, GenerationClient, IconJob, PatternJob, Pipeline, PipelineConfig, RestoreJob,
    StoryJob,
};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "NB_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "nb",
    version,
    about = "nanobanana - image generation CLI using Gemini",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    /// Image model; unknown names fall back to the default model.
    #[arg(long, global = true)]
    model: Option<String>,
    /// Append run events as JSONL to this file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// What multi-image commands do when one image fails.
    #[arg(long, global = true, default_value = "abort")]
    on_error: FailurePolicy,
    /// Debug logging on stderr; overrides NB_LOG.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(flatten)]
    free_text: FreeTextArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate images from a text prompt
    Generate(GenerateArgs),
    /// Edit an existing image
    Edit(EditArgs),
    /// Restore and enhance an image
    Restore(RestoreArgs),
    /// Generate app icons in several sizes
    Icon(IconArgs),
    /// Generate seamless patterns and textures
    Pattern(PatternArgs),
    /// Generate sequential images for a visual story
    Story(StoryArgs),
    /// Generate technical diagrams and flowcharts
    Diagram(DiagramArgs),
}

#[derive(Debug, Args)]
struct OutputArgs {
    #[arg(long, short = 'o', default_value = DEFAULT_OUTPUT_DIR)]
    output: PathBuf,
    /// png, jpg or webp
    #[arg(long, short = 'f')]
    format: Option<String>,
    /// Encoder quality 1-100
    #[arg(long, short = 'q')]
    quality: Option<u32>,
}

#[derive(Debug, Args)]
struct ResizeArgs {
    /// Fit the output inside this width, keeping the aspect ratio
    #[arg(long)]
    width: Option<u32>,
    /// Fit the output inside this height, keeping the aspect ratio
    #[arg(long)]
    height: Option<u32>,
}

#[derive(Debug, Args)]
struct FreeTextArgs {
    /// Natural language prompt
    prompt: Vec<String>,
    #[arg(long, short = 'n', default_value_t = 1)]
    num_images: usize,
    #[arg(long, short = 'o', default_value = DEFAULT_OUTPUT_DIR)]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    prompt: String,
    #[arg(long, short = 's')]
    style: Option<String>,
    #[arg(long, short = 'a')]
    aspect_ratio: Option<String>,
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long, short = 'n', default_value_t = 1)]
    num_images: usize,
    #[command(flatten)]
    output: OutputArgs,
    #[command(flatten)]
    resize: ResizeArgs,
}

#[derive(Debug, Args)]
struct EditArgs {
    input: PathBuf,
    prompt: String,
    #[arg(long, short = 'm')]
    mask: Option<PathBuf>,
    /// add, remove or modify
    #[arg(long)]
    operation: Option<String>,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    input: PathBuf,
    /// Restoration strength: low, medium or high
    #[arg(long, default_value = "medium")]
    level: String,
    #[arg(long)]
    denoise: bool,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Args)]
struct IconArgs {
    prompt: String,
    /// Comma-separated pixel sizes
    #[arg(long, short = 's', value_delimiter = ',')]
    sizes: Vec<u32>,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Args)]
struct PatternArgs {
    prompt: String,
    #[arg(long)]
    no_tileable: bool,
    /// low, medium or high
    #[arg(long)]
    density: Option<String>,
    /// Comma-separated color palette
    #[arg(long, value_delimiter = ',')]
    colors: Vec<String>,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Args)]
struct StoryArgs {
    prompt: String,
    #[arg(long, short = 'n', default_value_t = DEFAULT_STORY_SCENES)]
    scenes: usize,
    #[arg(long, short = 'a')]
    aspect_ratio: Option<String>,
    #[command(flatten)]
    output: OutputArgs,
    #[command(flatten)]
    resize: ResizeArgs,
}

#[derive(Debug, Args)]
struct DiagramArgs {
    prompt: String,
    /// flowchart, sequence, architecture, network, erd or mindmap
    #[arg(long = "type", short = 't')]
    diagram_type: Option<String>,
    #[arg(long)]
    no_labels: bool,
    #[command(flatten)]
    output: OutputArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nb error: {err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.command.is_none() && cli.free_text.prompt.is_empty() {
        Cli::command().print_help()?;
        println!();
        return Ok(0);
    }

    let capability = match cli.command {
        Some(Command::Edit(_) | Command::Restore(_)) => Capability::Edit,
        _ => Capability::Generate,
    };
    let selection = ModelSelector::default().select(cli.model.as_deref(), capability)?;
    if let Some(reason) = &selection.fallback_reason {
        warn!("{reason} Using '{}'.", selection.model.name);
    }
    let config = BackendConfig::from_env();
    let backend = backend_for_model(&selection.model, &config)?;
    let client = GenerationClient::new(backend, selection.model.name.clone());
    info!(model = %client.model(), backend = client.backend_name(), "model selected");

    let events = cli.events.as_ref().map(EventWriter::for_new_run);
    let command_name = cli
        .command
        .as_ref()
        .map(Command::name)
        .unwrap_or("nl");
    emit(
        events.as_ref(),
        RUN_STARTED,
        json!({ "command": command_name, "model": client.model() }),
    );

    let policy = cli.on_error;
    let outcome = dispatch(cli.command, cli.free_text, client, policy, events.clone());
    let (written, failed) = match &outcome {
        Ok(report) => (report.artifacts.len(), report.failures.len()),
        Err(_) => (0, 1),
    };
    emit(
        events.as_ref(),
        RUN_FINISHED,
        json!({ "command": command_name, "written": written, "failed": failed }),
    );

    let report = outcome?;
    print_report(&report);
    report.into_result()?;
    Ok(0)
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Generate(_) => "generate",
            Self::Edit(_) => "edit",
            Self::Restore(_) => "restore",
            Self::Icon(_) => "icon",
            Self::Pattern(_) => "pattern",
            Self::Story(_) => "story",
            Self::Diagram(_) => "diagram",
        }
    }
}

fn dispatch(
    command: Option<Command>,
    free_text: FreeTextArgs,
    client: GenerationClient,
    policy: FailurePolicy,
    events: Option<EventWriter>,
) -> Result<BatchReport, NanoError> {
    let pipeline = |output: PathBuf| {
        Pipeline::new(
            client,
            PipelineConfig {
                output_dir: output,
                policy,
            },
        )
        .with_events(events)
    };

    match command {
        None => {
            let prompt = free_text.prompt.join(" ");
            pipeline(free_text.output).natural_language(&prompt, free_text.num_images)
        }
        Some(Command::Generate(args)) => {
            let job = GenerateJob {
                prompt: args.prompt,
                count: args.num_images,
                style: args.style.as_deref().map(str::parse).transpose()?,
                aspect_ratio: parse_aspect_ratio(args.aspect_ratio.as_deref())?,
                seed: args.seed,
                options: processing_options(&args.output, Some(&args.resize))?,
            };
            pipeline(args.output.output).generate(&job)
        }
        Some(Command::Edit(args)) => {
            let job = EditJob {
                input: args.input,
                prompt: args.prompt,
                operation: args.operation.as_deref().map(str::parse).transpose()?,
                mask: args.mask,
                options: processing_options(&args.output, None)?,
            };
            pipeline(args.output.output).edit(&job)
        }
        Some(Command::Restore(args)) => {
            let job = RestoreJob {
                input: args.input,
                level: args.level.parse()?,
                denoise: args.denoise,
                options: processing_options(&args.output, None)?,
            };
            pipeline(args.output.output).restore(&job)
        }
        Some(Command::Icon(args)) => {
            let sizes = if args.sizes.is_empty() {
                DEFAULT_ICON_SIZES.to_vec()
            } else {
                args.sizes
            };
            let job = IconJob {
                prompt: args.prompt,
                sizes,
                options: processing_options(&args.output, None)?,
            };
            pipeline(args.output.output).icons(&job)
        }
        Some(Command::Pattern(args)) => {
            let job = PatternJob {
                prompt: args.prompt,
                tileable: !args.no_tileable,
                density: args.density.as_deref().map(str::parse).transpose()?,
                colors: args.colors,
                options: processing_options(&args.output, None)?,
            };
            pipeline(args.output.output).pattern(&job)
        }
        Some(Command::Story(args)) => {
            let job = StoryJob {
                prompt: args.prompt,
                scenes: args.scenes,
                aspect_ratio: parse_aspect_ratio(args.aspect_ratio.as_deref())?,
                options: processing_options(&args.output, Some(&args.resize))?,
            };
            pipeline(args.output.output).story(&job)
        }
        Some(Command::Diagram(args)) => {
            let job = DiagramJob {
                prompt: args.prompt,
                diagram_type: args.diagram_type.as_deref().map(str::parse).transpose()?,
                labeled: !args.no_labels,
                options: processing_options(&args.output, None)?,
            };
            pipeline(args.output.output).diagram(&job)
        }
    }
}

fn parse_aspect_ratio(raw: Option<&str>) -> Result<Option<AspectRatio>, NanoError> {
    raw.map(str::parse).transpose()
}

fn processing_options(
    output: &OutputArgs,
    resize: Option<&ResizeArgs>,
) -> Result<ProcessingOptions, NanoError> {
    let format = output
        .format
        .as_deref()
        .map(str::parse::<ImageFormat>)
        .transpose()?;
    let quality = output
        .quality
        .map(|value| {
            u8::try_from(value)
                .ok()
                .filter(|value| (1..=100).contains(value))
                .ok_or_else(|| {
                    NanoError::validation(format!("Quality must be between 1 and 100 (got {value})"))
                })
        })
        .transpose()?;
    let resize = resize
        .map(|args| Resize {
            width: args.width,
            height: args.height,
            exact: false,
        })
        .filter(|resize| !resize.is_empty());
    ProcessingOptions::new(format, quality, resize)
}

fn print_report(report: &BatchReport) {
    for labeled in &report.artifacts {
        println!("{}: {}", labeled.label, labeled.artifact.image_path.display());
    }
    // A lone item's error is printed once, by main.
    if report.total > 1 {
        for failure in &report.failures {
            eprintln!("{} failed: {}", failure.label, failure.error);
        }
    }
    for path in &report.discarded {
        eprintln!("discarded {}", path.display());
    }
}

fn emit(events: Option<&EventWriter>, event_type: &str, payload: Value) {
    let Some(writer) = events else {
        return;
    };
    let payload = match payload {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Err(err) = writer
        .emit(event_type, payload)
        .with_context(|| format!("failed to write {}", writer.path().display()))
    {
        warn!("{err:#}");
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use nb_contracts::{ImageFormat, NanoError};
    use nb_engine::FailurePolicy;

    use super::{processing_options, Cli, Command, OutputArgs, ResizeArgs};

    fn output_args(format: Option<&str>, quality: Option<u32>) -> OutputArgs {
        OutputArgs {
            output: "output".into(),
            format: format.map(str::to_string),
            quality,
        }
    }

    #[test]
    fn bare_words_select_free_text_mode() {
        let cli = Cli::try_parse_from(["nb", "a", "cat", "in", "space", "-n", "2"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.free_text.prompt.join(" "), "a cat in space");
        assert_eq!(cli.free_text.num_images, 2);
        assert_eq!(cli.on_error, FailurePolicy::Abort);
    }

    #[test]
    fn subcommands_and_global_flags_parse() {
        let cli = Cli::try_parse_from([
            "nb",
            "icon",
            "rocket",
            "--sizes",
            "16,32,1024",
            "--model",
            "dryrun-image-1",
            "--on-error",
            "continue",
        ])
        .unwrap();
        assert_eq!(cli.model.as_deref(), Some("dryrun-image-1"));
        assert_eq!(cli.on_error, FailurePolicy::ContinueOnError);
        match cli.command {
            Some(Command::Icon(args)) => assert_eq!(args.sizes, vec![16, 32, 1024]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn output_flags_become_processing_options() -> anyhow::Result<()> {
        let options = processing_options(
            &output_args(Some("jpeg"), Some(75)),
            Some(&ResizeArgs {
                width: Some(640),
                height: None,
            }),
        )?;
        assert_eq!(options.format, Some(ImageFormat::Jpeg));
        assert_eq!(options.quality, Some(75));
        assert_eq!(options.resize.and_then(|resize| resize.width), Some(640));

        assert!(processing_options(&output_args(None, None), None)?.is_noop());
        assert!(matches!(
            processing_options(&output_args(Some("gif"), None), None),
            Err(NanoError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            processing_options(&output_args(None, Some(300)), None),
            Err(NanoError::Validation(_))
        ));
        Ok(())
    }
}
