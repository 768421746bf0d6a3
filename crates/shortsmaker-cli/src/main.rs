//! ShortsMaker CLI
//!
//! Runs single stages or the full job against a `setup.yml`. Reports are
//! printed to stdout as JSON; logs go to stderr and the configured log file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use shortsmaker_lib::core::captions::whisper::{is_whisper_available, TranscriptionOptions};
use shortsmaker_lib::core::captions::{load_transcript, CaptionChunker, WordTimingIndex};
use shortsmaker_lib::core::ffmpeg::{detect_ffmpeg, validate_ffmpeg, FFmpegRunner};
use shortsmaker_lib::core::pipeline::{PipelineError, PipelineParts, ShortsPipeline};
use shortsmaker_lib::core::render::VideoCompositor;
use shortsmaker_lib::core::script::{prepare_script, save_script};
use shortsmaker_lib::core::settings::{AppConfig, Device, CONFIG_FILE};
use shortsmaker_lib::core::sources::{
    AudioSynthesizer, DiscordNotifier, MediaLibrary, NoopNotifier, Notifier, PostSource,
    RedditPostSource, TikTokTts, Transcriber, TranscriptFile, WhisperTranscriber,
};
use shortsmaker_lib::core::{CoreError, ErrorKind, InterruptFlag};

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Seed for every random choice, overrides `seed` and `video.composition.seed`
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Fetch a post and save its prepared narration script
    Fetch {
        /// Post URL; an unseen top post of the configured subreddit when omitted
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Synthesize narration audio from a script
    Synthesize {
        /// Script file, the saved narration script when omitted
        #[arg(short, long)]
        script: Option<PathBuf>,
        /// Audio output, `audio.output_audio_file` when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Transcribe narration audio into a word-timed transcript
    Align {
        /// Narration audio, `audio.output_audio_file` when omitted
        #[arg(short, long)]
        audio: Option<PathBuf>,
        /// Transcript output, `audio.transcript_json` when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build caption cards from a transcript
    Captions {
        /// Transcript file, `audio.transcript_json` when omitted
        #[arg(short, long)]
        transcript: Option<PathBuf>,
    },
    /// Compose the video from existing narration and transcript
    Render {
        #[arg(short, long)]
        audio: Option<PathBuf>,
        #[arg(short, long)]
        transcript: Option<PathBuf>,
        /// Video output, `video.output_file` when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run every stage from post to video
    Run {
        #[arg(short, long)]
        url: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// =============================================================================
// Setup
// =============================================================================

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else if cli.config == Path::new(CONFIG_FILE) {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        config
    } else {
        anyhow::bail!("configuration file {} not found", cli.config.display());
    };

    apply_cli_overrides(&mut config, cli);
    Ok(config)
}

fn apply_cli_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(seed) = cli.seed {
        config.seed = Some(seed);
        config.video.composition.seed = Some(seed);
    }
    if cli.verbose {
        config.logging.enable = true;
        config.logging.level = "debug".to_string();
    }
}

fn ffmpeg_runner(config: &AppConfig) -> Result<FFmpegRunner> {
    let info = detect_ffmpeg(config.ffmpeg_dir.as_deref()).context("FFmpeg is required")?;
    validate_ffmpeg(&info)?;
    info!("Using {} ({})", info.ffmpeg_path.display(), info.version);
    Ok(FFmpegRunner::new(info))
}

fn notifier(config: &AppConfig) -> Result<Box<dyn Notifier>> {
    match &config.discord.webhook_url {
        Some(url) => Ok(Box::new(DiscordNotifier::new(url.clone())?)),
        None => Ok(Box::new(NoopNotifier)),
    }
}

fn whisper_transcriber(
    config: &AppConfig,
    runner: FFmpegRunner,
    output: PathBuf,
) -> Result<WhisperTranscriber> {
    if !is_whisper_available() {
        anyhow::bail!(
            "built without the `whisper` feature; transcribe elsewhere and use `render --transcript`"
        );
    }
    let options = TranscriptionOptions {
        language: config.audio.language.clone(),
        use_gpu: config.audio.device == Device::Cuda,
        ..Default::default()
    };
    let mut transcriber = WhisperTranscriber::new(
        runner,
        &config.audio.model,
        &config.models_dir(),
        options,
        &config.scratch_root(),
    )?
    .save_transcript_to(output);

    let script_path = config.script_path();
    if script_path.is_file() {
        transcriber.set_prompt(Some(std::fs::read_to_string(&script_path)?));
    }
    Ok(transcriber)
}

fn build_pipeline(
    config: &AppConfig,
    transcriber: Box<dyn Transcriber>,
    runner: FFmpegRunner,
    interrupt: InterruptFlag,
) -> Result<ShortsPipeline> {
    let parts = PipelineParts {
        post_source: Box::new(RedditPostSource::new(
            config.reddit.clone(),
            &config.cache_dir,
            config.seed,
        )?),
        synthesizer: Box::new(TikTokTts::new(&config.audio.tts, runner.clone(), config.seed)?),
        transcriber,
        notifier: notifier(config)?,
        library: MediaLibrary::new(&config.assets_dir, config.seed)?,
        compositor: VideoCompositor::new(
            runner,
            config.composition_options(),
            config.scratch_root(),
        ),
    };
    Ok(ShortsPipeline::new(config, parts, interrupt))
}

// =============================================================================
// Commands
// =============================================================================

fn execute(command: Commands, config: &AppConfig, interrupt: &InterruptFlag) -> Result<Value> {
    std::fs::create_dir_all(&config.cache_dir)
        .with_context(|| format!("cannot create {}", config.cache_dir.display()))?;

    match command {
        Commands::Fetch { url } => {
            let mut source =
                RedditPostSource::new(config.reddit.clone(), &config.cache_dir, config.seed)?;
            let notifier = notifier(config)?;
            let post = config.retry.run("get_post", notifier.as_ref(), interrupt, |_| {
                source.get_post(url.as_deref())
            })?;
            let script = prepare_script(&post.text());
            if script.is_empty() {
                return Err(CoreError::Input(format!("post {} has no text", post.id)).into());
            }
            save_script(&config.script_path(), &script)?;
            Ok(json!({ "post": post, "script_path": config.script_path() }))
        }

        Commands::Synthesize { script, output } => {
            let script_path = script.unwrap_or_else(|| config.script_path());
            let text = std::fs::read_to_string(&script_path)
                .with_context(|| format!("cannot read script {}", script_path.display()))?;
            let output = output.unwrap_or_else(|| config.audio_path());

            let mut tts = TikTokTts::new(&config.audio.tts, ffmpeg_runner(config)?, config.seed)?;
            let notifier = notifier(config)?;
            let audio = config.retry.run("synthesize", notifier.as_ref(), interrupt, |_| {
                tts.synthesize(text.trim(), &output)
            })?;
            Ok(json!({ "voice": tts.voice(), "audio_path": audio }))
        }

        Commands::Align { audio, output } => {
            let audio = audio.unwrap_or_else(|| config.audio_path());
            let output = output.unwrap_or_else(|| config.transcript_path());
            let mut transcriber = whisper_transcriber(config, ffmpeg_runner(config)?, output.clone())?;
            let notifier = notifier(config)?;
            let segments = config.retry.run("transcribe", notifier.as_ref(), interrupt, |_| {
                transcriber.align(&audio)
            })?;
            let words: usize = segments.iter().map(|s| s.words.len()).sum();
            Ok(json!({ "transcript_path": output, "segments": segments.len(), "words": words }))
        }

        Commands::Captions { transcript } => {
            let path = transcript.unwrap_or_else(|| config.transcript_path());
            let segments = load_transcript(&path)?;
            let (words, normalize) =
                WordTimingIndex::new(config.video.timing.clone()).normalize_with_report(&segments)?;
            let (cards, chunk) =
                CaptionChunker::new(config.video.chunk.clone()).chunk_with_report(&words);
            Ok(json!({ "cards": cards, "normalize": normalize, "chunk": chunk }))
        }

        Commands::Render {
            audio,
            transcript,
            output,
        } => {
            let audio = audio.unwrap_or_else(|| config.audio_path());
            let transcript = transcript.unwrap_or_else(|| config.transcript_path());
            let segments = load_transcript(&transcript)?;

            let runner = ffmpeg_runner(config)?;
            let mut pipeline = build_pipeline(
                config,
                Box::new(TranscriptFile::new(transcript)),
                runner,
                interrupt.clone(),
            )?;
            if let Some(output) = output {
                pipeline.set_output_path(output);
            }
            Ok(serde_json::to_value(pipeline.render(&audio, &segments)?)?)
        }

        Commands::Run { url, output } => {
            let runner = ffmpeg_runner(config)?;
            let transcriber = whisper_transcriber(config, runner.clone(), config.transcript_path())?;
            let mut pipeline = build_pipeline(config, Box::new(transcriber), runner, interrupt.clone())?;
            if let Some(output) = output {
                pipeline.set_output_path(output);
            }
            let report = pipeline.run(url.as_deref())?;
            Ok(serde_json::to_value(report)?)
        }
    }
}

fn interrupted(err: &anyhow::Error) -> bool {
    if let Some(e) = err.downcast_ref::<PipelineError>() {
        return e.kind() == ErrorKind::Interrupted;
    }
    matches!(err.downcast_ref::<CoreError>(), Some(CoreError::Interrupted))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let _guard = match shortsmaker_lib::init_logging(&config.logging, &config.cache_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: cannot initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let interrupt = InterruptFlag::new();
    let on_signal = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            on_signal.raise();
        }
    });

    let command = cli.command;
    let outcome =
        tokio::task::spawn_blocking(move || execute(command, &config, &interrupt)).await;

    match outcome {
        Ok(Ok(report)) => match serde_json::to_string_pretty(&report) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Cannot serialize report: {}", e);
                ExitCode::FAILURE
            }
        },
        Ok(Err(e)) => {
            error!("{:#}", e);
            if interrupted(&e) {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("Worker task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
