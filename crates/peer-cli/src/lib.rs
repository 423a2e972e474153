//! # peer-cli
//!
//! Argument parsing and command execution for the `peer` binary.
//!
//! Commands run a [`HostEngine`] over the scripted runtime, so a "model" is a
//! JSON manifest as described in [`peer_runtime::mock`]. Output goes to the
//! writer passed to [`run`]; diagnostics go through `tracing` to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::{Args, Parser, Subcommand};
use peer_runtime::{Backend, LogTelemetry, ScriptedBackend};
use peer_session::{HostEngine, LoadConfig, Session, SinkError, StopReason};
use tracing::info;

/// peer: local model sessions from the command line
#[derive(Debug, Parser)]
#[command(name = "peer", version)]
pub struct Cli {
    /// Log at DEBUG instead of INFO.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate text from a prompt.
    Generate(GenerateArgs),

    /// Print a model's metadata record as JSON.
    Detect {
        /// Model file to inspect.
        #[arg(short, long)]
        model: PathBuf,
    },

    /// Print how many tokens a text tokenizes to.
    CountTokens {
        #[command(flatten)]
        load: LoadArgs,

        /// Text to tokenize.
        #[arg(long)]
        text: String,
    },

    /// Print one JSON embedding array per text.
    Embed {
        #[command(flatten)]
        load: LoadArgs,

        /// Texts to embed.
        #[arg(required = true)]
        texts: Vec<String>,
    },
}

/// Model selection and load overrides shared by every loading command.
#[derive(Debug, Clone, Args)]
pub struct LoadArgs {
    /// Model file to load.
    #[arg(short, long)]
    pub model: PathBuf,

    /// JSON load configuration; flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads.
    #[arg(long)]
    pub threads: Option<u32>,

    /// Context length in tokens.
    #[arg(long)]
    pub ctx: Option<u32>,

    /// Layers to offload to the GPU backend; negative offloads all.
    #[arg(long, allow_negative_numbers = true)]
    pub gpu_layers: Option<i32>,

    /// Compute backend: cpu or vulkan.
    #[arg(long)]
    pub backend: Option<Backend>,

    /// Run on the CPU backend.
    #[arg(long, conflicts_with = "backend")]
    pub cpu: bool,
}

#[derive(Debug, Clone, Args)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub load: LoadArgs,

    /// Input prompt text.
    #[arg(short, long)]
    pub prompt: String,

    /// System prompt prepended to the prompt.
    #[arg(long)]
    pub system: Option<String>,

    /// Sampling temperature; 0 or less samples greedily.
    #[arg(short, long, default_value_t = 0.8)]
    pub temperature: f32,

    #[arg(long, default_value_t = 0.9)]
    pub top_p: f32,

    #[arg(long, default_value_t = 40)]
    pub top_k: i32,

    /// Maximum number of tokens to generate.
    #[arg(long, default_value_t = 512)]
    pub max_tokens: i32,

    /// Stop sequence; may be repeated.
    #[arg(long = "stop")]
    pub stops: Vec<String>,

    /// Print text as it is generated.
    #[arg(long)]
    pub stream: bool,

    /// Print the metrics record after the text.
    #[arg(long)]
    pub metrics: bool,
}

impl LoadArgs {
    /// The configuration file, if any, with flag overrides applied.
    pub fn load_config(&self) -> anyhow::Result<LoadConfig> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => LoadConfig::default(),
        };
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(ctx) = self.ctx {
            config.context_length = ctx;
        }
        if let Some(gpu_layers) = self.gpu_layers {
            config.gpu_layers = gpu_layers;
        }
        if let Some(backend) = self.backend {
            config.use_gpu_backend = backend.is_accelerated();
        }
        if self.cpu {
            config.use_gpu_backend = false;
        }
        Ok(config)
    }
}

fn read_config(path: &Path) -> anyhow::Result<LoadConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn engine() -> HostEngine {
    let session = Session::new(Arc::new(ScriptedBackend::new()))
        .with_telemetry(Arc::new(LogTelemetry::new()));
    HostEngine::from_session(session)
}

fn load(engine: &HostEngine, args: &LoadArgs) -> anyhow::Result<()> {
    let config = args.load_config()?;
    engine
        .session()
        .load(&args.model, &config)
        .with_context(|| format!("failed to load model {}", args.model.display()))
}

/// Execute `cli`, writing command output to `out`.
pub fn run(cli: Cli, out: &mut dyn Write) -> anyhow::Result<()> {
    match cli.command {
        Command::Generate(args) => generate(&args, out),
        Command::Detect { model } => {
            let engine = engine();
            writeln!(out, "{}", engine.detect_model(&model.to_string_lossy()))?;
            Ok(())
        }
        Command::CountTokens { load: args, text } => {
            let engine = engine();
            load(&engine, &args)?;
            let count = engine.session().count_tokens(&text)?;
            writeln!(out, "{count}")?;
            Ok(())
        }
        Command::Embed { load: args, texts } => {
            let engine = engine();
            load(&engine, &args)?;
            for vector in engine.session().embed(texts.as_slice())? {
                writeln!(out, "{}", serde_json::to_string(&vector)?)?;
            }
            Ok(())
        }
    }
}

fn generate(args: &GenerateArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let engine = engine();
    load(&engine, &args.load)?;
    let system = args.system.as_deref().unwrap_or("");

    if args.stream {
        let mut callback = |text: &str, done: bool| -> Result<(), SinkError> {
            let written = if done {
                writeln!(out)
            } else {
                out.write_all(text.as_bytes()).and_then(|()| out.flush())
            };
            written.map_err(|err| SinkError::Rejected(err.to_string()))
        };
        engine.generate_stream(
            &args.prompt,
            system,
            args.temperature,
            args.top_p,
            args.top_k,
            args.max_tokens,
            &args.stops,
            &mut callback,
        );
    } else {
        let text = engine.generate(
            &args.prompt,
            system,
            args.temperature,
            args.top_p,
            args.top_k,
            args.max_tokens,
            &args.stops,
        );
        writeln!(out, "{text}")?;
    }

    if args.metrics {
        writeln!(out, "{}", engine.metrics())?;
    }

    let (reason, stop) = engine.session().stop_state();
    info!(reason = %reason, stop = %stop, "run finished");
    if reason == StopReason::Error {
        bail!("generation failed");
    }
    Ok(())
}
