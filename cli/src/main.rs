//! `img2arr` CLI front-end (§6.4): a single-shot `open -> pre -> code -> out
//! -> write` driver over the pipeline crates, in the spirit of
//! `original_source/img2arr_ui.py`'s relationship to `backend.py` but with
//! no GUI collaborator. Grounded in shape on `freddiehaddad-oxidized`'s
//! `ox-bin` (`clap::Parser` struct, `anyhow::Result` boundary,
//! `pretty_env_logger`-style init-once-at-startup).

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde::Deserialize;

use img2arr_pipeline::PipelineMode;
use img2arr_platform::PlatformTag;
use img2arr_registry::Features;

/// Exit codes (§6.4).
const EXIT_OK: u8 = 0;
const EXIT_MISUSE: u8 = 2;
const EXIT_PLUGIN_LOAD: u8 = 3;
const EXIT_DISPATCH: u8 = 4;
const EXIT_IO: u8 = 5;

#[derive(Parser, Debug)]
#[command(name = "img2arr", version, about = "Image-to-byte-array pipeline runner")]
struct Args {
    /// Source image to decode.
    #[arg(long)]
    input: PathBuf,

    /// Ordered preprocessing chain, comma-separated; an empty slot (`,,`)
    /// is the virtual REUSE passthrough node.
    #[arg(long, value_delimiter = ',')]
    pre: Vec<String>,

    /// CODE-stage plug-in name.
    #[arg(long)]
    code: Option<String>,

    /// OUT-stage plug-in name.
    #[arg(long)]
    out: Option<String>,

    /// Worker count; 0 uses the logical core count.
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Pipeline mode.
    #[arg(long, value_enum, default_value_t = ModeArg::Default)]
    mode: ModeArg,

    /// Output file; `-` writes to stdout.
    #[arg(long, default_value = "-")]
    output: String,

    /// Plug-in root directory; overrides `root` in `img2arr.toml`.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Path to a TOML config file; defaults to `./img2arr.toml` if present.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum ModeArg {
    Default,
    Speed,
    Memory,
}

impl From<ModeArg> for PipelineMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Default => PipelineMode::Default,
            ModeArg::Speed => PipelineMode::Speed,
            ModeArg::Memory => PipelineMode::Memory,
        }
    }
}

/// Defaults layered under CLI flags (§3 "Config file").
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    root: Option<PathBuf>,
    threads: Option<usize>,
    mode: Option<String>,
}

fn load_file_config(explicit: Option<&PathBuf>) -> anyhow::Result<FileConfig> {
    let candidate = match explicit {
        Some(path) => path.clone(),
        None => PathBuf::from("img2arr.toml"),
    };
    if !candidate.is_file() {
        if explicit.is_some() {
            return Err(anyhow!("config file not found: {}", candidate.display()));
        }
        return Ok(FileConfig::default());
    }
    let settings = config::Config::builder()
        .add_source(config::File::from(candidate.clone()))
        .build()
        .with_context(|| format!("reading config {}", candidate.display()))?;
    settings
        .try_deserialize()
        .with_context(|| format!("parsing config {}", candidate.display()))
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            log::error!("{err:#}");
            eprintln!("img2arr: {err:#}");
            ExitCode::from(err.downcast_ref::<CliError>().map(CliError::code).unwrap_or(EXIT_IO))
        }
    }
}

/// Carries the §6.4 exit code alongside the `anyhow` chain so `main` can
/// report it without re-deriving it from the error's shape.
#[derive(Debug)]
struct CliError(u8, String);

impl CliError {
    fn code(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.1)
    }
}

impl std::error::Error for CliError {}

fn misuse(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(CliError(EXIT_MISUSE, message.into()))
}

fn plugin_load(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(CliError(EXIT_PLUGIN_LOAD, message.into()))
}

fn dispatch_failed(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(CliError(EXIT_DISPATCH, message.into()))
}

fn io_failed(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(CliError(EXIT_IO, message.into()))
}

fn run() -> anyhow::Result<u8> {
    let args = Args::parse();
    let file_config = load_file_config(args.config.as_ref())?;

    let root = args
        .root
        .clone()
        .or(file_config.root.clone())
        .ok_or_else(|| misuse("no plug-in root given (--root or img2arr.toml's `root`)"))?;

    let threads = if args.threads != 0 {
        args.threads
    } else {
        file_config.threads.unwrap_or(0)
    };

    if !args.input.is_file() {
        return Err(io_failed(format!("{}: not found", args.input.display())));
    }

    let platform = PlatformTag::current();
    log::info!("platform: {platform}");

    let registry = img2arr_registry::scan(&root, Features::NATIVE, &platform, |path, err| {
        log::warn!("{}: {err}", path.display());
    });

    let pool = img2arr_workerpool::WorkerPool::init(threads);
    log::info!("worker pool: {} worker(s)", pool.size());

    let mut pipeline = img2arr_pipeline::Pipeline::open(&args.input)
        .map_err(|e| io_failed(e.to_string()))?;

    let mode: PipelineMode = args.mode.into();
    let chain_empty = args.pre.is_empty();
    let mut iter = pipeline.begin_pre(0, chain_empty, mode);

    for (node_i, name) in args.pre.iter().enumerate() {
        let is_tail = node_i + 1 == args.pre.len();
        let outcome = pipeline
            .step_pre(&mut iter, &registry, &pool, "img", name, &[], is_tail)
            .map_err(|e| dispatch_failed(format!("pre[{node_i}] {name:?}: {e}")))?;
        if let Some(result) = &outcome.dispatch {
            if result.any_task_failed() {
                return Err(dispatch_failed(format!(
                    "pre[{node_i}] {name:?} returned nonzero: {:?}",
                    result.per_task_returns
                )));
            }
        }
    }

    if let Some(code_name) = args.code.as_deref() {
        let result = pipeline
            .code_dispatch(&registry, &pool, code_name, &[])
            .map_err(map_pipeline_err)?;
        if result.any_task_failed() {
            return Err(dispatch_failed(format!(
                "code {code_name:?} returned nonzero: {:?}",
                result.per_task_returns
            )));
        }
    }

    if let Some(out_name) = args.out.as_deref() {
        let result = pipeline
            .out_dispatch(&registry, &pool, out_name, &[])
            .map_err(map_pipeline_err)?;
        if result.any_task_failed() {
            return Err(dispatch_failed(format!(
                "out {out_name:?} returned nonzero: {:?}",
                result.per_task_returns
            )));
        }
    }

    let payload: &[u8] = if args.out.is_some() {
        pipeline.out()
    } else if args.code.is_some() {
        pipeline.code_out()
    } else {
        pipeline.pre().bytes()
    };

    write_output(&args.output, payload)?;

    Ok(EXIT_OK)
}

fn map_pipeline_err(err: img2arr_pipeline::Error) -> anyhow::Error {
    match &err {
        img2arr_pipeline::Error::Registry(inner) => match inner {
            img2arr_registry::Error::PluginNotFound { .. }
            | img2arr_registry::Error::NativeModuleMissing(_)
            | img2arr_registry::Error::InvalidSignature { .. }
            | img2arr_registry::Error::MissingSymbol { .. }
            | img2arr_registry::Error::InitFailed { .. }
            | img2arr_registry::Error::Load { .. }
            | img2arr_registry::Error::UnsupportedPlatform(_) => plugin_load(err.to_string()),
            _ => dispatch_failed(err.to_string()),
        },
        img2arr_pipeline::Error::Dispatch(_) => dispatch_failed(err.to_string()),
        img2arr_pipeline::Error::EmptyNodeName => misuse(err.to_string()),
        img2arr_pipeline::Error::DecodeFailed { .. } => io_failed(err.to_string()),
        img2arr_pipeline::Error::Preprocess(_) => dispatch_failed(err.to_string()),
    }
}

fn write_output(output: &str, bytes: &[u8]) -> anyhow::Result<()> {
    if output == "-" {
        std::io::stdout()
            .write_all(bytes)
            .map_err(|e| io_failed(e.to_string()))?;
    } else {
        fs::write(output, bytes).map_err(|e| io_failed(format!("{output}: {e}")))?;
    }
    Ok(())
}
