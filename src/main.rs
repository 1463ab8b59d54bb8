use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sqlstream::decoding::FfmpegSource;
use sqlstream::encoder::ANSI_RESET;
use sqlstream::error::{find_sqlstream_error, SqlStreamError};
use sqlstream::ingest::{run_ingest, IngestArgs};
use sqlstream::player::{run_playback, PlaybackArgs};
use sqlstream::resolve::{resolve_source, SourceRef};
use sqlstream::session::{
    DensityRamp, DisplayDims, RenderMode, SessionContext, DEFAULT_DENSITY_RAMP,
};
use sqlstream::store::FrameStore;
use sqlstream::terminal::TerminalGeometry;

const LOG_ENV: &str = "SQLSTREAM_LOG";

#[derive(Debug, Parser)]
#[command(name = "sqlstream")]
#[command(version = env!("SQLSTREAM_VERSION"))]
#[command(about = "Relational database video playback tool")]
#[command(group(ArgGroup::new("mode").required(true).args(["source", "play_db"])))]
struct Cli {
    /// Path to video file or YouTube URL
    #[arg(long)]
    source: Option<String>,

    /// Path to existing .db file for playback
    #[arg(long = "play-db")]
    play_db: Option<PathBuf>,

    /// Max video length in seconds
    #[arg(long, default_value_t = 60.0)]
    duration: f64,

    /// Target playback frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Use ANSI TrueColor formatting
    #[arg(long)]
    color: bool,

    /// Optional output path for the database file
    #[arg(long)]
    out: Option<PathBuf>,

    /// Picture width in columns (default: terminal width)
    #[arg(long)]
    width: Option<u32>,

    /// Picture height in rows (default: terminal height minus 3)
    #[arg(long)]
    height: Option<u32>,

    /// Eight density characters, dark to light
    #[arg(long, default_value = DEFAULT_DENSITY_RAMP)]
    ramp: String,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    if let Err(error) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
        warn!("failed to install Ctrl-C handler: {error}");
    }

    let result = match &cli.play_db {
        Some(path) => run_replay(path, cli.fps, &cancel),
        None => run_source(&cli, &cancel),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report_failure(&error),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_replay(path: &Path, fps: u32, cancel: &AtomicBool) -> Result<()> {
    if !path.exists() {
        return Err(SqlStreamError::MissingPersistedStore {
            path: path.to_path_buf(),
        }
        .into());
    }
    let mut store = FrameStore::load_into_memory(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    info!(
        path = %path.display(),
        height = store.height(),
        "replaying persisted store"
    );
    play(&mut store, fps, cancel)
}

fn run_source(cli: &Cli, cancel: &AtomicBool) -> Result<()> {
    let Some(raw_source) = cli.source.as_deref() else {
        anyhow::bail!("either --source or --play-db is required");
    };
    let context = build_session_context(cli)?;

    let source_ref = SourceRef::parse(raw_source);
    let media = resolve_source(&source_ref)?;
    let mut source = FfmpegSource::open(&media)?;
    let stream = source.info();
    info!(
        source = %source_ref.display_label(),
        stream = %format!("{}x{} @ {:?} fps", stream.width, stream.height, stream.fps),
        width = context.width(),
        height = context.height(),
        mode = context.mode.as_str(),
        "ingesting"
    );

    let mut store = match &cli.out {
        Some(path) => FrameStore::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?,
        None => FrameStore::open_in_memory()?,
    };
    let args = IngestArgs {
        duration_seconds: cli.duration,
        target_fps: cli.fps,
    };
    run_ingest(&mut store, &mut source, &context, args, cancel)?;
    if let Err(error) = source.finish() {
        warn!("decoder did not shut down cleanly: {error:#}");
    }

    play(&mut store, cli.fps, cancel)
}

fn build_session_context(cli: &Cli) -> Result<SessionContext> {
    let (width, height) = TerminalGeometry::detect().default_display(cli.width, cli.height);
    let dims = DisplayDims::new(width, height)?;
    let ramp = DensityRamp::parse(&cli.ramp).context("invalid --ramp")?;
    Ok(SessionContext::new(dims, ramp, RenderMode::from_color_flag(cli.color)))
}

fn play(store: &mut FrameStore, fps: u32, cancel: &AtomicBool) -> Result<()> {
    let columns = TerminalGeometry::detect().columns as usize;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let args = PlaybackArgs {
        target_fps: fps,
        columns,
    };
    let summary = match run_playback(store, &mut out, args, cancel) {
        Ok(summary) => summary,
        Err(error) => {
            let _ = write!(out, "{ANSI_RESET}");
            let _ = out.flush();
            return Err(error.into());
        }
    };
    writeln!(out)?;
    info!(
        ticks = summary.ticks,
        digest = %summary.output_digest,
        "session complete"
    );
    Ok(())
}

fn report_failure(error: &anyhow::Error) -> ExitCode {
    let typed = find_sqlstream_error(error);
    match typed {
        Some(SqlStreamError::InterruptedPlayback { .. })
        | Some(SqlStreamError::InterruptedIngest { .. }) => {
            let mut stdout = io::stdout();
            let _ = write!(stdout, "{ANSI_RESET}\nProcess interrupted by user.\n");
            let _ = stdout.flush();
        }
        Some(SqlStreamError::MissingPersistedStore { .. }) => eprintln!("Error: {error}"),
        _ => eprintln!("error: {error:#}"),
    }
    ExitCode::from(typed.map(SqlStreamError::exit_code).unwrap_or(1))
}
