//! `partify` command-line shell over the analysis workflow.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use partify_app::config::parse_display_order;
use partify_app::{
    AnalysisWorkflow, AppConfig, AppError, ConfigError, HandoffStep, ThreadSpawner, app_version,
};
use partify_core::{DisplayOrder, ErrorInfo, HandoffState, SelectionSource};
use partify_handoff::SystemLinkOpener;
use partify_selection::{DirPreviewStore, FileCandidate, SelectOutcome};
use partify_ui::WorkflowView;
use partify_upload::{HttpTransport, ServiceEndpoints};
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Parser)]
#[command(name = "partify", version = partify_app::APP_VERSION, about = "Car damage analysis client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze one image and print the result.
    Analyze(AnalyzeArgs),
    /// Print the build version.
    Version,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    /// Image file to analyze.
    image: PathBuf,
    /// How the file was offered; dropped non-images are ignored silently.
    #[arg(long, value_enum, default_value_t = SourceArg::Picker)]
    source: SourceArg,
    /// Resolve the garage quote link after a successful analysis.
    #[arg(long)]
    handoff: bool,
    /// Open the quote link with the desktop handler.
    #[arg(long, requires = "handoff")]
    open: bool,
    /// Save the annotated (or original) image.
    #[arg(long)]
    download: bool,
    /// Directory for `--download`; overrides PARTIFY_DOWNLOAD_DIR.
    #[arg(long, value_name = "DIR")]
    download_dir: Option<PathBuf>,
    /// Print the workflow view as JSON.
    #[arg(long)]
    json: bool,
    /// Service base URL; overrides PARTIFY_API_BASE.
    #[arg(long, value_name = "URL")]
    api_base: Option<String>,
    /// `source` or `confidence`; overrides PARTIFY_DISPLAY_ORDER.
    #[arg(long, value_name = "ORDER", value_parser = parse_display_order)]
    display_order: Option<DisplayOrder>,
    /// HTTP timeout in seconds; overrides PARTIFY_HTTP_TIMEOUT_SECS.
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    Picker,
    Drop,
}

impl From<SourceArg> for SelectionSource {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::Picker => SelectionSource::Picker,
            SourceArg::Drop => SelectionSource::Drop,
        }
    }
}

#[derive(Serialize)]
struct RunOutput<'a> {
    #[serde(flatten)]
    view: &'a WorkflowView,
    download: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("partify {}", app_version());
            ExitCode::SUCCESS
        }
        Command::Analyze(args) => match run_analyze(&args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(run_error) => {
                error!(target: "app", "run_failed: {run_error}");
                eprintln!("{run_error}");
                ExitCode::FAILURE
            }
        },
    }
}

fn run_analyze(args: &AnalyzeArgs) -> Result<(), AppError> {
    let config = resolve_config(args)?;
    match initialize_logger(config.log_dir.as_deref()) {
        Ok(Some(path)) => info!(target: "logging", "file_created: log_file={}", path.display()),
        Ok(None) => {}
        Err(log_error) => eprintln!("logging disabled: {log_error}"),
    }
    info!(
        target: "app",
        "started: version={} base={} timeout_secs={}",
        app_version(),
        config.endpoints.base(),
        config.http_timeout.as_secs()
    );

    let previews = Arc::new(DirPreviewStore::in_temp_dir()?);
    let transport = Arc::new(HttpTransport::new(
        config.endpoints.clone(),
        config.http_timeout,
    )?);
    let mut workflow = AnalysisWorkflow::new(previews, transport, Arc::new(ThreadSpawner))
        .with_display_order(config.display_order);

    let candidate = FileCandidate::from_path(&args.image)?;
    match workflow.select_file(candidate, args.source.into()) {
        Ok(SelectOutcome::Selected) => {}
        Ok(SelectOutcome::Ignored) => {
            warn!(target: "selection", "drop_ignored: file={}", args.image.display());
            return Err(AppError::Workflow(ErrorInfo::invalid_selection(
                "dropped file is not an image",
            )));
        }
        Err(selection_error) => return Err(AppError::Workflow(selection_error)),
    }

    workflow.analyze();
    while workflow.wait_for_completion().is_some() {}

    if let Some(request_error) = workflow.request_state().error() {
        if args.json {
            print_json(&workflow.view(), None)?;
        }
        return Err(AppError::Workflow(request_error.clone()));
    }

    if args.handoff {
        if let HandoffStep::Requested(_) = workflow.request_handoff() {
            while workflow.wait_for_completion().is_some() {}
        }
        if args.open && matches!(workflow.handoff_state(), HandoffState::Ready(_)) {
            workflow.open_handoff(&SystemLinkOpener)?;
        }
    }

    let download = if args.download {
        Some(workflow.download_artifact(&config.download_dir)?)
    } else {
        None
    };

    let view = workflow.view();
    if args.json {
        return print_json(&view, download.as_deref());
    }

    if let Some(result) = &view.result {
        print!("{}", result.render_text());
    }
    match workflow.handoff_state() {
        HandoffState::Ready(uri) => println!("Quote link: {uri}"),
        HandoffState::Failed(handoff_error) => eprintln!("{handoff_error}"),
        HandoffState::Idle | HandoffState::Pending(_) => {}
    }
    if let Some(path) = download {
        println!("Saved: {}", path.display());
    }
    Ok(())
}

fn resolve_config(args: &AnalyzeArgs) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::from_env()?;
    if let Some(base) = &args.api_base {
        config.endpoints = ServiceEndpoints::new(base).map_err(ConfigError::from)?;
    }
    if let Some(secs) = args.timeout_secs {
        if secs == 0 {
            return Err(ConfigError::InvalidTimeout(secs.to_string()).into());
        }
        config.http_timeout = Duration::from_secs(secs);
    }
    if let Some(order) = args.display_order {
        config.display_order = order;
    }
    if let Some(dir) = &args.download_dir {
        config.download_dir = dir.clone();
    }
    Ok(config)
}

fn print_json(view: &WorkflowView, download: Option<&Path>) -> Result<(), AppError> {
    let output = RunOutput {
        view,
        download: download.map(|path| path.display().to_string()),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Installs the `timestamp | level | stage | message` logger. Returns the log
/// file path when `log_dir` is set.
fn initialize_logger(log_dir: Option<&Path>) -> Result<Option<PathBuf>, String> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} | {} | {} | {}",
            timestamp_compact_utc(),
            record.level(),
            record.target(),
            record.args()
        )
    });

    let log_path = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|error| {
                format!("unable to create log dir '{}': {error}", dir.display())
            })?;
            let path = dir.join(format!("{}_log.txt", timestamp_compact_utc()));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|error| {
                    format!("unable to create log file '{}': {error}", path.display())
                })?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            Some(path)
        }
        None => None,
    };

    builder
        .try_init()
        .map_err(|error| format!("logger already installed: {error}"))?;
    Ok(log_path)
}

fn timestamp_compact_utc() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}
