mod api;
mod credentials;
mod display;
mod flow;
mod media;
mod results;

use std::{
    io::{stderr, IsTerminal},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{
    filter::StatusFilter,
    payloads::{AnalysisOptions, AnalysisRequest},
};
use kdam::term;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::{
    api::{cancellable, ApiClient, VideoApi},
    display::ProgressDisplay,
    flow::{FlowState, UploadFlow},
    media::Ffmpeg,
    results::{render_result, render_view, ResultsView, DEFAULT_POLL_INTERVAL},
};

#[derive(clap::Args, Debug, Clone)]
struct AnalysisFlags {
    /// Language hint for the analysis, e.g. `en`.
    #[arg(long)]
    language: Option<String>,

    /// Ask for a transcript.
    #[arg(long)]
    transcript: bool,

    /// Ask for sentiment analysis.
    #[arg(long)]
    sentiment: bool,
}

impl From<AnalysisFlags> for AnalysisOptions {
    fn from(flags: AnalysisFlags) -> Self {
        Self {
            language: flags.language,
            include_transcript: flags.transcript.then_some(true),
            include_sentiment: flags.sentiment.then_some(true),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Validate a video file without uploading it.
    Check {
        file: PathBuf,

        /// Declared MIME type. Guessed from the extension if not given.
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Validate and upload a video file.
    Upload {
        file: PathBuf,

        #[arg(long)]
        content_type: Option<String>,

        /// Start an analysis once the upload is accepted.
        #[arg(long)]
        analyze: bool,

        #[command(flatten)]
        options: AnalysisFlags,
    },
    /// Start an analysis of an uploaded video.
    Analyze {
        video_id: String,

        #[command(flatten)]
        options: AnalysisFlags,
    },
    /// Show one analysis.
    Status { analysis_id: String },
    /// List the analyses of a video.
    Results {
        video_id: String,

        /// all, pending, processing, completed or error.
        #[arg(long, default_value_t = StatusFilter::All)]
        filter: StatusFilter,

        #[arg(long, default_value = "")]
        search: String,

        /// Keep polling until every analysis has finished.
        #[arg(long)]
        watch: bool,

        /// Seconds between polls.
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
        interval: u64,
    },
    /// Check whether the service is reachable.
    Health,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(
        short,
        long,
        global = true,
        env = "VIDELIZER_API_URL",
        default_value = "http://localhost:8080"
    )]
    base_url: String,

    /// Bearer token for the API.
    #[arg(long, global = true, env = "VIDELIZER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// File holding the bearer token, read before every request.
    #[arg(long, global = true, env = "VIDELIZER_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value_t = 300)]
    timeout: u64,

    #[arg(long, global = true, default_value = "ffprobe")]
    ffprobe: String,

    #[arg(long, global = true, default_value = "ffmpeg")]
    ffmpeg: String,

    /// Do not show upload progress.
    #[arg(short, long, global = true)]
    quiet: bool,
}

struct App {
    api: Arc<ApiClient>,
    cancel: CancellationToken,
    display: ProgressDisplay,
    args: Args,
}

impl App {
    fn upload_flow(&self) -> UploadFlow {
        UploadFlow::new(
            self.api.clone(),
            Arc::new(Ffmpeg::new(&self.args.ffprobe, &self.args.ffmpeg)),
            self.cancel.clone(),
            self.display,
        )
    }

    /// Selects `file` and prints the verdict. Returns the flow when the file passed.
    async fn select(&self, file: &Path, content_type: Option<&str>) -> Result<Option<UploadFlow>> {
        let mut flow = self.upload_flow();
        flow.select_file(file, content_type).await?;
        if let Some(error) = flow.error() {
            display::error(error);
            return Ok(None);
        }
        if let Some(warning) = flow.warning() {
            display::warning(warning);
        }
        if let Some(video) = flow.selected() {
            println!("{}", display::video_summary(video));
        }
        Ok(Some(flow))
    }

    async fn start_analysis(&self, video_id: String, options: AnalysisFlags) -> Result<bool> {
        let request = AnalysisRequest::new(video_id, options.into());
        match cancellable(&self.cancel, self.api.start_analysis(&request)).await {
            Ok(result) => {
                print!("{}", render_result(&result));
                Ok(true)
            }
            Err(e) if self.cancel.is_cancelled() => Err(e),
            Err(e) => {
                debug!("starting analysis: {e:#}");
                display::error("Failed to start analysis");
                Ok(false)
            }
        }
    }

    async fn run(&self) -> Result<bool> {
        match self.args.command.clone() {
            Command::Check { file, content_type } => {
                let Some(mut flow) = self.select(&file, content_type.as_deref()).await? else {
                    return Ok(false);
                };
                flow.remove();
                Ok(true)
            }
            Command::Upload {
                file,
                content_type,
                analyze,
                options,
            } => {
                let Some(mut flow) = self.select(&file, content_type.as_deref()).await? else {
                    return Ok(false);
                };
                flow.upload().await?;
                if let Some(error) = flow.error() {
                    debug!("upload stopped at {}%", flow.progress());
                    display::error(error);
                    return Ok(false);
                }
                if let Some(success) = flow.success() {
                    display::success(success);
                }
                let FlowState::Success(video_id) = flow.state().clone() else {
                    bail!("upload ended in state {:?}", flow.state());
                };
                println!("Video ID: {video_id}");
                if analyze {
                    return self.start_analysis(video_id, options).await;
                }
                Ok(true)
            }
            Command::Analyze { video_id, options } => self.start_analysis(video_id, options).await,
            Command::Status { analysis_id } => {
                match cancellable(&self.cancel, self.api.get_analysis_status(&analysis_id)).await {
                    Ok(result) => {
                        print!("{}", render_result(&result));
                        Ok(true)
                    }
                    Err(e) if self.cancel.is_cancelled() => Err(e),
                    Err(e) => {
                        debug!("fetching {analysis_id}: {e:#}");
                        display::error("Failed to load analysis status");
                        Ok(false)
                    }
                }
            }
            Command::Results {
                video_id,
                filter,
                search,
                watch,
                interval,
            } => {
                let mut view = ResultsView::new(self.api.clone(), self.cancel.clone());
                view.set_video_id(video_id);
                view.set_filter(filter);
                view.set_search(search);
                if watch {
                    let outcome = view
                        .watch(Duration::from_secs(interval.max(1)), |view| {
                            print!("{}", render_view(view));
                            println!();
                        })
                        .await;
                    if let Some(error) = view.error() {
                        display::error(error);
                        return Ok(false);
                    }
                    outcome?;
                    return Ok(true);
                }
                if !view.load().await? {
                    display::error(view.error().unwrap_or(results::LOAD_FAILED));
                    return Ok(false);
                }
                print!("{}", render_view(&view));
                Ok(true)
            }
            Command::Health => {
                if cancellable(&self.cancel, self.api.health()).await? {
                    println!("Service is up at {}", self.args.base_url);
                    Ok(true)
                } else {
                    display::error(&format!("Service is not reachable at {}", self.args.base_url));
                    Ok(false)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let is_tty = stderr().is_terminal();
    term::init(is_tty);
    let args = Args::parse();

    let credentials = credentials::from_settings(args.token.clone(), args.token_file.clone());
    let api = Arc::new(ApiClient::new(
        &args.base_url,
        credentials,
        Duration::from_secs(args.timeout),
    )?);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            ctrl_c.cancel();
        }
    });

    let app = App {
        api,
        cancel,
        display: if args.quiet {
            ProgressDisplay::Hidden
        } else if is_tty {
            ProgressDisplay::Bar
        } else {
            ProgressDisplay::Lines
        },
        args,
    };
    match app.run().await {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::FAILURE),
        Err(e) if app.cancel.is_cancelled() => {
            debug!("{e:#}");
            display::error("Interrupted");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e),
    }
}
