//! Terminal output: upload progress and message banners.

use std::time::Duration;

use common::{data::VideoFile, format_file_size};
use kdam::{term::Colorizer, tqdm, BarExt, Column, RichProgress, Spinner};
use tokio::{
    select,
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressDisplay {
    /// Animated bar, for terminals.
    Bar,
    /// A line every ten percent, for logs and pipes.
    Lines,
    Hidden,
}

/// Percentage to show while bytes are still going out. 100 is only reached
/// once the server acknowledges the upload.
pub fn upload_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (sent.saturating_mul(100) / total).min(99) as u8
}

fn new_bar(total: u64) -> RichProgress {
    RichProgress::new(
        tqdm!(
            total = usize::try_from(total).unwrap_or(usize::MAX),
            unit_scale = true,
            unit_divisor = 1024,
            unit = "iB"
        ),
        vec![
            Column::Spinner(Spinner::new(
                &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"],
                80.0,
                1.0,
            )),
            Column::Text("[bold blue]Uploading".to_owned()),
            Column::Animation,
            Column::Percentage(1),
            Column::Text("•".to_owned()),
            Column::CountTotal,
            Column::Text("•".to_owned()),
            Column::Rate,
            Column::Text("•".to_owned()),
            Column::RemainingTime,
        ],
    )
}

/// Redraws upload progress from the byte counter until `token` is cancelled.
pub async fn refresh_bar(
    sent: watch::Receiver<u64>,
    total: u64,
    token: CancellationToken,
    display: ProgressDisplay,
) {
    let mut bar = (display == ProgressDisplay::Bar).then(|| new_bar(total));
    let mut timer = interval(Duration::from_millis(100));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut prev = None;
    loop {
        select! {
            _ = timer.tick() => {
                let bytes = *sent.borrow();
                if let Some(bar) = bar.as_mut() {
                    let _ = bar.update_to(usize::try_from(bytes).unwrap_or(usize::MAX));
                } else if display == ProgressDisplay::Lines {
                    let step = upload_percent(bytes, total) / 10 * 10;
                    if prev != Some(step) {
                        eprintln!("Uploaded {step}%");
                        prev = Some(step);
                    }
                }
            }
            _ = token.cancelled() => {
                if let Some(mut bar) = bar {
                    let _ = bar.clear();
                }
                return;
            }
        }
    }
}

pub fn error(message: &str) {
    eprintln!("{} {message}", "Error:".colorize("bold red"));
}

pub fn warning(message: &str) {
    eprintln!("{} {message}", "Warning:".colorize("bold yellow"));
}

pub fn success(message: &str) {
    eprintln!("{} {message}", "Success:".colorize("bold green"));
}

pub fn video_summary(video: &VideoFile) -> String {
    let preview = match &video.preview {
        Some(uri) => format!("JPEG thumbnail ({} characters)", uri.len()),
        None => "none".to_string(),
    };
    format!(
        "{} ({})\n  type: {}\n  local id: {}\n  preview: {}",
        video.name,
        format_file_size(video.size),
        video.content_type,
        video.id,
        preview
    )
}
