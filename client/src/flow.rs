//! Selecting, checking and uploading one video.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use anyhow::{anyhow, Result};
use common::{
    data::VideoFile,
    validate::{content_type_for, validate_video_file, FileCandidate, Rejection},
};
use log::{info, warn};
use tokio::{spawn, sync::watch};
use tokio_util::sync::CancellationToken;

use crate::{
    api::{cancellable, VideoApi},
    display::{refresh_bar, upload_percent, ProgressDisplay},
    media::{check_file_contents, MediaInspector},
};

pub const UPLOAD_SUCCESS: &str = "Video uploaded successfully! Analysis will begin shortly.";
pub const UPLOAD_FAILED: &str = "Failed to upload video. Please try again.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Validating,
    Previewing,
    FileSelected,
    Uploading,
    /// Holds the server-assigned video id.
    Success(String),
    Failed,
}

struct Selection {
    path: PathBuf,
    video: VideoFile,
}

/// Reads the name and size of `path`. A file that does not exist yields `None`.
async fn read_candidate(
    path: &Path,
    declared_type: Option<&str>,
) -> io::Result<Option<(FileCandidate, SystemTime)>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let declared_type = declared_type
        .map(str::to_string)
        .unwrap_or_else(|| content_type_for(&name).to_string());
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    Ok(Some((
        FileCandidate::new(name, metadata.len(), declared_type),
        modified,
    )))
}

/// Drives one file from selection to upload and keeps the messages a user sees.
pub struct UploadFlow {
    api: Arc<dyn VideoApi>,
    media: Arc<dyn MediaInspector>,
    cancel: CancellationToken,
    display: ProgressDisplay,
    state: FlowState,
    selected: Option<Selection>,
    error: Option<String>,
    warning: Option<String>,
    success: Option<String>,
    progress: u8,
}

impl UploadFlow {
    pub fn new(
        api: Arc<dyn VideoApi>,
        media: Arc<dyn MediaInspector>,
        cancel: CancellationToken,
        display: ProgressDisplay,
    ) -> Self {
        Self {
            api,
            media,
            cancel,
            display,
            state: FlowState::Idle,
            selected: None,
            error: None,
            warning: None,
            success: None,
            progress: 0,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn selected(&self) -> Option<&VideoFile> {
        self.selected.as_ref().map(|s| &s.video)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn success(&self) -> Option<&str> {
        self.success.as_deref()
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    fn reject(&mut self, rejection: Rejection) {
        info!("file rejected: {rejection}");
        self.selected = None;
        self.error = Some(rejection.to_string());
        self.state = FlowState::Failed;
    }

    /// Replaces the current selection with `path`. Validation failures end
    /// up in [`Self::error`] with nothing selected; `Err` is only returned
    /// when the checks themselves could not run or were cancelled.
    pub async fn select_file(&mut self, path: &Path, declared_type: Option<&str>) -> Result<()> {
        self.selected = None;
        self.error = None;
        self.warning = None;
        self.success = None;
        self.progress = 0;
        self.state = FlowState::Validating;

        let candidate = match read_candidate(path, declared_type).await {
            Ok(candidate) => candidate,
            Err(e) => {
                self.state = FlowState::Idle;
                return Err(anyhow!("cannot read {}: {e}", path.display()));
            }
        };
        let Some((candidate, modified)) = candidate else {
            self.reject(Rejection::NoFile);
            return Ok(());
        };
        if let Err(rejection) = validate_video_file(Some(&candidate)) {
            self.reject(rejection);
            return Ok(());
        }

        let checked = cancellable(
            &self.cancel,
            check_file_contents(self.media.as_ref(), path, candidate.size),
        )
        .await;
        let verdict = match checked {
            Ok(verdict) => verdict,
            Err(e) => {
                self.state = FlowState::Idle;
                return Err(e);
            }
        };
        let info = match verdict {
            Ok((info, warning)) => {
                self.warning = warning.map(|w| w.to_string());
                info
            }
            Err(rejection) => {
                self.reject(rejection);
                return Ok(());
            }
        };

        self.state = FlowState::Previewing;
        let mut video = VideoFile::new(&candidate, modified);
        let preview = cancellable(&self.cancel, self.media.thumbnail(path, &info)).await;
        match preview {
            Ok(preview) => video.preview = Some(preview),
            Err(e) if self.cancel.is_cancelled() => {
                self.state = FlowState::Idle;
                return Err(e);
            }
            Err(e) => warn!("Could not generate preview: {e:#}"),
        }

        self.selected = Some(Selection {
            path: path.to_path_buf(),
            video,
        });
        self.state = FlowState::FileSelected;
        Ok(())
    }

    /// Uploads the selection. Does nothing without one. The selection is
    /// handed off on success and kept on failure so the upload can be retried.
    pub async fn upload(&mut self) -> Result<()> {
        let Some(selection) = self.selected.as_ref() else {
            return Ok(());
        };
        let path = selection.path.clone();
        let video = selection.video.clone();

        self.state = FlowState::Uploading;
        self.error = None;
        self.success = None;
        self.progress = 0;

        let (sender, receiver) = watch::channel(0u64);
        let token = self.cancel.child_token();
        let refresher = spawn(refresh_bar(
            receiver.clone(),
            video.size,
            token.clone(),
            self.display,
        ));
        let outcome = cancellable(&self.cancel, self.api.upload_video(&path, &video, sender)).await;
        token.cancel();
        if let Err(e) = refresher.await {
            warn!("progress display failed: {e}");
        }
        self.progress = upload_percent(*receiver.borrow(), video.size);

        match outcome {
            Ok(response) => match response.into_result() {
                Ok(video_id) => {
                    info!("{} uploaded as {video_id}", video.name);
                    self.progress = 100;
                    self.success = Some(UPLOAD_SUCCESS.to_string());
                    self.selected = None;
                    self.state = FlowState::Success(video_id);
                }
                Err(reason) => {
                    self.error = Some(reason);
                    self.state = FlowState::Failed;
                }
            },
            Err(e) if self.cancel.is_cancelled() => {
                self.state = FlowState::FileSelected;
                return Err(e);
            }
            Err(_) => {
                self.error = Some(UPLOAD_FAILED.to_string());
                self.state = FlowState::Failed;
            }
        }
        Ok(())
    }

    /// Drops the selection and every message.
    pub fn remove(&mut self) {
        self.selected = None;
        self.error = None;
        self.success = None;
        self.progress = 0;
        self.state = FlowState::Idle;
    }
}
