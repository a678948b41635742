//! Client-side checks a file has to pass before it may be uploaded.
//!
//! The synchronous rules only look at the name, size and declared type.
//! [`check_media`] then judges what a media probe reported about the contents.

use std::{error::Error, fmt};

use crate::helpers::format_file_size;

pub const MIN_FILE_SIZE: u64 = 1024;
pub const MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;
/// Files above this still pass, with a warning.
pub const LARGE_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Accepted MIME types and the extension each one is paired with.
pub const ACCEPTED_VIDEO_TYPES: [(&str, &str); 6] = [
    ("video/mp4", ".mp4"),
    ("video/avi", ".avi"),
    ("video/mov", ".mov"),
    ("video/wmv", ".wmv"),
    ("video/flv", ".flv"),
    ("video/webm", ".webm"),
];

pub const ACCEPTED_EXTENSIONS: [&str; 6] = [".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm"];

const INVALID_NAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const ACCEPTED_FORMATS: &str = "MP4, AVI, MOV, WMV, FLV, WebM";

/// Fallback type for files whose extension is not on the allow-list.
pub const UNKNOWN_CONTENT_TYPE: &str = "application/octet-stream";

/// What the validator needs to know about a selected file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileCandidate {
    pub name: String,
    pub size: u64,
    pub declared_type: String,
}

impl FileCandidate {
    pub fn new(name: impl Into<String>, size: u64, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            declared_type: declared_type.into(),
        }
    }
}

/// Why a file was turned down. Each variant is one rule of the validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    NoFile,
    TooSmall,
    TooLarge { size: u64 },
    InvalidType(String),
    InvalidExtension(String),
    InvalidName,
    InvalidCharacters,
    /// The media probe did not answer in time.
    TimedOut,
    /// The media probe could not decode the file at all.
    Unreadable,
    /// Decoded, but the duration is zero or unbounded.
    InvalidVideo,
    /// Decoded, but there is no picture.
    Corrupted,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFile => write!(f, "No file selected"),
            Self::TooSmall => write!(f, "File is too small. Please select a valid video file."),
            Self::TooLarge { size } => write!(
                f,
                "File size ({}) exceeds maximum limit of {}",
                format_file_size(*size),
                format_file_size(MAX_FILE_SIZE)
            ),
            Self::InvalidType(t) => write!(
                f,
                "Invalid file type \"{t}\". Please upload a video file ({ACCEPTED_FORMATS})"
            ),
            Self::InvalidExtension(ext) => write!(
                f,
                "Invalid file extension \"{ext}\". Please upload a video file ({ACCEPTED_FORMATS})"
            ),
            Self::InvalidName => write!(f, "Invalid file name"),
            Self::InvalidCharacters => write!(
                f,
                "File name contains invalid characters. Please rename the file and try again."
            ),
            Self::TimedOut => write!(f, "File validation timed out. Please try again."),
            Self::Unreadable => write!(
                f,
                "Could not read video file. Please ensure it's a valid video format."
            ),
            Self::InvalidVideo => write!(f, "Invalid video file. Please select a valid video."),
            Self::Corrupted => write!(f, "Video file appears to be corrupted or invalid."),
        }
    }
}

impl Error for Rejection {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Warning {
    LargeFile,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LargeFile => {
                write!(f, "Large file detected. Upload may take longer than usual.")
            }
        }
    }
}

/// Lower-cased suffix after the last `.`, with the dot. A name without a
/// dot yields the whole name.
pub fn file_extension(name: &str) -> String {
    let suffix = name.rsplit('.').next().unwrap_or_default();
    format!(".{}", suffix.to_lowercase())
}

/// The allow-listed type paired with the name's extension, if any.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = file_extension(name);
    ACCEPTED_VIDEO_TYPES
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(t, _)| *t)
        .unwrap_or(UNKNOWN_CONTENT_TYPE)
}

/// Runs the synchronous rules in order and stops at the first failure.
pub fn validate_video_file(file: Option<&FileCandidate>) -> Result<(), Rejection> {
    let file = file.ok_or(Rejection::NoFile)?;

    if file.size < MIN_FILE_SIZE {
        return Err(Rejection::TooSmall);
    }
    if file.size > MAX_FILE_SIZE {
        return Err(Rejection::TooLarge { size: file.size });
    }

    if !ACCEPTED_VIDEO_TYPES
        .iter()
        .any(|(t, _)| *t == file.declared_type)
    {
        return Err(Rejection::InvalidType(file.declared_type.clone()));
    }

    let ext = file_extension(&file.name);
    if !ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(Rejection::InvalidExtension(ext));
    }

    if file.name.trim().is_empty() {
        return Err(Rejection::InvalidName);
    }
    if file.name.contains(INVALID_NAME_CHARS) {
        return Err(Rejection::InvalidCharacters);
    }

    Ok(())
}

/// What a media probe found out about a file.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaInfo {
    /// Seconds; `None` when the container does not state one.
    pub duration: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
}

/// Judges probed metadata. `size` is the file size in bytes.
pub fn check_media(info: &MediaInfo, size: u64) -> Result<Option<Warning>, Rejection> {
    match info.duration {
        Some(d) if d.is_finite() && d > 0.0 => {}
        _ => return Err(Rejection::InvalidVideo),
    }
    if info.width == 0 || info.height == 0 {
        return Err(Rejection::Corrupted);
    }
    if size > LARGE_FILE_SIZE {
        return Ok(Some(Warning::LargeFile));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn candidate(name: &str, size: u64, declared_type: &str) -> FileCandidate {
        FileCandidate::new(name, size, declared_type)
    }

    fn media(duration: Option<f64>, width: u32, height: u32) -> MediaInfo {
        MediaInfo {
            duration,
            width,
            height,
            fps: Some(25.0),
        }
    }

    #[test]
    fn accepts_every_allowed_format() {
        for (t, ext) in ACCEPTED_VIDEO_TYPES {
            let name = format!("holiday{ext}");
            assert_eq!(validate_video_file(Some(&candidate(&name, 4 * MIB, t))), Ok(()));
        }
        let upper = candidate("HOLIDAY.MP4", 4 * MIB, "video/mp4");
        assert_eq!(validate_video_file(Some(&upper)), Ok(()));
    }

    #[test]
    fn missing_file() {
        assert_eq!(validate_video_file(None), Err(Rejection::NoFile));
        assert_eq!(Rejection::NoFile.to_string(), "No file selected");
    }

    #[test]
    fn too_small() {
        for size in [0, 1, 512, 1023] {
            let err = validate_video_file(Some(&candidate("a.mp4", size, "video/mp4"))).unwrap_err();
            assert_eq!(err, Rejection::TooSmall);
            assert!(err.to_string().contains("too small"));
        }
        assert!(validate_video_file(Some(&candidate("a.mp4", 1024, "video/mp4"))).is_ok());
    }

    #[test]
    fn too_large_names_both_sizes() {
        assert!(validate_video_file(Some(&candidate("a.mp4", MAX_FILE_SIZE, "video/mp4"))).is_ok());
        let err = validate_video_file(Some(&candidate("a.mp4", 600 * MIB, "video/mp4")))
            .unwrap_err();
        assert_eq!(err, Rejection::TooLarge { size: 600 * MIB });
        assert_eq!(
            err.to_string(),
            "File size (600 MB) exceeds maximum limit of 500 MB"
        );
        let err = validate_video_file(Some(&candidate("a.mp4", MAX_FILE_SIZE + 1, "video/mp4")))
            .unwrap_err();
        assert!(err.to_string().contains("500 MB"));
    }

    #[test]
    fn type_outside_allow_list_fails_regardless_of_extension() {
        for t in ["video/quicktime", "image/png", "", "VIDEO/MP4", "video/x-msvideo"] {
            let err = validate_video_file(Some(&candidate("clip.mp4", 2 * MIB, t))).unwrap_err();
            assert_eq!(err, Rejection::InvalidType(t.to_string()));
        }
    }

    #[test]
    fn extension_checked_independently_of_type() {
        let err = validate_video_file(Some(&candidate("clip.mkv", 2 * MIB, "video/mp4")))
            .unwrap_err();
        assert_eq!(err, Rejection::InvalidExtension(".mkv".to_string()));
        let err = validate_video_file(Some(&candidate("clip", 2 * MIB, "video/mp4"))).unwrap_err();
        assert_eq!(err, Rejection::InvalidExtension(".clip".to_string()));
        // A mismatched but allow-listed pair passes both checks.
        assert!(validate_video_file(Some(&candidate("clip.webm", 2 * MIB, "video/mp4"))).is_ok());
    }

    #[test]
    fn blank_name() {
        assert!(validate_video_file(Some(&candidate("   .mp4", 2 * MIB, "video/mp4"))).is_ok());
        let err = validate_video_file(Some(&candidate("  ", 2 * MIB, "video/mp4"))).unwrap_err();
        assert_eq!(err, Rejection::InvalidExtension(".  ".to_string()));
    }

    #[test]
    fn forbidden_characters() {
        for c in INVALID_NAME_CHARS {
            let name = format!("my{c}clip.mp4");
            let err = validate_video_file(Some(&candidate(&name, 2 * MIB, "video/mp4"))).unwrap_err();
            assert_eq!(err, Rejection::InvalidCharacters, "{name}");
        }
    }

    #[test]
    fn extension_helpers() {
        assert_eq!(file_extension("a.b.MOV"), ".mov");
        assert_eq!(file_extension("noext"), ".noext");
        assert_eq!(content_type_for("trip.WebM"), "video/webm");
        assert_eq!(content_type_for("trip.mkv"), UNKNOWN_CONTENT_TYPE);
    }

    #[test]
    fn media_verdicts() {
        assert_eq!(check_media(&media(None, 640, 360), MIB), Err(Rejection::InvalidVideo));
        assert_eq!(check_media(&media(Some(0.0), 640, 360), MIB), Err(Rejection::InvalidVideo));
        assert_eq!(
            check_media(&media(Some(f64::INFINITY), 640, 360), MIB),
            Err(Rejection::InvalidVideo)
        );
        assert_eq!(check_media(&media(Some(3.0), 0, 360), MIB), Err(Rejection::Corrupted));
        assert_eq!(check_media(&media(Some(3.0), 640, 0), MIB), Err(Rejection::Corrupted));
        assert_eq!(check_media(&media(Some(3.0), 640, 360), MIB), Ok(None));
    }

    #[test]
    fn large_file_warning_boundary() {
        let info = media(Some(60.0), 1920, 1080);
        assert_eq!(check_media(&info, 100 * MIB), Ok(None));
        assert_eq!(check_media(&info, 100 * MIB + 1), Ok(Some(Warning::LargeFile)));
        assert_eq!(
            Warning::LargeFile.to_string(),
            "Large file detected. Upload may take longer than usual."
        );
    }
}
