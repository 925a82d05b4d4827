//! Status events reported through an optional callback. The library never writes
//! to the console itself; the CLI renders these as progress bars and status lines.

use std::fmt;
use std::path::PathBuf;

/// Callback receiving pipeline events.
pub type Reporter<'a> = Option<&'a dyn Fn(&Event)>;

/// Send `event` to `reporter` if one is set.
pub fn emit(reporter: Reporter<'_>, event: Event) {
    if let Some(cb) = reporter {
        cb(&event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Info,
    Catalog,
    Download,
    Extract,
    Decrypt,
    Assemble,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Info => "Fetching book info",
            Stage::Catalog => "Fetching catalog",
            Stage::Download => "Downloading archive",
            Stage::Extract => "Extracting archive",
            Stage::Decrypt => "Decrypting chapters",
            Stage::Assemble => "Assembling output",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Only merged text honors a start chapter; `output` names the format that ignored it.
    StartIgnored { id: String, output: &'static str },
    /// Non-UTF-8 output goes through a transcoder per file.
    SlowEncoding { encoding: String },
    /// woff2 is legal in EPUB 3 but not every reader supports it.
    Woff2Font { path: PathBuf },
    UnknownFontType { path: PathBuf },
    /// Resource name starts with neither `font` nor `css`.
    UnknownResource { name: String },
    CoverUnavailable { reason: String },
    CleanupFailed { path: PathBuf, reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::StartIgnored { id, output } => write!(
                f,
                "Start chapter {} ignored: {} output always holds every chapter.",
                id, output
            ),
            Warning::SlowEncoding { encoding } => write!(
                f,
                "Encoding {} is not UTF-8; writing chapters will be slower.",
                encoding
            ),
            Warning::Woff2Font { path } => write!(
                f,
                "Font {}: woff2 is part of EPUB 3 but some readers do not support it.",
                path.display()
            ),
            Warning::UnknownFontType { path } => write!(
                f,
                "Font {}: unknown font format, readers may not recognize it.",
                path.display()
            ),
            Warning::UnknownResource { name } => write!(
                f,
                "Resource '{}' ignored: names must start with 'font' or 'css'.",
                name
            ),
            Warning::CoverUnavailable { reason } => {
                write!(f, "Cover image could not be fetched: {}. Continuing without it.", reason)
            }
            Warning::CleanupFailed { path, reason } => {
                write!(f, "Could not remove {}: {}", path.display(), reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StageStarted(Stage),
    StageFinished(Stage),
    Download { bytes: u64, total: Option<u64> },
    Decrypt { done: usize, total: usize },
    Assemble { done: usize, total: usize },
    Warning(Warning),
    /// Final summary: chapter count, artifact path, start chapter if one was applied.
    Finished {
        chapters: usize,
        path: PathBuf,
        start: Option<String>,
    },
}
