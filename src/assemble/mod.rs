//! Assembly of decrypted chapter files into the delivery formats.
//!
//! All strategies share one precondition and one placement rule:
//! - the number of decrypted files must equal the catalog length ([reconcile]);
//! - the provenance block follows the chapter at [midpoint_index].
//!
//! Each format implements [Assembler]; the pipeline picks one by [OutputFormat].

mod chaptered;
mod encoding;
pub mod epub;
mod merged;

pub use chaptered::ChapteredText;
pub use encoding::OutputEncoding;
pub use epub::{CoverImage, EpubBook, Resources};
pub use merged::MergedText;

use crate::event::Reporter;
use crate::model::{BookInfo, CatalogEntry};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the metadata file in chaptered output.
pub const INTRO_FILE_NAME: &str = "简介.txt";

/// Attribution text injected after the midpoint chapter.
pub const DEFAULT_PROVENANCE: &str = "本书由开源免费工具 qimao-dl 下载生成，仅供个人阅读。
如果您是通过付费代下载获得此文件，且卖家未告知工具来源，请立即申请退款。";

/// Delivery format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One `<title>.txt`.
    MergedText,
    /// `<title>/` with an intro file and one file per chapter.
    ChapteredText,
    /// `<title>.epub`.
    Epub,
}

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Chapter count mismatch: catalog has {catalog}, archive has {files}. Working directory kept for inspection.")]
    CountMismatch { catalog: usize, files: usize },

    #[error("Catalog is empty; nothing to assemble.")]
    EmptyCatalog,

    #[error("Start chapter {id} is not in the catalog.")]
    StartChapterNotFound { id: String },

    #[error("Unknown output encoding: {0}")]
    UnknownEncoding(String),

    #[error("Failed to write output: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read resource {path}: {source}")]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to write EPUB entry: {0}")]
    EpubWrite(#[from] std::io::Error),
}

/// What a strategy produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    MergedText {
        path: PathBuf,
        /// Id of the last chapter written.
        last_chapter_id: String,
    },
    ChapteredText {
        dir: PathBuf,
        files: Vec<PathBuf>,
    },
    Epub {
        path: PathBuf,
    },
}

impl Artifact {
    /// File or directory the caller should look at.
    pub fn path(&self) -> &Path {
        match self {
            Artifact::MergedText { path, .. } | Artifact::Epub { path } => path,
            Artifact::ChapteredText { dir, .. } => dir,
        }
    }
}

/// Everything fetched for one book, ready to assemble.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInput<'a> {
    pub info: &'a BookInfo,
    pub catalog: &'a [CatalogEntry],
    /// Decrypted archive members.
    pub files: &'a [PathBuf],
}

/// Options shared by every strategy.
pub struct AssembleOptions<'a> {
    pub output_dir: PathBuf,
    pub encoding: OutputEncoding,
    /// Chapter id to start from (merged text only).
    pub start: Option<String>,
    pub provenance: Provenance,
    pub reporter: Reporter<'a>,
}

impl<'a> AssembleOptions<'a> {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            encoding: OutputEncoding::utf8(),
            start: None,
            provenance: Provenance::default(),
            reporter: None,
        }
    }
}

/// One output format.
pub trait Assembler {
    fn produce(
        &self,
        input: &AssemblyInput<'_>,
        options: &AssembleOptions<'_>,
    ) -> Result<Artifact, AssembleError>;
}

/// Fixed attribution block, rendered as plain text or as paragraphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    lines: Vec<String>,
}

impl Default for Provenance {
    fn default() -> Self {
        Self::new(DEFAULT_PROVENANCE)
    }
}

impl Provenance {
    pub fn new(text: &str) -> Self {
        Self {
            lines: text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    /// Plain-text block, set apart by blank lines.
    pub fn as_text(&self) -> String {
        format!("\n\n\n{}\n\n\n", self.lines.join("\n"))
    }

    /// Paragraph markup, preceded by a line break.
    pub fn as_html(&self) -> String {
        let mut html = String::from("<br/>\n");
        for line in &self.lines {
            html.push_str("<p>");
            html.push_str(&xml_escape(line));
            html.push_str("</p>\n");
        }
        html
    }
}

/// A catalog entry paired with its decrypted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterSource<'a> {
    pub entry: &'a CatalogEntry,
    pub path: &'a Path,
}

/// Pair decrypted files with catalog entries.
///
/// Fails when the counts differ. Files named `<chapter id>.<ext>` are matched by id;
/// otherwise files are paired positionally after a numeric-aware name sort.
pub fn reconcile<'a>(
    catalog: &'a [CatalogEntry],
    files: &'a [PathBuf],
) -> Result<Vec<ChapterSource<'a>>, AssembleError> {
    if catalog.len() != files.len() {
        return Err(AssembleError::CountMismatch {
            catalog: catalog.len(),
            files: files.len(),
        });
    }
    if catalog.is_empty() {
        return Err(AssembleError::EmptyCatalog);
    }

    let by_stem: std::collections::HashMap<&str, &Path> = files
        .iter()
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(|s| (s, p.as_path())))
        .collect();
    let by_id: Option<Vec<ChapterSource<'a>>> = catalog
        .iter()
        .map(|entry| {
            by_stem
                .get(entry.id.as_str())
                .map(|path| ChapterSource { entry, path: *path })
        })
        .collect();
    if let Some(pairs) = by_id {
        return Ok(pairs);
    }

    let mut ordered: Vec<&PathBuf> = files.iter().collect();
    ordered.sort_by_key(|p| {
        let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        (stem.parse::<u64>().ok(), p.file_name().map(|n| n.to_owned()))
    });
    Ok(catalog
        .iter()
        .zip(ordered)
        .map(|(entry, path)| ChapterSource {
            entry,
            path: path.as_path(),
        })
        .collect())
}

/// Index of the chapter followed by the provenance block: midpoint of `start..len`.
pub fn midpoint_index(len: usize, start: usize) -> usize {
    start + (len - start) / 2
}

/// Position of `start` in the catalog, if given.
pub fn start_position(
    catalog: &[CatalogEntry],
    start: Option<&str>,
) -> Result<usize, AssembleError> {
    match start {
        None => Ok(0),
        Some(id) => catalog
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| AssembleError::StartChapterNotFound { id: id.to_string() }),
    }
}

/// Metadata block written at the top of merged text and as the chaptered intro file.
pub fn preamble(info: &BookInfo) -> String {
    format!(
        "名称：{}\n作者：{}\n标签：{}\n简介：{}\n字数：{}\n书籍ID：{}\n",
        info.title,
        info.author,
        info.tags_line(),
        info.intro,
        info.word_count,
        info.book_id
    )
}

pub(crate) fn read_chapter(path: &Path) -> Result<String, AssembleError> {
    std::fs::read_to_string(path).map_err(|e| AssembleError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Select the strategy for `format`. E-book extras (cover, fonts, stylesheets) come in `epub`.
pub fn assembler_for(format: OutputFormat, epub: EpubBook) -> Box<dyn Assembler> {
    match format {
        OutputFormat::MergedText => Box::new(MergedText),
        OutputFormat::ChapteredText => Box::new(ChapteredText),
        OutputFormat::Epub => Box::new(epub),
    }
}
