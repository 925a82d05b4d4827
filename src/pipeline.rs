//! One download session per book: fetch info and catalog, then acquire, decrypt and
//! assemble in a single sequential pass.
//!
//! The working directory is removed after a successful assembly and left in place on
//! any failure, so a count mismatch can be inspected.

use crate::api::{
    fetch_book_info, fetch_catalog, resolve_download_link, ApiClient, ApiError, Endpoints,
    Signer, DEFAULT_STREAM_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS,
};
use crate::archive::{
    archive_path, download_archive, extract_archive, working_dir, AcquisitionError, Throttle,
};
use crate::assemble::{
    assembler_for, start_position, AssembleError, AssembleOptions, Artifact, AssemblyInput,
    CoverImage, EpubBook, OutputEncoding, OutputFormat, Provenance, Resources,
};
use crate::decrypt::{DecryptError, Decryptor};
use crate::event::{emit, Event, Reporter, Stage, Warning};
use crate::model::{BookInfo, CatalogEntry};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid book id '{book_id}': expected digits only.")]
    InvalidBookId { book_id: String },

    #[error("Book {book_id} is not ready: fetch its info and catalog first.")]
    NotReady { book_id: String },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

/// Injected constants and tunables for a session.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoints: Endpoints,
    pub signer: Signer,
    pub decryptor: Decryptor,
    pub throttle: Throttle,
    pub timeout_secs: u64,
    /// Ceiling for the archive transfer; `None` waits indefinitely.
    pub stream_timeout_secs: Option<u64>,
    pub proxy: Option<String>,
    /// Parent of `<book_id>.zip` and the `<book_id>/` working directory.
    pub work_root: PathBuf,
    pub provenance: Provenance,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            signer: Signer::default(),
            decryptor: Decryptor::default(),
            throttle: Throttle::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            stream_timeout_secs: Some(DEFAULT_STREAM_TIMEOUT_SECS),
            proxy: None,
            work_root: std::env::temp_dir().join("qimao-dl"),
            provenance: Provenance::default(),
        }
    }
}

impl Settings {
    /// HTTP client carrying this signer, timeout and proxy.
    pub fn client(&self) -> Result<ApiClient, ApiError> {
        let mut builder = ApiClient::builder()
            .timeout_secs(self.timeout_secs)
            .stream_timeout_secs(self.stream_timeout_secs)
            .signer(self.signer.clone());
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(proxy.clone());
        }
        builder.build()
    }
}

/// Per-download choices.
pub struct DownloadOptions<'a> {
    pub output_dir: PathBuf,
    pub encoding: OutputEncoding,
    /// Merged text starts at this chapter id; other formats warn or ignore it.
    pub start: Option<String>,
    /// Fonts and stylesheets for EPUB output.
    pub resources: Resources,
    pub reporter: Reporter<'a>,
}

impl<'a> DownloadOptions<'a> {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            encoding: OutputEncoding::utf8(),
            start: None,
            resources: Resources::default(),
            reporter: None,
        }
    }
}

/// Session for one book id.
#[derive(Debug)]
pub struct Book {
    book_id: String,
    settings: Settings,
    client: ApiClient,
    info: Option<BookInfo>,
    catalog: Vec<CatalogEntry>,
    last_chapter_id: Option<String>,
}

impl Book {
    /// The id names the working directory, so only ASCII digits are accepted.
    pub fn new(book_id: impl Into<String>, settings: Settings) -> Result<Self, PipelineError> {
        let book_id = book_id.into();
        if book_id.is_empty() || !book_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PipelineError::InvalidBookId { book_id });
        }
        let client = settings.client()?;
        Ok(Self {
            book_id,
            settings,
            client,
            info: None,
            catalog: Vec::new(),
            last_chapter_id: None,
        })
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    /// Fetch detail metadata and the ordered catalog. Required before [Book::download].
    pub fn ready(&mut self, reporter: Reporter<'_>) -> Result<(), PipelineError> {
        emit(reporter, Event::StageStarted(Stage::Info));
        let info = fetch_book_info(&self.client, &self.settings.endpoints, &self.book_id)?;
        emit(reporter, Event::StageFinished(Stage::Info));

        emit(reporter, Event::StageStarted(Stage::Catalog));
        let catalog = fetch_catalog(&self.client, &self.settings.endpoints, &self.book_id)?;
        emit(reporter, Event::StageFinished(Stage::Catalog));

        self.info = Some(info);
        self.catalog = catalog;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.info.is_some()
    }

    pub fn info(&self) -> Option<&BookInfo> {
        self.info.as_ref()
    }

    pub fn catalog(&self) -> &[CatalogEntry] {
        &self.catalog
    }

    /// Id of the last chapter written by the most recent merged-text download.
    pub fn last_chapter_id(&self) -> Option<&str> {
        self.last_chapter_id.as_deref()
    }

    /// Where `format` would be written under `output_dir`.
    pub fn output_path(
        &self,
        format: OutputFormat,
        output_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let info = self.ready_info()?;
        Ok(match format {
            OutputFormat::MergedText => output_dir.join(format!("{}.txt", info.title)),
            OutputFormat::ChapteredText => output_dir.join(&info.title),
            OutputFormat::Epub => output_dir.join(format!("{}.epub", info.title)),
        })
    }

    /// Download, decrypt and assemble the whole book in `format`.
    pub fn download(
        &mut self,
        format: OutputFormat,
        options: &DownloadOptions<'_>,
    ) -> Result<Artifact, PipelineError> {
        let artifact = self.run(format, options)?;
        if let Artifact::MergedText {
            last_chapter_id, ..
        } = &artifact
        {
            self.last_chapter_id = Some(last_chapter_id.clone());
        }
        Ok(artifact)
    }

    fn ready_info(&self) -> Result<&BookInfo, PipelineError> {
        self.info.as_ref().ok_or_else(|| PipelineError::NotReady {
            book_id: self.book_id.clone(),
        })
    }

    fn run(
        &self,
        format: OutputFormat,
        options: &DownloadOptions<'_>,
    ) -> Result<Artifact, PipelineError> {
        let info = self.ready_info()?;
        if self.catalog.is_empty() {
            return Err(AssembleError::EmptyCatalog.into());
        }
        // An unknown start chapter would only surface after the whole download.
        let first = match format {
            OutputFormat::MergedText => start_position(&self.catalog, options.start.as_deref())?,
            _ => 0,
        };
        let reporter = options.reporter;
        let work_root = &self.settings.work_root;
        let workdir = working_dir(work_root, &self.book_id);

        emit(reporter, Event::StageStarted(Stage::Download));
        let link = resolve_download_link(&self.client, &self.settings.endpoints, &self.book_id)?;
        let archive = archive_path(work_root, &self.book_id);
        let on_bytes =
            |bytes: u64, total: Option<u64>| emit(reporter, Event::Download { bytes, total });
        download_archive(
            &self.client,
            &link,
            &archive,
            self.settings.throttle,
            Some(&on_bytes),
        )?;
        emit(reporter, Event::StageFinished(Stage::Download));

        emit(reporter, Event::StageStarted(Stage::Extract));
        let files = extract_archive(&archive, &workdir)?;
        emit(reporter, Event::StageFinished(Stage::Extract));

        emit(reporter, Event::StageStarted(Stage::Decrypt));
        let on_file = |done: usize, total: usize| emit(reporter, Event::Decrypt { done, total });
        self.settings.decryptor.decrypt_all(&files, Some(&on_file))?;
        emit(reporter, Event::StageFinished(Stage::Decrypt));

        let epub = match format {
            OutputFormat::Epub => EpubBook {
                cover: self.fetch_cover(info, reporter),
                resources: options.resources.clone(),
            },
            _ => EpubBook::default(),
        };

        emit(reporter, Event::StageStarted(Stage::Assemble));
        std::fs::create_dir_all(&options.output_dir).map_err(|e| AssembleError::Io {
            path: options.output_dir.clone(),
            source: e,
        })?;
        let assemble_options = AssembleOptions {
            output_dir: options.output_dir.clone(),
            encoding: options.encoding,
            start: options.start.clone(),
            provenance: self.settings.provenance.clone(),
            reporter,
        };
        let input = AssemblyInput {
            info,
            catalog: &self.catalog,
            files: &files,
        };
        let artifact = assembler_for(format, epub).produce(&input, &assemble_options)?;
        emit(reporter, Event::StageFinished(Stage::Assemble));

        remove_working_dir(&workdir, reporter);
        emit(
            reporter,
            Event::Finished {
                chapters: self.catalog.len() - first,
                path: artifact.path().to_path_buf(),
                start: match format {
                    OutputFormat::MergedText => options.start.clone(),
                    _ => None,
                },
            },
        );
        Ok(artifact)
    }

    /// Cover bytes, or None with a warning. A missing cover never fails the run.
    fn fetch_cover(&self, info: &BookInfo, reporter: Reporter<'_>) -> Option<CoverImage> {
        let url = info.cover_url.as_deref()?;
        match self.client.get_bytes(url) {
            Ok(data) => Some(CoverImage::from_bytes(data)),
            Err(e) => {
                emit(
                    reporter,
                    Event::Warning(Warning::CoverUnavailable {
                        reason: e.to_string(),
                    }),
                );
                None
            }
        }
    }
}

fn remove_working_dir(dir: &Path, reporter: Reporter<'_>) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => emit(
            reporter,
            Event::Warning(Warning::CleanupFailed {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            }),
        ),
    }
}
