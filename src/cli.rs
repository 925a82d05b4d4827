//! CLI parsing and orchestration. Parses args, runs info -> download -> decrypt -> assemble,
//! renders pipeline events as progress bars, and maps errors to exit codes.

use crate::api::{search_books, ApiError};
use crate::assemble::{OutputEncoding, OutputFormat, Resources};
use crate::config::{self, Config};
use crate::event::{Event, Reporter, Stage};
use crate::pipeline::{Book, DownloadOptions, PipelineError, Settings};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl CliRunError {
    /// 1 for bad input, 2 when content could not be fetched, 3 when it could not be processed.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_)
            | CliRunError::Pipeline(PipelineError::InvalidBookId { .. }) => 1,
            CliRunError::Api(_)
            | CliRunError::Pipeline(PipelineError::Api(_))
            | CliRunError::Pipeline(PipelineError::Acquisition(_)) => 2,
            CliRunError::Pipeline(_) => 3,
        }
    }
}

/// Messages of every error below `e` in its `source()` chain, outermost first.
pub fn causes(e: &dyn std::error::Error) -> Vec<String> {
    let mut chain = Vec::new();
    let mut source = e.source();
    while let Some(s) = source {
        chain.push(s.to_string());
        source = s.source();
    }
    chain
}

#[derive(Parser, Debug)]
#[command(name = "qimao-dl")]
#[command(about = "Download a Qimao book and write it as text, per-chapter text, or EPUB")]
#[command(
    after_help = "Config file: ./qimao-dl.toml, else <config dir>/qimao-dl/config.toml. Keys: output_dir, format, encoding, timeout_secs, stream_timeout_secs, proxy, chunk_size, chunk_delay_ms, signing_key, app_versions, application_id, cipher_key_hex, provenance. CLI flags override config."
)]
pub struct Args {
    /// Book id, or a search keyword with --search.
    pub target: String,

    /// Output directory. Default: config output_dir, else the current directory.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Output format: txt (merged), chapters (one file per chapter), or epub.
    #[arg(long, value_parser = parse_format)]
    pub format: Option<OutputFormat>,

    /// Text encoding for txt and chapters output (e.g. utf-8, gbk, gb18030).
    #[arg(long)]
    pub encoding: Option<String>,

    /// Chapter id to start from (txt only; the whole book is still downloaded).
    #[arg(long)]
    pub start: Option<String>,

    /// Font file to embed in EPUB output (repeatable).
    #[arg(long)]
    pub font: Vec<PathBuf>,

    /// Stylesheet to embed in EPUB output (repeatable).
    #[arg(long)]
    pub css: Vec<PathBuf>,

    /// Named EPUB resource; NAME must start with 'font' or 'css' (repeatable).
    #[arg(long, value_name = "NAME=PATH", value_parser = parse_resource)]
    pub resource: Vec<(String, PathBuf)>,

    /// Proxy URL for all requests (overrides config).
    #[arg(long)]
    pub proxy: Option<String>,

    /// Request timeout in seconds (overrides config; default 12).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Treat TARGET as a keyword and print matching books (id, title, author, words).
    #[arg(long)]
    pub search: bool,

    /// Fetch info and catalog, print chapter count and output path without writing.
    #[arg(long)]
    pub dry_run: bool,

    /// Suppress progress output (errors and warnings only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Print verbose error chain.
    #[arg(long)]
    pub verbose: bool,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    match s.to_lowercase().as_str() {
        "txt" | "text" => Ok(OutputFormat::MergedText),
        "chapters" => Ok(OutputFormat::ChapteredText),
        "epub" => Ok(OutputFormat::Epub),
        _ => Err(format!(
            "Invalid --format value: '{}'. Use txt, chapters, or epub.",
            s
        )),
    }
}

fn parse_resource(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s.split_once('=').ok_or_else(|| {
        format!(
            "Invalid --resource: expected 'NAME=PATH' (e.g. font_main=fonts/a.ttf), got '{}'",
            s
        )
    })?;
    let name = name.trim();
    let path = path.trim();
    if name.is_empty() || path.is_empty() {
        return Err(format!(
            "Invalid --resource: both NAME and PATH are required, got '{}'",
            s
        ));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

/// Book ids are decimal digits.
fn validate_book_id(input: &str) -> Result<&str, CliRunError> {
    let id = input.trim();
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CliRunError::InvalidInput(format!(
            "Expected a numeric book id (e.g. 1784910), got '{}'. Use --search to look up a title.",
            input
        )));
    }
    Ok(id)
}

/// Gather --font, --css and --resource into named pairs; every file must exist.
fn resource_pairs(args: &Args) -> Result<Vec<(String, PathBuf)>, CliRunError> {
    let mut named: Vec<(String, PathBuf)> = Vec::new();
    for (i, path) in args.font.iter().enumerate() {
        named.push((format!("font{}", i), path.clone()));
    }
    for (i, path) in args.css.iter().enumerate() {
        named.push((format!("css{}", i), path.clone()));
    }
    named.extend(args.resource.iter().cloned());
    if let Some((_, missing)) = named.iter().find(|(_, p)| !p.is_file()) {
        return Err(CliRunError::InvalidInput(format!(
            "Resource file not found: {}",
            missing.display()
        )));
    }
    Ok(named)
}

fn effective_format(args: &Args, config: &Config) -> Result<OutputFormat, CliRunError> {
    match (args.format, config.format.as_deref()) {
        (Some(f), _) => Ok(f),
        (None, Some(s)) => parse_format(s).map_err(CliRunError::InvalidInput),
        (None, None) => Ok(OutputFormat::MergedText),
    }
}

fn effective_encoding(args: &Args, config: &Config) -> Result<OutputEncoding, CliRunError> {
    match args.encoding.as_deref().or(config.encoding.as_deref()) {
        Some(label) => {
            OutputEncoding::for_label(label).map_err(|e| CliRunError::InvalidInput(e.to_string()))
        }
        None => Ok(OutputEncoding::utf8()),
    }
}

/// Renders events on stderr: stage lines, one progress bar per stage, warnings.
struct Console {
    quiet: bool,
    stage: Cell<Option<Stage>>,
    bar: RefCell<Option<ProgressBar>>,
}

impl Console {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            stage: Cell::new(None),
            bar: RefCell::new(None),
        }
    }

    fn handle(&self, event: &Event) {
        match event {
            Event::Warning(w) => self.println(&format!("Warning: {}", w)),
            _ if self.quiet => {}
            Event::StageStarted(stage) => {
                self.clear();
                self.stage.set(Some(*stage));
                eprintln!("{}...", stage);
            }
            Event::StageFinished(_) => self.clear(),
            Event::Download { bytes, total } => self.progress(
                *bytes,
                *total,
                "{spinner} {msg} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec})",
            ),
            Event::Decrypt { done, total } | Event::Assemble { done, total } => self.progress(
                *done as u64,
                Some(*total as u64),
                "{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})",
            ),
            Event::Finished {
                chapters,
                path,
                start,
            } => {
                self.clear();
                match start {
                    Some(id) => eprintln!(
                        "Wrote {} chapters (from chapter {}) to {}",
                        chapters,
                        id,
                        path.display()
                    ),
                    None => eprintln!("Wrote {} chapters to {}", chapters, path.display()),
                }
            }
        }
    }

    fn progress(&self, pos: u64, len: Option<u64>, template: &str) {
        let mut state = self.bar.borrow_mut();
        let pb = state.get_or_insert_with(|| {
            let bar = match len {
                Some(n) => ProgressBar::new(n),
                None => ProgressBar::new_spinner(),
            };
            let style = ProgressStyle::with_template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ ");
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(80));
            if let Some(stage) = self.stage.get() {
                bar.set_message(stage.to_string());
            }
            bar
        });
        pb.set_position(pos);
    }

    /// Print a line without tearing an active bar.
    fn println(&self, line: &str) {
        match self.bar.borrow().as_ref() {
            Some(pb) => pb.suspend(|| eprintln!("{}", line)),
            None => eprintln!("{}", line),
        }
    }

    fn clear(&self) {
        if let Some(pb) = self.bar.borrow_mut().take() {
            pb.disable_steady_tick();
            pb.finish_and_clear();
        }
    }
}

fn search(keyword: &str, settings: &Settings, quiet: bool) -> Result<(), CliRunError> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(CliRunError::InvalidInput(
            "Search keyword must not be empty.".to_string(),
        ));
    }
    let client = settings.client()?;
    let hits = search_books(&client, &settings.endpoints, keyword)?;
    if hits.is_empty() {
        if !quiet {
            eprintln!("No results for '{}'.", keyword);
        }
        return Ok(());
    }
    for hit in hits {
        println!(
            "{}\t{}\t{}\t{}",
            hit.id, hit.title, hit.author, hit.word_count
        );
    }
    Ok(())
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config()
        .map_err(CliRunError::InvalidInput)?
        .unwrap_or_default();
    let mut settings = config.settings().map_err(CliRunError::InvalidInput)?;
    if let Some(secs) = args.timeout {
        settings.timeout_secs = secs;
    }
    if let Some(proxy) = &args.proxy {
        settings.proxy = Some(proxy.clone());
    }

    if args.search {
        return search(&args.target, &settings, args.quiet);
    }

    let book_id = validate_book_id(&args.target)?;
    let format = effective_format(args, &config)?;
    let encoding = effective_encoding(args, &config)?;
    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let named = resource_pairs(args)?;

    let console = Console::new(args.quiet);
    let on_event = |e: &Event| console.handle(e);
    let reporter: Reporter<'_> = Some(&on_event);

    let resources = match format {
        OutputFormat::Epub => Resources::from_named(named, reporter),
        _ => Resources::default(),
    };

    let mut book = Book::new(book_id, settings)?;
    book.ready(reporter)?;

    if args.dry_run {
        console.clear();
        let chapters = book.catalog().len();
        let output_path = book.output_path(format, &output_dir)?;
        if let Some(info) = book.info() {
            eprintln!("Title: {} ({})", info.title, info.author);
        }
        eprintln!("Chapters: {}", chapters);
        eprintln!("Output: {}", output_path.display());
        return Ok(());
    }

    let options = DownloadOptions {
        output_dir,
        encoding,
        start: args.start.clone(),
        resources,
        reporter,
    };
    let result = book.download(format, &options);
    console.clear();
    result?;

    if !args.quiet {
        if let Some(id) = book.last_chapter_id() {
            eprintln!("Last chapter: {}", id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::AcquisitionError;
    use crate::assemble::AssembleError;

    #[test]
    fn parse_format_all() {
        assert_eq!(parse_format("txt").unwrap(), OutputFormat::MergedText);
        assert_eq!(parse_format("text").unwrap(), OutputFormat::MergedText);
        assert_eq!(parse_format("chapters").unwrap(), OutputFormat::ChapteredText);
        assert_eq!(parse_format("epub").unwrap(), OutputFormat::Epub);
        assert_eq!(parse_format("EPUB").unwrap(), OutputFormat::Epub);
    }

    #[test]
    fn parse_format_invalid() {
        assert!(parse_format("pdf").is_err());
    }

    #[test]
    fn parse_resource_valid() {
        assert_eq!(
            parse_resource("font_main=fonts/a.ttf").unwrap(),
            ("font_main".to_string(), PathBuf::from("fonts/a.ttf"))
        );
        assert_eq!(
            parse_resource(" css = style.css ").unwrap(),
            ("css".to_string(), PathBuf::from("style.css"))
        );
    }

    #[test]
    fn parse_resource_rejects_missing_parts() {
        assert!(parse_resource("font").is_err());
        assert!(parse_resource("=a.ttf").is_err());
        assert!(parse_resource("font=").is_err());
    }

    #[test]
    fn validate_book_id_digits_only() {
        assert_eq!(validate_book_id(" 1784910 ").unwrap(), "1784910");
        assert!(validate_book_id("").is_err());
        assert!(validate_book_id("abc").is_err());
        assert!(validate_book_id("12a").is_err());
    }

    #[test]
    fn args_parse_full_command_line() {
        let args = Args::try_parse_from([
            "qimao-dl",
            "1784910",
            "-o",
            "books",
            "--format",
            "epub",
            "--font",
            "a.ttf",
            "--css",
            "b.css",
            "--resource",
            "font_x=c.otf",
            "--start",
            "7",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.target, "1784910");
        assert_eq!(args.output_dir, Some(PathBuf::from("books")));
        assert_eq!(args.format, Some(OutputFormat::Epub));
        assert_eq!(args.font, vec![PathBuf::from("a.ttf")]);
        assert_eq!(args.css, vec![PathBuf::from("b.css")]);
        assert_eq!(
            args.resource,
            vec![("font_x".to_string(), PathBuf::from("c.otf"))]
        );
        assert_eq!(args.start.as_deref(), Some("7"));
        assert!(args.dry_run);
        assert!(!args.search);
    }

    #[test]
    fn args_reject_bad_format() {
        assert!(Args::try_parse_from(["qimao-dl", "1", "--format", "pdf"]).is_err());
    }

    #[test]
    fn resource_pairs_names_and_checks_files() {
        let tmp = tempfile::tempdir().unwrap();
        let font = tmp.path().join("a.ttf");
        let css = tmp.path().join("b.css");
        std::fs::write(&font, b"f").unwrap();
        std::fs::write(&css, b"c").unwrap();
        let mut args = Args::try_parse_from(["qimao-dl", "1"]).unwrap();
        args.font = vec![font.clone()];
        args.css = vec![css.clone()];
        assert_eq!(
            resource_pairs(&args).unwrap(),
            vec![("font0".to_string(), font), ("css0".to_string(), css)]
        );

        args.resource = vec![("font_b".to_string(), tmp.path().join("absent.ttf"))];
        assert!(matches!(
            resource_pairs(&args),
            Err(CliRunError::InvalidInput(msg)) if msg.contains("absent.ttf")
        ));
    }

    #[test]
    fn format_and_encoding_fall_back_to_config() {
        let args = Args::try_parse_from(["qimao-dl", "1"]).unwrap();
        let config: Config = toml::from_str("format = \"chapters\"\nencoding = \"gbk\"").unwrap();
        assert_eq!(
            effective_format(&args, &config).unwrap(),
            OutputFormat::ChapteredText
        );
        assert_eq!(effective_encoding(&args, &config).unwrap().name(), "GBK");

        let args = Args::try_parse_from(["qimao-dl", "1", "--format", "epub"]).unwrap();
        assert_eq!(effective_format(&args, &config).unwrap(), OutputFormat::Epub);
        assert_eq!(
            effective_format(&args, &Config::default()).unwrap(),
            OutputFormat::Epub
        );
        let args = Args::try_parse_from(["qimao-dl", "1"]).unwrap();
        assert_eq!(
            effective_format(&args, &Config::default()).unwrap(),
            OutputFormat::MergedText
        );
        assert!(effective_encoding(&args, &Config::default()).unwrap().is_utf8());
    }

    #[test]
    fn unknown_encoding_is_invalid_input() {
        let args = Args::try_parse_from(["qimao-dl", "1", "--encoding", "klingon"]).unwrap();
        assert!(matches!(
            effective_encoding(&args, &Config::default()),
            Err(CliRunError::InvalidInput(_))
        ));
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Pipeline(PipelineError::Acquisition(AcquisitionError {
                message: "reset".into()
            }))
            .exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Api(ApiError::Schema {
                endpoint: "x".into(),
                message: "y".into()
            })
            .exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Pipeline(PipelineError::Assemble(AssembleError::EmptyCatalog))
                .exit_code(),
            3
        );
        assert_eq!(
            CliRunError::Pipeline(PipelineError::NotReady {
                book_id: "1".into()
            })
            .exit_code(),
            3
        );
        assert_eq!(
            CliRunError::Pipeline(PipelineError::InvalidBookId {
                book_id: "../x".into()
            })
            .exit_code(),
            1
        );
    }

    #[test]
    fn causes_walk_the_source_chain() {
        assert!(causes(&CliRunError::InvalidInput("x".into())).is_empty());
        let Err(e) = crate::api::ApiClient::builder()
            .proxy("not a url with spaces")
            .build()
        else {
            panic!("proxy should be rejected");
        };
        let chain = causes(&CliRunError::Api(e));
        assert!(!chain.is_empty());
        assert!(chain.iter().all(|c| !c.is_empty()));
    }
}
