//! qimao-dl: CLI downloader for Qimao books. Signs API requests, fetches the encrypted
//! chapter archive, decrypts it, and writes merged text, per-chapter text, or EPUB.

pub mod api;
pub mod archive;
pub mod assemble;
pub mod cli;
pub mod config;
pub mod decrypt;
pub mod event;
pub mod model;
pub mod pipeline;

// Re-exports for CLI and consumers.
pub use api::{
    fetch_book_info, fetch_catalog, resolve_download_link, search_books, ApiClient,
    ApiClientBuilder, ApiError, Endpoints, Signer,
};
pub use archive::{download_archive, extract_archive, AcquisitionError, Throttle};
pub use assemble::{
    Artifact, AssembleError, AssembleOptions, Assembler, OutputEncoding, OutputFormat, Resources,
};
pub use decrypt::{DecryptError, Decryptor};
pub use event::{Event, Reporter, Stage, Warning};
pub use model::{sanitize_name, BookInfo, CatalogEntry, SearchHit};
pub use pipeline::{Book, DownloadOptions, PipelineError, Settings};
