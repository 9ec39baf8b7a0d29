//! Harvester engine: network, discovery, extraction and persistence for workflow harvesting.
mod decode;
mod discover;
mod download;
mod engine;
mod extract;
mod fetch;
mod filename;
mod links;
mod pacing;
mod persist;
mod retry;
mod types;

pub use decode::{decode_text, DecodeError, DecodedText};
pub use discover::{
    ContentDiscoverer, ContentEntry, DiscoveryError, DiscoveryItem, DiscoveryOptions,
    DiscoveryStream, EntryType, TreeLister, DEFAULT_API_BASE,
};
pub use download::{derive_download_name, DownloadedFile, Downloader, DEFAULT_DOWNLOAD_EXTENSION};
pub use engine::{HarvestError, HarvestOptions, HarvestSettings, Harvester, MAX_CONCURRENCY};
pub use extract::{
    decode_base64_json, decode_json, find_payload, read_text_fields, Extraction,
    MetadataExtractor, PayloadDecoder, TextField, DEFAULT_DECODERS, WORKFLOW_KEYS,
};
pub use fetch::{
    FetchRequest, FetchSettings, Fetcher, NoopProgressSink, ProgressSink, ReqwestFetcher,
};
pub use filename::{
    disambiguated_filename, document_filename, sanitize_component, workflow_filename,
};
pub use links::{is_image_url, resolve_url, LinkScanner, PageLinks};
pub use pacing::{Pacer, Politeness};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError, PersistOutcome, Persister};
pub use retry::RetryPolicy;
pub use types::{
    CandidateOutcome, FailureKind, FetchError, FetchResult, HarvestEvent, TransferProgress,
};
