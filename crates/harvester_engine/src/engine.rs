//! Run orchestration: discovery -> fetch -> extract -> persist for one source.
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{FutureExt, StreamExt};
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use harvester_core::{
    normalize_source, Candidate, FileTypeFilter, InvalidSourceError, MediaHint, RunReport, Source,
    SourceKind, Stage, WorkflowDocument,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::decode::decode_text;
use crate::discover::{ContentDiscoverer, DiscoveryError, DiscoveryItem, DiscoveryOptions};
use crate::extract::{Extraction, MetadataExtractor};
use crate::fetch::{FetchRequest, FetchSettings, Fetcher, ProgressSink, ReqwestFetcher};
use crate::filename::sanitize_component;
use crate::pacing::{Pacer, Politeness};
use crate::persist::{ensure_output_dir, AtomicFileWriter, PersistError, PersistOutcome, Persister};
use crate::retry::RetryPolicy;
use crate::{CandidateOutcome, FetchError, HarvestEvent, DEFAULT_API_BASE};

/// Upper bound on concurrently processed candidates.
pub const MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub fetch: FetchSettings,
    pub retry: RetryPolicy,
    pub politeness: Politeness,
    /// Base URL of the hosting API's REST endpoints.
    pub api_base: String,
    /// Candidates processed at once; clamped to `1..=MAX_CONCURRENCY`.
    pub concurrency: usize,
    /// Appended to an image's stem to name the extracted workflow.
    pub image_suffix: String,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            fetch: FetchSettings::default(),
            retry: RetryPolicy::default(),
            politeness: Politeness::default(),
            api_base: DEFAULT_API_BASE.to_string(),
            concurrency: 1,
            image_suffix: "_workflow".to_string(),
        }
    }
}

/// Per-run choices, typically straight from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestOptions {
    pub output_dir: PathBuf,
    pub file_type: FileTypeFilter,
    pub recursive: bool,
    /// Bearer token for the hosting API and its raw downloads.
    pub auth: Option<String>,
    /// When set, fetched images are kept here as well.
    pub image_dir: Option<PathBuf>,
}

impl HarvestOptions {
    pub fn new(output_dir: impl Into<PathBuf>, file_type: FileTypeFilter) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_type,
            recursive: true,
            auth: None,
            image_dir: None,
        }
    }
}

/// Failures that stop a run before any candidate is processed.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error(transparent)]
    InvalidSource(#[from] InvalidSourceError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("output directory {path}: {source}")]
    OutputDir {
        path: String,
        #[source]
        source: PersistError,
    },
    #[error("invalid API base URL `{0}`")]
    ApiBase(String),
}

pub struct Harvester {
    fetcher: Arc<dyn Fetcher>,
    settings: HarvestSettings,
}

impl Harvester {
    pub fn new(settings: HarvestSettings) -> Result<Self, FetchError> {
        let fetcher = ReqwestFetcher::new(settings.fetch.clone())?;
        Ok(Self::with_fetcher(Arc::new(fetcher), settings))
    }

    pub fn with_fetcher(fetcher: Arc<dyn Fetcher>, settings: HarvestSettings) -> Self {
        Self { fetcher, settings }
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    /// Normalize `raw_origin` and run over it.
    pub async fn harvest(
        &self,
        raw_origin: &str,
        options: &HarvestOptions,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunReport, HarvestError> {
        let source = normalize_source(raw_origin)?;
        self.run(&source, options, sink, cancel).await
    }

    /// Drive one full run. Per-candidate failures land in the report; only a
    /// source whose root cannot be read fails the run.
    pub async fn run(
        &self,
        source: &Source,
        options: &HarvestOptions,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunReport, HarvestError> {
        harvest_info!("Downloading from: {}", source.label());
        harvest_info!("Saving to: {}", options.output_dir.display());
        harvest_info!("File type: {}", options.file_type);

        ensure_output_dir(&options.output_dir).map_err(|source| HarvestError::OutputDir {
            path: options.output_dir.display().to_string(),
            source,
        })?;
        let api_base = Url::parse(&self.settings.api_base)
            .map_err(|_| HarvestError::ApiBase(self.settings.api_base.clone()))?;

        let pacer = Arc::new(Pacer::new());
        let discoverer = ContentDiscoverer::new(self.fetcher.clone(), api_base)
            .with_auth(options.auth.clone())
            .with_retry(self.settings.retry.clone())
            .with_politeness(self.settings.politeness.clone(), pacer.clone());
        let discovery = DiscoveryOptions {
            filter: options.file_type,
            recursive: options.recursive,
        };
        let items = discoverer.discover(source, &discovery).await?;

        let is_web_page = source.kind() == SourceKind::WebPage;
        let pipeline = CandidatePipeline {
            fetcher: self.fetcher.as_ref(),
            retry: &self.settings.retry,
            extractor: MetadataExtractor::new(self.settings.image_suffix.clone()),
            persister: Persister::new(options.output_dir.clone()),
            image_writer: options.image_dir.clone().map(AtomicFileWriter::new),
            filter: options.file_type,
            // Credentials only go to the hosting service, never to arbitrary pages.
            auth: match source.kind() {
                SourceKind::HostedTree => options.auth.clone(),
                _ => None,
            },
            pacing: is_web_page.then(|| (pacer.clone(), self.settings.politeness.page_delay)),
            sink,
        };

        let concurrency = self.settings.concurrency.clamp(1, MAX_CONCURRENCY);
        // No candidate starts once the token fires.
        let gate = cancel.clone();
        let mut outcomes = items
            .take_while(move |_| std::future::ready(!gate.is_cancelled()))
            .map(|item| pipeline.process(item))
            .buffer_unordered(concurrency);

        let mut report = RunReport::new();
        loop {
            if cancel.is_cancelled() {
                harvest_warn!("Run cancelled; stopping at candidate boundary");
                // Work that already finished (and may have written a file) is still counted.
                while let Some(Some(outcome)) = outcomes.next().now_or_never() {
                    record(&mut report, sink, outcome);
                }
                break;
            }
            let Some(outcome) = outcomes.next().await else {
                break;
            };
            record(&mut report, sink, outcome);
        }
        // The gated stream may also end on its own once the token fires.
        if cancel.is_cancelled() {
            report.mark_cancelled();
        }

        harvest_info!("Crawling complete. {}", report.summary_line());
        Ok(report)
    }
}

enum ItemOutcome {
    Candidate {
        location: String,
        outcome: CandidateOutcome,
    },
    LocationFailed {
        location: String,
        reason: String,
    },
}

/// The only place a run's report is mutated.
fn record(report: &mut RunReport, sink: &dyn ProgressSink, outcome: ItemOutcome) {
    match outcome {
        ItemOutcome::LocationFailed { location, reason } => {
            harvest_warn!("Could not enumerate {}: {}", location, reason);
            report.record_subtree_failure(location.clone(), reason.clone());
            sink.emit(HarvestEvent::LocationFailed { location, reason });
        }
        ItemOutcome::Candidate { location, outcome } => {
            match &outcome {
                CandidateOutcome::Ineligible => {
                    harvest_debug!("Not eligible: {}", location);
                    report.record_ineligible();
                }
                CandidateOutcome::Persisted(path) => {
                    harvest_info!("Saved: {}", path.display());
                    report.record_persisted();
                }
                CandidateOutcome::SkippedExisting(path) => {
                    harvest_info!("File already exists: {}", path.display());
                    report.record_skipped();
                }
                CandidateOutcome::Failed { stage, reason } => {
                    harvest_warn!("{} failed while {}: {}", location, stage, reason);
                    report.record_failure(location.clone(), *stage, reason.clone());
                }
            }
            sink.emit(HarvestEvent::CandidateFinished { location, outcome });
        }
    }
}

struct CandidatePipeline<'a> {
    fetcher: &'a dyn Fetcher,
    retry: &'a RetryPolicy,
    extractor: MetadataExtractor,
    persister: Persister,
    image_writer: Option<AtomicFileWriter>,
    filter: FileTypeFilter,
    auth: Option<String>,
    pacing: Option<(Arc<Pacer>, std::time::Duration)>,
    sink: &'a dyn ProgressSink,
}

impl CandidatePipeline<'_> {
    async fn process(&self, item: DiscoveryItem) -> ItemOutcome {
        match item {
            DiscoveryItem::LocationFailed { location, reason } => {
                ItemOutcome::LocationFailed { location, reason }
            }
            DiscoveryItem::Candidate(candidate) => {
                let location = candidate.location().to_string();
                let outcome = self.process_candidate(candidate).await;
                ItemOutcome::Candidate { location, outcome }
            }
        }
    }

    async fn process_candidate(&self, candidate: Candidate) -> CandidateOutcome {
        if !self.filter.accepts(candidate.media()) {
            return CandidateOutcome::Ineligible;
        }

        let bytes = match self.load(&candidate).await {
            Ok(bytes) => bytes,
            Err(reason) => {
                return CandidateOutcome::Failed {
                    stage: Stage::Downloading,
                    reason,
                }
            }
        };

        let document = match candidate.media() {
            MediaHint::Json => match parse_json(&bytes) {
                Ok(content) => WorkflowDocument::passthrough(candidate, content),
                Err(reason) => {
                    return CandidateOutcome::Failed {
                        stage: Stage::Extracting,
                        reason,
                    }
                }
            },
            MediaHint::Image | MediaHint::Unknown => {
                self.retain_image(&candidate, &bytes);
                match self.extract(candidate, bytes).await {
                    Extraction::Found(doc) => doc,
                    miss => {
                        return CandidateOutcome::Failed {
                            stage: Stage::Extracting,
                            reason: miss.failure_reason().unwrap_or_default(),
                        }
                    }
                }
            }
        };

        match self.persister.persist(&document) {
            Ok(PersistOutcome::Written(path)) => CandidateOutcome::Persisted(path),
            Ok(PersistOutcome::Skipped(path)) => CandidateOutcome::SkippedExisting(path),
            Err(err) => CandidateOutcome::Failed {
                stage: Stage::Writing,
                reason: err.to_string(),
            },
        }
    }

    async fn load(&self, candidate: &Candidate) -> Result<Vec<u8>, String> {
        if candidate.is_local() {
            let path = candidate
                .location()
                .to_file_path()
                .map_err(|_| format!("{} is not a local path", candidate.location()))?;
            return tokio::fs::read(&path)
                .await
                .map_err(|err| format!("cannot read {}: {}", path.display(), err));
        }

        if let Some((pacer, interval)) = &self.pacing {
            pacer.wait(*interval).await;
        }
        harvest_info!("Downloading file: {}", candidate.name());
        let request = FetchRequest::get(candidate.location().clone())
            .bearer(self.auth.as_deref())
            .streaming(true);
        let fetcher = self.fetcher;
        let sink = self.sink;
        self.retry
            .run(candidate.name(), || fetcher.fetch(&request, sink))
            .await
            .map(|result| result.bytes)
            .map_err(|err| err.to_string())
    }

    /// Image decoding is CPU-bound, so it runs on the blocking pool.
    async fn extract(&self, candidate: Candidate, bytes: Vec<u8>) -> Extraction {
        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&candidate, &bytes))
            .await
            .unwrap_or_else(|err| Extraction::Unreadable {
                reason: format!("metadata extraction aborted: {err}"),
            })
    }

    fn retain_image(&self, candidate: &Candidate, bytes: &[u8]) {
        let Some(writer) = &self.image_writer else {
            return;
        };
        if candidate.is_local() {
            return;
        }
        match writer.write_new(&sanitize_component(candidate.name()), bytes) {
            Ok(PersistOutcome::Written(path)) => harvest_debug!("Kept image {}", path.display()),
            Ok(PersistOutcome::Skipped(_)) => {}
            Err(err) => harvest_warn!("Could not keep image {}: {}", candidate.name(), err),
        }
    }
}

fn parse_json(bytes: &[u8]) -> Result<serde_json::Value, String> {
    let text = decode_text(bytes, None).map_err(|err| err.to_string())?;
    serde_json::from_str(&text.text).map_err(|err| format!("invalid JSON: {err}"))
}
