mod common;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{init_logging, png_with_text, test_settings, TestSink};
use harvester_core::{FileTypeFilter, Stage};
use harvester_engine::{
    CandidateOutcome, HarvestError, HarvestEvent, HarvestOptions, HarvestSettings, Harvester,
    NoopProgressSink, ProgressSink,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPO: &str = "https://github.com/owner/repo/tree/main/flows";

async fn mount(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

fn file_entry(server: &MockServer, path: &str) -> serde_json::Value {
    let name = path.rsplit('/').next().unwrap();
    json!({
        "name": name,
        "path": path,
        "type": "file",
        "download_url": format!("{}/raw/{}", server.uri(), path),
    })
}

/// Name of the single output file starting with `prefix`.
fn saved_with_prefix(dir: &std::path::Path, prefix: &str) -> String {
    let matching: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(prefix))
        .collect();
    assert_eq!(matching.len(), 1, "{matching:?}");
    matching[0].clone()
}

async fn mount_repository(server: &MockServer) {
    mount(
        server,
        "/repos/owner/repo/contents/flows",
        ResponseTemplate::new(200).set_body_json(json!([
            file_entry(server, "flows/txt2img.json"),
            file_entry(server, "flows/preview.png"),
            file_entry(server, "flows/broken.json"),
            {"name": "more", "path": "flows/more", "type": "dir", "download_url": null},
            {"name": "private", "path": "flows/private", "type": "dir", "download_url": null},
        ])),
    )
    .await;
    mount(
        server,
        "/repos/owner/repo/contents/flows/more",
        ResponseTemplate::new(200).set_body_json(json!([file_entry(server, "flows/more/upscale.json")])),
    )
    .await;
    mount(
        server,
        "/repos/owner/repo/contents/flows/private",
        ResponseTemplate::new(404),
    )
    .await;
    mount(
        server,
        "/raw/flows/txt2img.json",
        ResponseTemplate::new(200).set_body_string("{\"nodes\":[{\"id\":1}]}"),
    )
    .await;
    mount(
        server,
        "/raw/flows/more/upscale.json",
        ResponseTemplate::new(200).set_body_string("{\"nodes\":[{\"id\":2}]}"),
    )
    .await;
    mount(
        server,
        "/raw/flows/broken.json",
        ResponseTemplate::new(200).set_body_string("{not json"),
    )
    .await;
    mount(
        server,
        "/raw/flows/preview.png",
        ResponseTemplate::new(200)
            .set_body_raw(png_with_text(&[("workflow", "{\"from\":\"png\"}")]), "image/png"),
    )
    .await;
}

fn harvester(server: &MockServer) -> Harvester {
    Harvester::new(test_settings(&server.uri())).unwrap()
}

#[tokio::test]
async fn json_run_over_hosted_tree_persists_and_reports() {
    init_logging();
    let server = MockServer::start().await;
    mount_repository(&server).await;
    let out = TempDir::new().unwrap();
    let options = HarvestOptions::new(out.path(), FileTypeFilter::Json);
    let sink = TestSink::new();

    let report = harvester(&server)
        .harvest(REPO, &options, &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total_candidates_seen, 3);
    assert_eq!(report.total_eligible, 3);
    assert_eq!(report.total_persisted, 2);
    assert_eq!(report.total_skipped_existing, 0);
    assert_eq!(report.total_failed, 1);
    assert_eq!(report.subtree_failures(), 1);
    assert!(!report.cancelled);

    let broken = report
        .errors
        .iter()
        .find(|e| e.location.ends_with("broken.json"))
        .unwrap();
    assert_eq!(broken.stage, Stage::Extracting);

    let written: serde_json::Value =
        serde_json::from_slice(&fs::read(out.path().join("txt2img.json")).unwrap()).unwrap();
    assert_eq!(written, json!({"nodes": [{"id": 1}]}));
    // Nested entries carry a location hash; top-level ones keep the plain name.
    assert!(!out.path().join("upscale.json").exists());
    saved_with_prefix(out.path(), "upscale--");
    assert!(!out.path().join("broken.json").exists());

    let finished = sink
        .take()
        .into_iter()
        .filter(|e| matches!(e, HarvestEvent::CandidateFinished { .. }))
        .count();
    assert_eq!(finished, 3);
}

#[tokio::test]
async fn rerun_skips_existing_outputs_without_touching_them() {
    let server = MockServer::start().await;
    mount_repository(&server).await;
    let out = TempDir::new().unwrap();
    let options = HarvestOptions::new(out.path(), FileTypeFilter::Json);
    let harvester = harvester(&server);
    let cancel = CancellationToken::new();

    harvester
        .harvest(REPO, &options, &NoopProgressSink, &cancel)
        .await
        .unwrap();
    let before = fs::read(out.path().join("txt2img.json")).unwrap();

    let second = harvester
        .harvest(REPO, &options, &NoopProgressSink, &cancel)
        .await
        .unwrap();
    assert_eq!(second.total_persisted, 0);
    assert_eq!(second.total_skipped_existing, 2);
    assert_eq!(fs::read(out.path().join("txt2img.json")).unwrap(), before);
}

#[tokio::test]
async fn image_run_extracts_embedded_workflow() {
    let server = MockServer::start().await;
    mount_repository(&server).await;
    let out = TempDir::new().unwrap();
    let images = TempDir::new().unwrap();
    let mut options = HarvestOptions::new(out.path(), FileTypeFilter::Image);
    options.image_dir = Some(images.path().to_path_buf());

    let report = harvester(&server)
        .harvest(REPO, &options, &NoopProgressSink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total_persisted, 1);
    let written: serde_json::Value =
        serde_json::from_slice(&fs::read(out.path().join("preview_workflow.json")).unwrap())
            .unwrap();
    assert_eq!(written, json!({"from": "png"}));
    assert!(images.path().join("preview.png").is_file());
}

#[tokio::test]
async fn concurrent_run_reaches_the_same_totals() {
    let server = MockServer::start().await;
    mount_repository(&server).await;
    let out = TempDir::new().unwrap();
    let settings = HarvestSettings {
        concurrency: 4,
        ..test_settings(&server.uri())
    };

    let report = Harvester::new(settings)
        .unwrap()
        .harvest(
            REPO,
            &HarvestOptions::new(out.path(), FileTypeFilter::Json),
            &NoopProgressSink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.total_persisted, 2);
    assert_eq!(report.total_failed, 1);
}

#[tokio::test]
async fn web_page_images_with_and_without_metadata() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/showcase",
        ResponseTemplate::new(200)
            .set_body_raw(r#"<a href="/i/with.png">a</a><a href="/i/plain.png">b</a>"#, "text/html"),
    )
    .await;
    let encoded = STANDARD.encode("{\"prompt\":{}}");
    mount(
        &server,
        "/i/with.png",
        ResponseTemplate::new(200).set_body_raw(png_with_text(&[("workflow", &encoded)]), "image/png"),
    )
    .await;
    mount(
        &server,
        "/i/plain.png",
        ResponseTemplate::new(200).set_body_raw(png_with_text(&[("Title", "x")]), "image/png"),
    )
    .await;
    let out = TempDir::new().unwrap();
    let sink = TestSink::new();

    let report = harvester(&server)
        .harvest(
            &format!("{}/showcase", server.uri()),
            &HarvestOptions::new(out.path(), FileTypeFilter::Image),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.total_candidates_seen, 2);
    assert_eq!(report.total_persisted, 1);
    assert_eq!(report.total_failed, 1);
    assert_eq!(report.errors[0].stage, Stage::Extracting);
    saved_with_prefix(out.path(), "with_workflow--");

    let failed = sink.take().into_iter().any(|event| {
        matches!(
            event,
            HarvestEvent::CandidateFinished {
                outcome: CandidateOutcome::Failed { stage: Stage::Extracting, .. },
                ..
            }
        )
    });
    assert!(failed);
}

#[tokio::test]
async fn json_filter_on_web_page_marks_images_ineligible() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/showcase",
        ResponseTemplate::new(200).set_body_raw(r#"<a href="/i/one.png">a</a>"#, "text/html"),
    )
    .await;
    let out = TempDir::new().unwrap();

    let report = harvester(&server)
        .harvest(
            &format!("{}/showcase", server.uri()),
            &HarvestOptions::new(out.path(), FileTypeFilter::Json),
            &NoopProgressSink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.total_candidates_seen, 1);
    assert_eq!(report.total_eligible, 0);
    assert!(report.is_clean());
}

#[tokio::test]
async fn unreadable_root_fails_the_run() {
    let server = MockServer::start().await;
    let out = TempDir::new().unwrap();
    let err = harvester(&server)
        .harvest(
            REPO,
            &HarvestOptions::new(out.path(), FileTypeFilter::Json),
            &NoopProgressSink,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    match err {
        HarvestError::Discovery(inner) => assert_eq!(inner.status(), Some(404)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn invalid_origin_and_output_dir_fail_early() {
    let out = TempDir::new().unwrap();
    let harvester = Harvester::new(test_settings("http://127.0.0.1:9")).unwrap();
    let cancel = CancellationToken::new();

    let err = harvester
        .harvest(
            "ftp://example.com/flows",
            &HarvestOptions::new(out.path(), FileTypeFilter::Json),
            &NoopProgressSink,
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::InvalidSource(_)));

    let file = out.path().join("occupied");
    fs::write(&file, "x").unwrap();
    let err = harvester
        .harvest(
            "https://example.com/",
            &HarvestOptions::new(&file, FileTypeFilter::Json),
            &NoopProgressSink,
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::OutputDir { .. }));
}

#[tokio::test]
async fn local_directory_run_respects_recursion() {
    let input = TempDir::new().unwrap();
    fs::write(
        input.path().join("a.png"),
        png_with_text(&[("parameters", "{\"steps\":20}")]),
    )
    .unwrap();
    fs::create_dir(input.path().join("nested")).unwrap();
    fs::write(
        input.path().join("nested").join("b.png"),
        png_with_text(&[("workflow", "{\"steps\":30}")]),
    )
    .unwrap();
    fs::write(input.path().join("notes.txt"), "ignore me").unwrap();

    let harvester = Harvester::new(test_settings("http://127.0.0.1:9")).unwrap();
    let cancel = CancellationToken::new();

    let flat_out = TempDir::new().unwrap();
    let mut options = HarvestOptions::new(flat_out.path(), FileTypeFilter::Image);
    options.recursive = false;
    let flat = harvester
        .harvest(input.path().to_str().unwrap(), &options, &NoopProgressSink, &cancel)
        .await
        .unwrap();
    assert_eq!(flat.total_persisted, 1);

    let deep_out = TempDir::new().unwrap();
    let options = HarvestOptions::new(deep_out.path(), FileTypeFilter::Image);
    let deep = harvester
        .harvest(input.path().to_str().unwrap(), &options, &NoopProgressSink, &cancel)
        .await
        .unwrap();
    assert_eq!(deep.total_persisted, 2);
    assert!(deep_out.path().join("a_workflow.json").is_file());
    saved_with_prefix(deep_out.path(), "b_workflow--");
}

#[tokio::test]
async fn cancelled_run_stops_before_processing() {
    let server = MockServer::start().await;
    mount_repository(&server).await;
    let out = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = harvester(&server)
        .harvest(
            REPO,
            &HarvestOptions::new(out.path(), FileTypeFilter::Json),
            &NoopProgressSink,
            &cancel,
        )
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.total_candidates_seen, 0);
    assert!(report.summary_line().ends_with("(cancelled)"));
}

/// Fires the token once the first candidate has finished.
struct CancelAfterFirst {
    cancel: CancellationToken,
    finished: AtomicUsize,
}

impl ProgressSink for CancelAfterFirst {
    fn emit(&self, event: HarvestEvent) {
        if matches!(event, HarvestEvent::CandidateFinished { .. }) {
            self.finished.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
        }
    }
}

#[tokio::test]
async fn cancelled_run_counts_every_file_it_wrote() {
    let server = MockServer::start().await;
    mount_repository(&server).await;
    let out = TempDir::new().unwrap();
    let settings = HarvestSettings {
        concurrency: 4,
        ..test_settings(&server.uri())
    };
    let cancel = CancellationToken::new();
    let sink = CancelAfterFirst {
        cancel: cancel.clone(),
        finished: AtomicUsize::new(0),
    };

    let report = Harvester::new(settings)
        .unwrap()
        .harvest(
            REPO,
            &HarvestOptions::new(out.path(), FileTypeFilter::Json),
            &sink,
            &cancel,
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    let on_disk = fs::read_dir(out.path())
        .unwrap()
        .filter(|entry| {
            entry
                .as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".json")
        })
        .count() as u64;
    assert_eq!(on_disk, report.total_persisted);
    assert_eq!(
        sink.finished.load(Ordering::SeqCst) as u64,
        report.total_candidates_seen
    );
}
