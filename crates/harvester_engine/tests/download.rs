mod common;

use std::fs;

use common::TestSink;
use harvester_engine::{
    Downloader, FailureKind, FetchSettings, HarvestEvent, NoopProgressSink, ReqwestFetcher,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn downloader(chunk_size: usize) -> Downloader {
    let settings = FetchSettings {
        chunk_size,
        ..FetchSettings::default()
    };
    Downloader::new(ReqwestFetcher::new(settings).unwrap())
}

#[tokio::test]
async fn streams_body_to_named_file_in_chunks() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/models/detail_tweaker.safetensors"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "application/octet-stream"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("loras");
    let sink = TestSink::new();

    let file = downloader(4096)
        .download_to_dir(
            &format!("{}/models/detail_tweaker.safetensors", server.uri()),
            &target,
            None,
            None,
            &sink,
        )
        .await
        .unwrap();

    assert_eq!(file.path, target.join("detail_tweaker.safetensors"));
    assert_eq!(file.bytes_written, 10_000);
    assert_eq!(fs::read(&file.path).unwrap(), body);
    assert!(!target.join("detail_tweaker.safetensors.part").exists());

    let written: Vec<u64> = sink
        .take()
        .into_iter()
        .filter_map(|event| match event {
            HarvestEvent::Transfer(progress) => Some(progress.bytes_so_far),
            _ => None,
        })
        .collect();
    assert_eq!(written, vec![0, 4096, 8192, 10_000]);
}

#[tokio::test]
async fn short_url_names_fall_back_to_timestamp() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/download/42"))
        .respond_with(ResponseTemplate::new(200).set_body_string("weights"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    let file = downloader(1024)
        .download_to_dir(
            &format!("{}/api/download/42", server.uri()),
            dir.path(),
            None,
            None,
            &NoopProgressSink,
        )
        .await
        .unwrap();
    let name = file.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("download_"), "{name}");
    assert!(name.ends_with(".safetensors"), "{name}");

    let named = downloader(1024)
        .download_to_dir(
            &format!("{}/api/download/42", server.uri()),
            dir.path(),
            Some("vae"),
            None,
            &NoopProgressSink,
        )
        .await
        .unwrap();
    assert_eq!(named.path, dir.path().join("vae.safetensors"));
}

#[tokio::test]
async fn failed_download_leaves_nothing_behind() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    let err = downloader(1024)
        .download_to_dir(
            &format!("{}/models/private.safetensors", server.uri()),
            dir.path(),
            None,
            Some("bad-token"),
            &NoopProgressSink,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(401));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn failed_rename_removes_partial_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models/blocked.safetensors"))
        .respond_with(ResponseTemplate::new(200).set_body_string("weights"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    // A non-empty directory squats on the final name, so the rename cannot succeed.
    let squatter = dir.path().join("blocked.safetensors");
    fs::create_dir(&squatter).unwrap();
    fs::write(squatter.join("keep"), "x").unwrap();

    let err = downloader(4)
        .download_to_dir(
            &format!("{}/models/blocked.safetensors", server.uri()),
            dir.path(),
            None,
            None,
            &NoopProgressSink,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Io);
    assert!(!dir.path().join("blocked.safetensors.part").exists());
    assert!(squatter.join("keep").is_file());
}
