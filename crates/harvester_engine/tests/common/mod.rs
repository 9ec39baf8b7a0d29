#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use harvester_core::{Candidate, CandidateKind, Source, SourceLocator};
use harvester_engine::{HarvestEvent, HarvestSettings, Politeness, ProgressSink, RetryPolicy};
use url::Url;

pub fn init_logging() {
    harvest_logging::initialize_for_tests();
}

/// Settings for tests: no politeness pauses, no retries, API pointed at the mock.
pub fn test_settings(api_base: &str) -> HarvestSettings {
    HarvestSettings {
        api_base: api_base.to_string(),
        retry: RetryPolicy::none(),
        politeness: Politeness::disabled(),
        ..HarvestSettings::default()
    }
}

pub fn source(raw: &str) -> Source {
    SourceLocator::new("/").normalize(raw).unwrap()
}

pub fn image_candidate(url: &str) -> Candidate {
    Candidate::new(
        Url::parse(url).unwrap(),
        CandidateKind::DirectLink,
        Arc::new(source("https://example.com/")),
    )
}

/// 1x1 RGBA PNG carrying the given `tEXt` chunks.
pub fn png_with_text(chunks: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, 1, 1);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        for (keyword, text) in chunks {
            encoder
                .add_text_chunk(keyword.to_string(), text.to_string())
                .unwrap();
        }
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0, 0, 0, 255]).unwrap();
    }
    out
}

/// 1x1 RGBA PNG carrying one `iTXt` chunk.
pub fn png_with_itxt(keyword: &str, text: &str) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, 1, 1);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .add_itxt_chunk(keyword.to_string(), text.to_string())
            .unwrap();
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0, 0, 0, 255]).unwrap();
    }
    out
}

/// 1x1 RGBA PNG carrying one compressed `zTXt` chunk.
pub fn png_with_ztxt(keyword: &str, text: &str) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, 1, 1);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .add_ztxt_chunk(keyword.to_string(), text.to_string())
            .unwrap();
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0, 0, 0, 255]).unwrap();
    }
    out
}

/// 1x1 RGBA PNG whose only `tEXt` chunk follows the image data.
pub fn png_with_trailing_text(keyword: &str, text: &str) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, 1, 1);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0, 0, 0, 255]).unwrap();
        writer
            .write_text_chunk(&png::text_metadata::TEXtChunk::new(keyword, text))
            .unwrap();
        writer.finish().unwrap();
    }
    out
}

#[derive(Default)]
pub struct TestSink {
    events: Arc<Mutex<Vec<HarvestEvent>>>,
}

impl TestSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<HarvestEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }
}

impl ProgressSink for TestSink {
    fn emit(&self, event: HarvestEvent) {
        self.events.lock().unwrap().push(event);
    }
}
