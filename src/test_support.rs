//! Stub collaborators and synthetic images for unit tests.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat};
use image_guard_core::collaborators::{
    Collaborators, Describer, Embedder, RiskAnalyzer, SuggestionRefiner,
};
use image_guard_core::models::{AnalysisResult, ImagePayload, ImageRef, Scores};
use image_guard_core::{GuardError, Result};

/// Encode a 64×64 grayscale image as PNG.
pub fn png(f: impl Fn(u32, u32) -> u8) -> Vec<u8> {
    let img = GrayImage::from_fn(64, 64, |x, y| image::Luma([f(x, y)]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Brightness rising left to right: every fingerprint bit is 0.
pub fn ramp_png() -> Vec<u8> {
    png(|x, _| (x * 4) as u8)
}

/// Brightness falling left to right: every fingerprint bit is 1.
pub fn reverse_ramp_png() -> Vec<u8> {
    png(|x, _| 255 - (x * 4) as u8)
}

pub fn inline(bytes: Vec<u8>) -> ImageRef {
    ImageRef::inline("image/png", bytes)
}

pub fn result_with_total(id: &str, total: f64, fingerprint_match: bool) -> AnalysisResult {
    let mut result = AnalysisResult::zero(id, fingerprint_match);
    result.is_match = total > 0.0;
    result.scores = Scores {
        semantic: (total * 0.4).min(40.0),
        structure: (total * 0.4).min(40.0),
        compliance: (total * 0.2).min(20.0),
        total,
    };
    result.analysis_text = format!("stub analysis of {}", id);
    result.modification_suggestion = Some(format!("rework {}", id));
    result
}

/// Captions every image as `caption <id>`, except ids marked as failing.
#[derive(Default)]
pub struct StubDescriber {
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    pub calls: AtomicUsize,
}

impl StubDescriber {
    pub fn set_delay(&self, id: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(id.to_string(), delay);
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn caption(id: &str) -> String {
        format!("caption {}", id)
    }
}

#[async_trait]
impl Describer for StubDescriber {
    async fn describe(&self, image: &ImagePayload) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(&image.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&image.id) {
            return Err(GuardError::Indexing(format!("no caption for {}", image.id)));
        }
        Ok(Self::caption(&image.id))
    }
}

/// Looks vectors up by caption text, falling back to a default vector.
pub struct StubEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    default: Vec<f32>,
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self {
            vectors: Mutex::new(HashMap::new()),
            default: vec![1.0, 0.0, 0.0],
        }
    }
}

impl StubEmbedder {
    pub fn set(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.vectors.lock().unwrap().insert(text.into(), vector);
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .vectors
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

/// Per-candidate scripted risk analysis.
#[derive(Default)]
pub struct StubAnalyzer {
    totals: Mutex<HashMap<String, f64>>,
    delays: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
    seen: Mutex<Vec<String>>,
}

impl StubAnalyzer {
    pub fn set_total(&self, id: &str, total: f64) {
        self.totals.lock().unwrap().insert(id.to_string(), total);
    }

    pub fn set_delay(&self, id: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(id.to_string(), delay);
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    /// Candidate ids analysed so far, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RiskAnalyzer for StubAnalyzer {
    async fn analyze_risk(
        &self,
        _query: &ImagePayload,
        candidate: &ImagePayload,
        fingerprint_match: bool,
    ) -> Result<AnalysisResult> {
        self.seen.lock().unwrap().push(candidate.id.clone());
        let delay = self.delays.lock().unwrap().get(&candidate.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&candidate.id) {
            return Err(GuardError::AnalysisService("stub failure".into()));
        }
        let total = self
            .totals
            .lock()
            .unwrap()
            .get(&candidate.id)
            .copied()
            .unwrap_or(0.0);
        Ok(result_with_total(&candidate.id, total, fingerprint_match))
    }
}

#[derive(Default)]
pub struct StubRefiner {
    pub failing: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl SuggestionRefiner for StubRefiner {
    async fn refine(&self, suggestion: &str) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GuardError::AnalysisService("refiner down".into()));
        }
        Ok(format!("[Subject] {}", suggestion))
    }
}

/// Handles to every stub plus the collaborator set built from them.
pub struct Stubs {
    pub describer: Arc<StubDescriber>,
    pub embedder: Arc<StubEmbedder>,
    pub analyzer: Arc<StubAnalyzer>,
    pub refiner: Arc<StubRefiner>,
}

impl Stubs {
    pub fn new() -> Self {
        Self {
            describer: Arc::new(StubDescriber::default()),
            embedder: Arc::new(StubEmbedder::default()),
            analyzer: Arc::new(StubAnalyzer::default()),
            refiner: Arc::new(StubRefiner::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            describer: self.describer.clone(),
            embedder: self.embedder.clone(),
            analyzer: self.analyzer.clone(),
            refiner: self.refiner.clone(),
        }
    }
}
