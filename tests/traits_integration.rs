//! Integration tests for custom collaborator implementations.
//!
//! These tests prove that user-supplied `Describer`, `Embedder`,
//! `RiskAnalyzer`, and `SuggestionRefiner` implementations work end-to-end
//! through the indexer, a screening run, and the HTTP API.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use image::{DynamicImage, GrayImage, ImageFormat};
use image_guard::corpus::Corpus;
use image_guard::resolve::HttpResolver;
use image_guard::server::router;
use image_guard::session::{Session, SessionSettings};
use image_guard_core::aggregate::RiskSummary;
use image_guard_core::collaborators::{
    Collaborators, Describer, Embedder, RiskAnalyzer, SuggestionRefiner,
};
use image_guard_core::fingerprint::compute_fingerprint;
use image_guard_core::models::{
    AnalysisResult, CorpusItem, ImagePayload, ImageRef, IndexingStatus, Scores,
};
use image_guard_core::{GuardError, Result};
use serde_json::{json, Value};
use tower::ServiceExt;

// ─── Test images ────────────────────────────────────────────────────

fn png(f: impl Fn(u32, u32) -> u8) -> Vec<u8> {
    let img = GrayImage::from_fn(64, 64, |x, y| image::Luma([f(x, y)]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn ramp() -> Vec<u8> {
    png(|x, _| (x * 4) as u8)
}

fn reverse_ramp() -> Vec<u8> {
    png(|x, _| 255 - (x * 4) as u8)
}

fn inline(bytes: Vec<u8>) -> ImageRef {
    ImageRef::inline("image/png", bytes)
}

fn data_url(bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

// ─── Test collaborators ─────────────────────────────────────────────

/// Captions by image byte length.
struct LengthDescriber;

#[async_trait]
impl Describer for LengthDescriber {
    async fn describe(&self, image: &ImagePayload) -> Result<String> {
        Ok(format!("image of {} bytes", image.bytes.len()))
    }
}

/// Embeds text as a two-dimensional unit vector.
struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.6, 0.8])
    }
}

/// Scores risk from pixel similarity alone: identical images score 96,
/// inverted images score 0.
struct PixelAnalyzer;

#[async_trait]
impl RiskAnalyzer for PixelAnalyzer {
    async fn analyze_risk(
        &self,
        query: &ImagePayload,
        candidate: &ImagePayload,
        fingerprint_match: bool,
    ) -> Result<AnalysisResult> {
        let a = compute_fingerprint(&query.bytes)
            .map_err(|e| GuardError::AnalysisService(e.to_string()))?;
        let b = compute_fingerprint(&candidate.bytes)
            .map_err(|e| GuardError::AnalysisService(e.to_string()))?;
        let total = f64::from(64 - a.distance(&b)) * 1.5;

        let mut result = AnalysisResult::zero(candidate.id.clone(), fingerprint_match);
        result.is_match = total > 0.0;
        result.scores = Scores {
            semantic: total * 0.4,
            structure: total * 0.4,
            compliance: total * 0.2,
            total,
        };
        result.analysis_text = format!("{} differing bits", a.distance(&b));
        result.modification_suggestion = Some("mirror the composition".to_string());
        Ok(result)
    }
}

struct PrefixRefiner;

#[async_trait]
impl SuggestionRefiner for PrefixRefiner {
    async fn refine(&self, suggestion: &str) -> Result<String> {
        Ok(format!("A new illustration: {}", suggestion))
    }
}

fn session() -> Arc<Session> {
    let collaborators = Collaborators {
        describer: Arc::new(LengthDescriber),
        embedder: Arc::new(FixedEmbedder),
        analyzer: Arc::new(PixelAnalyzer),
        refiner: Arc::new(PrefixRefiner),
    };
    Arc::new(Session::new(
        Arc::new(Corpus::new()),
        collaborators,
        Arc::new(HttpResolver::new(Duration::from_secs(5)).unwrap()),
        SessionSettings::default(),
    ))
}

// ─── Session flow ───────────────────────────────────────────────────

#[tokio::test]
async fn test_custom_collaborators_through_a_run() {
    let session = session();
    let ids = session.add_items(vec![
        CorpusItem::new("ramp", inline(ramp())),
        CorpusItem::new("reverse", inline(reverse_ramp())),
    ]);
    let (ramp_id, reverse_id) = (ids[0].clone(), ids[1].clone());

    let indexed = session.indexer().run_until_idle().await;
    assert_eq!(indexed, 2);
    for item in session.list_corpus() {
        assert_eq!(item.status, IndexingStatus::Completed);
        assert!(item.fingerprint.is_some());
        assert!(item.description.unwrap().starts_with("image of "));
        assert_eq!(item.embedding, Some(vec![0.6, 0.8]));
    }

    session.set_query("upload.png", inline(ramp())).await.unwrap();
    let outcome = session.start_run().await.unwrap();

    assert_eq!(outcome.candidates, 2);
    assert_eq!(outcome.report.summary, RiskSummary::HighRisk);
    assert_eq!(outcome.report.max_score, 96.0);
    assert_eq!(outcome.report.results.len(), 1);
    let top = &outcome.report.results[0];
    assert_eq!(top.reference_id, ramp_id);
    assert!(top.fingerprint_match);
    assert!(outcome
        .report
        .results
        .iter()
        .all(|r| r.reference_id != reverse_id));

    let view = session.results();
    assert_eq!(view.selected_id.as_deref(), Some(ramp_id.as_str()));
    let refined = session.refine_selected().await.unwrap();
    assert_eq!(
        refined.as_deref(),
        Some("A new illustration: mirror the composition")
    );

    let history = session.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].query_name, "upload.png");
    assert_eq!(history[0].summary, RiskSummary::HighRisk);
}

#[tokio::test]
async fn test_removed_reference_is_not_screened() {
    let session = session();
    let ids = session.add_items(vec![
        CorpusItem::new("ramp", inline(ramp())),
        CorpusItem::new("reverse", inline(reverse_ramp())),
    ]);
    session.remove_item(&ids[0]).unwrap();
    session.indexer().run_until_idle().await;

    session.set_query("upload.png", inline(ramp())).await.unwrap();
    let outcome = session.start_run().await.unwrap();

    assert_eq!(outcome.candidates, 1);
    assert!(outcome.report.results.is_empty());
    assert_eq!(outcome.report.summary, RiskSummary::Safe);
}

// ─── HTTP flow ──────────────────────────────────────────────────────

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_http_api_with_custom_collaborators() {
    let session = session();
    let app = router(session.clone());

    let (status, body) = call(&app, "POST", "/runs", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = call(
        &app,
        "POST",
        "/corpus",
        Some(json!({
            "items": [
                { "name": "ramp.png", "data_url": data_url(&ramp()) },
                { "name": "reverse.png", "data_url": data_url(&reverse_ramp()) }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let ramp_id = body["ids"][0].as_str().unwrap().to_string();
    assert_eq!(body["ids"].as_array().unwrap().len(), 2);

    session.indexer().run_until_idle().await;
    let (_, corpus) = call(&app, "GET", "/corpus", None).await;
    assert!(corpus
        .as_array()
        .unwrap()
        .iter()
        .all(|item| item["status"] == "completed"));

    let (status, query) = call(
        &app,
        "PUT",
        "/query",
        Some(json!({ "name": "upload.png", "data_url": data_url(&ramp()) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(query["fingerprint"], "0000000000000000");

    let (status, report) = call(&app, "POST", "/runs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["summary"], "high-risk match found");
    assert_eq!(report["results"][0]["reference_id"], ramp_id.as_str());

    let (_, run_status) = call(&app, "GET", "/status", None).await;
    assert_eq!(run_status["phase"], "complete");
    assert_eq!(run_status["progress"], 100);

    let (status, refined) = call(&app, "POST", "/results/selected/refine", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        refined["refined_suggestion"],
        "A new illustration: mirror the composition"
    );

    let (_, history) = call(&app, "GET", "/history", None).await;
    let history_id = history[0]["id"].as_str().unwrap().to_string();
    let (status, _) = call(&app, "POST", &format!("/history/{}/load", history_id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, results) = call(&app, "GET", "/results", None).await;
    assert_eq!(results["selected_id"], ramp_id.as_str());
    assert!(results["refined_suggestion"].is_null());

    let (status, body) = call(&app, "DELETE", "/corpus/no-such-id", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}
