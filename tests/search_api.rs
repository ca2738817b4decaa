use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tower::ServiceExt;
use visual_search::catalog::ProductRecord;
use visual_search::fetch::StaticFetcher;
use visual_search::service::{router, SearchBody, DEFAULT_MAX_UPLOAD_BYTES};
use visual_search::{ImageEncoder, SearchContext, SearchLimits, Vectorizer, EMBEDDING_DIM};

const BOUNDARY: &str = "visual-search-test-boundary";

/// Maps an image to its mean colour, padded to the CLIP width.
struct MeanColorEncoder;

impl ImageEncoder for MeanColorEncoder {
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn encode(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let mut sums = [0f64; 3];
        for pixel in image.pixels() {
            for (sum, channel) in sums.iter_mut().zip(pixel.0) {
                *sum += f64::from(channel);
            }
        }
        let count = f64::from(image.width() * image.height());
        let mut out = vec![0.0; EMBEDDING_DIM];
        for (slot, sum) in out.iter_mut().zip(sums) {
            *slot = (sum / count / 255.0) as f32;
        }
        out[3] = 0.25;
        Ok(out)
    }
}

const CATALOG: [(&str, [u8; 3]); 7] = [
    ("red", [255, 0, 0]),
    ("orange", [255, 128, 0]),
    ("yellow", [255, 255, 0]),
    ("green", [0, 200, 0]),
    ("teal", [0, 128, 128]),
    ("blue", [0, 0, 255]),
    ("purple", [128, 0, 200]),
];

fn png(color: [u8; 3]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 12, Rgb(color)))
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

fn write_catalog_table(path: &Path) {
    let mut fetcher = StaticFetcher::new();
    let mut products = Vec::new();
    for (id, color) in CATALOG {
        let url = format!("https://cdn.test/{id}.png");
        fetcher.insert(url.clone(), png(color));
        products.push(ProductRecord {
            id: id.to_string(),
            images: vec![url],
        });
    }
    let (table, report) = Vectorizer::new(&MeanColorEncoder, &fetcher)
        .run(&mut products)
        .expect("vectorize");
    assert_eq!(report.embedded, CATALOG.len());
    table.write(path).expect("write table");
}

fn app_for(path: &Path) -> Router {
    let context =
        SearchContext::from_path(Arc::new(MeanColorEncoder), path, SearchLimits::default());
    router(Arc::new(context), DEFAULT_MAX_UPLOAD_BYTES)
}

fn upload(uri: &str, field: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"query.png\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .expect("request")
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

fn search_body(value: Value) -> SearchBody {
    serde_json::from_value(value).expect("search body")
}

#[tokio::test]
async fn healthz_is_static() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_for(&dir.path().join("missing.json"));
    let (status, body) = call(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "ok": true }));
}

#[tokio::test]
async fn missing_table_is_not_ready_and_searches_softly_fail() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_for(&dir.path().join("missing.json"));

    let (status, body) = call(&app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "ready": false }));

    let (status, body) = call(&app, upload("/api/search", "file", &png([255, 0, 0]))).await;
    assert_eq!(status, StatusCode::OK);
    let body = search_body(body);
    assert!(body.matches.is_empty());
    assert!(body.error.is_some());
}

#[tokio::test]
async fn exact_image_is_the_first_match() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("vectors.json");
    write_catalog_table(&path);
    let app = app_for(&path);

    let (_, ready) = call(&app, get("/ready")).await;
    assert_eq!(ready, serde_json::json!({ "ready": true }));

    let (status, body) = call(&app, upload("/api/search", "file", &png([0, 0, 255]))).await;
    assert_eq!(status, StatusCode::OK);
    let body = search_body(body);
    assert_eq!(body.error, None);
    assert_eq!(body.matches.len(), 5);
    assert_eq!(body.matches[0], "blue");
}

#[tokio::test]
async fn matches_are_ordered_by_distance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vectors.json");
    write_catalog_table(&path);
    let app = app_for(&path);

    let query = png([250, 20, 0]);
    let (_, body) = call(&app, upload("/api/search", "file", &query)).await;
    let matches = search_body(body).matches;

    let encode = |bytes: &[u8]| {
        visual_search::embed_image_bytes(&MeanColorEncoder, bytes)
            .unwrap()
            .into_inner()
    };
    let q = encode(&query);
    let distances: Vec<f32> = matches
        .iter()
        .map(|id| {
            let (_, color) = CATALOG
                .iter()
                .find(|(name, _)| *name == id.as_str())
                .unwrap();
            visual_search::embeddings::squared_l2(&q, &encode(&png(*color)))
        })
        .collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]), "{distances:?}");
    assert_eq!(matches[0], "red");
    assert_eq!(matches[1], "orange");
}

#[tokio::test]
async fn top_k_query_parameter_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vectors.json");
    write_catalog_table(&path);
    let app = app_for(&path);

    let green = png([0, 200, 0]);
    let (_, body) = call(&app, upload("/api/search?top_k=2", "file", &green)).await;
    assert_eq!(search_body(body).matches, vec!["green", "teal"]);

    let (_, body) = call(&app, upload("/api/search?top_k=100", "file", &green)).await;
    assert_eq!(search_body(body).matches.len(), CATALOG.len());
}

#[tokio::test]
async fn bad_uploads_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vectors.json");
    write_catalog_table(&path);
    let app = app_for(&path);

    let (status, body) = call(&app, upload("/api/search", "image", &png([1, 2, 3]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(search_body(body).error.unwrap().contains("file"));

    let garbage = upload("/api/search", "file", b"GIF89a-but-not-really");
    let (status, body) = call(&app, garbage).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(search_body(body).matches.is_empty());

    let plain = Request::builder()
        .method("POST")
        .uri("/api/search")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = call(&app, plain).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(search_body(body).error.is_some());
}

#[tokio::test]
async fn malformed_top_k_gets_the_json_error_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vectors.json");
    write_catalog_table(&path);
    let app = app_for(&path);

    let request = upload("/api/search?top_k=abc", "file", &png([0, 0, 255]));
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = search_body(body);
    assert!(body.matches.is_empty());
    assert!(body.error.unwrap().contains("query string"));
}

#[tokio::test]
async fn malformed_top_k_still_soft_fails_when_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_for(&dir.path().join("missing.json"));

    let request = upload("/api/search?top_k=abc", "file", &png([0, 0, 255]));
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let body = search_body(body);
    assert!(body.matches.is_empty());
    assert!(body.error.is_some());
}

#[tokio::test]
async fn invalid_table_starts_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vectors.json");
    std::fs::write(&path, r#"{"ids": ["a", "b"], "vectors": [[1.0]]}"#).unwrap();
    let app = app_for(&path);
    let (_, body) = call(&app, get("/ready")).await;
    assert_eq!(body, serde_json::json!({ "ready": false }));
}
