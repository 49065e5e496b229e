//! Unit tests for response helpers

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use bytes::Bytes;
use image_dispatch::backend::{GenerationParams, Job};
use image_dispatch::response::{base64, image_url, load_placeholder, placeholder_response};

#[test]
fn test_base64_encode_decode() {
    let original = b"Hello, World!";
    let encoded = base64::encode(original);
    let decoded = base64::decode(&encoded).unwrap();

    assert_eq!(original.as_slice(), decoded.as_slice());
}

#[test]
fn test_base64_rejects_garbage() {
    assert!(base64::decode("not valid base64!!!").is_err());
}

#[test]
fn test_placeholder_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue_full.jpg");
    std::fs::write(&path, b"\xFF\xD8custom").unwrap();

    let bytes = load_placeholder(path.to_str()).unwrap();
    assert_eq!(bytes.as_ref(), b"\xFF\xD8custom");
}

#[test]
fn test_missing_placeholder_file_is_an_error() {
    assert!(load_placeholder(Some("/definitely/not/here.jpg")).is_err());
}

#[test]
fn test_placeholder_response_is_not_cacheable() {
    let response = placeholder_response(Bytes::from_static(b"jpeg"));
    assert_eq!(response.headers()[CONTENT_TYPE], "image/jpeg");
    assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
}

#[test]
fn test_image_url_carries_optional_params() {
    let params = GenerationParams {
        nologo: true,
        negative_prompt: Some("blurry, dark".to_string()),
        ..GenerationParams::default()
    };
    let job = Job::new("a/b fox", params, "10.0.0");
    let url = image_url("https://images.example.com", &job).unwrap();

    assert!(url.starts_with("https://images.example.com/prompt/a%2Fb%20fox?"));
    assert!(url.contains("nologo=true"));
    assert!(url.contains("negative_prompt=blurry%2C+dark"));
    assert!(!url.contains("enhance"));
}
