//! Unit tests for cache fingerprints

use image_dispatch::backend::GenerationParams;
use image_dispatch::cache::{normalize_prompt, Fingerprint};

#[test]
fn test_fingerprint_is_stable() {
    let params = GenerationParams::default();
    let a = Fingerprint::new("a red fox", &params);
    let b = Fingerprint::new("a red fox", &params);

    assert_eq!(a, b);
    assert_eq!(a.key().len(), 64);
}

#[test]
fn test_whitespace_is_normalized() {
    let params = GenerationParams::default();
    assert_eq!(normalize_prompt("  a   red\tfox \n"), "a red fox");
    assert_eq!(
        Fingerprint::new("  a   red fox ", &params),
        Fingerprint::new("a red fox", &params)
    );
}

#[test]
fn test_every_output_parameter_changes_the_key() {
    let base = GenerationParams::default();
    let key = Fingerprint::new("a red fox", &base).key().to_string();

    let variants = vec![
        GenerationParams { width: 512, ..base.clone() },
        GenerationParams { height: 512, ..base.clone() },
        GenerationParams { seed: 43, ..base.clone() },
        GenerationParams { model: "turbo".to_string(), ..base.clone() },
        GenerationParams { enhance: true, ..base.clone() },
        GenerationParams { nologo: true, ..base.clone() },
        GenerationParams { negative_prompt: Some("blurry".to_string()), ..base.clone() },
    ];

    for params in variants {
        assert_ne!(Fingerprint::new("a red fox", &params).key(), key, "{:?}", params);
    }
}

#[test]
fn test_nofeed_does_not_change_the_key() {
    let base = GenerationParams::default();
    let hidden = GenerationParams { nofeed: true, ..base.clone() };

    assert_eq!(
        Fingerprint::new("a red fox", &base).key(),
        Fingerprint::new("a red fox", &hidden).key()
    );
}

#[test]
fn test_fresh_requests_bypass_the_cache() {
    let fresh = GenerationParams { fresh: true, ..GenerationParams::default() };
    assert!(Fingerprint::new("a red fox", &fresh).bypasses_cache());
    assert!(!Fingerprint::new("a red fox", &GenerationParams::default()).bypasses_cache());
}

#[test]
fn test_file_name_is_safe_and_unique() {
    let params = GenerationParams::default();
    let a = Fingerprint::new("../../a red fox?!", &params);
    let b = Fingerprint::new("a red fox", &params);

    let name_a = a.file_name();
    let name_b = b.file_name();

    assert!(name_a.starts_with("a_red_fox_"));
    assert!(name_b.starts_with("a_red_fox_"));
    assert_ne!(name_a, name_b, "same readable prefix, different hash suffix");
    assert!(name_a
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.'));
    assert!(name_a.ends_with(".jpg"));
}

#[test]
fn test_file_name_is_length_bounded() {
    let prompt = "an extremely long prompt ".repeat(50);
    let name = Fingerprint::new(&prompt, &GenerationParams::default()).file_name();
    assert!(name.len() <= 100 + 1 + 8 + 4);
}
