//! End-to-end scenario coverage for the seed cases in SPEC_FULL.md §8.
//!
//! Mixed-devices (EXIF Make/Model divergence) is covered at the unit level
//! instead of here: `anomalies::minority_device_model_is_flagged` and
//! `decode`'s EXIF extraction tests already exercise that path, and crafting
//! a JPEG with real EXIF IFD0 tags for an integration fixture would be a
//! brittle binary-literal exercise for no additional coverage.

use facial_forensics_pipeline::{process, PipelineConfig, ProvenanceRegistry};
use image::{ImageBuffer, Rgb};
use pipeline::model::ComplianceStatus;
use provenance::Consent;
use sha2::{Digest, Sha256};
use std::io::Cursor;

fn checkerboard_png(size: u32, tile: u32, light: u8, dark: u8) -> Vec<u8> {
    let img = ImageBuffer::from_fn(size, size, |x, y| {
        if (x / tile + y / tile) % 2 == 0 {
            Rgb([light, light, light])
        } else {
            Rgb([dark, dark, dark])
        }
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode checkerboard png");
    bytes
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// A lone well-formed image runs the full batch and comes out accepted with
/// a synthesized intelligence summary.
#[tokio::test]
async fn same_person_single_image_happy_path() {
    let registry = ProvenanceRegistry::in_memory();
    let images = vec![checkerboard_png(128, 4, 225, 25)];

    let state = process(images, "analyst-1".to_string(), PipelineConfig::default(), registry).await;

    assert!(state.success);
    assert_eq!(state.status, "completed");
    assert_eq!(state.images_processed.len(), 1);
    assert!(state.intelligence_summary.is_some());
    assert!(state.similarity_analysis.is_some());
}

/// Two visibly distinct checkerboards in one batch should each decode and
/// run through the full batch independently; the similarity stage is free to
/// call them different people, but both must still be accounted for.
#[tokio::test]
async fn two_people_mixed_batch_accounts_for_both_images() {
    let registry = ProvenanceRegistry::in_memory();
    let images = vec![checkerboard_png(128, 4, 230, 10), checkerboard_png(128, 16, 40, 210)];

    let state = process(images, "analyst-2".to_string(), PipelineConfig::default(), registry).await;

    assert!(state.success);
    assert_eq!(state.images_processed.len(), 2);
    assert_eq!(state.osint_metadata.len(), 2);
}

/// The exact same bytes submitted twice in one batch: the first copy is
/// accepted and the second is recorded as a registry duplicate rather than
/// reprocessed as a new identity.
#[tokio::test]
async fn duplicate_upload_in_same_batch_is_flagged() {
    let registry = ProvenanceRegistry::in_memory();
    let bytes = checkerboard_png(100, 5, 200, 30);
    let images = vec![bytes.clone(), bytes];

    let state = process(images, "analyst-3".to_string(), PipelineConfig::default(), registry).await;

    assert!(state.success);
    assert_eq!(state.images_processed.len(), 2);
    assert_eq!(state.images_processed[0].compliance.status, ComplianceStatus::Accepted);
    assert_eq!(state.images_processed[1].compliance.status, ComplianceStatus::Duplicate);
}

/// With reverse search disabled via config, every decoded image gets a
/// `disabled` result instead of an attempted lookup.
#[tokio::test]
async fn reverse_search_disabled_flag_marks_every_result_disabled() {
    let registry = ProvenanceRegistry::in_memory();
    let mut config = PipelineConfig::default();
    config.disable_flags.disable_reverse_search = true;
    let images = vec![checkerboard_png(96, 4, 210, 15)];

    let state = process(images, "analyst-4".to_string(), config, registry).await;

    assert!(state.success);
    assert_eq!(state.reverse_image_results.len(), 1);
    assert!(state.reverse_image_results[0].disabled);
    assert_eq!(state.osint_metrics.disabled, 1);
}

/// An image whose SHA-256 is already registered with revoked consent must be
/// rejected at the provenance gate rather than accepted, even on first
/// submission in this batch.
#[tokio::test]
async fn previously_revoked_image_is_rejected_on_resubmission() {
    let registry = ProvenanceRegistry::in_memory();
    let bytes = checkerboard_png(110, 5, 215, 20);
    let sha256 = sha256_hex(&bytes);

    registry.register_image(&sha256, serde_json::json!({"note": "prior submission"}), None, None).await;
    registry.set_image_consent(&sha256, Consent::Revoked).await;

    let state = process(vec![bytes], "analyst-5".to_string(), PipelineConfig::default(), registry).await;

    assert!(state.success);
    assert_eq!(state.images_processed.len(), 1);
    assert_eq!(state.images_processed[0].compliance.status, ComplianceStatus::Dropped);
    assert!(state.images_processed[0].decoded.is_none());
}
