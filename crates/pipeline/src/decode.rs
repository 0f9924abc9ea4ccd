//! Image Decoder & Metadata Extractor (C2, SPEC_FULL.md §4.2).
//!
//! Hashes are always computed on the raw input bytes so a re-encoded
//! duplicate is treated as a distinct image, matching `original_source/
//! modules/facial_pipeline.py`'s metadata-extraction path.

use std::io::Cursor;

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Tag, Value as ExifValue};
use image::DynamicImage;
use md5::{Digest as Md5Digest, Md5};
use sha2::{Digest, Sha256};

use crate::model::{DeviceInfo, ImageMetadata, LocationData};

pub struct DecodedImage {
    pub pixels: DynamicImage,
    pub metadata: ImageMetadata,
}

/// Decode `bytes` and extract its full metadata bag. `seen_hashes` is the
/// set of SHA-256 values already observed earlier in this batch, used only
/// for the credibility-score "not already cached in-session" bonus (§4.2) —
/// cross-image duplicate *detection* itself is C9's job, not this function's.
pub fn extract(bytes: &[u8], seen_hashes: &std::collections::HashSet<String>) -> Result<DecodedImage, String> {
    let img = image::load_from_memory(bytes).map_err(|e| format!("decode failed: {e}"))?;

    let sha256 = hex_digest(Sha256::digest(bytes).as_slice());
    let md5 = hex_digest(Md5::digest(bytes).as_slice());
    let perceptual_hash = Some(provenance::compute_perceptual_hash(&img));

    let exif_data = read_exif(bytes);
    let oriented = apply_orientation(img, exif_data.as_ref());

    let mut metadata = ImageMetadata {
        file_size: bytes.len() as u64,
        sha256: sha256.clone(),
        md5,
        perceptual_hash,
        watermark_hash: None,
        exif: serde_json::Value::Null,
        device_info: DeviceInfo::default(),
        timestamp_info: None,
        location_data: None,
        gps_error: None,
        social_media_indicators: Vec::new(),
        brightness_mean: Some(brightness_mean(&oriented)),
        credibility_score: 0.0,
        credibility_factors: Vec::new(),
    };

    if let Some(exif) = &exif_data {
        populate_from_exif(&mut metadata, exif);
    }

    detect_platform_indicators(&mut metadata, &oriented);
    compute_credibility(&mut metadata, &sha256, seen_hashes);

    Ok(DecodedImage { pixels: oriented, metadata })
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn brightness_mean(img: &DynamicImage) -> f64 {
    let gray = img.to_luma8();
    if gray.is_empty() {
        return 0.0;
    }
    let sum: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    sum as f64 / gray.len() as f64
}

fn read_exif(bytes: &[u8]) -> Option<exif::Exif> {
    let mut cursor = Cursor::new(bytes);
    exif::Reader::new().read_from_container(&mut cursor).ok()
}

/// Honor the EXIF `Orientation` tag so downstream geometry is always in
/// upright coordinates (§4.2 contract).
fn apply_orientation(img: DynamicImage, exif: Option<&exif::Exif>) -> DynamicImage {
    let orientation = exif
        .and_then(|e| e.get_field(Tag::Orientation, In::PRIMARY))
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1);

    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.rotate180().fliph(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn populate_from_exif(metadata: &mut ImageMetadata, exif: &exif::Exif) {
    let mut exif_bag = serde_json::Map::new();

    if let Some(field) = exif.get_field(Tag::Make, In::PRIMARY) {
        let make = field.display_value().to_string();
        exif_bag.insert("Make".to_string(), serde_json::Value::String(make.clone()));
        metadata.device_info.make = Some(make);
    }
    if let Some(field) = exif.get_field(Tag::Model, In::PRIMARY) {
        let model = field.display_value().to_string();
        exif_bag.insert("Model".to_string(), serde_json::Value::String(model.clone()));
        metadata.device_info.model = Some(model);
    }
    if let Some(field) = exif.get_field(Tag::Software, In::PRIMARY) {
        let software = field.display_value().to_string();
        exif_bag.insert("Software".to_string(), serde_json::Value::String(software.clone()));
        metadata.device_info.software = Some(software);
    }
    if let Some(field) = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY) {
        let text = field.display_value().to_string();
        exif_bag.insert("DateTimeOriginal".to_string(), serde_json::Value::String(text.clone()));
        if let Ok(naive) = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S") {
            metadata.timestamp_info = Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }

    metadata.exif = serde_json::Value::Object(exif_bag);
    metadata.location_data = extract_gps(exif, metadata);
}

fn extract_gps(exif: &exif::Exif, metadata: &mut ImageMetadata) -> Option<LocationData> {
    let lat_field = exif.get_field(Tag::GPSLatitude, In::PRIMARY)?;
    let lat_ref = exif
        .get_field(Tag::GPSLatitudeRef, In::PRIMARY)
        .map(|f| f.display_value().to_string())
        .unwrap_or_default();
    let lon_field = exif.get_field(Tag::GPSLongitude, In::PRIMARY)?;
    let lon_ref = exif
        .get_field(Tag::GPSLongitudeRef, In::PRIMARY)
        .map(|f| f.display_value().to_string())
        .unwrap_or_default();

    let lat = match dms_to_decimal(&lat_field.value) {
        Some(v) => v,
        None => {
            metadata.gps_error = Some("failed to parse GPSLatitude".to_string());
            return None;
        }
    };
    let lon = match dms_to_decimal(&lon_field.value) {
        Some(v) => v,
        None => {
            metadata.gps_error = Some("failed to parse GPSLongitude".to_string());
            return None;
        }
    };

    let latitude = if lat_ref.contains('S') { -lat } else { lat };
    let longitude = if lon_ref.contains('W') { -lon } else { lon };

    Some(LocationData {
        raw: serde_json::json!({ "lat_ref": lat_ref, "lon_ref": lon_ref }),
        latitude,
        longitude,
    })
}

fn dms_to_decimal(value: &ExifValue) -> Option<f64> {
    if let ExifValue::Rational(rationals) = value {
        if rationals.len() == 3 {
            let degrees = rationals[0].to_f64();
            let minutes = rationals[1].to_f64();
            let seconds = rationals[2].to_f64();
            return Some(degrees + minutes / 60.0 + seconds / 3600.0);
        }
    }
    None
}

fn detect_platform_indicators(metadata: &mut ImageMetadata, img: &DynamicImage) {
    if let Some(software) = &metadata.device_info.software {
        let lower = software.to_lowercase();
        for (needle, label) in [
            ("instagram", "Instagram"),
            ("facebook", "Facebook"),
            ("whatsapp", "WhatsApp"),
            ("snapchat", "Snapchat"),
            ("photoshop", "Adobe Photoshop"),
            ("gimp", "GIMP"),
        ] {
            if lower.contains(needle) {
                metadata.social_media_indicators.push(label.to_string());
            }
        }
    }

    let (w, h) = (img.width() as f64, img.height() as f64);
    if w > 0.0 && h > 0.0 {
        let ratio = w / h;
        if w == h {
            metadata.social_media_indicators.push("Instagram Square".to_string());
        } else if (ratio - 1.91).abs() < 0.02 {
            metadata.social_media_indicators.push("Facebook Link Preview".to_string());
        }
    }
}

/// Credibility scoring rule (§4.2): starts at 0, accumulates independent
/// bonuses, clamped to [0,1] and rounded to three decimals.
fn compute_credibility(
    metadata: &mut ImageMetadata,
    sha256: &str,
    seen_hashes: &std::collections::HashSet<String>,
) {
    let mut score = 0.0;
    let mut factors = Vec::new();

    if metadata.location_data.is_some() {
        score += 0.25;
        factors.push("gps_decoded".to_string());
    }
    if metadata.device_info.make.is_some() && metadata.device_info.model.is_some() {
        score += 0.25;
        factors.push("device_identified".to_string());
    }
    if metadata.timestamp_info.is_some() {
        score += 0.20;
        factors.push("timestamp_present".to_string());
    }
    if !metadata.social_media_indicators.is_empty() {
        score += 0.10;
        factors.push("platform_indicator".to_string());
    }
    if !seen_hashes.contains(sha256) {
        score += 0.20;
        factors.push("unique_in_session".to_string());
    }

    metadata.credibility_score = (score.clamp(0.0, 1.0) * 1000.0).round() / 1000.0;
    metadata.credibility_factors = factors;
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::collections::HashSet;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(w, h, Rgb([100u8, 120, 140])));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .expect("encode png");
        out
    }

    #[test]
    fn extract_computes_hashes_and_brightness() {
        let bytes = png_bytes(40, 40);
        let seen = HashSet::new();
        let decoded = extract(&bytes, &seen).expect("decode succeeds");
        assert_eq!(decoded.metadata.sha256.len(), 64);
        assert_eq!(decoded.metadata.md5.len(), 32);
        assert!(decoded.metadata.perceptual_hash.is_some());
        assert!(decoded.metadata.brightness_mean.unwrap() > 0.0);
    }

    #[test]
    fn unique_in_session_bonus_applies_once() {
        let bytes = png_bytes(20, 20);
        let mut seen = HashSet::new();
        let first = extract(&bytes, &seen).expect("decode");
        assert!(first.metadata.credibility_factors.contains(&"unique_in_session".to_string()));

        seen.insert(first.metadata.sha256.clone());
        let second = extract(&bytes, &seen).expect("decode");
        assert!(!second.metadata.credibility_factors.contains(&"unique_in_session".to_string()));
    }

    #[test]
    fn decode_failure_is_reported_not_panicked() {
        let garbage = vec![0u8; 8];
        let seen = HashSet::new();
        assert!(extract(&garbage, &seen).is_err());
    }

    #[test]
    fn square_image_gets_instagram_indicator() {
        let bytes = png_bytes(50, 50);
        let seen = HashSet::new();
        let decoded = extract(&bytes, &seen).expect("decode");
        assert!(decoded
            .metadata
            .social_media_indicators
            .contains(&"Instagram Square".to_string()));
    }
}
