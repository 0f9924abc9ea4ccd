//! OSINT Anomaly Detector (C9, SPEC_FULL.md §4.9).
//!
//! The brightness-outlier z-score test follows the same mean/std-dev
//! threshold idiom as `ai-service/src/plugin/anomaly_detection.rs`'s
//! `TemporalMetrics::is_anomaly`, applied across a batch instead of across
//! time.

use std::collections::HashMap;

use crate::model::{GlobalAnomalies, ImageMetadata, OSINTAnomalies, PerImageAnomalies};

const LARGE_GAP_DAYS: i64 = 30;
const BRIGHTNESS_Z_THRESHOLD: f64 = 2.0;
const GPS_SPREAD_DEGREES: f64 = 5.0;

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

/// Pure function over one batch's metadata. No cross-batch state is kept —
/// every run starts fresh, unlike the registry which persists across runs.
pub fn detect(images: &[ImageMetadata], image_ids: &[String]) -> OSINTAnomalies {
    let mut per_image: HashMap<String, Vec<String>> =
        image_ids.iter().map(|id| (id.clone(), Vec::new())).collect();
    let mut global = GlobalAnomalies::default();

    device_inconsistencies(images, image_ids, &mut per_image, &mut global);
    timestamp_inconsistencies(images, image_ids, &mut per_image, &mut global);
    isolated_gps(images, image_ids, &mut per_image, &mut global);
    brightness_outliers(images, image_ids, &mut per_image, &mut global);
    hash_duplicates(images, image_ids, &mut per_image, &mut global);

    let per_image = image_ids
        .iter()
        .map(|id| PerImageAnomalies {
            image_id: id.clone(),
            anomalies: per_image.remove(id).unwrap_or_default(),
        })
        .collect();

    OSINTAnomalies { per_image, global }
}

fn device_inconsistencies(
    images: &[ImageMetadata],
    image_ids: &[String],
    per_image: &mut HashMap<String, Vec<String>>,
    global: &mut GlobalAnomalies,
) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for m in images {
        if let Some(model) = m.device_info.model.as_deref() {
            *counts.entry(model).or_insert(0) += 1;
        }
    }
    if counts.len() < 2 {
        return;
    }
    let Some((&dominant, _)) = counts.iter().max_by_key(|(_, &c)| c) else {
        return;
    };

    // The global bucket records every observed model (keyed to the image that
    // carried it), not only the minority ones that triggered a mismatch.
    for (id, m) in image_ids.iter().zip(images.iter()) {
        if let Some(model) = m.device_info.model.as_deref() {
            global.device_inconsistencies.push(format!("{model} ({id})"));
        }
    }

    for (id, m) in image_ids.iter().zip(images.iter()) {
        if let Some(model) = m.device_info.model.as_deref() {
            if model != dominant {
                let note = format!("device_mismatch: {model} (expected {dominant})");
                per_image.entry(id.clone()).or_default().push(note);
            }
        }
    }
}

/// Checks timestamps in upload order (not sorted by time) — a later upload
/// with an earlier capture timestamp than the one before it is the signal,
/// since sorting by time would trivially make every batch monotonic.
fn timestamp_inconsistencies(
    images: &[ImageMetadata],
    image_ids: &[String],
    per_image: &mut HashMap<String, Vec<String>>,
    global: &mut GlobalAnomalies,
) {
    let timed: Vec<(&String, chrono::DateTime<chrono::Utc>)> = image_ids
        .iter()
        .zip(images.iter())
        .filter_map(|(id, m)| m.timestamp_info.map(|t| (id, t)))
        .collect();

    for window in timed.windows(2) {
        let (prev_id, prev_t) = window[0];
        let (next_id, next_t) = window[1];
        let delta = next_t.signed_duration_since(prev_t);
        if delta.num_seconds() < 0 {
            let note = format!("non_monotonic: {prev_id} after {next_id}");
            per_image.entry(next_id.clone()).or_default().push(note);
            global.timestamp_inconsistencies.push(next_id.clone());
        } else if delta.num_days() > LARGE_GAP_DAYS {
            let note = format!("large_gap_days: {} days since {prev_id}", delta.num_days());
            per_image.entry(next_id.clone()).or_default().push(note);
            global.timestamp_inconsistencies.push(next_id.clone());
        }
    }
}

fn isolated_gps(
    images: &[ImageMetadata],
    image_ids: &[String],
    per_image: &mut HashMap<String, Vec<String>>,
    global: &mut GlobalAnomalies,
) {
    let located: Vec<(&String, f64, f64)> = image_ids
        .iter()
        .zip(images.iter())
        .filter_map(|(id, m)| m.location_data.as_ref().map(|l| (id, l.latitude, l.longitude)))
        .collect();

    if located.len() == 1 {
        let (id, _, _) = located[0];
        per_image.entry(id.clone()).or_default().push("isolated_gps".to_string());
        global.isolated_gps.push(id.clone());
        return;
    }

    if located.len() > 1 {
        let lat_spread = located.iter().map(|(_, lat, _)| *lat).fold(f64::MIN, f64::max)
            - located.iter().map(|(_, lat, _)| *lat).fold(f64::MAX, f64::min);
        let lon_spread = located.iter().map(|(_, _, lon)| *lon).fold(f64::MIN, f64::max)
            - located.iter().map(|(_, _, lon)| *lon).fold(f64::MAX, f64::min);
        if lat_spread > GPS_SPREAD_DEGREES || lon_spread > GPS_SPREAD_DEGREES {
            for (id, _, _) in &located {
                per_image
                    .entry((*id).clone())
                    .or_default()
                    .push("widely_separated_points".to_string());
                global.isolated_gps.push((*id).clone());
            }
        }
    }
}

fn brightness_outliers(
    images: &[ImageMetadata],
    image_ids: &[String],
    per_image: &mut HashMap<String, Vec<String>>,
    global: &mut GlobalAnomalies,
) {
    let values: Vec<(&String, f64)> = image_ids
        .iter()
        .zip(images.iter())
        .filter_map(|(id, m)| m.brightness_mean.map(|b| (id, b)))
        .collect();
    if values.len() < 3 {
        return;
    }
    let (mean, stdev) = mean_std(&values.iter().map(|(_, b)| *b).collect::<Vec<_>>());
    if stdev < 1e-9 {
        return;
    }
    for (id, value) in &values {
        let z = (value - mean).abs() / stdev;
        if z > BRIGHTNESS_Z_THRESHOLD {
            per_image
                .entry((*id).clone())
                .or_default()
                .push(format!("brightness_outlier: z={z:.2}"));
            global.brightness_outliers.push((*id).clone());
        }
    }
}

fn hash_duplicates(
    images: &[ImageMetadata],
    image_ids: &[String],
    per_image: &mut HashMap<String, Vec<String>>,
    global: &mut GlobalAnomalies,
) {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for (id, m) in image_ids.iter().zip(images.iter()) {
        if let Some(&first_id) = seen.get(m.sha256.as_str()) {
            per_image
                .entry(id.clone())
                .or_default()
                .push(format!("hash_duplicate_of: {first_id}"));
            global.hash_duplicates.push(id.clone());
        } else {
            seen.insert(&m.sha256, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn meta(sha256: &str, model: Option<&str>, brightness: Option<f64>) -> ImageMetadata {
        ImageMetadata {
            sha256: sha256.to_string(),
            device_info: crate::model::DeviceInfo { model: model.map(String::from), ..Default::default() },
            brightness_mean: brightness,
            ..Default::default()
        }
    }

    #[test]
    fn minority_device_model_is_flagged() {
        let images = vec![
            meta("a", Some("iPhone 14"), None),
            meta("b", Some("iPhone 14"), None),
            meta("c", Some("Generic Android"), None),
        ];
        let ids = vec!["img0".to_string(), "img1".to_string(), "img2".to_string()];
        let result = detect(&images, &ids);
        assert!(result.global.device_inconsistencies.iter().any(|d| d.contains("iPhone 14")));
        assert!(result.global.device_inconsistencies.iter().any(|d| d.contains("Generic Android")));
        assert!(result.per_image.iter().any(|p| p.image_id == "img2" && p.anomalies.iter().any(|a| a.contains("device_mismatch"))));
    }

    #[test]
    fn duplicate_sha256_is_flagged() {
        let images = vec![meta("same", None, None), meta("same", None, None)];
        let ids = vec!["img0".to_string(), "img1".to_string()];
        let result = detect(&images, &ids);
        assert_eq!(result.global.hash_duplicates, vec!["img1".to_string()]);
    }

    #[test]
    fn single_gps_point_is_isolated() {
        let mut m = meta("a", None, None);
        m.location_data = Some(crate::model::LocationData {
            raw: serde_json::Value::Null,
            latitude: 10.0,
            longitude: 10.0,
        });
        let images = vec![m, meta("b", None, None)];
        let ids = vec!["img0".to_string(), "img1".to_string()];
        let result = detect(&images, &ids);
        assert_eq!(result.global.isolated_gps, vec!["img0".to_string()]);
    }

    #[test]
    fn brightness_outlier_flagged_by_z_score() {
        let images = vec![
            meta("a", None, Some(100.0)),
            meta("b", None, Some(102.0)),
            meta("c", None, Some(98.0)),
            meta("d", None, Some(240.0)),
        ];
        let ids = vec!["img0".to_string(), "img1".to_string(), "img2".to_string(), "img3".to_string()];
        let result = detect(&images, &ids);
        assert!(result.global.brightness_outliers.contains(&"img3".to_string()));
    }

    #[test]
    fn non_monotonic_timestamps_flagged() {
        let mut a = meta("a", None, None);
        a.timestamp_info = Some(Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap());
        let mut b = meta("b", None, None);
        b.timestamp_info = Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let images = vec![a, b];
        let ids = vec!["img0".to_string(), "img1".to_string()];
        let result = detect(&images, &ids);
        assert!(!result.global.timestamp_inconsistencies.is_empty());
    }
}
