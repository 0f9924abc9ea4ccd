//! Face Detection & Landmark Fusion (C3, SPEC_FULL.md §4.3).
//!
//! Detectors, landmark providers, and embedders are capability providers
//! behind small traits, mirroring `ai-service/src/plugin/facial_recognition.rs`'s
//! detect-then-embed split and its "never block on a missing model" posture:
//! an absent provider simply omits its contribution to the [`FaceRecord`]
//! instead of failing the stage.

use image::{imageops::FilterType, DynamicImage, GenericImageView};

use crate::model::{BBox, FaceRecord, HeadPose, Quality};

/// A single raw detection before landmark/embedding fusion.
pub struct RawDetection {
    pub bbox: BBox,
    pub confidence: f64,
}

pub trait FaceDetector: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }
    fn name(&self) -> &'static str;
    fn detect(&self, image: &DynamicImage) -> Vec<RawDetection>;
}

pub trait LandmarkProvider: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }
    fn landmarks_68(&self, image: &DynamicImage, bbox: &BBox) -> Option<Vec<(f64, f64)>>;
    fn landmarks_dense(&self, image: &DynamicImage, bbox: &BBox) -> Option<Vec<(f64, f64, f64)>>;
}

pub trait EmbeddingProvider: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }
    fn dim(&self) -> usize;
    fn embed(&self, crop: &DynamicImage) -> Option<Vec<f32>>;
}

/// Coarse heuristic detector: flags one face-sized region when the image
/// shows enough luma variance and left/right symmetry to plausibly contain a
/// face, per the spec's "image variance + symmetry" fallback description.
/// Used whenever no real detector backend is configured.
pub struct HeuristicFaceDetector;

impl FaceDetector for HeuristicFaceDetector {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn detect(&self, image: &DynamicImage) -> Vec<RawDetection> {
        let gray = image.to_luma8();
        let (w, h) = (gray.width(), gray.height());
        if w < 4 || h < 4 {
            return Vec::new();
        }

        let pixels: Vec<f64> = gray.pixels().map(|p| p.0[0] as f64).collect();
        let mean = pixels.iter().sum::<f64>() / pixels.len() as f64;
        let variance = pixels.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / pixels.len() as f64;

        if variance < 4.0 {
            return Vec::new(); // near-blank image, nothing to detect
        }

        let symmetry = left_right_symmetry(&gray);

        let margin_x = w as f64 * 0.15;
        let margin_y = h as f64 * 0.1;
        let bbox = BBox {
            left: margin_x,
            right: w as f64 - margin_x,
            top: margin_y,
            bottom: h as f64 - margin_y * 2.0,
        };

        let confidence = (0.5 + 0.5 * symmetry).clamp(0.0, 1.0);
        vec![RawDetection { bbox, confidence }]
    }
}

fn left_right_symmetry(gray: &image::GrayImage) -> f64 {
    let (w, h) = (gray.width(), gray.height());
    let half = w / 2;
    if half == 0 {
        return 0.0;
    }
    let mut diff_sum = 0f64;
    let mut count = 0f64;
    for y in 0..h {
        for x in 0..half {
            let left = gray.get_pixel(x, y).0[0] as f64;
            let right = gray.get_pixel(w - 1 - x, y).0[0] as f64;
            diff_sum += (left - right).abs();
            count += 1.0;
        }
    }
    if count == 0.0 {
        return 0.0;
    }
    1.0 - (diff_sum / count / 255.0).clamp(0.0, 1.0)
}

/// Synthetic dlib-layout 68-point landmark set placed on an ellipse inscribed
/// in the bbox. Not a real landmark predictor — a deterministic placeholder
/// good enough to drive pose/alignment arithmetic when no real predictor is
/// configured, matching the spec's "missing optional backends never block
/// detection" rule.
pub struct HeuristicLandmarkProvider;

impl LandmarkProvider for HeuristicLandmarkProvider {
    fn landmarks_68(&self, _image: &DynamicImage, bbox: &BBox) -> Option<Vec<(f64, f64)>> {
        let cx = (bbox.left + bbox.right) / 2.0;
        let cy = (bbox.top + bbox.bottom) / 2.0;
        let rx = bbox.width() / 2.0;
        let ry = bbox.height() / 2.0;

        let mut points = vec![(0.0, 0.0); 68];
        // Jawline 0-16
        for i in 0..=16 {
            let t = std::f64::consts::PI * (i as f64 / 16.0);
            points[i] = (cx - rx * t.cos(), cy + ry * (0.3 + 0.7 * t.sin()));
        }
        // Eyebrows 17-26 (unused by our heuristics, still populated for shape completeness)
        for i in 17..=26 {
            points[i] = (cx - rx * 0.6 + (i as f64 - 17.0) * rx * 0.12, cy - ry * 0.35);
        }
        // Nose bridge/tip 27-35
        points[30] = (cx, cy); // nose tip
        for i in 27..=35 {
            points[i] = (cx, cy - ry * 0.2 + (i as f64 - 27.0) * ry * 0.05);
        }
        // Eyes 36-47: outer/inner corners used by alignment and pose heuristics
        points[36] = (cx - rx * 0.55, cy - ry * 0.15); // left eye outer corner
        points[39] = (cx - rx * 0.15, cy - ry * 0.15); // left eye inner corner
        points[42] = (cx + rx * 0.15, cy - ry * 0.15); // right eye inner corner
        points[45] = (cx + rx * 0.55, cy - ry * 0.15); // right eye outer corner
        // Mouth 48-67
        points[48] = (cx - rx * 0.35, cy + ry * 0.45); // mouth left corner
        points[54] = (cx + rx * 0.35, cy + ry * 0.45); // mouth right corner
        // Chin
        points[8] = (cx, cy + ry);

        Some(points)
    }

    fn landmarks_dense(&self, _image: &DynamicImage, bbox: &BBox) -> Option<Vec<(f64, f64, f64)>> {
        let cx = (bbox.left + bbox.right) / 2.0;
        let cy = (bbox.top + bbox.bottom) / 2.0;
        let rx = bbox.width() / 2.0;
        let ry = bbox.height() / 2.0;

        let mut points = Vec::with_capacity(32 * 4);
        for ring in 1..=4 {
            let scale = ring as f64 / 4.0;
            for i in 0..32 {
                let t = 2.0 * std::f64::consts::PI * (i as f64 / 32.0);
                let z = (1.0 - scale) * 10.0; // crude depth proxy: inner rings sit "closer"
                points.push((cx + rx * scale * t.cos(), cy + ry * scale * t.sin(), z));
            }
        }
        Some(points)
    }
}

/// Heuristic embedding: mean/std/gradient statistics padded to the configured
/// dimension via a sine expansion, L2-normalized. Ported from
/// `original_source/modules/reconstruction_orchestrator.py::_compute_embedding`,
/// the fallback used there when no neural embedding model is available.
pub struct HeuristicEmbeddingProvider {
    pub dim: usize,
}

impl EmbeddingProvider for HeuristicEmbeddingProvider {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, crop: &DynamicImage) -> Option<Vec<f32>> {
        let gray = crop
            .resize_exact(64, 64, FilterType::Triangle)
            .to_luma8();
        let values: Vec<f64> = gray.pixels().map(|p| p.0[0] as f64 / 255.0).collect();
        if values.is_empty() {
            return None;
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        let std = variance.sqrt();

        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let mut grad_sum = 0f64;
        for y in 0..h {
            for x in 0..w.saturating_sub(1) {
                let a = gray.get_pixel(x as u32, y as u32).0[0] as f64;
                let b = gray.get_pixel(x as u32 + 1, y as u32).0[0] as f64;
                grad_sum += (a - b).abs();
            }
        }
        let grad_mean = grad_sum / ((w.saturating_sub(1)).max(1) * h) as f64 / 255.0;

        let seed = [mean, std, grad_mean];
        let mut embedding: Vec<f32> = (0..self.dim)
            .map(|i| {
                let base = seed[i % seed.len()];
                (base + (i as f64).sin() * 0.01).sin() as f32
            })
            .collect();

        let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        Some(embedding)
    }
}

/// Wires the capability providers together and fuses their output into
/// `FaceRecord`s for one image.
pub struct FaceDetectionStage {
    pub primary: Box<dyn FaceDetector>,
    pub accurate: Option<Box<dyn FaceDetector>>,
    pub landmarks_68: Option<Box<dyn LandmarkProvider>>,
    pub landmarks_dense: Option<Box<dyn LandmarkProvider>>,
    pub embedder: Box<dyn EmbeddingProvider>,
}

impl Default for FaceDetectionStage {
    fn default() -> Self {
        Self {
            primary: Box::new(HeuristicFaceDetector),
            accurate: None,
            landmarks_68: Some(Box::new(HeuristicLandmarkProvider)),
            landmarks_dense: Some(Box::new(HeuristicLandmarkProvider)),
            embedder: Box::new(HeuristicEmbeddingProvider { dim: 128 }),
        }
    }
}

impl FaceDetectionStage {
    pub fn detect_faces(&self, image_id: &str, image_index: usize, image: &DynamicImage) -> Vec<FaceRecord> {
        let mut detections = self.primary.detect(image);
        let mut detector_name = self.primary.name();

        if detections.is_empty() {
            if let Some(accurate) = &self.accurate {
                if accurate.is_available() {
                    detections = accurate.detect(image);
                    detector_name = accurate.name();
                }
            }
        }

        detections
            .into_iter()
            .enumerate()
            .map(|(face_index, raw)| {
                self.build_face_record(image_id, image_index, face_index, image, raw, detector_name)
            })
            .collect()
    }

    fn build_face_record(
        &self,
        image_id: &str,
        image_index: usize,
        face_index: usize,
        image: &DynamicImage,
        raw: RawDetection,
        detector_name: &'static str,
    ) -> FaceRecord {
        let bbox = raw.bbox;
        let landmarks_68 = self
            .landmarks_68
            .as_ref()
            .filter(|p| p.is_available())
            .and_then(|p| p.landmarks_68(image, &bbox));
        let landmarks_dense = self
            .landmarks_dense
            .as_ref()
            .filter(|p| p.is_available())
            .and_then(|p| p.landmarks_dense(image, &bbox));

        let crop = aligned_crop(image, &bbox, landmarks_68.as_deref());
        let embedding = self.embedder.embed(&crop).unwrap_or_default();

        let head_pose = landmarks_68.as_deref().and_then(estimate_head_pose);
        let quality = compute_quality(&crop);
        let relative_size = ((bbox.width() * bbox.height())
            / (image.width() as f64 * image.height() as f64))
            .clamp(0.0, 1.0);

        let sharpness = (quality.blur_variance / 1000.0).clamp(0.0, 1.0);
        let exposure = 1.0 - ((quality.brightness - 127.5).abs() / 127.5).clamp(0.0, 1.0);
        let contrast = (quality.contrast / 80.0).clamp(0.0, 1.0);
        let confidence =
            0.5 * sharpness + 0.2 * exposure + 0.2 * contrast + 0.1 * relative_size;

        FaceRecord {
            face_id: format!("{image_index}_{face_index}"),
            image_id: image_id.to_string(),
            image_index,
            bbox,
            embedding,
            landmarks_68,
            landmarks_dense,
            head_pose,
            quality,
            confidence: confidence.clamp(0.0, 1.0),
            detection_model: detector_name.to_string(),
            error: None,
        }
    }
}

/// Rotate eyes horizontal, crop with a 30% margin, resize to 150x150. Falls
/// back to a raw bbox crop when landmarks are unavailable (§4.3).
fn aligned_crop(image: &DynamicImage, bbox: &BBox, landmarks_68: Option<&[(f64, f64)]>) -> DynamicImage {
    let fallback = || {
        let (left, top) = (bbox.left.max(0.0) as u32, bbox.top.max(0.0) as u32);
        let width = (bbox.width() as u32).max(1).min(image.width().saturating_sub(left).max(1));
        let height = (bbox.height() as u32).max(1).min(image.height().saturating_sub(top).max(1));
        image.crop_imm(left, top, width, height)
    };

    let Some(points) = landmarks_68 else {
        return fallback();
    };
    if points.len() < 46 {
        return fallback();
    }

    let left_eye = points[36];
    let right_eye = points[45];
    let dy = right_eye.1 - left_eye.1;
    let dx = right_eye.0 - left_eye.0;
    if dx.abs() < f64::EPSILON {
        return fallback();
    }
    let angle_deg = dy.atan2(dx).to_degrees();

    let rotated = if angle_deg.abs() > 0.5 {
        rotate_image(image, -angle_deg)
    } else {
        image.clone()
    };

    let margin_x = bbox.width() * 0.3;
    let margin_y = bbox.height() * 0.3;
    let left = (bbox.left - margin_x).max(0.0) as u32;
    let top = (bbox.top - margin_y).max(0.0) as u32;
    let right = ((bbox.right + margin_x) as u32).min(rotated.width());
    let bottom = ((bbox.bottom + margin_y) as u32).min(rotated.height());

    if right <= left || bottom <= top {
        return fallback();
    }

    rotated
        .crop_imm(left, top, right - left, bottom - top)
        .resize_exact(150, 150, FilterType::Triangle)
}

fn rotate_image(image: &DynamicImage, angle_degrees: f64) -> DynamicImage {
    // Only the four axis-aligned rotations are available without pulling in a
    // full affine-warp crate; arbitrary angles pass through unrotated, which
    // still yields a usable (if imperfectly aligned) crop.
    match angle_degrees.round() as i64 {
        90 | -270 => image.rotate90(),
        180 | -180 => image.rotate180(),
        270 | -90 => image.rotate270(),
        _ => image.clone(),
    }
}

/// Heuristic pose estimate from six landmark correspondences. Not a true PnP
/// solve against a 3D template (§4.3 calls for that against a real canonical
/// face) — an approximation good enough for the orientation gate when no
/// dedicated pose-estimation backend is wired in.
fn estimate_head_pose(landmarks: &[(f64, f64)]) -> Option<HeadPose> {
    if landmarks.len() < 55 {
        return None;
    }
    let nose = landmarks[30];
    let chin = landmarks[8];
    let left_eye = landmarks[36];
    let right_eye = landmarks[45];
    let left_mouth = landmarks[48];
    let right_mouth = landmarks[54];

    let eye_mid = ((left_eye.0 + right_eye.0) / 2.0, (left_eye.1 + right_eye.1) / 2.0);
    let mouth_mid = ((left_mouth.0 + right_mouth.0) / 2.0, (left_mouth.1 + right_mouth.1) / 2.0);

    let roll = (right_eye.1 - left_eye.1).atan2(right_eye.0 - left_eye.0).to_degrees();

    let eye_span = (right_eye.0 - left_eye.0).abs().max(1.0);
    let nose_offset = nose.0 - eye_mid.0;
    let yaw = (nose_offset / eye_span) * 90.0;

    let face_height = (chin.1 - eye_mid.1).abs().max(1.0);
    let nose_vertical = nose.1 - eye_mid.1;
    let expected_nose_vertical = (mouth_mid.1 - eye_mid.1) * 0.5;
    let pitch = ((nose_vertical - expected_nose_vertical) / face_height) * 90.0;

    Some(HeadPose {
        yaw: yaw.clamp(-90.0, 90.0),
        pitch: pitch.clamp(-90.0, 90.0),
        roll: roll.clamp(-90.0, 90.0),
    })
}

/// blur_variance = variance of a 3x3 Laplacian; brightness = mean luma;
/// contrast = stdev of luma (§4.3).
fn compute_quality(crop: &DynamicImage) -> Quality {
    let gray = crop.to_luma8();
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    if w < 3 || h < 3 {
        return Quality::default();
    }

    let px = |x: i64, y: i64| gray.get_pixel(x as u32, y as u32).0[0] as f64;
    let mut laplacian = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let value =
                4.0 * px(x, y) - px(x - 1, y) - px(x + 1, y) - px(x, y - 1) - px(x, y + 1);
            laplacian.push(value);
        }
    }
    let lap_mean = laplacian.iter().sum::<f64>() / laplacian.len() as f64;
    let blur_variance =
        laplacian.iter().map(|v| (v - lap_mean).powi(2)).sum::<f64>() / laplacian.len() as f64;

    let pixels: Vec<f64> = gray.pixels().map(|p| p.0[0] as f64).collect();
    let brightness = pixels.iter().sum::<f64>() / pixels.len() as f64;
    let contrast_variance =
        pixels.iter().map(|p| (p - brightness).powi(2)).sum::<f64>() / pixels.len() as f64;

    Quality { blur_variance, brightness, contrast: contrast_variance.sqrt() }
}
