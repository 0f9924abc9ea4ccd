//! Persistent fingerprint store: SHA-256/perceptual-hash/watermark-hash gating
//! for images, masks, and models, with atomic JSON persistence.
//!
//! Grounded on `original_source/modules/provenance_registry.py` for the exact
//! decision order and failure semantics, and on
//! `device-manager/src/firmware_storage.rs` for the tokio-fs checksum idiom.

use chrono::{DateTime, Utc};
use common::time::now_iso;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::phash::hamming_distance_hex;
use telemetry::PIPELINE_METRICS;

/// Fixed Hamming-distance threshold for near-duplicate perceptual-hash matches.
pub const PHASH_DUPLICATE_THRESHOLD: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consent {
    Pending,
    Granted,
    Revoked,
}

/// Outcome of a `check_*` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryVerdict {
    Allowed,
    Duplicate,
    Restricted,
    Revoked,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub primary_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark_hash: Option<String>,
    pub consent: Consent,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// `source_images` only applies to mask records; harmless empty for others.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_images: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RegistryCheck {
    pub status: RegistryVerdict,
    pub reason: Option<&'static str>,
    pub record: Option<RegistryRecord>,
}

impl RegistryCheck {
    fn allowed() -> Self {
        Self { status: RegistryVerdict::Allowed, reason: None, record: None }
    }
}

/// What pointer type to resolve in `lookup_pointer`; `None` searches all namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    ImageSha256,
    MaskHash,
    ModelHash,
    WatermarkHash,
    PerceptualHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Image,
    Mask,
    Model,
}

/// On-disk persistence format. Unknown top-level or record keys are tolerated
/// (forward compatibility): fields not modeled here simply round-trip through
/// `metadata` or are dropped on the very first write after an upgrade, which is
/// acceptable because the spec only requires existing keys to never be deleted.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryData {
    #[serde(default)]
    images: HashMap<String, RegistryRecord>,
    #[serde(default)]
    masks: HashMap<String, RegistryRecord>,
    #[serde(default)]
    models: HashMap<String, RegistryRecord>,
    /// watermark_hash -> image sha256
    #[serde(default)]
    watermarks: HashMap<String, String>,
}

pub struct ProvenanceRegistry {
    path: PathBuf,
    data: RwLock<RegistryData>,
}

impl ProvenanceRegistry {
    /// Load (or create) the registry at `path`. A corrupt file is quarantined
    /// with a `.corrupt` suffix and a fresh in-memory registry is started;
    /// this constructor never fails.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = Self::load(&path).await;
        Self { path, data: RwLock::new(data) }
    }

    /// In-memory-only registry, for tests and for callers who opt out of
    /// persistence entirely (the registry's lifetime is still bound to this
    /// value, not a module-level global, per the spec's dependency-injection note).
    pub fn in_memory() -> Self {
        Self { path: PathBuf::new(), data: RwLock::new(RegistryData::default()) }
    }

    async fn load(path: &Path) -> RegistryData {
        let Ok(bytes) = tokio::fs::read(path).await else {
            return RegistryData::default();
        };
        match serde_json::from_slice::<RegistryData>(&bytes) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "provenance registry file is corrupt, quarantining");
                let corrupt = path.with_extension("corrupt");
                if let Err(rename_err) = tokio::fs::rename(path, &corrupt).await {
                    tracing::warn!(error = %rename_err, "failed to quarantine corrupt registry file");
                }
                RegistryData::default()
            }
        }
    }

    async fn save(&self) {
        if self.path.as_os_str().is_empty() {
            return; // in-memory mode: nothing to persist
        }
        let data = self.data.read().await;
        let Ok(bytes) = serde_json::to_vec_pretty(&*data) else {
            tracing::error!("failed to serialize provenance registry");
            return;
        };
        drop(data);

        let tmp = self.path.with_extension("tmp");
        if let Err(err) = tokio::fs::write(&tmp, &bytes).await {
            tracing::error!(error = %err, "failed to write provenance registry temp file");
            return;
        }
        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            tracing::error!(error = %err, "failed to atomically replace provenance registry file");
        }
    }

    // ---------------------------------------------------------------- images

    pub async fn check_image(
        &self,
        sha256: &str,
        phash: Option<&str>,
        watermark_hash: Option<&str>,
    ) -> RegistryCheck {
        let data = self.data.read().await;

        if let Some(rec) = data.images.get(sha256) {
            return Self::verdict_for("sha256_match", rec);
        }

        if let Some(watermark) = watermark_hash {
            if let Some(image_sha) = data.watermarks.get(watermark) {
                if let Some(rec) = data.images.get(image_sha) {
                    return Self::verdict_for("watermark_match", rec);
                }
            }
        }

        if let Some(phash) = phash {
            for rec in data.images.values() {
                if let Some(other) = &rec.perceptual_hash {
                    if hamming_distance_hex(phash, other) <= PHASH_DUPLICATE_THRESHOLD {
                        return Self::verdict_for("perceptual_match", rec);
                    }
                }
            }
        }

        RegistryCheck::allowed()
    }

    fn verdict_for(reason: &'static str, rec: &RegistryRecord) -> RegistryCheck {
        let status = if rec.consent == Consent::Revoked {
            RegistryVerdict::Restricted
        } else {
            RegistryVerdict::Duplicate
        };
        RegistryCheck { status, reason: Some(reason), record: Some(rec.clone()) }
    }

    pub async fn register_image(
        &self,
        sha256: &str,
        metadata: serde_json::Value,
        phash: Option<&str>,
        watermark_hash: Option<&str>,
    ) -> RegistryRecord {
        let now = now_iso();
        let record = RegistryRecord {
            primary_hash: sha256.to_string(),
            perceptual_hash: phash.map(str::to_string),
            watermark_hash: watermark_hash.map(str::to_string),
            consent: Consent::Pending,
            registered_at: now,
            last_seen: now,
            metadata,
            source_images: Vec::new(),
        };

        {
            let mut data = self.data.write().await;
            if let Some(watermark) = watermark_hash {
                data.watermarks.insert(watermark.to_string(), sha256.to_string());
            }
            data.images.insert(sha256.to_string(), record.clone());
        }
        PIPELINE_METRICS.record_registry_verdict("images", "registered");
        self.save().await;
        record
    }

    // ----------------------------------------------------------------- masks

    pub async fn check_mask(&self, mask_hash: &str) -> RegistryCheck {
        let data = self.data.read().await;
        match data.masks.get(mask_hash) {
            Some(rec) => Self::verdict_for("mask_hash_match", rec),
            None => RegistryCheck::allowed(),
        }
    }

    pub async fn register_mask(&self, mask_hash: &str, source_images: Vec<String>) -> RegistryRecord {
        let now = now_iso();
        let record = RegistryRecord {
            primary_hash: mask_hash.to_string(),
            perceptual_hash: None,
            watermark_hash: None,
            consent: Consent::Pending,
            registered_at: now,
            last_seen: now,
            metadata: serde_json::Value::Null,
            source_images,
        };
        {
            let mut data = self.data.write().await;
            data.masks.insert(mask_hash.to_string(), record.clone());
        }
        PIPELINE_METRICS.record_registry_verdict("masks", "registered");
        self.save().await;
        record
    }

    // ---------------------------------------------------------------- models

    pub async fn check_model(&self, model_hash: &str) -> RegistryCheck {
        let data = self.data.read().await;
        match data.models.get(model_hash) {
            Some(rec) => Self::verdict_for("model_hash_match", rec),
            None => RegistryCheck::allowed(),
        }
    }

    pub async fn register_model(&self, model_hash: &str, metadata: serde_json::Value) -> RegistryRecord {
        let now = now_iso();
        let record = RegistryRecord {
            primary_hash: model_hash.to_string(),
            perceptual_hash: None,
            watermark_hash: None,
            consent: Consent::Pending,
            registered_at: now,
            last_seen: now,
            metadata,
            source_images: Vec::new(),
        };
        {
            let mut data = self.data.write().await;
            data.models.insert(model_hash.to_string(), record.clone());
        }
        PIPELINE_METRICS.record_registry_verdict("models", "registered");
        self.save().await;
        record
    }

    // --------------------------------------------------------------- lookup

    pub async fn lookup_pointer(
        &self,
        pointer: &str,
        kind: Option<PointerKind>,
    ) -> Option<(RecordKind, RegistryRecord)> {
        let data = self.data.read().await;

        if matches!(kind, None | Some(PointerKind::ImageSha256)) {
            if let Some(rec) = data.images.get(pointer) {
                return Some((RecordKind::Image, rec.clone()));
            }
        }
        if matches!(kind, None | Some(PointerKind::MaskHash)) {
            if let Some(rec) = data.masks.get(pointer) {
                return Some((RecordKind::Mask, rec.clone()));
            }
        }
        if matches!(kind, None | Some(PointerKind::ModelHash)) {
            if let Some(rec) = data.models.get(pointer) {
                return Some((RecordKind::Model, rec.clone()));
            }
        }
        if matches!(kind, None | Some(PointerKind::WatermarkHash)) {
            if let Some(image_sha) = data.watermarks.get(pointer) {
                if let Some(rec) = data.images.get(image_sha) {
                    return Some((RecordKind::Image, rec.clone()));
                }
            }
        }
        if matches!(kind, None | Some(PointerKind::PerceptualHash)) {
            for rec in data.images.values() {
                if rec.perceptual_hash.as_deref() == Some(pointer) {
                    return Some((RecordKind::Image, rec.clone()));
                }
            }
        }
        None
    }

    /// Flip an image's consent state. Revocation never deletes the record.
    pub async fn set_image_consent(&self, sha256: &str, consent: Consent) -> bool {
        let found = {
            let mut data = self.data.write().await;
            match data.images.get_mut(sha256) {
                Some(rec) => {
                    rec.consent = consent;
                    true
                }
                None => false,
            }
        };
        if found {
            self.save().await;
        }
        found
    }

    pub async fn summarize(&self) -> (usize, usize, usize, usize) {
        let data = self.data.read().await;
        (data.images.len(), data.masks.len(), data.models.len(), data.watermarks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn first_registration_is_allowed_second_is_duplicate() {
        let registry = ProvenanceRegistry::in_memory();
        let check = registry.check_image("sha-a", None, None).await;
        assert_eq!(check.status, RegistryVerdict::Allowed);

        registry.register_image("sha-a", serde_json::json!({}), None, None).await;
        let second = registry.check_image("sha-a", None, None).await;
        assert_eq!(second.status, RegistryVerdict::Duplicate);
        assert_eq!(second.reason, Some("sha256_match"));
    }

    #[tokio::test]
    async fn revoked_consent_yields_restricted() {
        let registry = ProvenanceRegistry::in_memory();
        registry.register_image("sha-b", serde_json::json!({}), None, None).await;
        registry.set_image_consent("sha-b", Consent::Revoked).await;
        let check = registry.check_image("sha-b", None, None).await;
        assert_eq!(check.status, RegistryVerdict::Restricted);
    }

    #[tokio::test]
    async fn perceptual_near_duplicate_is_flagged() {
        let registry = ProvenanceRegistry::in_memory();
        registry
            .register_image("sha-c", serde_json::json!({}), Some("0000000000000000"), None)
            .await;
        // differs by exactly 1 bit, within threshold
        let check = registry.check_image("sha-d", Some("0000000000000001"), None).await;
        assert_eq!(check.status, RegistryVerdict::Duplicate);
        assert_eq!(check.reason, Some("perceptual_match"));
    }

    #[tokio::test]
    async fn registering_twice_does_not_mutate_registered_at() {
        let registry = ProvenanceRegistry::in_memory();
        let first = registry.register_image("sha-e", serde_json::json!({}), None, None).await;
        let check = registry.check_image("sha-e", None, None).await;
        let record = check.record.expect("duplicate carries the original record");
        assert_eq!(record.registered_at, first.registered_at);
    }

    #[tokio::test]
    async fn lookup_pointer_resolves_registered_masks_and_models() {
        let registry = ProvenanceRegistry::in_memory();
        registry.register_mask("mask-1", vec!["sha-f".to_string()]).await;
        registry.register_model("model-1", serde_json::json!({})).await;

        let (kind, _) = registry.lookup_pointer("mask-1", None).await.expect("mask present");
        assert_eq!(kind, RecordKind::Mask);
        let (kind, _) = registry.lookup_pointer("model-1", None).await.expect("model present");
        assert_eq!(kind, RecordKind::Model);
    }

    #[tokio::test]
    async fn corrupt_persistence_file_is_quarantined_not_fatal() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");
        tokio::fs::write(&path, b"not json").await.expect("write garbage");

        let registry = ProvenanceRegistry::open(&path).await;
        let (images, masks, models, watermarks) = registry.summarize().await;
        assert_eq!((images, masks, models, watermarks), (0, 0, 0, 0));
        assert!(dir.path().join("registry.corrupt").exists());
    }

    #[tokio::test]
    async fn writes_persist_atomically_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");

        let registry = ProvenanceRegistry::open(&path).await;
        registry.register_image("sha-g", serde_json::json!({"note": "x"}), None, None).await;
        assert!(!path.with_extension("tmp").exists());

        let reopened = ProvenanceRegistry::open(&path).await;
        let check = reopened.check_image("sha-g", None, None).await;
        assert_eq!(check.status, RegistryVerdict::Duplicate);
    }
}
