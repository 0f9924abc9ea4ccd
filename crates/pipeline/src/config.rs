//! Typed configuration, built the way `AiServiceConfig::from_env` is: env-var
//! lookups with parsed fallback defaults, plus a plain `Default` for tests.

use std::env;

/// Feature flags recognized by the orchestrator (§4.12).
#[derive(Debug, Clone, Copy, Default)]
pub struct DisableFlags {
    pub disable_reverse_search: bool,
    pub disable_3d: bool,
    pub disable_smoothing: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Fixed embedding dimensionality enforced on every `FaceRecord.embedding`.
    pub embedding_dim: usize,

    /// Similarity verdict thresholds (§4.4).
    pub similarity_high_threshold: f64,
    pub similarity_moderate_threshold: f64,
    /// Orientation gate minimum similarity-to-dominant-cluster (§4.5).
    pub similarity_gate_threshold: f64,

    /// Orientation gate pose thresholds in degrees (§4.5).
    pub max_abs_yaw: f64,
    pub max_abs_pitch: f64,
    pub max_abs_roll: f64,

    /// Perceptual-hash duplicate Hamming distance threshold (§4.1).
    pub phash_hamming_threshold: u32,

    /// Spatial clustering threshold in pixels for landmark merging (§4.7).
    pub landmark_cluster_threshold_px: f64,

    /// DBSCAN-style clustering parameters (§4.4).
    pub cluster_epsilon: f64,
    pub cluster_min_samples: usize,

    /// Laplacian smoothing iterations applied inside C8's fallback fan
    /// triangulation. The orchestrator passes `0` instead of this value
    /// whenever `disable_flags.disable_smoothing` is set.
    pub smoothing_iterations: u32,

    pub disable_flags: DisableFlags,

    /// Path to the provenance registry's persisted JSON file.
    pub registry_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 128,
            similarity_high_threshold: 0.5,
            similarity_moderate_threshold: 0.25,
            similarity_gate_threshold: 0.45,
            max_abs_yaw: 25.0,
            max_abs_pitch: 20.0,
            max_abs_roll: 30.0,
            phash_hamming_threshold: 6,
            landmark_cluster_threshold_px: 10.0,
            cluster_epsilon: 0.5,
            cluster_min_samples: 2,
            smoothing_iterations: 2,
            disable_flags: DisableFlags::default(),
            registry_path: "provenance_registry.json".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            embedding_dim: env_parse("PIPELINE_EMBEDDING_DIM", defaults.embedding_dim),
            similarity_high_threshold: env_parse(
                "PIPELINE_SIMILARITY_HIGH",
                defaults.similarity_high_threshold,
            ),
            similarity_moderate_threshold: env_parse(
                "PIPELINE_SIMILARITY_MODERATE",
                defaults.similarity_moderate_threshold,
            ),
            similarity_gate_threshold: env_parse(
                "PIPELINE_SIMILARITY_GATE",
                defaults.similarity_gate_threshold,
            ),
            max_abs_yaw: env_parse("PIPELINE_MAX_YAW", defaults.max_abs_yaw),
            max_abs_pitch: env_parse("PIPELINE_MAX_PITCH", defaults.max_abs_pitch),
            max_abs_roll: env_parse("PIPELINE_MAX_ROLL", defaults.max_abs_roll),
            phash_hamming_threshold: env_parse(
                "PIPELINE_PHASH_HAMMING_THRESHOLD",
                defaults.phash_hamming_threshold,
            ),
            landmark_cluster_threshold_px: env_parse(
                "PIPELINE_LANDMARK_CLUSTER_PX",
                defaults.landmark_cluster_threshold_px,
            ),
            cluster_epsilon: env_parse("PIPELINE_CLUSTER_EPSILON", defaults.cluster_epsilon),
            cluster_min_samples: env_parse(
                "PIPELINE_CLUSTER_MIN_SAMPLES",
                defaults.cluster_min_samples,
            ),
            smoothing_iterations: env_parse(
                "PIPELINE_SMOOTHING_ITERATIONS",
                defaults.smoothing_iterations,
            ),
            disable_flags: DisableFlags {
                disable_reverse_search: env_bool("PIPELINE_DISABLE_REVERSE_SEARCH", false),
                disable_3d: env_bool("PIPELINE_DISABLE_3D", false),
                disable_smoothing: env_bool("PIPELINE_DISABLE_SMOOTHING", false),
            },
            registry_path: env::var("PIPELINE_REGISTRY_PATH")
                .unwrap_or(defaults.registry_path),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_thresholds() {
        let config = PipelineConfig::default();
        assert_eq!(config.similarity_high_threshold, 0.5);
        assert_eq!(config.similarity_moderate_threshold, 0.25);
        assert_eq!(config.similarity_gate_threshold, 0.45);
        assert_eq!(config.phash_hamming_threshold, 6);
        assert_eq!(config.landmark_cluster_threshold_px, 10.0);
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        env::remove_var("PIPELINE_SIMILARITY_HIGH");
        let config = PipelineConfig::from_env();
        assert_eq!(config.similarity_high_threshold, 0.5);
    }
}
