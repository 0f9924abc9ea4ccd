use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Images currently being processed across all in-flight batches.
    pub static ref PIPELINE_IMAGES_IN_FLIGHT: IntGauge = {
        let metric = IntGauge::new("pipeline_images_in_flight", "Images currently being processed")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    /// Images processed, partitioned by outcome (accepted/duplicate/dropped/error).
    pub static ref PIPELINE_IMAGES_PROCESSED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("pipeline_images_processed_total", "Total images processed by outcome"),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    /// Faces detected, partitioned by which backend produced them.
    pub static ref PIPELINE_FACES_DETECTED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("pipeline_faces_detected_total", "Total faces detected by backend"),
            &["detection_model"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    /// Provenance registry verdicts, partitioned by namespace and verdict.
    pub static ref PIPELINE_REGISTRY_VERDICTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("pipeline_registry_verdicts_total", "Provenance registry verdicts"),
            &["namespace", "verdict"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    /// Wall-clock duration of each pipeline stage.
    pub static ref PIPELINE_STAGE_DURATION: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new("pipeline_stage_duration_seconds", "Duration of each pipeline stage")
                .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["stage"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    /// End-to-end batch processing duration.
    pub static ref PIPELINE_BATCH_DURATION: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new("pipeline_batch_duration_seconds", "Duration of a full batch run")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    /// Reverse-image-search driver outcomes.
    pub static ref PIPELINE_REVERSE_SEARCH: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("pipeline_reverse_search_total", "Reverse-image-search driver outcomes"),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Namespaced handle so callers don't have to import every static individually.
pub struct PipelineMetricsHandle;

pub static PIPELINE_METRICS: PipelineMetricsHandle = PipelineMetricsHandle;

impl PipelineMetricsHandle {
    pub fn record_image_outcome(&self, outcome: &str) {
        PIPELINE_IMAGES_PROCESSED.with_label_values(&[outcome]).inc();
    }

    pub fn record_faces_detected(&self, detection_model: &str, count: u64) {
        PIPELINE_FACES_DETECTED
            .with_label_values(&[detection_model])
            .inc_by(count);
    }

    pub fn record_registry_verdict(&self, namespace: &str, verdict: &str) {
        PIPELINE_REGISTRY_VERDICTS
            .with_label_values(&[namespace, verdict])
            .inc();
    }

    pub fn record_stage_duration(&self, stage: &str, seconds: f64) {
        PIPELINE_STAGE_DURATION.with_label_values(&[stage]).observe(seconds);
    }

    pub fn record_batch_duration(&self, seconds: f64) {
        PIPELINE_BATCH_DURATION.observe(seconds);
    }

    pub fn record_reverse_search(&self, status: &str) {
        PIPELINE_REVERSE_SEARCH.with_label_values(&[status]).inc();
    }
}

/// Encode all registered metrics in the Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("failed to convert metrics to UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_outcomes_accumulate() {
        PIPELINE_METRICS.record_image_outcome("accepted");
        assert!(PIPELINE_IMAGES_PROCESSED.with_label_values(&["accepted"]).get() >= 1);
    }

    #[test]
    fn encode_metrics_succeeds() {
        let encoded = encode_metrics().expect("metrics should encode");
        assert!(encoded.contains("pipeline_"));
    }
}
