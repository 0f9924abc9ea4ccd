//! Facial-image forensics pipeline: decode, detect, cross-reference, and
//! synthesize an intelligence summary from a batch of user-submitted images.

pub mod anomalies;
pub mod config;
pub mod decode;
pub mod detect;
pub mod error;
pub mod isolate;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod orientation;
pub mod refine;
pub mod reverse_search;
pub mod similarity;
pub mod synthesize;

pub use config::{DisableFlags, PipelineConfig};
pub use error::PipelineError;
pub use model::PipelineState;
pub use orchestrator::{PipelineOrchestrator, ProgressEvent};

use provenance::ProvenanceRegistry;
use tokio_util::sync::CancellationToken;

/// Convenience entry point: run one batch with a fresh orchestrator and no
/// progress reporting or external cancellation. Callers that need progress
/// events, cancellation, or a custom [`reverse_search::ReverseSearchDriver`]
/// should build a [`PipelineOrchestrator`] directly instead.
pub async fn process(images: Vec<Vec<u8>>, user_id: String, config: PipelineConfig, registry: ProvenanceRegistry) -> PipelineState {
    let orchestrator = PipelineOrchestrator::new(config, registry);
    orchestrator.process(images, user_id, CancellationToken::new(), |_| {}).await
}
