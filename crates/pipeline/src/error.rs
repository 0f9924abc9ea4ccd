use thiserror::Error;

/// Structural failure kinds for internal stage helpers.
///
/// None of these cross the `process()` boundary as an `Err` except
/// [`PipelineError::Orchestrator`] — every other recoverable failure is
/// recorded as data on the entity that owns it (see the `error` fields on
/// [`crate::model::IngestedImage`] and friends) rather than propagated.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("reverse-search driver error: {0}")]
    Driver(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),
}
