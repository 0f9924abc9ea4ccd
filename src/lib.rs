//! Facade crate aggregating the forensics pipeline's public surface, the way
//! the upstream `quadrant-vms` root package aggregates its service crates.

pub use pipeline::{
    process, DisableFlags, PipelineConfig, PipelineError, PipelineOrchestrator, PipelineState,
    ProgressEvent,
};
pub use provenance::{ProvenanceRegistry, RegistryVerdict};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
