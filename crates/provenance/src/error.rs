use thiserror::Error;

/// Structural failure kinds for the provenance registry.
///
/// These are internal to operations that can fail in a type-distinct way
/// (persistence I/O, malformed pointers). Policy outcomes like "duplicate" or
/// "restricted" are not errors — they are [`crate::RegistryVerdict`] values.
#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("failed to read registry file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write registry file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("registry file {path} contained invalid JSON: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("pointer {pointer:?} did not resolve to any registry record")]
    PointerNotFound { pointer: String },
}
