pub mod error;
pub mod phash;
pub mod store;

pub use error::ProvenanceError;
pub use phash::{compute_perceptual_hash, hamming_distance_hex};
pub use store::{
    Consent, PointerKind, ProvenanceRegistry, RecordKind, RegistryCheck, RegistryRecord,
    RegistryVerdict, PHASH_DUPLICATE_THRESHOLD,
};
