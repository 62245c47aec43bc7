/// Couche de persistance du moteur
///
/// Le moteur écrit à travers un `KVStore` opaque fourni par l'hôte; l'état
/// mémoire reste autoritaire et les écritures sont coalescées.

pub mod kv;
pub mod debounce;
pub mod feature_store;

pub use kv::{FileKvStore, KVStore, MemoryKvStore};
pub use debounce::Debouncer;
pub use feature_store::FeatureStore;

/// Clés de persistance du moteur
pub mod keys {
    pub const EVENTS: &str = "audiio-ml-events";
    pub const PREFERENCES: &str = "audiio-ml-preferences";
    pub const FEATURE_INDEX: &str = "feature-index";
    pub const FEATURE_PREFIX: &str = "feature:";
    pub const EMBEDDING_INDEX: &str = "embedding-index";
    pub const FINGERPRINT_INDEX: &str = "fingerprint-index-v2";
    pub const COOCCURRENCE: &str = "cooccurrence-matrix";
    pub const TASTE_PROFILE: &str = "taste-profile";
}
