/// Moteur vectoriel
///
/// Génération d'embeddings déterministes, index de plus proches voisins,
/// matrice de co-occurrence et profil de goût utilisateur.

pub mod math;
pub mod embedding;
pub mod index;
pub mod cooccurrence;
pub mod taste;

pub use embedding::EmbeddingEngine;
pub use index::VectorIndex;
pub use cooccurrence::CoOccurrenceMatrix;
pub use taste::TasteProfile;
