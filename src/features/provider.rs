/// Contrat des providers de features
///
/// Un provider est un enregistrement de capacités: la présence du bit de
/// capacité conditionne le dispatch de la méthode correspondante.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::library::LibrarySource;
use crate::model::{
    AudioDescriptors, Embedding, EmotionDescriptors, FeatureKind, GenreDescriptors,
    LyricsDescriptors,
};
use crate::storage::KVStore;

/// Mode de fusion d'un provider non-core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderMode {
    /// Chaque genre de feature fourni remplace intégralement l'existant
    Override,
    /// Ne remplit que les champs absents
    Supplement,
}

impl Default for ProviderMode {
    fn default() -> Self {
        ProviderMode::Supplement
    }
}

/// Bitset des genres de features qu'un provider sait fournir
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn new(kinds: &[FeatureKind]) -> Self {
        let mut bits = 0u8;
        for kind in kinds {
            bits |= kind.bit();
        }
        Self(bits)
    }

    pub fn all() -> Self {
        Self::new(&FeatureKind::ALL)
    }

    pub fn has(self, kind: FeatureKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn kinds(self) -> Vec<FeatureKind> {
        FeatureKind::ALL.iter().copied().filter(|k| self.has(*k)).collect()
    }
}

/// Identité et paramètres de dispatch d'un provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    /// Priorité: ≤ seuil core → provider core, sinon plugin
    pub priority: i32,
    /// Significatif seulement pour les providers plugin
    pub mode: ProviderMode,
    pub capabilities: Capabilities,
    pub timeout: Duration,
}

/// Accès aux collaborateurs de l'hôte, passé à l'initialisation
#[derive(Clone, Default)]
pub struct ProviderEndpoints {
    pub library: Option<Arc<dyn LibrarySource>>,
    pub kv: Option<Arc<dyn KVStore>>,
}

/// Sortie partielle d'un provider pour une piste
#[derive(Debug, Clone, Default)]
pub struct ProviderOutput {
    pub audio: Option<AudioDescriptors>,
    pub emotion: Option<EmotionDescriptors>,
    pub lyrics: Option<LyricsDescriptors>,
    pub genre: Option<GenreDescriptors>,
    pub embedding: Option<Embedding>,
    pub fingerprint: Option<String>,
    /// Confiance globale du provider pour cette piste
    pub confidence: f32,
}

impl ProviderOutput {
    /// Genres de features effectivement portés par cette sortie
    pub fn supplied_kinds(&self) -> Vec<FeatureKind> {
        let mut kinds = Vec::new();
        if self.audio.is_some() {
            kinds.push(FeatureKind::Audio);
        }
        if self.emotion.is_some() {
            kinds.push(FeatureKind::Emotion);
        }
        if self.lyrics.is_some() {
            kinds.push(FeatureKind::Lyrics);
        }
        if self.embedding.is_some() {
            kinds.push(FeatureKind::Embedding);
        }
        if self.genre.is_some() {
            kinds.push(FeatureKind::Genre);
        }
        if self.fingerprint.is_some() {
            kinds.push(FeatureKind::Fingerprint);
        }
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.supplied_kinds().is_empty()
    }
}

/// Provider de features, implémenté par les extensions
///
/// Toutes les méthodes de feature ont un défaut vide: un provider
/// n'implémente que ce que ses capacités annoncent.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    fn descriptor(&self) -> ProviderDescriptor;

    async fn get_audio_features(&self, _track_id: &str) -> Result<Option<AudioDescriptors>> {
        Ok(None)
    }

    async fn get_emotion_features(&self, _track_id: &str) -> Result<Option<EmotionDescriptors>> {
        Ok(None)
    }

    async fn get_lyrics_features(&self, _track_id: &str) -> Result<Option<LyricsDescriptors>> {
        Ok(None)
    }

    async fn get_genre_features(&self, _track_id: &str) -> Result<Option<GenreDescriptors>> {
        Ok(None)
    }

    async fn get_embedding(&self, _track_id: &str) -> Result<Option<Embedding>> {
        Ok(None)
    }

    async fn get_fingerprint(&self, _track_id: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn initialize(&self, _endpoints: ProviderEndpoints) -> Result<()> {
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_bitset() {
        let caps = Capabilities::new(&[FeatureKind::Audio, FeatureKind::Genre]);
        assert!(caps.has(FeatureKind::Audio));
        assert!(caps.has(FeatureKind::Genre));
        assert!(!caps.has(FeatureKind::Lyrics));
        assert_eq!(caps.kinds().len(), 2);
    }

    #[test]
    fn test_default_mode_is_supplement() {
        assert_eq!(ProviderMode::default(), ProviderMode::Supplement);
    }
}
