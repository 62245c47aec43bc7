/// Features agrégées par piste: émotion, paroles, genre, embedding
///
/// Un enregistrement est estampillé avec la version d'analyse courante à
/// l'écriture; à la lecture, une version antérieure vaut absence.

use serde::{Deserialize, Serialize};

use crate::model::track::AudioDescriptors;

/// Catégories d'humeur reconnues par les providers d'émotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoodCategory {
    Happy,
    Sad,
    Energetic,
    Calm,
    Angry,
    Romantic,
    Melancholic,
    Uplifting,
    Dark,
    Peaceful,
    Anxious,
    Confident,
    Nostalgic,
    Dreamy,
    Aggressive,
    Playful,
}

impl MoodCategory {
    pub const ALL: [MoodCategory; 16] = [
        MoodCategory::Happy,
        MoodCategory::Sad,
        MoodCategory::Energetic,
        MoodCategory::Calm,
        MoodCategory::Angry,
        MoodCategory::Romantic,
        MoodCategory::Melancholic,
        MoodCategory::Uplifting,
        MoodCategory::Dark,
        MoodCategory::Peaceful,
        MoodCategory::Anxious,
        MoodCategory::Confident,
        MoodCategory::Nostalgic,
        MoodCategory::Dreamy,
        MoodCategory::Aggressive,
        MoodCategory::Playful,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoodCategory::Happy => "happy",
            MoodCategory::Sad => "sad",
            MoodCategory::Energetic => "energetic",
            MoodCategory::Calm => "calm",
            MoodCategory::Angry => "angry",
            MoodCategory::Romantic => "romantic",
            MoodCategory::Melancholic => "melancholic",
            MoodCategory::Uplifting => "uplifting",
            MoodCategory::Dark => "dark",
            MoodCategory::Peaceful => "peaceful",
            MoodCategory::Anxious => "anxious",
            MoodCategory::Confident => "confident",
            MoodCategory::Nostalgic => "nostalgic",
            MoodCategory::Dreamy => "dreamy",
            MoodCategory::Aggressive => "aggressive",
            MoodCategory::Playful => "playful",
        }
    }

    /// Résolution d'une chaîne libre vers une catégorie
    ///
    /// Fallback: correspondance exacte, puis sous-chaîne, puis None.
    pub fn parse(input: &str) -> Option<MoodCategory> {
        let needle = input.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        for mood in MoodCategory::ALL {
            if mood.as_str() == needle {
                return Some(mood);
            }
        }
        for mood in MoodCategory::ALL {
            if needle.contains(mood.as_str()) || mood.as_str().contains(needle.as_str()) {
                return Some(mood);
            }
        }
        None
    }

    /// Position (valence, arousal) canonique de la catégorie
    pub fn valence_arousal(&self) -> (f32, f32) {
        match self {
            MoodCategory::Happy => (0.85, 0.65),
            MoodCategory::Sad => (0.15, 0.25),
            MoodCategory::Energetic => (0.70, 0.95),
            MoodCategory::Calm => (0.60, 0.15),
            MoodCategory::Angry => (0.10, 0.90),
            MoodCategory::Romantic => (0.75, 0.40),
            MoodCategory::Melancholic => (0.25, 0.30),
            MoodCategory::Uplifting => (0.90, 0.75),
            MoodCategory::Dark => (0.15, 0.55),
            MoodCategory::Peaceful => (0.70, 0.10),
            MoodCategory::Anxious => (0.25, 0.75),
            MoodCategory::Confident => (0.70, 0.70),
            MoodCategory::Nostalgic => (0.45, 0.30),
            MoodCategory::Dreamy => (0.60, 0.25),
            MoodCategory::Aggressive => (0.15, 0.95),
            MoodCategory::Playful => (0.80, 0.70),
        }
    }
}

/// Descripteurs émotionnels d'une piste
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionDescriptors {
    pub valence: f32, // 0.0 - 1.0
    pub arousal: f32, // 0.0 - 1.0
    pub primary_category: MoodCategory,
    pub confidence: f32, // 0.0 - 1.0
}

/// Tag thématique extrait des paroles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeTag {
    pub theme: String,
    pub confidence: f32, // 0.0 - 1.0
}

/// Descripteurs extraits des paroles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsDescriptors {
    pub sentiment: f32, // -1.0 - 1.0
    pub confidence: f32,
    pub themes: Vec<ThemeTag>,
    pub emotional_intensity: f32, // 0.0 - 1.0
    pub language: Option<String>,
}

/// Origine d'une classification de genre
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenreSource {
    Metadata,
    Inferred,
}

/// Descripteurs de genre
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenreDescriptors {
    pub primary_genre: String,
    pub primary_confidence: f32, // 0.0 - 1.0
    /// Prédictions classées par confiance décroissante
    pub predictions: Vec<(String, f32)>,
    pub source: GenreSource,
}

/// Vecteur dense L2-normalisé représentant une piste
///
/// Invariant: ‖vector‖ = 1 ± 1e-4 pour tout embedding stocké.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub version: u32,
    pub created_at: i64, // ms epoch
    pub updated_at: i64, // ms epoch
    /// Composantes ayant contribué (audio, genre, tags, collaborative...)
    pub components: Vec<String>,
    pub confidence: f32, // 0.0 - 1.0
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Genre de feature qu'un provider peut fournir
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    Audio,
    Emotion,
    Lyrics,
    Embedding,
    Genre,
    Fingerprint,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 6] = [
        FeatureKind::Audio,
        FeatureKind::Emotion,
        FeatureKind::Lyrics,
        FeatureKind::Embedding,
        FeatureKind::Genre,
        FeatureKind::Fingerprint,
    ];

    pub fn bit(self) -> u8 {
        match self {
            FeatureKind::Audio => 1 << 0,
            FeatureKind::Emotion => 1 << 1,
            FeatureKind::Lyrics => 1 << 2,
            FeatureKind::Embedding => 1 << 3,
            FeatureKind::Genre => 1 << 4,
            FeatureKind::Fingerprint => 1 << 5,
        }
    }
}

/// Trace de provenance: quel provider a fourni quels champs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub provider_id: String,
    pub fields_supplied: Vec<FeatureKind>,
    pub confidence: f32,
}

/// Enregistrement de features agrégées pour une piste
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedFeatures {
    pub track_id: String,
    pub audio: Option<AudioDescriptors>,
    pub emotion: Option<EmotionDescriptors>,
    pub lyrics: Option<LyricsDescriptors>,
    pub genre: Option<GenreDescriptors>,
    pub embedding: Option<Embedding>,
    pub fingerprint: Option<String>,
    pub provenance: Vec<ProvenanceEntry>,
    pub last_updated: i64, // ms epoch
    pub analysis_version: u32,
}

impl AggregatedFeatures {
    pub fn empty(track_id: impl Into<String>, analysis_version: u32) -> Self {
        Self {
            track_id: track_id.into(),
            audio: None,
            emotion: None,
            lyrics: None,
            genre: None,
            embedding: None,
            fingerprint: None,
            provenance: Vec::new(),
            last_updated: 0,
            analysis_version,
        }
    }

    /// Un enregistrement sans aucune feature ne vaut pas la peine d'être persisté
    pub fn has_any(&self) -> bool {
        self.audio.is_some()
            || self.emotion.is_some()
            || self.lyrics.is_some()
            || self.genre.is_some()
            || self.embedding.is_some()
            || self.fingerprint.is_some()
    }

    /// Fusion champ à champ: les champs absents de `self` sont pris
    /// dans `incoming`, les champs présents sont préservés.
    pub fn merge_missing_from(&mut self, incoming: &AggregatedFeatures) {
        match (&mut self.audio, &incoming.audio) {
            (Some(mine), Some(theirs)) => mine.supplement_from(theirs),
            (slot @ None, Some(theirs)) => *slot = Some(theirs.clone()),
            _ => {}
        }
        if self.emotion.is_none() {
            self.emotion = incoming.emotion.clone();
        }
        if self.lyrics.is_none() {
            self.lyrics = incoming.lyrics.clone();
        }
        if self.genre.is_none() {
            self.genre = incoming.genre.clone();
        }
        if self.embedding.is_none() {
            self.embedding = incoming.embedding.clone();
        }
        if self.fingerprint.is_none() {
            self.fingerprint = incoming.fingerprint.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mood_parse_exact_then_substring() {
        assert_eq!(MoodCategory::parse("happy"), Some(MoodCategory::Happy));
        assert_eq!(MoodCategory::parse("  CALM "), Some(MoodCategory::Calm));
        assert_eq!(MoodCategory::parse("very energetic mix"), Some(MoodCategory::Energetic));
        assert_eq!(MoodCategory::parse("zzz-unknown"), None);
    }

    #[test]
    fn test_feature_kind_bits_distinct() {
        let mut seen = 0u8;
        for kind in FeatureKind::ALL {
            assert_eq!(seen & kind.bit(), 0);
            seen |= kind.bit();
        }
    }

    #[test]
    fn test_merge_missing_preserves_existing() {
        let mut a = AggregatedFeatures::empty("t1", 3);
        a.fingerprint = Some("fp-a".to_string());
        let mut b = AggregatedFeatures::empty("t1", 3);
        b.fingerprint = Some("fp-b".to_string());
        b.genre = Some(GenreDescriptors {
            primary_genre: "jazz".to_string(),
            primary_confidence: 0.9,
            predictions: vec![],
            source: GenreSource::Inferred,
        });
        a.merge_missing_from(&b);
        assert_eq!(a.fingerprint.as_deref(), Some("fp-a"));
        assert_eq!(a.genre.as_ref().map(|g| g.primary_genre.as_str()), Some("jazz"));
    }
}
