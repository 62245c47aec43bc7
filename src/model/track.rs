/// Pistes et descripteurs audio pré-calculés
///
/// Les pistes sont créées par la bibliothèque externe; le moteur ne fait
/// que les lire.

use serde::{Deserialize, Serialize};

/// Mode harmonique d'une piste
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMode {
    Major,
    Minor,
}

/// Descripteurs audio numériques d'une piste
///
/// Tous les champs sont optionnels: une valeur absente se propage comme
/// absente, jamais remplacée par un défaut à la source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioDescriptors {
    pub bpm: Option<f32>,              // 20 - 300
    pub key: Option<u8>,               // pitch class 0-11
    pub mode: Option<KeyMode>,
    pub energy: Option<f32>,           // 0.0 - 1.0
    pub valence: Option<f32>,          // 0.0 - 1.0
    pub danceability: Option<f32>,     // 0.0 - 1.0
    pub acousticness: Option<f32>,     // 0.0 - 1.0
    pub instrumentalness: Option<f32>, // 0.0 - 1.0
    pub speechiness: Option<f32>,      // 0.0 - 1.0
    pub liveness: Option<f32>,         // 0.0 - 1.0
    pub loudness: Option<f32>,         // dB, typiquement -60..0
    pub spectral_centroid: Option<f32>,
    pub zero_crossing_rate: Option<f32>,
    pub mfcc: Option<Vec<f32>>,
    pub analysis_confidence: Option<f32>, // 0.0 - 1.0
}

impl AudioDescriptors {
    /// Complète champ par champ les sous-champs absents depuis `other`
    pub fn supplement_from(&mut self, other: &AudioDescriptors) {
        if self.bpm.is_none() { self.bpm = other.bpm; }
        if self.key.is_none() { self.key = other.key; }
        if self.mode.is_none() { self.mode = other.mode; }
        if self.energy.is_none() { self.energy = other.energy; }
        if self.valence.is_none() { self.valence = other.valence; }
        if self.danceability.is_none() { self.danceability = other.danceability; }
        if self.acousticness.is_none() { self.acousticness = other.acousticness; }
        if self.instrumentalness.is_none() { self.instrumentalness = other.instrumentalness; }
        if self.speechiness.is_none() { self.speechiness = other.speechiness; }
        if self.liveness.is_none() { self.liveness = other.liveness; }
        if self.loudness.is_none() { self.loudness = other.loudness; }
        if self.spectral_centroid.is_none() { self.spectral_centroid = other.spectral_centroid; }
        if self.zero_crossing_rate.is_none() { self.zero_crossing_rate = other.zero_crossing_rate; }
        if self.mfcc.is_none() { self.mfcc = other.mfcc.clone(); }
        if self.analysis_confidence.is_none() { self.analysis_confidence = other.analysis_confidence; }
    }

    /// Nombre de descripteurs présents parmi les cinq principaux
    pub fn primary_field_count(&self) -> usize {
        [
            self.energy.is_some(),
            self.valence.is_some(),
            self.danceability.is_some(),
            self.bpm.is_some(),
            self.acousticness.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.bpm.is_none()
            && self.key.is_none()
            && self.mode.is_none()
            && self.energy.is_none()
            && self.valence.is_none()
            && self.danceability.is_none()
            && self.acousticness.is_none()
            && self.instrumentalness.is_none()
            && self.speechiness.is_none()
            && self.liveness.is_none()
            && self.loudness.is_none()
            && self.spectral_centroid.is_none()
            && self.zero_crossing_rate.is_none()
            && self.mfcc.is_none()
    }
}

/// Piste musicale, identifiée par un id opaque globalement unique
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub track_id: String,
    pub title: String,
    /// Artistes, ordonnés (le premier est l'artiste principal)
    pub artists: Vec<String>,
    pub duration_s: f32,
    pub album: Option<String>,
    pub release_year: Option<i32>,
    /// Genres déclarés par la bibliothèque
    pub genres: Vec<String>,
    /// Tags libres (humeur, contexte...)
    pub tags: Vec<String>,
    /// Descripteurs audio pré-calculés, si disponibles
    pub audio: Option<AudioDescriptors>,
}

impl Track {
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(|s| s.as_str())
    }

    pub fn primary_genre(&self) -> Option<&str> {
        self.genres.first().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplement_fills_only_missing() {
        let mut base = AudioDescriptors {
            energy: Some(0.8),
            ..Default::default()
        };
        let incoming = AudioDescriptors {
            energy: Some(0.2),
            valence: Some(0.6),
            ..Default::default()
        };
        base.supplement_from(&incoming);
        assert_eq!(base.energy, Some(0.8)); // champ présent préservé
        assert_eq!(base.valence, Some(0.6)); // champ absent complété
    }

    #[test]
    fn test_primary_field_count() {
        let d = AudioDescriptors {
            energy: Some(0.5),
            valence: Some(0.5),
            bpm: Some(120.0),
            ..Default::default()
        };
        assert_eq!(d.primary_field_count(), 3);
    }
}
