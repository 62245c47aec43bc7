/// Tables de règles humeur, activité et sérendipité
///
/// Les profils cibles sont des données, pas des branches ad hoc: chaque
/// activité déclare ses plages idéales d'énergie, de danceability et de
/// tempo.

use crate::learning::preferences::PreferenceSnapshot;
use crate::model::{Activity, AggregatedFeatures, MoodCategory, Track};

/// Plages cibles d'une activité
struct ActivityProfile {
    energy: (f32, f32),
    danceability: (f32, f32),
    bpm: (f32, f32),
}

fn profile_for(activity: Activity) -> ActivityProfile {
    match activity {
        Activity::Workout => ActivityProfile {
            energy: (0.7, 1.0),
            danceability: (0.5, 1.0),
            bpm: (120.0, 180.0),
        },
        Activity::Study => ActivityProfile {
            energy: (0.0, 0.4),
            danceability: (0.0, 0.5),
            bpm: (50.0, 110.0),
        },
        Activity::Party => ActivityProfile {
            energy: (0.6, 1.0),
            danceability: (0.7, 1.0),
            bpm: (100.0, 140.0),
        },
        Activity::Relax => ActivityProfile {
            energy: (0.0, 0.5),
            danceability: (0.0, 0.6),
            bpm: (60.0, 110.0),
        },
        Activity::Commute => ActivityProfile {
            energy: (0.3, 0.8),
            danceability: (0.3, 0.8),
            bpm: (80.0, 140.0),
        },
        Activity::Sleep => ActivityProfile {
            energy: (0.0, 0.25),
            danceability: (0.0, 0.3),
            bpm: (40.0, 90.0),
        },
    }
}

/// Proximité d'une valeur à une plage: 1.0 dedans, décroît linéairement
fn range_closeness(value: f32, (lo, hi): (f32, f32), falloff: f32) -> f32 {
    if value >= lo && value <= hi {
        1.0
    } else {
        let distance = if value < lo { lo - value } else { value - hi };
        (1.0 - distance / falloff).max(0.0)
    }
}

/// Adéquation d'une piste à l'humeur déclarée, dans [0, 1]
///
/// Distance valence/arousal quand l'émotion est connue, proxys audio
/// sinon. None quand aucune donnée n'éclaire le jugement.
pub fn mood_match(user_mood: MoodCategory, features: &AggregatedFeatures) -> Option<f32> {
    let (target_valence, target_arousal) = user_mood.valence_arousal();
    if let Some(emotion) = &features.emotion {
        if emotion.primary_category == user_mood {
            return Some(1.0);
        }
        let distance = ((emotion.valence - target_valence).powi(2)
            + (emotion.arousal - target_arousal).powi(2))
        .sqrt();
        let score = (1.0 - distance / std::f32::consts::SQRT_2).max(0.0);
        // Pondéré par la confiance du provider d'émotion
        return Some(score * emotion.confidence + 0.5 * (1.0 - emotion.confidence));
    }
    let audio = features.audio.as_ref()?;
    let (valence, energy) = (audio.valence?, audio.energy?);
    let distance =
        ((valence - target_valence).powi(2) + (energy - target_arousal).powi(2)).sqrt();
    Some((1.0 - distance / std::f32::consts::SQRT_2).max(0.0))
}

/// Adéquation d'une piste à l'activité en cours, dans [0, 1]
pub fn activity_match(activity: Activity, features: &AggregatedFeatures) -> Option<f32> {
    let audio = features.audio.as_ref()?;
    let profile = profile_for(activity);
    let mut scores = Vec::new();
    if let Some(energy) = audio.energy {
        scores.push(range_closeness(energy, profile.energy, 0.4));
    }
    if let Some(danceability) = audio.danceability {
        scores.push(range_closeness(danceability, profile.danceability, 0.4));
    }
    if let Some(bpm) = audio.bpm {
        scores.push(range_closeness(bpm, profile.bpm, 60.0));
    }
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f32>() / scores.len() as f32)
}

/// Heuristique de sérendipité: inattendu mais pertinent
///
/// Nouveauté (artiste/genre hors historique) croisée avec un signal de
/// pertinence (genre voisin connu et apprécié).
pub fn serendipity_score(track: &Track, preferences: &PreferenceSnapshot) -> Option<f32> {
    let artist = track.primary_artist()?;
    let novelty = if !preferences.knows_artist(artist) { 1.0 } else { 0.2 };
    let relevance = track
        .genres
        .iter()
        .map(|g| preferences.genre_affinity(g))
        .fold(0.0f32, f32::max)
        .max(0.0);
    if relevance <= 0.0 && novelty >= 1.0 {
        // Inconnu de bout en bout: surprenant mais sans ancrage
        return Some(0.3);
    }
    Some((novelty * (0.4 + 0.6 * relevance)).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AudioDescriptors, EmotionDescriptors};

    fn features_with_audio(energy: f32, valence: f32, bpm: f32) -> AggregatedFeatures {
        let mut features = AggregatedFeatures::empty("t", 3);
        features.audio = Some(AudioDescriptors {
            energy: Some(energy),
            valence: Some(valence),
            danceability: Some(0.6),
            bpm: Some(bpm),
            ..Default::default()
        });
        features
    }

    #[test]
    fn test_exact_emotion_match_is_full() {
        let mut features = AggregatedFeatures::empty("t", 3);
        features.emotion = Some(EmotionDescriptors {
            valence: 0.85,
            arousal: 0.65,
            primary_category: MoodCategory::Happy,
            confidence: 0.9,
        });
        assert_eq!(mood_match(MoodCategory::Happy, &features), Some(1.0));
    }

    #[test]
    fn test_mood_match_audio_proxy() {
        let happy_track = features_with_audio(0.7, 0.9, 120.0);
        let sad_track = features_with_audio(0.2, 0.1, 70.0);
        let happy = mood_match(MoodCategory::Happy, &happy_track).unwrap();
        let mismatched = mood_match(MoodCategory::Happy, &sad_track).unwrap();
        assert!(happy > mismatched);
    }

    #[test]
    fn test_mood_match_without_data_is_none() {
        let features = AggregatedFeatures::empty("t", 3);
        assert!(mood_match(MoodCategory::Calm, &features).is_none());
    }

    #[test]
    fn test_activity_workout_prefers_high_energy() {
        let intense = features_with_audio(0.9, 0.6, 150.0);
        let sleepy = features_with_audio(0.1, 0.3, 60.0);
        let high = activity_match(Activity::Workout, &intense).unwrap();
        let low = activity_match(Activity::Workout, &sleepy).unwrap();
        assert!(high > low);
        assert_eq!(high, 1.0);
    }

    #[test]
    fn test_serendipity_rewards_new_artist_in_loved_genre() {
        let mut preferences = PreferenceSnapshot::default();
        preferences
            .genres
            .entry("jazz".to_string())
            .or_default()
            .affinity = 80.0;
        let track = Track {
            track_id: "t".to_string(),
            title: "T".to_string(),
            artists: vec!["Newcomer".to_string()],
            duration_s: 100.0,
            album: None,
            release_year: None,
            genres: vec!["jazz".to_string()],
            tags: vec![],
            audio: None,
        };
        let fresh = serendipity_score(&track, &preferences).unwrap();
        // Même piste mais artiste déjà connu
        preferences.artists.entry("Newcomer".to_string()).or_default();
        let known = serendipity_score(&track, &preferences).unwrap();
        assert!(fresh > known);
    }
}
