/// Vecteur de features pour le prédicteur
///
/// 16 buckets de genre multi-hot + 12 champs audio normalisés + 6
/// statistiques utilisateur + 5 features de contexte = 39 dimensions,
/// toutes dans [0, 1].

use std::f32::consts::PI;

use crate::learning::preferences::PreferenceSnapshot;
use crate::model::{AggregatedFeatures, Track};

/// Buckets de genre canoniques; le dernier est "other"
pub const CANONICAL_GENRES: [&str; 15] = [
    "rock", "pop", "electronic", "hip-hop", "jazz", "classical", "metal", "folk", "rnb",
    "country", "blues", "ambient", "dance", "punk", "soul",
];

pub const FEATURE_VECTOR_DIM: usize = 16 + 12 + 6 + 5; // 39

/// Construit le vecteur de features d'une piste dans son contexte
pub fn build_feature_vector(
    track: &Track,
    features: &AggregatedFeatures,
    preferences: &PreferenceSnapshot,
    hour_of_day: u8,
    day_of_week: u8,
    now_ms: i64,
) -> Vec<f32> {
    let mut vector = Vec::with_capacity(FEATURE_VECTOR_DIM);

    // 1. Encodage multi-hot des genres (16 buckets avec "other")
    let genres: Vec<String> = track
        .genres
        .iter()
        .map(|g| g.to_lowercase())
        .chain(features.genre.iter().map(|g| g.primary_genre.to_lowercase()))
        .collect();
    let mut matched_any = false;
    for canonical in CANONICAL_GENRES {
        let hit = genres.iter().any(|g| g == canonical || g.contains(canonical));
        if hit {
            matched_any = true;
        }
        vector.push(if hit { 1.0 } else { 0.0 });
    }
    vector.push(if !matched_any && !genres.is_empty() { 1.0 } else { 0.0 }); // other

    // 2. Douze champs audio normalisés; absent → 0.5 neutre
    let audio = features.audio.as_ref().or(track.audio.as_ref());
    let field = |value: Option<f32>| value.map(|v| v.clamp(0.0, 1.0)).unwrap_or(0.5);
    match audio {
        Some(audio) => {
            vector.push(field(audio.bpm.map(|b| (b - 20.0) / 280.0)));
            vector.push(field(audio.energy));
            vector.push(field(audio.valence));
            vector.push(field(audio.danceability));
            vector.push(field(audio.acousticness));
            vector.push(field(audio.instrumentalness));
            vector.push(field(audio.speechiness));
            vector.push(field(audio.liveness));
            vector.push(field(audio.loudness.map(|l| (l + 60.0) / 60.0)));
            vector.push(field(audio.spectral_centroid.map(|c| c / 8000.0)));
            vector.push(field(audio.zero_crossing_rate));
            vector.push(field(audio.analysis_confidence));
        }
        None => vector.extend(std::iter::repeat(0.5).take(12)),
    }

    // 3. Statistiques utilisateur
    let artist = track.primary_artist().and_then(|a| preferences.artist(a));
    let play_count = artist.map(|a| a.play_count).unwrap_or(0);
    vector.push(((1.0 + play_count as f32).ln() / (1.0 + 1000.0f32).ln()).min(1.0));
    let skip_ratio = artist
        .map(|a| {
            let attempts = a.play_count + a.skip_count;
            if attempts == 0 { 0.0 } else { a.skip_count as f32 / attempts as f32 }
        })
        .unwrap_or(0.0);
    vector.push(skip_ratio);
    let completion_ratio = artist
        .map(|a| {
            if a.play_count == 0 { 0.5 } else { a.completed_count as f32 / a.play_count as f32 }
        })
        .unwrap_or(0.5);
    vector.push(completion_ratio);
    // Récence: exponentielle à demi-vie de 7 jours
    let recency = artist
        .map(|a| {
            if a.last_played == 0 {
                0.0
            } else {
                let days = ((now_ms - a.last_played).max(0) as f32) / 86_400_000.0;
                (2.0f32).powf(-days / 7.0)
            }
        })
        .unwrap_or(0.0);
    vector.push(recency.clamp(0.0, 1.0));
    let artist_affinity = track
        .primary_artist()
        .map(|a| preferences.artist_affinity(a))
        .unwrap_or(0.0);
    vector.push((artist_affinity + 1.0) / 2.0);
    let genre_affinity = track
        .primary_genre()
        .map(|g| preferences.genre_affinity(g))
        .unwrap_or(0.0);
    vector.push((genre_affinity + 1.0) / 2.0);

    // 4. Contexte cyclique
    let hour_angle = 2.0 * PI * (hour_of_day as f32 % 24.0) / 24.0;
    vector.push((hour_angle.sin() + 1.0) / 2.0);
    vector.push((hour_angle.cos() + 1.0) / 2.0);
    let day_angle = 2.0 * PI * (day_of_week as f32 % 7.0) / 7.0;
    vector.push((day_angle.sin() + 1.0) / 2.0);
    vector.push((day_angle.cos() + 1.0) / 2.0);
    vector.push(if day_of_week == 0 || day_of_week == 6 { 1.0 } else { 0.0 });

    debug_assert_eq!(vector.len(), FEATURE_VECTOR_DIM);
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AudioDescriptors;

    fn track(genres: &[&str]) -> Track {
        Track {
            track_id: "t1".to_string(),
            title: "T".to_string(),
            artists: vec!["A".to_string()],
            duration_s: 200.0,
            album: None,
            release_year: None,
            genres: genres.iter().map(|s| s.to_string()).collect(),
            tags: vec![],
            audio: Some(AudioDescriptors {
                bpm: Some(160.0),
                energy: Some(0.8),
                valence: Some(0.6),
                loudness: Some(-12.0),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_dimension_and_bounds() {
        let t = track(&["rock"]);
        let features = AggregatedFeatures::empty("t1", 3);
        let preferences = PreferenceSnapshot::default();
        let v = build_feature_vector(&t, &features, &preferences, 14, 3, 0);
        assert_eq!(v.len(), FEATURE_VECTOR_DIM);
        assert!(v.iter().all(|x| (0.0..=1.0).contains(x)), "hors bornes: {:?}", v);
    }

    #[test]
    fn test_genre_multi_hot() {
        let t = track(&["rock", "metal"]);
        let features = AggregatedFeatures::empty("t1", 3);
        let preferences = PreferenceSnapshot::default();
        let v = build_feature_vector(&t, &features, &preferences, 10, 2, 0);
        assert_eq!(v[0], 1.0); // rock
        assert_eq!(v[6], 1.0); // metal
        assert_eq!(v[15], 0.0); // pas other
    }

    #[test]
    fn test_unknown_genre_hits_other_bucket() {
        let t = track(&["zydeco"]);
        let features = AggregatedFeatures::empty("t1", 3);
        let preferences = PreferenceSnapshot::default();
        let v = build_feature_vector(&t, &features, &preferences, 10, 2, 0);
        assert!(v[..15].iter().all(|x| *x == 0.0));
        assert_eq!(v[15], 1.0);
    }

    #[test]
    fn test_weekend_flag() {
        let t = track(&["rock"]);
        let features = AggregatedFeatures::empty("t1", 3);
        let preferences = PreferenceSnapshot::default();
        let weekday = build_feature_vector(&t, &features, &preferences, 10, 3, 0);
        let sunday = build_feature_vector(&t, &features, &preferences, 10, 0, 0);
        assert_eq!(weekday[FEATURE_VECTOR_DIM - 1], 0.0);
        assert_eq!(sunday[FEATURE_VECTOR_DIM - 1], 1.0);
    }
}
