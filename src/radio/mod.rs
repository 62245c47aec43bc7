/// Générateur de radio
///
/// Flux continu à partir d'un seed (piste, artiste, genre, humeur,
/// playlist) avec dérive progressive: le poids du seed décroît à mesure
/// que des pistes sont émises, le mélange aléatoire (PRNG seedable)
/// prenant le relais.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RadioConfig;
use crate::error::Result;
use crate::library::LibrarySource;
use crate::model::Track;
use crate::scoring::{HybridScorer, QueueMode, ScoringContext};
use crate::vector::math::{average, normalized};
use crate::vector::{CoOccurrenceMatrix, EmbeddingEngine, VectorIndex};

/// Seed d'une session radio
#[derive(Debug, Clone)]
pub enum RadioSeed {
    Track(String),
    Artist(String),
    Genre(String),
    Mood(String),
    Playlist(String),
}

impl RadioSeed {
    /// Clé de session `<type>:<id>`
    pub fn session_key(&self) -> String {
        match self {
            RadioSeed::Track(id) => format!("track:{}", id),
            RadioSeed::Artist(id) => format!("artist:{}", id),
            RadioSeed::Genre(id) => format!("genre:{}", id),
            RadioSeed::Mood(id) => format!("mood:{}", id),
            RadioSeed::Playlist(id) => format!("playlist:{}", id),
        }
    }
}

/// État par session de radio
#[derive(Debug)]
struct RadioSession {
    /// Identifiant de corrélation pour les logs
    id: Uuid,
    played: HashSet<String>,
    /// Pistes déjà émises depuis le seed
    drift: u32,
}

impl Default for RadioSession {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            played: HashSet::new(),
            drift: 0,
        }
    }
}

pub struct RadioGenerator {
    config: RadioConfig,
    scorer: Arc<HybridScorer>,
    embedding: Arc<EmbeddingEngine>,
    index: Arc<VectorIndex>,
    cooccurrence: Arc<CoOccurrenceMatrix>,
    library: Arc<dyn LibrarySource>,
    sessions: DashMap<String, RadioSession>,
}

impl RadioGenerator {
    pub fn new(
        config: RadioConfig,
        scorer: Arc<HybridScorer>,
        embedding: Arc<EmbeddingEngine>,
        index: Arc<VectorIndex>,
        cooccurrence: Arc<CoOccurrenceMatrix>,
        library: Arc<dyn LibrarySource>,
    ) -> Self {
        Self {
            config,
            scorer,
            embedding,
            index,
            cooccurrence,
            library,
            sessions: DashMap::new(),
        }
    }

    /// Poids courant du seed pour une session
    pub fn seed_weight(&self, seed: &RadioSeed) -> f32 {
        let drift = self.drift(seed);
        (self.config.seed_weight_start - drift as f32 * self.config.drift_step)
            .max(self.config.seed_weight_floor)
    }

    pub fn drift(&self, seed: &RadioSeed) -> u32 {
        self.sessions.get(&seed.session_key()).map(|s| s.drift).unwrap_or(0)
    }

    /// Oublie la session d'un seed (reset de la dérive)
    pub fn reset_session(&self, seed: &RadioSeed) {
        self.sessions.remove(&seed.session_key());
    }

    /// Génère la prochaine fournée de la radio
    ///
    /// `rng_seed` rend la sélection reproductible; sans graine, une est
    /// tirée de l'entropie.
    pub async fn generate(
        &self,
        seed: &RadioSeed,
        count: usize,
        context: &ScoringContext,
        rng_seed: Option<u64>,
    ) -> Result<Vec<Track>> {
        let key = seed.session_key();
        let drift = self.drift(seed);
        let seed_weight = self.seed_weight(seed);

        // 1. Sur-échantillonnage de candidats par routes spécifiques au
        //    seed, élargi des pistes déjà émises pour ne pas assécher les
        //    fournées suivantes
        let played_count =
            self.sessions.get(&key).map(|s| s.played.len()).unwrap_or(0);
        let pool = count * self.config.candidate_multiplier + played_count;
        let mut candidates = self.fetch_candidates(seed, pool).await?;

        // 2. Filtre des pistes déjà émises par cette session
        {
            let session = self.sessions.entry(key.clone()).or_default();
            candidates.retain(|t| !session.played.contains(&t.track_id));
        }
        if candidates.is_empty() {
            debug!("Radio {}: plus aucun candidat frais", key);
            return Ok(Vec::new());
        }

        // 3. Scoring hybride sous contexte radio
        let mut radio_context = context.clone();
        radio_context.queue_mode = QueueMode::Radio;
        radio_context.radio_drift = drift;
        let scores = self.scorer.score_batch(&candidates, &radio_context).await;

        // 4. Mélange: le complément du poids du seed part en aléatoire
        let mut rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut mixed: Vec<(Track, f32)> = candidates
            .into_iter()
            .zip(scores.iter())
            .map(|(track, score)| {
                let random: f32 = rng.gen();
                let adjusted = score.final_score * seed_weight
                    + score.final_score * (1.0 - seed_weight) * random;
                (track, adjusted)
            })
            .collect();
        mixed.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.track_id.cmp(&b.0.track_id))
        });

        // 5. Sélection avec plafond par artiste, repli aléatoire pondéré
        let selected = self.select_diverse(mixed, count, &mut rng);

        // 6. Mise à jour de la session
        let mut session = self.sessions.entry(key).or_default();
        for track in &selected {
            session.played.insert(track.track_id.clone());
        }
        session.drift += selected.len() as u32;
        debug!(
            "Radio {} (session {}): {} pistes émises, dérive {}",
            seed.session_key(),
            session.id,
            selected.len(),
            session.drift
        );
        Ok(selected)
    }

    /// Routes de candidats par type de seed
    async fn fetch_candidates(&self, seed: &RadioSeed, pool: usize) -> Result<Vec<Track>> {
        let mut ids: Vec<String> = Vec::new();
        match seed {
            RadioSeed::Track(track_id) => {
                if let Some(vector) = self.index.get(track_id) {
                    ids.extend(
                        self.index
                            .search_by_cosine(&vector, pool)
                            .into_iter()
                            .filter(|(id, _)| id != track_id)
                            .map(|(id, _)| id),
                    );
                }
                // Renfort collaboratif
                ids.extend(
                    self.cooccurrence
                        .get_related(track_id, pool / 2)
                        .into_iter()
                        .map(|(id, _)| id),
                );
            }
            RadioSeed::Artist(artist_id) => {
                let catalogue = self.library.get_tracks_by_artist(artist_id).await?;
                let vectors: Vec<Vec<f32>> = catalogue
                    .iter()
                    .filter_map(|t| self.index.get(&t.track_id))
                    .collect();
                ids.extend(catalogue.into_iter().map(|t| t.track_id));
                if !vectors.is_empty() {
                    let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
                    let query = normalized(&average(&refs));
                    ids.extend(self.index.search_by_cosine(&query, pool).into_iter().map(|(id, _)| id));
                }
            }
            RadioSeed::Genre(genre) => {
                let catalogue = self.library.get_tracks_by_genre(genre).await?;
                ids.extend(catalogue.into_iter().map(|t| t.track_id));
                let query = self.embedding.generate_genre_query_vector(genre);
                ids.extend(self.index.search_by_cosine(&query, pool).into_iter().map(|(id, _)| id));
            }
            RadioSeed::Mood(mood) => {
                let query = self.embedding.generate_mood_vector(mood);
                ids.extend(self.index.search_by_cosine(&query, pool).into_iter().map(|(id, _)| id));
            }
            RadioSeed::Playlist(playlist_id) => {
                let members = self.library.get_playlist_tracks(playlist_id).await?;
                let member_ids: Vec<String> =
                    members.iter().map(|t| t.track_id.clone()).collect();
                // Expansion par co-occurrence autour de la playlist
                ids.extend(
                    self.cooccurrence
                        .get_related_multiple(&member_ids, pool)
                        .into_iter()
                        .map(|(id, _)| id),
                );
                ids.extend(member_ids);
            }
        }

        // Déduplication en préservant l'ordre
        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));

        let mut tracks = Vec::with_capacity(ids.len().min(pool));
        for id in ids.into_iter().take(pool) {
            match self.library.get_track(&id).await {
                Ok(Some(track)) => tracks.push(track),
                Ok(None) => {}
                Err(e) => warn!("Candidat radio {} irrésoluble: {}", id, e),
            }
        }
        Ok(tracks)
    }

    /// Plafond par artiste; quand tous les artistes saturent, repli en
    /// tirage aléatoire pondéré par score parmi le reste
    fn select_diverse(
        &self,
        ranked: Vec<(Track, f32)>,
        count: usize,
        rng: &mut StdRng,
    ) -> Vec<Track> {
        let mut per_artist: HashMap<String, usize> = HashMap::new();
        let mut selected: Vec<Track> = Vec::new();
        let mut rejected: Vec<(Track, f32)> = Vec::new();

        for (track, score) in ranked {
            if selected.len() >= count {
                break;
            }
            let artist = track.primary_artist().unwrap_or("").to_string();
            let used = per_artist.entry(artist).or_insert(0);
            if *used < self.config.max_per_artist {
                *used += 1;
                selected.push(track);
            } else {
                rejected.push((track, score));
            }
        }

        // Tirage pondéré dans les recalés si la fournée est incomplète
        while selected.len() < count && !rejected.is_empty() {
            let total: f32 = rejected.iter().map(|(_, s)| s.max(0.01)).sum();
            let mut draw = rng.gen::<f32>() * total;
            let mut picked = rejected.len() - 1;
            for (i, (_, score)) in rejected.iter().enumerate() {
                draw -= score.max(0.01);
                if draw <= 0.0 {
                    picked = i;
                    break;
                }
            }
            selected.push(rejected.swap_remove(picked).0);
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CoOccurrenceConfig, EmbeddingConfig, FeatureConfig, LearningConfig, ScoringConfig,
        SequentialConfig,
    };
    use crate::features::FeatureAggregator;
    use crate::learning::{HeuristicPredictor, PreferenceStore};
    use crate::scoring::SequentialScorer;
    use async_trait::async_trait;

    struct StubLibrary {
        tracks: HashMap<String, Track>,
    }

    #[async_trait]
    impl LibrarySource for StubLibrary {
        async fn get_track(&self, track_id: &str) -> Result<Option<Track>> {
            Ok(self.tracks.get(track_id).cloned())
        }
        async fn get_all_tracks(&self) -> Result<Vec<Track>> {
            Ok(self.tracks.values().cloned().collect())
        }
        async fn get_tracks_by_artist(&self, artist_id: &str) -> Result<Vec<Track>> {
            Ok(self
                .tracks
                .values()
                .filter(|t| t.primary_artist() == Some(artist_id))
                .cloned()
                .collect())
        }
        async fn get_tracks_by_genre(&self, genre: &str) -> Result<Vec<Track>> {
            Ok(self
                .tracks
                .values()
                .filter(|t| t.genres.iter().any(|g| g == genre))
                .cloned()
                .collect())
        }
        async fn get_liked_tracks(&self) -> Result<Vec<Track>> {
            Ok(vec![])
        }
        async fn get_playlist_tracks(&self, _playlist_id: &str) -> Result<Vec<Track>> {
            Ok(vec![])
        }
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Track>> {
            Ok(vec![])
        }
    }

    fn track(id: &str, artist: &str) -> Track {
        Track {
            track_id: id.to_string(),
            title: id.to_string(),
            artists: vec![artist.to_string()],
            duration_s: 200.0,
            album: None,
            release_year: None,
            genres: vec!["rock".to_string()],
            tags: vec![],
            audio: None,
        }
    }

    fn radio(tracks: Vec<Track>) -> RadioGenerator {
        let dimension = 4;
        let index = Arc::new(VectorIndex::new());
        for (i, t) in tracks.iter().enumerate() {
            let angle = i as f32 * 0.1;
            index.add(
                t.track_id.clone(),
                normalized(&[angle.cos(), angle.sin(), 0.1, 0.1]),
            );
        }
        let preferences = Arc::new(PreferenceStore::new(LearningConfig::default()));
        let scorer = Arc::new(HybridScorer::new(
            ScoringConfig::default(),
            preferences,
            Arc::new(HeuristicPredictor::new(50)),
            Arc::new(SequentialScorer::new(SequentialConfig::default())),
            FeatureAggregator::new(FeatureConfig::default(), 3, None),
        ));
        RadioGenerator::new(
            RadioConfig::default(),
            scorer,
            Arc::new(EmbeddingEngine::new(EmbeddingConfig {
                dimension,
                ..Default::default()
            })),
            index,
            Arc::new(CoOccurrenceMatrix::new(CoOccurrenceConfig::default())),
            Arc::new(StubLibrary {
                tracks: tracks.into_iter().map(|t| (t.track_id.clone(), t)).collect(),
            }),
        )
    }

    fn catalogue(n: usize) -> Vec<Track> {
        (0..n).map(|i| track(&format!("t{}", i), &format!("artist{}", i / 2))).collect()
    }

    #[tokio::test]
    async fn test_drift_and_seed_weight_progression() {
        let r = radio(catalogue(60));
        let seed = RadioSeed::Track("t0".to_string());
        assert_eq!(r.seed_weight(&seed), 0.7);

        let batch = r.generate(&seed, 10, &ScoringContext::default(), Some(1)).await.unwrap();
        assert_eq!(batch.len(), 10);
        assert_eq!(r.drift(&seed), 10);
        // 0.7 - 10·0.02 = 0.5
        assert!((r.seed_weight(&seed) - 0.5).abs() < 1e-6);

        for round in 0..3 {
            r.generate(&seed, 5, &ScoringContext::default(), Some(round)).await.unwrap();
        }
        assert_eq!(r.drift(&seed), 25);
        // Plancher à 0.3
        assert!((r.seed_weight(&seed) - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_no_repeats_within_session() {
        let r = radio(catalogue(40));
        let seed = RadioSeed::Track("t0".to_string());
        let first = r.generate(&seed, 8, &ScoringContext::default(), Some(7)).await.unwrap();
        let second = r.generate(&seed, 8, &ScoringContext::default(), Some(8)).await.unwrap();
        let first_ids: HashSet<String> = first.iter().map(|t| t.track_id.clone()).collect();
        for t in &second {
            assert!(!first_ids.contains(&t.track_id), "{} rejouée", t.track_id);
        }
    }

    #[tokio::test]
    async fn test_artist_cap_respected_when_fillable() {
        let mut tracks = Vec::new();
        // Artiste dominant avec 10 pistes + divers artistes
        for i in 0..10 {
            tracks.push(track(&format!("dom{}", i), "dominant"));
        }
        for i in 0..20 {
            tracks.push(track(&format!("var{}", i), &format!("other{}", i)));
        }
        let r = radio(tracks);
        let seed = RadioSeed::Genre("rock".to_string());
        let batch = r.generate(&seed, 10, &ScoringContext::default(), Some(3)).await.unwrap();
        let dominant = batch.iter().filter(|t| t.primary_artist() == Some("dominant")).count();
        assert!(dominant <= 2, "{} pistes de l'artiste dominant", dominant);
    }

    #[tokio::test]
    async fn test_reproducible_with_seeded_rng() {
        let seed = RadioSeed::Genre("rock".to_string());
        let r1 = radio(catalogue(40));
        let r2 = radio(catalogue(40));
        let a = r1.generate(&seed, 10, &ScoringContext::default(), Some(99)).await.unwrap();
        let b = r2.generate(&seed, 10, &ScoringContext::default(), Some(99)).await.unwrap();
        let ids = |v: &[Track]| v.iter().map(|t| t.track_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    #[tokio::test]
    async fn test_reset_session_clears_drift() {
        let r = radio(catalogue(30));
        let seed = RadioSeed::Track("t0".to_string());
        r.generate(&seed, 5, &ScoringContext::default(), Some(1)).await.unwrap();
        assert!(r.drift(&seed) > 0);
        r.reset_session(&seed);
        assert_eq!(r.drift(&seed), 0);
        assert_eq!(r.seed_weight(&seed), 0.7);
    }
}
