/// Générateur de playlists
///
/// Construit un vecteur de requête selon la méthode choisie, le mélange au
/// profil de goût, interroge l'index vectoriel et la matrice de
/// co-occurrence, puis sélectionne avec contrainte de diversité.
/// Déterministe pour un ensemble de seeds fixé et un index gelé.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::PlaylistConfig;
use crate::error::{AppError, Result};
use crate::library::LibrarySource;
use crate::model::Track;
use crate::vector::math::{average, normalize_in_place, normalized};
use crate::vector::{CoOccurrenceMatrix, EmbeddingEngine, TasteProfile, VectorIndex};

/// Méthode de construction de la playlist
#[derive(Debug, Clone)]
pub enum PlaylistMethod {
    Mood(String),
    Genre(String),
    SeedTracks(Vec<String>),
    ArtistRadio(String),
    Personalized,
    Discovery,
}

/// Options de génération
#[derive(Debug, Clone)]
pub struct PlaylistOptions {
    pub limit: usize,
    /// 0.0 = coller au goût connu, 1.0 = requête pure / exploration
    pub exploration_factor: f32,
    pub exclude_track_ids: Vec<String>,
    pub exclude_artist_ids: Vec<String>,
    pub include_collaborative: bool,
    pub context_hour: u8,
    pub context_day_of_week: u8,
    /// Graine du vecteur d'exploration (mode discovery)
    pub seed: Option<u64>,
}

impl Default for PlaylistOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            exploration_factor: 0.3,
            exclude_track_ids: Vec::new(),
            exclude_artist_ids: Vec::new(),
            include_collaborative: true,
            context_hour: 12,
            context_day_of_week: 3,
            seed: None,
        }
    }
}

pub struct PlaylistGenerator {
    config: PlaylistConfig,
    embedding: Arc<EmbeddingEngine>,
    index: Arc<VectorIndex>,
    cooccurrence: Arc<CoOccurrenceMatrix>,
    taste: Arc<TasteProfile>,
    library: Arc<dyn LibrarySource>,
}

impl PlaylistGenerator {
    pub fn new(
        config: PlaylistConfig,
        embedding: Arc<EmbeddingEngine>,
        index: Arc<VectorIndex>,
        cooccurrence: Arc<CoOccurrenceMatrix>,
        taste: Arc<TasteProfile>,
        library: Arc<dyn LibrarySource>,
    ) -> Self {
        Self {
            config,
            embedding,
            index,
            cooccurrence,
            taste,
            library,
        }
    }

    /// Génère une playlist ordonnée
    pub async fn generate(
        &self,
        method: &PlaylistMethod,
        options: &PlaylistOptions,
    ) -> Result<Vec<Track>> {
        let query = self.build_query_vector(method, options)?;
        let seeds = match method {
            PlaylistMethod::SeedTracks(ids) => ids.clone(),
            _ => Vec::new(),
        };

        // Sur-échantillonnage avant filtrage et diversité
        let pool = options.limit * self.config.candidate_multiplier;
        let embedding_hits = self.index.search_by_cosine(&query, pool);

        let merged = if !seeds.is_empty() && options.include_collaborative {
            let collaborative = self.cooccurrence.get_related_multiple(&seeds, options.limit);
            merge_max_normalized(
                &embedding_hits,
                &collaborative,
                self.config.seed_merge_weights,
            )
        } else {
            embedding_hits
        };

        // Filtres d'exclusion, seeds compris
        let mut candidates = Vec::new();
        for (track_id, score) in merged {
            if seeds.contains(&track_id) || options.exclude_track_ids.contains(&track_id) {
                continue;
            }
            let track = match self.library.get_track(&track_id).await {
                Ok(Some(track)) => track,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Piste {} introuvable dans la bibliothèque: {}", track_id, e);
                    continue;
                }
            };
            if track
                .primary_artist()
                .map(|a| options.exclude_artist_ids.iter().any(|x| x == a))
                .unwrap_or(false)
            {
                continue;
            }
            candidates.push((track, score));
        }

        let selected =
            select_with_diversity(candidates, options.limit, self.config.max_per_artist);
        debug!("Playlist générée: {} pistes", selected.len());
        Ok(selected)
    }

    /// Poids de fusion embedding/collaboratif pour find-similar
    pub fn similar_merge_weights(&self) -> (f32, f32) {
        self.config.similar_merge_weights
    }

    fn build_query_vector(
        &self,
        method: &PlaylistMethod,
        options: &PlaylistOptions,
    ) -> Result<Vec<f32>> {
        let base = match method {
            PlaylistMethod::Mood(mood) => self.embedding.generate_mood_vector(mood),
            PlaylistMethod::Genre(genre) => self.embedding.generate_genre_query_vector(genre),
            PlaylistMethod::SeedTracks(ids) => {
                let vectors: Vec<Vec<f32>> =
                    ids.iter().filter_map(|id| self.index.get(id)).collect();
                if vectors.is_empty() {
                    return Err(AppError::MissingData {
                        resource: "embeddings des seeds".to_string(),
                    });
                }
                let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
                normalized(&average(&refs))
            }
            PlaylistMethod::ArtistRadio(_) => {
                // Résolu en amont par l'appelant (les embeddings de
                // l'artiste sont moyennés dans `generate_for_artist`)
                return Err(AppError::InvalidInput {
                    message: "ArtistRadio passe par generate_for_artist".to_string(),
                });
            }
            PlaylistMethod::Personalized => self
                .taste
                .get_contextual_vector(options.context_hour, options.context_day_of_week)
                .ok_or(AppError::MissingData {
                    resource: "profil de goût non initialisé".to_string(),
                })?,
            PlaylistMethod::Discovery => {
                let exploration = self.taste.get_exploration_vector(options.seed);
                // Mélange goût/exploration au facteur d'exploration
                return Ok(self.blend_with_taste(
                    exploration,
                    options.exploration_factor.max(0.5),
                    options,
                ));
            }
        };
        Ok(self.blend_with_taste(base, options.exploration_factor, options))
    }

    /// q' = ef·q + (1-ef)·goût, renormalisé; sans goût valide, q inchangé
    fn blend_with_taste(
        &self,
        query: Vec<f32>,
        exploration_factor: f32,
        options: &PlaylistOptions,
    ) -> Vec<f32> {
        if !self.taste.is_valid() {
            return query;
        }
        let Some(taste) =
            self.taste.get_contextual_vector(options.context_hour, options.context_day_of_week)
        else {
            return query;
        };
        if taste.len() != query.len() {
            return query;
        }
        let ef = exploration_factor.clamp(0.0, 1.0);
        let mut blended: Vec<f32> = query
            .iter()
            .zip(taste.iter())
            .map(|(q, t)| ef * q + (1.0 - ef) * t)
            .collect();
        normalize_in_place(&mut blended);
        blended
    }

    /// Variante artist-radio: moyenne des embeddings du catalogue de
    /// l'artiste présents dans l'index
    pub async fn generate_for_artist(
        &self,
        artist_id: &str,
        options: &PlaylistOptions,
    ) -> Result<Vec<Track>> {
        let catalogue = self.library.get_tracks_by_artist(artist_id).await?;
        let vectors: Vec<Vec<f32>> = catalogue
            .iter()
            .filter_map(|t| self.index.get(&t.track_id))
            .collect();
        if vectors.is_empty() {
            return Err(AppError::MissingData {
                resource: format!("embeddings pour l'artiste {}", artist_id),
            });
        }
        let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
        let query = self.blend_with_taste(
            normalized(&average(&refs)),
            options.exploration_factor,
            options,
        );

        let pool = options.limit * self.config.candidate_multiplier;
        let hits = self.index.search_by_cosine(&query, pool);
        let seed_ids: Vec<String> = catalogue.iter().map(|t| t.track_id.clone()).collect();
        let merged = if options.include_collaborative {
            let collaborative = self.cooccurrence.get_related_multiple(&seed_ids, options.limit);
            merge_max_normalized(&hits, &collaborative, self.config.seed_merge_weights)
        } else {
            hits
        };

        let mut candidates = Vec::new();
        for (track_id, score) in merged {
            if options.exclude_track_ids.contains(&track_id) {
                continue;
            }
            if let Ok(Some(track)) = self.library.get_track(&track_id).await {
                candidates.push((track, score));
            }
        }
        Ok(select_with_diversity(candidates, options.limit, self.config.max_per_artist))
    }
}

/// Fusion par max-normalisation indépendante des deux sources
///
/// score = w_emb·(s_emb/max_emb) + w_collab·(s_collab/max_collab)
pub fn merge_max_normalized(
    embedding_hits: &[(String, f32)],
    collaborative_hits: &[(String, f32)],
    (embedding_weight, collaborative_weight): (f32, f32),
) -> Vec<(String, f32)> {
    let max_embedding = embedding_hits.iter().map(|(_, s)| *s).fold(0.0f32, f32::max);
    let max_collaborative =
        collaborative_hits.iter().map(|(_, s)| *s).fold(0.0f32, f32::max);

    let mut merged: HashMap<String, f32> = HashMap::new();
    for (id, score) in embedding_hits {
        let normalized = if max_embedding > 0.0 { score / max_embedding } else { 0.0 };
        *merged.entry(id.clone()).or_insert(0.0) += embedding_weight * normalized;
    }
    for (id, score) in collaborative_hits {
        let normalized = if max_collaborative > 0.0 { score / max_collaborative } else { 0.0 };
        *merged.entry(id.clone()).or_insert(0.0) += collaborative_weight * normalized;
    }
    let mut results: Vec<(String, f32)> = merged.into_iter().collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    results
}

/// Marche de sélection avec plafond par artiste
///
/// Le plafond n'est relâché que si la sélection reste sous `limit`.
pub fn select_with_diversity(
    candidates: Vec<(Track, f32)>,
    limit: usize,
    max_per_artist: usize,
) -> Vec<Track> {
    let mut per_artist: HashMap<String, usize> = HashMap::new();
    let mut selected: Vec<Track> = Vec::new();
    let mut overflow: Vec<Track> = Vec::new();

    for (track, _) in candidates {
        if selected.len() >= limit {
            break;
        }
        let artist = track.primary_artist().unwrap_or("").to_string();
        let count = per_artist.entry(artist).or_insert(0);
        if *count < max_per_artist {
            *count += 1;
            selected.push(track);
        } else {
            overflow.push(track);
        }
    }
    // Relâchement seulement en sous-remplissage
    for track in overflow {
        if selected.len() >= limit {
            break;
        }
        selected.push(track);
    }
    selected
}
