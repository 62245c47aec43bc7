/// File intelligente: fan-in de candidats multi-sources
///
/// Rassemble des candidats depuis le goût utilisateur, la co-occurrence,
/// les likes et la bibliothèque, en dédupliquant contre la session en
/// cours. La session se réinitialise sur action explicite de
/// l'utilisateur.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::library::LibrarySource;
use crate::model::Track;
use crate::scoring::ScoringContext;
use crate::vector::{CoOccurrenceMatrix, TasteProfile, VectorIndex};

pub struct SmartQueue {
    library: Arc<dyn LibrarySource>,
    index: Arc<VectorIndex>,
    cooccurrence: Arc<CoOccurrenceMatrix>,
    taste: Arc<TasteProfile>,
    /// Pistes déjà servies ou jouées dans la session courante
    session_seen: Mutex<HashSet<String>>,
}

impl SmartQueue {
    pub fn new(
        library: Arc<dyn LibrarySource>,
        index: Arc<VectorIndex>,
        cooccurrence: Arc<CoOccurrenceMatrix>,
        taste: Arc<TasteProfile>,
    ) -> Self {
        Self {
            library,
            index,
            cooccurrence,
            taste,
            session_seen: Mutex::new(HashSet::new()),
        }
    }

    /// Note une piste comme vue par la session
    pub fn note_played(&self, track_id: &str) {
        self.session_seen.lock().insert(track_id.to_string());
    }

    /// Réinitialise la session (action explicite de l'utilisateur)
    pub fn reset_session(&self) {
        let mut seen = self.session_seen.lock();
        let count = seen.len();
        seen.clear();
        debug!("Session de file réinitialisée ({} pistes oubliées)", count);
    }

    pub fn session_len(&self) -> usize {
        self.session_seen.lock().len()
    }

    /// Rassemble des candidats dédupliqués depuis toutes les sources
    pub async fn gather_candidates(
        &self,
        count: usize,
        context: &ScoringContext,
    ) -> Result<Vec<Track>> {
        let mut ids: Vec<String> = Vec::new();

        // 1. Voisinage du goût contextuel
        if let Some(taste_vector) =
            self.taste.get_contextual_vector(context.hour_of_day, context.day_of_week)
        {
            ids.extend(
                self.index
                    .search_by_cosine(&taste_vector, count * 2)
                    .into_iter()
                    .map(|(id, _)| id),
            );
        }

        // 2. Co-occurrence avec les pistes de la session
        let session_ids: Vec<String> =
            context.session_tracks.iter().map(|t| t.track_id.clone()).collect();
        if !session_ids.is_empty() {
            ids.extend(
                self.cooccurrence
                    .get_related_multiple(&session_ids, count)
                    .into_iter()
                    .map(|(id, _)| id),
            );
        }

        // 3. Pistes aimées
        ids.extend(
            self.library
                .get_liked_tracks()
                .await?
                .into_iter()
                .take(count)
                .map(|t| t.track_id),
        );

        // Déduplication (ordre des sources préservé) et filtre de session
        let seen_in_session = self.session_seen.lock().clone();
        let mut unique = HashSet::new();
        ids.retain(|id| {
            !seen_in_session.contains(id)
                && !session_ids.contains(id)
                && unique.insert(id.clone())
        });

        let mut candidates = Vec::new();
        for id in &ids {
            if candidates.len() >= count * 3 {
                break;
            }
            if let Ok(Some(track)) = self.library.get_track(id).await {
                candidates.push(track);
            }
        }

        // 4. Complément depuis la bibliothèque si les sources ciblées
        //    sont trop maigres
        if candidates.len() < count {
            let missing = count * 2 - candidates.len();
            for track in self.library.get_all_tracks().await? {
                if candidates.len() >= count + missing {
                    break;
                }
                if seen_in_session.contains(&track.track_id)
                    || session_ids.contains(&track.track_id)
                    || candidates.iter().any(|c| c.track_id == track.track_id)
                {
                    continue;
                }
                candidates.push(track);
            }
        }

        debug!("Fan-in de candidats: {} pistes", candidates.len());
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoOccurrenceConfig, TasteConfig};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubLibrary {
        tracks: HashMap<String, Track>,
        liked: Vec<String>,
    }

    #[async_trait]
    impl LibrarySource for StubLibrary {
        async fn get_track(&self, track_id: &str) -> Result<Option<Track>> {
            Ok(self.tracks.get(track_id).cloned())
        }
        async fn get_all_tracks(&self) -> Result<Vec<Track>> {
            let mut all: Vec<Track> = self.tracks.values().cloned().collect();
            all.sort_by(|a, b| a.track_id.cmp(&b.track_id));
            Ok(all)
        }
        async fn get_tracks_by_artist(&self, _artist_id: &str) -> Result<Vec<Track>> {
            Ok(vec![])
        }
        async fn get_tracks_by_genre(&self, _genre: &str) -> Result<Vec<Track>> {
            Ok(vec![])
        }
        async fn get_liked_tracks(&self) -> Result<Vec<Track>> {
            Ok(self.liked.iter().filter_map(|id| self.tracks.get(id).cloned()).collect())
        }
        async fn get_playlist_tracks(&self, _playlist_id: &str) -> Result<Vec<Track>> {
            Ok(vec![])
        }
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Track>> {
            Ok(vec![])
        }
    }

    fn track(id: &str) -> Track {
        Track {
            track_id: id.to_string(),
            title: id.to_string(),
            artists: vec!["A".to_string()],
            duration_s: 100.0,
            album: None,
            release_year: None,
            genres: vec![],
            tags: vec![],
            audio: None,
        }
    }

    fn queue(ids: &[&str], liked: &[&str]) -> SmartQueue {
        let tracks: HashMap<String, Track> =
            ids.iter().map(|id| (id.to_string(), track(id))).collect();
        SmartQueue::new(
            Arc::new(StubLibrary {
                tracks,
                liked: liked.iter().map(|s| s.to_string()).collect(),
            }),
            Arc::new(VectorIndex::new()),
            Arc::new(CoOccurrenceMatrix::new(CoOccurrenceConfig::default())),
            Arc::new(TasteProfile::new(4, TasteConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_gather_includes_liked_and_library() {
        let q = queue(&["a", "b", "c", "d"], &["b"]);
        let candidates = q.gather_candidates(3, &ScoringContext::default()).await.unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates.iter().any(|t| t.track_id == "b"));
    }

    #[tokio::test]
    async fn test_session_dedup() {
        let q = queue(&["a", "b", "c", "d"], &["a", "b"]);
        q.note_played("a");
        let candidates = q.gather_candidates(3, &ScoringContext::default()).await.unwrap();
        assert!(candidates.iter().all(|t| t.track_id != "a"));

        q.reset_session();
        assert_eq!(q.session_len(), 0);
        let after_reset = q.gather_candidates(3, &ScoringContext::default()).await.unwrap();
        assert!(after_reset.iter().any(|t| t.track_id == "a"));
    }
}
