/// Affinités utilisateur par artiste et par genre
///
/// Affinité signée dans [-100, +100], clampée à chaque site arithmétique.
/// Décroissance exponentielle appliquée au plus une fois par jour UTC.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, TimeZone, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LearningConfig;
use crate::error::Result;
use crate::model::{now_ms, DislikeReason, UserEvent};
use crate::storage::{keys, KVStore};

const MS_PER_DAY: i64 = 86_400_000;

/// Statistiques accumulées pour un artiste
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtistPrefs {
    pub play_count: u32,
    pub completed_count: u32,
    pub skip_count: u32,
    pub total_duration: f32, // secondes
    pub like_count: u32,
    pub dislike_count: u32,
    pub last_played: i64, // ms epoch
    pub affinity: f32,    // -100.0 - +100.0
}

/// Statistiques accumulées pour un genre
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenrePrefs {
    pub play_count: u32,
    pub completed_count: u32,
    pub skip_count: u32,
    pub total_duration: f32,
    pub like_count: u32,
    pub dislike_count: u32,
    pub affinity: f32, // -100.0 - +100.0
}

/// Entrée du registre des pistes rejetées
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DislikedEntry {
    pub reason: DislikeReason,
    pub timestamp: i64,
}

/// État complet des préférences, persistable tel quel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceSnapshot {
    pub artists: HashMap<String, ArtistPrefs>,
    pub genres: HashMap<String, GenrePrefs>,
    /// Histogramme des écoutes par heure (24 buckets)
    pub hourly_plays: Vec<u32>,
    /// Histogramme des écoutes par jour de semaine (7 buckets, 0 = dimanche)
    pub daily_plays: Vec<u32>,
    /// Poids d'écoute par genre et par heure
    pub genre_by_hour: HashMap<String, Vec<f32>>,
    pub disliked_tracks: HashMap<String, DislikedEntry>,
    /// Index borné des lectures récentes: track_id → dernier timestamp
    pub recent_plays: HashMap<String, i64>,
    pub total_listens: u64,
    pub last_decay_applied: i64, // ms epoch
}

impl Default for PreferenceSnapshot {
    fn default() -> Self {
        Self {
            artists: HashMap::new(),
            genres: HashMap::new(),
            hourly_plays: vec![0; 24],
            daily_plays: vec![0; 7],
            genre_by_hour: HashMap::new(),
            disliked_tracks: HashMap::new(),
            recent_plays: HashMap::new(),
            total_listens: 0,
            last_decay_applied: 0,
        }
    }
}

impl PreferenceSnapshot {
    /// Affinité artiste normalisée dans [-1, 1]
    pub fn artist_affinity(&self, artist: &str) -> f32 {
        self.artists.get(artist).map(|a| a.affinity / 100.0).unwrap_or(0.0)
    }

    /// Affinité genre normalisée dans [-1, 1]
    pub fn genre_affinity(&self, genre: &str) -> f32 {
        self.genres.get(genre).map(|g| g.affinity / 100.0).unwrap_or(0.0)
    }

    pub fn artist(&self, artist: &str) -> Option<&ArtistPrefs> {
        self.artists.get(artist)
    }

    pub fn is_track_disliked(&self, track_id: &str) -> bool {
        self.disliked_tracks.contains_key(track_id)
    }

    /// Vrai si la piste a été jouée dans la fenêtre donnée
    pub fn was_recently_played(&self, track_id: &str, window: Duration, now: i64) -> bool {
        self.recent_plays
            .get(track_id)
            .map(|ts| now - ts < window.as_millis() as i64)
            .unwrap_or(false)
    }

    /// Affinité genre-par-heure normalisée dans [0, 1]
    pub fn genre_hour_affinity(&self, genre: &str, hour: u8) -> f32 {
        let Some(buckets) = self.genre_by_hour.get(genre) else {
            return 0.0;
        };
        let value = buckets.get(hour as usize % 24).copied().unwrap_or(0.0);
        let max = buckets.iter().cloned().fold(0.0f32, f32::max);
        if max <= f32::EPSILON {
            0.0
        } else {
            value / max
        }
    }

    /// L'artiste est-il connu (au moins un événement)
    pub fn knows_artist(&self, artist: &str) -> bool {
        self.artists.contains_key(artist)
    }

    pub fn knows_genre(&self, genre: &str) -> bool {
        self.genres.contains_key(genre)
    }
}

pub struct PreferenceStore {
    config: LearningConfig,
    state: Mutex<PreferenceSnapshot>,
}

impl PreferenceStore {
    pub fn new(config: LearningConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PreferenceSnapshot::default()),
        }
    }

    /// Applique un événement; les mutations sont sérialisées par le verrou
    pub fn update_from_event(&self, event: &UserEvent) {
        self.maybe_decay_at(now_ms());
        let mut state = self.state.lock();
        match event {
            UserEvent::Listen { track, duration_s, completion, completed, timestamp, .. } => {
                let artist_delta = if *completed { 5.0 } else { 3.0 * completion };
                for artist in &track.artists {
                    let prefs = state.artists.entry(artist.clone()).or_default();
                    prefs.play_count += 1;
                    if *completed {
                        prefs.completed_count += 1;
                    }
                    prefs.total_duration += duration_s;
                    prefs.last_played = *timestamp;
                    prefs.affinity = clamp_affinity(prefs.affinity + artist_delta);
                }
                for genre in &track.genres {
                    let prefs = state.genres.entry(genre.clone()).or_default();
                    prefs.play_count += 1;
                    if *completed {
                        prefs.completed_count += 1;
                    }
                    prefs.total_duration += duration_s;
                    prefs.affinity = clamp_affinity(prefs.affinity + artist_delta / 2.0);
                }
                let (hour, day) = hour_and_day(*timestamp);
                state.hourly_plays[hour as usize] += 1;
                state.daily_plays[day as usize] += 1;
                let weight = if *completed { 1.0 } else { *completion };
                for genre in &track.genres {
                    let buckets = state
                        .genre_by_hour
                        .entry(genre.clone())
                        .or_insert_with(|| vec![0.0; 24]);
                    buckets[hour as usize] += weight;
                }
                state.recent_plays.insert(track.track_id.clone(), *timestamp);
                state.total_listens += 1;
                trim_recent_plays(&mut state, &self.config);
            }
            UserEvent::Skip { track, early, .. } => {
                let artist_delta = if *early { -3.0 } else { -1.0 };
                let genre_delta = if *early { -2.0 } else { -0.5 };
                for artist in &track.artists {
                    let prefs = state.artists.entry(artist.clone()).or_default();
                    prefs.skip_count += 1;
                    prefs.affinity = clamp_affinity(prefs.affinity + artist_delta);
                }
                for genre in &track.genres {
                    let prefs = state.genres.entry(genre.clone()).or_default();
                    prefs.skip_count += 1;
                    prefs.affinity = clamp_affinity(prefs.affinity + genre_delta);
                }
            }
            UserEvent::Like { track, strength, .. } => {
                let (artist_delta, genre_delta) = if *strength >= 2 { (15.0, 8.0) } else { (10.0, 5.0) };
                for artist in &track.artists {
                    let prefs = state.artists.entry(artist.clone()).or_default();
                    prefs.like_count += 1;
                    prefs.affinity = clamp_affinity(prefs.affinity + artist_delta);
                }
                for genre in &track.genres {
                    let prefs = state.genres.entry(genre.clone()).or_default();
                    prefs.like_count += 1;
                    prefs.affinity = clamp_affinity(prefs.affinity + genre_delta);
                }
            }
            UserEvent::Dislike { track, reason, timestamp, .. } => {
                let weight = reason.weight();
                for artist in &track.artists {
                    let prefs = state.artists.entry(artist.clone()).or_default();
                    prefs.dislike_count += 1;
                    prefs.affinity = clamp_affinity(prefs.affinity - 10.0 * weight);
                }
                for genre in &track.genres {
                    let prefs = state.genres.entry(genre.clone()).or_default();
                    prefs.dislike_count += 1;
                    prefs.affinity = clamp_affinity(prefs.affinity - 5.0 * weight);
                }
                state.disliked_tracks.insert(
                    track.track_id.clone(),
                    DislikedEntry { reason: *reason, timestamp: *timestamp },
                );
            }
            // Les signaux faibles ne touchent pas les affinités
            UserEvent::Queue { .. }
            | UserEvent::Playlist { .. }
            | UserEvent::Search { .. }
            | UserEvent::Download { .. } => {}
        }
    }

    /// Décroissance: multiplication pure, au plus une fois par jour UTC
    pub fn maybe_decay_at(&self, now: i64) {
        let mut state = self.state.lock();
        if state.last_decay_applied == 0 {
            state.last_decay_applied = now;
            return;
        }
        let elapsed_days = (now - state.last_decay_applied) / MS_PER_DAY;
        if elapsed_days < 1 {
            return;
        }
        let factor = self.config.affinity_decay_factor.powi(elapsed_days as i32);
        for prefs in state.artists.values_mut() {
            prefs.affinity = clamp_affinity(prefs.affinity * factor);
        }
        for prefs in state.genres.values_mut() {
            prefs.affinity = clamp_affinity(prefs.affinity * factor);
        }
        // Le genre-par-heure ne décroît pas: seul le signal d'affinité vieillit
        state.last_decay_applied += elapsed_days * MS_PER_DAY;
        debug!("Décroissance des affinités appliquée: x{:.4} ({} jours)", factor, elapsed_days);
    }

    /// Snapshot immuable de l'état courant
    pub fn snapshot(&self) -> PreferenceSnapshot {
        self.state.lock().clone()
    }

    pub fn artist_affinity(&self, artist: &str) -> f32 {
        self.state.lock().artist_affinity(artist)
    }

    pub fn genre_affinity(&self, genre: &str) -> f32 {
        self.state.lock().genre_affinity(genre)
    }

    pub fn was_recently_played(&self, track_id: &str, window: Duration) -> bool {
        self.state.lock().was_recently_played(track_id, window, now_ms())
    }

    pub fn total_listens(&self) -> u64 {
        self.state.lock().total_listens
    }

    /// Force une affinité artiste (outillage de test et migrations)
    pub fn set_artist_affinity(&self, artist: &str, affinity: f32) {
        let mut state = self.state.lock();
        state.artists.entry(artist.to_string()).or_default().affinity = clamp_affinity(affinity);
    }

    /// Persistance JSON sous `audiio-ml-preferences`
    pub async fn save(&self, kv: &Arc<dyn KVStore>) -> Result<()> {
        let payload = {
            let state = self.state.lock();
            serde_json::to_string(&*state)?
        };
        kv.set(keys::PREFERENCES, payload).await
    }

    /// Recharge puis applique la décroissance due depuis la dernière session
    pub async fn load(&self, kv: &Arc<dyn KVStore>) -> Result<bool> {
        let Some(raw) = kv.get(keys::PREFERENCES).await? else {
            return Ok(false);
        };
        match serde_json::from_str::<PreferenceSnapshot>(&raw) {
            Ok(mut loaded) => {
                if loaded.hourly_plays.len() != 24 {
                    loaded.hourly_plays = vec![0; 24];
                }
                if loaded.daily_plays.len() != 7 {
                    loaded.daily_plays = vec![0; 7];
                }
                *self.state.lock() = loaded;
                self.maybe_decay_at(now_ms());
                Ok(true)
            }
            Err(e) => {
                warn!("Préférences illisibles, repart de zéro: {}", e);
                Ok(false)
            }
        }
    }
}

fn clamp_affinity(value: f32) -> f32 {
    value.clamp(-100.0, 100.0)
}

/// Heure locale UTC (0-23) et jour de semaine (0 = dimanche)
fn hour_and_day(timestamp_ms: i64) -> (u8, u8) {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(dt) => {
            (dt.hour() as u8, dt.weekday().num_days_from_sunday() as u8)
        }
        _ => (0, 0),
    }
}

fn trim_recent_plays(state: &mut PreferenceSnapshot, config: &LearningConfig) {
    if state.recent_plays.len() <= config.recent_plays_max {
        return;
    }
    let mut entries: Vec<(String, i64)> =
        state.recent_plays.drain().collect();
    // Conservation des plus récentes
    entries.sort_by_key(|(_, ts)| std::cmp::Reverse(*ts));
    entries.truncate(config.recent_plays_keep);
    state.recent_plays = entries.into_iter().collect();
    debug!("Index des lectures récentes tronqué à {}", config.recent_plays_keep);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventContext, TrackRef};

    fn listen_event(track: &TrackRef, completion: f32, timestamp: i64) -> UserEvent {
        UserEvent::Listen {
            track: track.clone(),
            duration_s: track.duration_s * completion,
            completion,
            completed: completion >= 0.95,
            source: crate::model::ListenSource::Library,
            context: Default::default(),
            timestamp,
        }
    }

    fn store() -> PreferenceStore {
        PreferenceStore::new(LearningConfig::default())
    }

    fn track() -> TrackRef {
        TrackRef {
            track_id: "t1".to_string(),
            artists: vec!["A".to_string()],
            genres: vec!["G".to_string()],
            duration_s: 200.0,
        }
    }

    fn like(strength: u8) -> UserEvent {
        UserEvent::Like { track: track(), strength, timestamp: now_ms() }
    }

    #[test]
    fn test_like_affinity_ladder() {
        let s = store();
        s.update_from_event(&like(1));
        assert!((s.artist_affinity("A") - 0.10).abs() < 1e-6);
        s.update_from_event(&like(2));
        assert!((s.artist_affinity("A") - 0.25).abs() < 1e-6);
        s.update_from_event(&like(2));
        assert!((s.artist_affinity("A") - 0.40).abs() < 1e-6);
    }

    #[test]
    fn test_affinity_clamped_after_any_sequence() {
        let s = store();
        for _ in 0..50 {
            s.update_from_event(&like(2));
        }
        assert!(s.artist_affinity("A") <= 1.0);
        for _ in 0..200 {
            s.update_from_event(&UserEvent::Dislike {
                track: track(),
                reason: DislikeReason::DislikeArtist,
                comment: None,
                timestamp: now_ms(),
            });
        }
        assert!(s.artist_affinity("A") >= -1.0);
    }

    #[test]
    fn test_listen_updates_counters_and_recent_plays() {
        let s = store();
        let ts = now_ms();
        s.update_from_event(&UserEvent::Listen {
            track: track(),
            duration_s: 200.0,
            completion: 1.0,
            completed: true,
            source: crate::model::ListenSource::Library,
            context: EventContext::default(),
            timestamp: ts,
        });
        let snapshot = s.snapshot();
        let artist = snapshot.artist("A").unwrap();
        assert_eq!(artist.play_count, 1);
        assert_eq!(artist.completed_count, 1);
        assert!((snapshot.artist_affinity("A") - 0.05).abs() < 1e-6);
        // Genre à demi-poids
        assert!((snapshot.genre_affinity("G") - 0.025).abs() < 1e-6);
        assert!(snapshot.was_recently_played("t1", Duration::from_secs(3600), ts + 1000));
        assert_eq!(snapshot.total_listens, 1);
    }

    #[test]
    fn test_skip_weighting() {
        let s = store();
        s.update_from_event(&UserEvent::Skip {
            track: track(),
            skip_percentage: 0.05,
            early: true,
            context: EventContext::default(),
            timestamp: now_ms(),
        });
        assert!((s.artist_affinity("A") + 0.03).abs() < 1e-6); // -3 / 100
        assert!((s.genre_affinity("G") + 0.02).abs() < 1e-6); // -2 / 100
    }

    #[test]
    fn test_decay_seven_days() {
        let s = store();
        s.set_artist_affinity("A", 50.0);
        let now = now_ms();
        s.maybe_decay_at(now); // initialise l'horloge de décroissance
        s.maybe_decay_at(now + 7 * MS_PER_DAY);
        let affinity = s.artist_affinity("A") * 100.0;
        let expected = 50.0 * 0.98f32.powi(7); // ≈ 43.6
        assert!((affinity - expected).abs() < 0.1, "affinité {} vs {}", affinity, expected);
    }

    #[test]
    fn test_decay_at_most_once_per_day() {
        let s = store();
        s.set_artist_affinity("A", 50.0);
        let now = now_ms();
        s.maybe_decay_at(now);
        s.maybe_decay_at(now + MS_PER_DAY / 3);
        assert!((s.artist_affinity("A") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_recent_plays_trimmed() {
        let mut config = LearningConfig::default();
        config.recent_plays_max = 10;
        config.recent_plays_keep = 5;
        let s = PreferenceStore::new(config);
        let base = now_ms();
        for i in 0..12 {
            let t = TrackRef {
                track_id: format!("t{}", i),
                artists: vec!["A".to_string()],
                genres: vec![],
                duration_s: 100.0,
            };
            s.update_from_event(&listen_event(&t, 1.0, base + i as i64));
        }
        let snapshot = s.snapshot();
        assert!(snapshot.recent_plays.len() <= 10);
        // Les plus récentes survivent
        assert!(snapshot.recent_plays.contains_key("t11"));
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let kv: Arc<dyn KVStore> = Arc::new(crate::storage::MemoryKvStore::new());
        let s = store();
        s.update_from_event(&like(2));
        s.save(&kv).await.unwrap();

        let restored = store();
        assert!(restored.load(&kv).await.unwrap());
        assert!((restored.artist_affinity("A") - 0.15).abs() < 1e-6);
    }
}
