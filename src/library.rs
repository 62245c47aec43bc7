/// Interfaces des collaborateurs externes
///
/// Le catalogue musical et le traitement du signal sont hors du coeur:
/// seuls leurs contrats vivent ici, l'hôte fournit les implémentations.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Track;

/// Catalogue musical de l'hôte
#[async_trait]
pub trait LibrarySource: Send + Sync {
    async fn get_track(&self, track_id: &str) -> Result<Option<Track>>;
    async fn get_all_tracks(&self) -> Result<Vec<Track>>;
    async fn get_tracks_by_artist(&self, artist_id: &str) -> Result<Vec<Track>>;
    async fn get_tracks_by_genre(&self, genre: &str) -> Result<Vec<Track>>;
    async fn get_liked_tracks(&self) -> Result<Vec<Track>>;
    async fn get_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>>;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>>;
}

/// Primitives DSP fournies par l'hôte
///
/// Le coeur ne décode ni n'analyse d'audio; un provider peut s'appuyer sur
/// cette capacité pour produire ses descripteurs.
#[async_trait]
pub trait SignalProcessor: Send + Sync {
    async fn fft(&self, samples: &[f32]) -> Result<Vec<f32>>;
    async fn mel_spectrogram(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<Vec<f32>>>;
    async fn mfcc(&self, samples: &[f32], sample_rate: u32, coefficients: usize) -> Result<Vec<f32>>;
}
