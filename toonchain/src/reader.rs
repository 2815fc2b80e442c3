//! Loading an episode for reading: series header, gate decision, sibling navigation and, once
//! access is granted, the pinned pages.

use std::sync::Arc;

use itertools::Itertools;
use log::{info, warn};

use crate::cache::ContentCache;
use crate::contract::ContractError;
use crate::gate::{Access, AccessGate, GateDecision};
use crate::ipfs::IpfsGateway;
use crate::model::{Episode, EpisodeMetadata, EpisodeNumber, Series, SeriesId};
use crate::session::Session;
use crate::storage::{fetch_json, BlobStore};

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("series {0} not found")]
    SeriesNotFound(SeriesId),
    #[error("episode {episode_number} of series {series_id} not found")]
    EpisodeNotFound { series_id: SeriesId, episode_number: EpisodeNumber },
    #[error("episode is already unlocked")]
    AlreadyUnlocked,
    #[error(transparent)]
    Contract(#[from] ContractError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderView {
    pub series: Series,
    pub episode: Episode,
    /// Every episode of the series, ordered by episode number.
    pub episodes: Vec<Episode>,
    pub access: Access,
    pub metadata: Option<EpisodeMetadata>,
    pub page_urls: Vec<String>,
    pub prev: Option<EpisodeNumber>,
    pub next: Option<EpisodeNumber>,
}

impl ReaderView {
    pub fn is_unlocked(&self) -> bool {
        self.access.is_unlocked()
    }
}

/// Episode numbers on either side of `current` in a list sorted by episode number.
pub fn neighbours(episodes: &[Episode], current: EpisodeNumber) -> (Option<EpisodeNumber>, Option<EpisodeNumber>) {
    let Some(pos) = episodes.iter().position(|e| e.episode_number == current) else {
        return (None, None);
    };
    let prev = pos.checked_sub(1).and_then(|i| episodes.get(i)).map(|e| e.episode_number);
    let next = episodes.get(pos + 1).map(|e| e.episode_number);
    (prev, next)
}

pub struct Reader {
    session: Arc<Session>,
    store: Arc<dyn BlobStore>,
    gateway: IpfsGateway,
    metadata: ContentCache<EpisodeMetadata>,
}

impl Reader {
    pub fn new(session: Arc<Session>, store: Arc<dyn BlobStore>) -> Self {
        let config = session.config();
        let gateway = IpfsGateway::new(&config.ipfs_gateway_host);
        let metadata = ContentCache::new(config.metadata_cache);
        Self { session, store, gateway, metadata }
    }

    pub async fn load(&self, series_id: SeriesId, episode_number: EpisodeNumber) -> Result<ReaderView, ReaderError> {
        let wallet = self.session.wallet_address();
        let contracts = self.session.contracts();
        let gate = AccessGate::new(&self.session);
        let (series, decision, episodes) = tokio::join!(
            contracts.get_series(series_id),
            gate.resolve(series_id, episode_number, wallet.as_deref()),
            contracts.get_series_episodes(series_id),
        );

        let series = series.ok_or(ReaderError::SeriesNotFound(series_id))?;
        let (episode, access) = match decision {
            GateDecision::Resolved { episode, access } => (episode, access),
            GateDecision::NotFound => return Err(ReaderError::EpisodeNotFound { series_id, episode_number }),
        };
        let episodes: Vec<Episode> = episodes.into_iter().sorted_by_key(|e| e.episode_number).collect();
        let (prev, next) = neighbours(&episodes, episode_number);

        let mut view = ReaderView { series, episode, episodes, access, metadata: None, page_urls: Vec::new(), prev, next };
        if access.is_unlocked() {
            self.fill_content(&mut view).await;
        }
        Ok(view)
    }

    /// Pays for the episode shown in `view` and reveals its pages. The view is left untouched
    /// when the transaction fails.
    pub async fn unlock(&self, view: &mut ReaderView) -> Result<String, ReaderError> {
        if view.is_unlocked() {
            return Err(ReaderError::AlreadyUnlocked);
        }
        let episode = &view.episode;
        let tx_hash = self
            .session
            .contracts()
            .unlock_episode(episode.series_id, episode.episode_number, episode.price)
            .await?;
        info!("unlocked episode {}/{} in {tx_hash}", episode.series_id, episode.episode_number);
        view.access = Access::UnlockedPaid;
        self.fill_content(view).await;
        Ok(tx_hash)
    }

    async fn fill_content(&self, view: &mut ReaderView) {
        if let Some(metadata) = self.fetch_metadata(&view.episode).await {
            view.page_urls = metadata.images.iter().map(|image| self.gateway.resolve_uri(image)).collect();
            view.metadata = Some(metadata);
        }
    }

    /// Metadata document of `episode`, `None` when it cannot be fetched or parsed.
    pub async fn fetch_metadata(&self, episode: &Episode) -> Option<EpisodeMetadata> {
        let url = self.gateway.resolve_uri(&episode.metadata_uri);
        if let Some(cached) = self.metadata.get(&url) {
            return Some(cached);
        }
        match fetch_json::<EpisodeMetadata>(self.store.as_ref(), &url).await {
            Ok(metadata) => {
                self.metadata.insert(&url, metadata.clone());
                Some(metadata)
            }
            Err(e) => {
                warn!("metadata for episode {}/{} at {url}: {e}", episode.series_id, episode.episode_number);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;

    fn episode(number: EpisodeNumber) -> Episode {
        Episode {
            id: number as u64,
            series_id: 1,
            episode_number: number,
            metadata_uri: String::new(),
            price: Amount::ZERO,
            creator: "02aa".into(),
            published_at: 0,
        }
    }

    #[test]
    fn neighbours_follow_sorted_numbers() {
        let list: Vec<_> = [1, 2, 5].into_iter().map(episode).collect();
        assert_eq!(neighbours(&list, 1), (None, Some(2)));
        assert_eq!(neighbours(&list, 2), (Some(1), Some(5)));
        assert_eq!(neighbours(&list, 5), (Some(2), None));
        assert_eq!(neighbours(&list, 3), (None, None));
        assert_eq!(neighbours(&list[..1], 1), (None, None));
    }
}
