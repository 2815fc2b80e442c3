//! Creator flows: pin assets, then record them on chain.
//!
//! Each flow validates its input before touching the network and reports every stage change to
//! the caller's progress callback.

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use log::info;

use crate::amount::{Amount, AmountError};
use crate::contract::ContractError;
use crate::ipfs::{directory_entry_name, ipfs_uri, IpfsGateway};
use crate::model::{EpisodeMetadata, EpisodeNumber, NftAttribute, NftMetadata, NftProperties, SeriesId};
use crate::session::Session;
use crate::storage::{upload_files, upload_json, BlobStore, FileUpload, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum CreatorError {
    #[error("title must not be blank")]
    BlankTitle,
    #[error("description must not be blank")]
    BlankDescription,
    #[error("a cover image is required")]
    MissingCover,
    #[error("at least one page image is required")]
    NoPages,
    #[error(transparent)]
    InvalidPrice(#[from] AmountError),
    #[error("no wallet connected")]
    WalletUnavailable,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Contract(#[from] ContractError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Uploading,
    Creating,
    UploadingImages,
    UploadingMetadata,
    Publishing,
    Minting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Uploading => "uploading",
            Stage::Creating => "creating",
            Stage::UploadingImages => "uploading-images",
            Stage::UploadingMetadata => "uploading-metadata",
            Stage::Publishing => "publishing",
            Stage::Minting => "minting",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    /// Only the publish flow reports a percentage.
    pub percent: Option<u8>,
}

#[derive(Clone, Debug)]
pub struct NewSeries {
    pub title: String,
    pub description: String,
    pub cover: Option<FileUpload>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeriesCreated {
    pub tx_hash: String,
    pub series_id: SeriesId,
    pub cover_cid: String,
}

#[derive(Clone, Debug)]
pub struct NewEpisode {
    pub series_id: SeriesId,
    pub episode_number: EpisodeNumber,
    pub title: String,
    pub description: String,
    /// Decimal token amount; blank means free.
    pub price: String,
    pub pages: Vec<FileUpload>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpisodePublished {
    pub tx_hash: String,
    pub episode_id: u64,
    pub images_cid: String,
    pub metadata_cid: String,
}

#[derive(Clone, Debug)]
pub struct EpisodeMint {
    pub series_id: SeriesId,
    pub episode_number: EpisodeNumber,
    pub title: String,
    pub description: Option<String>,
    pub images: Vec<FileUpload>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpisodeMinted {
    pub tx_hash: String,
    pub token_id: u64,
    pub image_uris: Vec<String>,
    pub metadata_uri: String,
}

fn report(on_progress: &mut impl FnMut(Progress), stage: Stage, percent: Option<u8>) {
    match percent {
        Some(p) => info!("{stage} ({p}%)"),
        None => info!("{stage}"),
    }
    on_progress(Progress { stage, percent });
}

fn parse_price(price: &str) -> Result<Amount, AmountError> {
    if price.trim().is_empty() {
        Ok(Amount::ZERO)
    } else {
        Amount::from_decimal(price)
    }
}

/// Episode document for pages uploaded as directory `images_cid`.
pub fn episode_metadata(
    gateway: &IpfsGateway,
    episode: &NewEpisode,
    images_cid: &str,
    created_at: String,
) -> EpisodeMetadata {
    let images = episode
        .pages
        .iter()
        .enumerate()
        .map(|(index, page)| gateway.ipfs_url(images_cid, Some(&directory_entry_name(index, &page.name))))
        .collect();
    EpisodeMetadata {
        name: episode.title.clone(),
        description: episode.description.clone(),
        images,
        series_id: Some(episode.series_id),
        episode_number: Some(episode.episode_number),
        images_cid: Some(images_cid.to_string()),
        page_count: Some(episode.pages.len()),
        created_at: Some(created_at),
    }
}

/// Token metadata for a minted episode, the first page doubling as the token image.
pub fn nft_metadata(mint: &EpisodeMint, creator: &str, image_uris: Vec<String>) -> NftMetadata {
    let description = mint
        .description
        .clone()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| format!("Episode {} from Series {}", mint.episode_number, mint.series_id));
    let attribute = |trait_type: &str, value: String| NftAttribute { trait_type: trait_type.to_string(), value };
    NftMetadata {
        name: mint.title.clone(),
        description,
        image: image_uris.first().cloned().unwrap_or_default(),
        attributes: vec![
            attribute("Series ID", mint.series_id.to_string()),
            attribute("Episode Number", mint.episode_number.to_string()),
            attribute("Creator", creator.to_string()),
            attribute("Page Count", image_uris.len().to_string()),
        ],
        properties: NftProperties { pages: image_uris, series_id: mint.series_id, episode_number: mint.episode_number },
    }
}

pub struct Creator {
    session: Arc<Session>,
    store: Arc<dyn BlobStore>,
    gateway: IpfsGateway,
}

impl Creator {
    pub fn new(session: Arc<Session>, store: Arc<dyn BlobStore>) -> Self {
        let gateway = IpfsGateway::new(&session.config().ipfs_gateway_host);
        Self { session, store, gateway }
    }

    /// Address of the connected wallet. Checked before any upload so nothing gets pinned for a
    /// write that cannot be signed.
    fn require_wallet(&self) -> Result<String, CreatorError> {
        self.session.wallet_address().ok_or(CreatorError::WalletUnavailable)
    }

    pub async fn create_series(
        &self,
        request: NewSeries,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<SeriesCreated, CreatorError> {
        self.require_wallet()?;
        if request.title.trim().is_empty() {
            return Err(CreatorError::BlankTitle);
        }
        if request.description.trim().is_empty() {
            return Err(CreatorError::BlankDescription);
        }
        let cover = request.cover.ok_or(CreatorError::MissingCover)?;

        report(&mut on_progress, Stage::Uploading, None);
        let cover_cid = self.store.upload_file(cover).await?;

        report(&mut on_progress, Stage::Creating, None);
        let outcome = self.session.contracts().create_series(&request.title, &request.description, &cover_cid).await?;

        report(&mut on_progress, Stage::Done, None);
        Ok(SeriesCreated { tx_hash: outcome.tx_hash, series_id: outcome.id, cover_cid })
    }

    pub async fn publish_episode(
        &self,
        request: NewEpisode,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<EpisodePublished, CreatorError> {
        self.require_wallet()?;
        if request.pages.is_empty() {
            return Err(CreatorError::NoPages);
        }
        if request.title.trim().is_empty() {
            return Err(CreatorError::BlankTitle);
        }
        let price = parse_price(&request.price)?;

        report(&mut on_progress, Stage::UploadingImages, Some(20));
        let images_cid = upload_files(self.store.as_ref(), request.pages.clone()).await?;

        report(&mut on_progress, Stage::UploadingMetadata, Some(50));
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let metadata = episode_metadata(&self.gateway, &request, &images_cid, created_at);
        let metadata_cid = upload_json(self.store.as_ref(), &metadata).await?;

        report(&mut on_progress, Stage::Publishing, Some(75));
        let outcome = self
            .session
            .contracts()
            .publish_episode(request.series_id, request.episode_number, &metadata_cid, price)
            .await?;

        report(&mut on_progress, Stage::Done, Some(100));
        Ok(EpisodePublished { tx_hash: outcome.tx_hash, episode_id: outcome.id, images_cid, metadata_cid })
    }

    pub async fn mint_episode(
        &self,
        request: EpisodeMint,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<EpisodeMinted, CreatorError> {
        let creator = self.require_wallet()?;
        if request.title.trim().is_empty() {
            return Err(CreatorError::BlankTitle);
        }
        if request.images.is_empty() {
            return Err(CreatorError::NoPages);
        }

        report(&mut on_progress, Stage::Uploading, None);
        let mut image_uris = Vec::with_capacity(request.images.len());
        for image in &request.images {
            let cid = self.store.upload_file(image.clone()).await?;
            image_uris.push(ipfs_uri(&cid));
        }
        let metadata = nft_metadata(&request, &creator, image_uris.clone());
        let metadata_uri = ipfs_uri(&upload_json(self.store.as_ref(), &metadata).await?);

        report(&mut on_progress, Stage::Minting, None);
        let outcome = self
            .session
            .contracts()
            .mint_episode(&creator, &metadata_uri, request.series_id, request.episode_number)
            .await?;

        report(&mut on_progress, Stage::Done, None);
        Ok(EpisodeMinted { tx_hash: outcome.tx_hash, token_id: outcome.id, image_uris, metadata_uri })
    }
}
