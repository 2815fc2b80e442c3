//! Records read from the series, episode and episode-NFT applications, plus the off-chain documents
//! pinned next to them.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;

pub type SeriesId = u64;
pub type EpisodeNumber = u32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub id: SeriesId,
    pub title: String,
    pub description: String,
    #[serde(rename = "coverURI")]
    pub cover_uri: String,
    pub creator: String,
    pub episode_count: u32,
    pub created_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: u64,
    pub series_id: SeriesId,
    pub episode_number: EpisodeNumber,
    #[serde(rename = "metadataURI")]
    pub metadata_uri: String,
    pub price: Amount,
    pub creator: String,
    pub published_at: u64,
}

impl Episode {
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }
}

/// Episode document pinned on IPFS. Readers only rely on `name`, `description` and `images`;
/// the publish flow also records where the pages live and when they were uploaded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<SeriesId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<EpisodeNumber>,
    #[serde(default, rename = "imagesCID", skip_serializing_if = "Option::is_none")]
    pub images_cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeNft {
    pub series_id: SeriesId,
    pub episode_number: EpisodeNumber,
    pub creator: String,
    pub minted_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftAttribute {
    pub trait_type: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftProperties {
    pub pages: Vec<String>,
    pub series_id: SeriesId,
    pub episode_number: EpisodeNumber,
}

/// Token metadata in the usual NFT marketplace layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftMetadata {
    pub name: String,
    pub description: String,
    pub image: String,
    pub attributes: Vec<NftAttribute>,
    pub properties: NftProperties,
}

/// What an id-producing write hands back once the transaction is final.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub tx_hash: String,
    pub id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_uses_contract_field_names() {
        let json = r#"{
            "id": 9, "seriesId": 3, "episodeNumber": 1, "metadataURI": "bafymeta",
            "price": "0", "creator": "02ab", "publishedAt": 1700000000
        }"#;
        let episode: Episode = serde_json::from_str(json).unwrap();
        assert_eq!(episode.metadata_uri, "bafymeta");
        assert!(episode.is_free());
    }

    #[test]
    fn reader_metadata_tolerates_missing_publish_fields() {
        let meta: EpisodeMetadata = serde_json::from_str(r#"{"name":"Ep 1","description":"d","images":["a","b"]}"#).unwrap();
        assert_eq!(meta.images.len(), 2);
        assert_eq!(meta.images_cid, None);
        let back = serde_json::to_value(&meta).unwrap();
        assert!(back.get("imagesCID").is_none());
    }
}
