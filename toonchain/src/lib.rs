//! Publishing and reading webtoon series backed by chain applications and IPFS.
//!
//! A [`Session`] carries configuration, the lazily built [`ChainClient`] and the connected wallet.
//! [`Contracts`] wraps the series, episode and episode-NFT applications, [`AccessGate`] decides who
//! may read an episode, and [`Reader`] / [`Creator`] chain those pieces with a [`BlobStore`].

pub mod amount;
pub mod cache;
pub mod chain;
pub mod config;
pub mod contract;
pub mod creator;
pub mod gate;
pub mod ipfs;
pub mod model;
pub mod pki;
pub mod reader;
#[cfg(feature = "http")]
pub mod rpc;
pub mod session;
pub mod storage;
pub mod wallet;

pub use amount::Amount;
pub use chain::{ChainClient, ChainError, ConfirmationPolicy};
pub use config::Config;
pub use contract::{ContractError, Contracts};
pub use creator::{Creator, CreatorError, Progress, Stage};
pub use gate::{Access, AccessGate, GateDecision, UnlockCheckPolicy};
pub use ipfs::IpfsGateway;
pub use model::{Episode, EpisodeMetadata, EpisodeNft, Series, WriteOutcome};
pub use reader::{Reader, ReaderError, ReaderView};
pub use session::Session;
pub use storage::{BlobStore, FileUpload, StorageError};
pub use wallet::{KeySigner, Signer};
