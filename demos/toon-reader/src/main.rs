mod files;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args as ClapArgs, Parser, Subcommand};
use itertools::Itertools;
use log::info;

use toonchain::creator::{EpisodeMint, NewEpisode, NewSeries};
use toonchain::model::{EpisodeNumber, SeriesId};
use toonchain::pki::parse_secret_key;
use toonchain::storage::Web3Storage;
use toonchain::{
    BlobStore, Config, ContractError, Creator, CreatorError, IpfsGateway, KeySigner, Progress, Reader, ReaderError,
    ReaderView, Session, StorageError,
};

#[derive(Parser, Debug)]
#[command(name = "toon-reader", version, about = "Read and publish webtoon series on chain applications")]
struct Args {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: CliCmd,
}

/// Flags override the `TOONCHAIN_*` environment, which overrides the built-in defaults.
#[derive(ClapArgs, Debug)]
struct GlobalOpts {
    /// Chain application gateway base URL
    #[arg(long, global = true)]
    gateway_url: Option<String>,
    #[arg(long, global = true)]
    series_app: Option<String>,
    #[arg(long, global = true)]
    episode_app: Option<String>,
    #[arg(long, global = true)]
    episode_nft_app: Option<String>,
    /// IPFS pinning endpoint
    #[arg(long, global = true)]
    storage_endpoint: Option<String>,
    #[arg(long, global = true, env = "WEB3_STORAGE_TOKEN", hide_env_values = true)]
    storage_token: Option<String>,
    /// Gateway host for reading pinned content, e.g. w3s.link
    #[arg(long, global = true)]
    ipfs_gateway: Option<String>,
    /// Wallet secret key (hex)
    #[arg(long, global = true, env = "TOONCHAIN_WALLET_KEY", hide_env_values = true)]
    wallet_key: Option<String>,
    /// `finalized` or a confirmation count
    #[arg(long, global = true)]
    confirmation: Option<String>,
    /// `open` or `closed`: answer to use when the unlock check cannot reach the chain
    #[arg(long, global = true)]
    unlock_policy: Option<String>,
}

#[derive(Subcommand, Debug)]
enum CliCmd {
    /// Show one series
    Series { #[arg(long)] id: SeriesId },
    /// List the series of a creator (defaults to the connected wallet)
    CreatorSeries { #[arg(long)] creator: Option<String> },
    /// List the episodes of a series
    Episodes { #[arg(long)] series_id: SeriesId },
    /// Load an episode through the access gate and print its pages
    Read { #[arg(long)] series_id: SeriesId, #[arg(long)] episode: EpisodeNumber },
    /// Pay for a locked episode, then print its pages
    Unlock { #[arg(long)] series_id: SeriesId, #[arg(long)] episode: EpisodeNumber },
    /// Upload a cover and create a series
    CreateSeries { #[arg(long)] title: String, #[arg(long)] description: String, #[arg(long)] cover: PathBuf },
    /// Upload pages and publish an episode
    Publish {
        #[arg(long)] series_id: SeriesId,
        #[arg(long)] episode: EpisodeNumber,
        #[arg(long)] title: String,
        #[arg(long, default_value = "")] description: String,
        /// Decimal token amount, 0 for a free episode
        #[arg(long, default_value = "0")] price: String,
        #[arg(long = "page", required = true, num_args = 1..)] pages: Vec<PathBuf>,
    },
    /// Upload pages one by one and mint an episode NFT to the connected wallet
    Mint {
        #[arg(long)] series_id: SeriesId,
        #[arg(long)] episode: EpisodeNumber,
        #[arg(long)] title: String,
        #[arg(long)] description: Option<String>,
        #[arg(long = "image", required = true, num_args = 1..)] images: Vec<PathBuf>,
    },
    /// Show an episode NFT, or the total supply without a token id
    Nft { #[arg(long)] token_id: Option<u64> },
    /// Print the gateway URL of a CID
    Url { #[arg(long)] cid: String, #[arg(long)] file: Option<String> },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid wallet key")]
    InvalidKey,
    #[error("invalid {0} value `{1}`")]
    InvalidOption(&'static str, String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("no creator given and no wallet connected")]
    NoCreator,
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Creator(#[from] CreatorError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn build_config(opts: &GlobalOpts) -> Result<Config, CliError> {
    let mut config = Config::from_env();
    if let Some(url) = &opts.gateway_url {
        config.gateway_url = url.clone();
    }
    if let Some(id) = &opts.series_app {
        config.apps.series = id.clone();
    }
    if let Some(id) = &opts.episode_app {
        config.apps.episode = id.clone();
    }
    if let Some(id) = &opts.episode_nft_app {
        config.apps.episode_nft = id.clone();
    }
    if let Some(endpoint) = &opts.storage_endpoint {
        config.storage.endpoint = endpoint.clone();
    }
    if let Some(token) = &opts.storage_token {
        config.storage.token = Some(token.clone());
    }
    if let Some(host) = &opts.ipfs_gateway {
        config.ipfs_gateway_host = host.clone();
    }
    if let Some(value) = &opts.confirmation {
        config.confirmation = value.parse().map_err(|_| CliError::InvalidOption("confirmation", value.clone()))?;
    }
    if let Some(value) = &opts.unlock_policy {
        config.unlock_policy = value.parse().map_err(|_| CliError::InvalidOption("unlock policy", value.clone()))?;
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_view(view: &ReaderView) {
    let episode = &view.episode;
    println!("{} / episode {} [{}]", view.series.title, episode.episode_number, view.access);
    println!("price: {}", episode.price);
    if let Some(metadata) = &view.metadata {
        println!("{}: {}", metadata.name, metadata.description);
    }
    if view.page_urls.is_empty() && view.is_unlocked() {
        println!("(no pages available)");
    }
    for url in &view.page_urls {
        println!("  {url}");
    }
    let nav = [view.prev.map(|n| format!("prev: {n}")), view.next.map(|n| format!("next: {n}"))];
    let nav = nav.into_iter().flatten().join("  ");
    if !nav.is_empty() {
        println!("{nav}");
    }
}

fn log_progress(progress: Progress) {
    match progress.percent {
        Some(p) => println!("[{p:>3}%] {}", progress.stage),
        None => println!("[....] {}", progress.stage),
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let config = build_config(&args.global)?;
    let storage = Web3Storage::new(&config.storage, config.request_timeout)?;
    let session = Arc::new(Session::new(config));
    if let Some(hex) = &args.global.wallet_key {
        let sk = parse_secret_key(hex).ok_or(CliError::InvalidKey)?;
        session.connect_wallet(Arc::new(KeySigner::new(sk)));
    }
    let store: Arc<dyn BlobStore> = Arc::new(storage);
    let contracts = session.contracts();

    match args.command {
        CliCmd::Series { id } => {
            let series = contracts.try_get_series(id).await?.ok_or_else(|| CliError::NotFound(format!("series {id}")))?;
            print_json(&series)?;
        }
        CliCmd::CreatorSeries { creator } => {
            let creator = creator.or_else(|| session.wallet_address()).ok_or(CliError::NoCreator)?;
            print_json(&contracts.try_get_creator_series(&creator).await?)?;
        }
        CliCmd::Episodes { series_id } => {
            print_json(&contracts.try_get_series_episodes(series_id).await?)?;
        }
        CliCmd::Read { series_id, episode } => {
            let reader = Reader::new(Arc::clone(&session), store);
            print_view(&reader.load(series_id, episode).await?);
        }
        CliCmd::Unlock { series_id, episode } => {
            let reader = Reader::new(Arc::clone(&session), store);
            let mut view = reader.load(series_id, episode).await?;
            let tx_hash = reader.unlock(&mut view).await?;
            println!("unlock transaction: {tx_hash}");
            print_view(&view);
        }
        CliCmd::CreateSeries { title, description, cover } => {
            let cover = files::load_upload(&cover).await?;
            let creator = Creator::new(Arc::clone(&session), store);
            let created = creator.create_series(NewSeries { title, description, cover: Some(cover) }, log_progress).await?;
            println!("series {} created in {} (cover {})", created.series_id, created.tx_hash, created.cover_cid);
        }
        CliCmd::Publish { series_id, episode, title, description, price, pages } => {
            let pages = files::load_uploads(&pages).await?;
            let creator = Creator::new(Arc::clone(&session), store);
            let request = NewEpisode { series_id, episode_number: episode, title, description, price, pages };
            let published = creator.publish_episode(request, log_progress).await?;
            println!("episode id {} published in {}", published.episode_id, published.tx_hash);
            println!("pages {} metadata {}", published.images_cid, published.metadata_cid);
        }
        CliCmd::Mint { series_id, episode, title, description, images } => {
            let images = files::load_uploads(&images).await?;
            let creator = Creator::new(Arc::clone(&session), store);
            let request = EpisodeMint { series_id, episode_number: episode, title, description, images };
            let minted = creator.mint_episode(request, log_progress).await?;
            println!("token {} minted in {} ({})", minted.token_id, minted.tx_hash, minted.metadata_uri);
        }
        CliCmd::Nft { token_id: Some(token_id) } => {
            let nft = contracts.get_episode_nft(token_id).await.ok_or_else(|| CliError::NotFound(format!("token {token_id}")))?;
            print_json(&nft)?;
            if let Some(uri) = contracts.token_uri(token_id).await {
                println!("metadata: {uri}");
            }
        }
        CliCmd::Nft { token_id: None } => {
            println!("total supply: {}", contracts.total_supply().await);
        }
        CliCmd::Url { cid, file } => {
            let gateway = IpfsGateway::new(&session.config().ipfs_gateway_host);
            println!("{}", gateway.ipfs_url(&cid, file.as_deref()));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();
    info!("toon-reader {}", env!("CARGO_PKG_VERSION"));
    if let Err(e) = run(args).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toonchain::{ConfirmationPolicy, UnlockCheckPolicy};

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "toon-reader",
            "--gateway-url",
            "http://node:9000",
            "--ipfs-gateway",
            "dweb.link",
            "--unlock-policy",
            "closed",
            "--confirmation",
            "finalized",
            "url",
            "--cid",
            "bafy",
        ]);
        let config = build_config(&args.global).unwrap();
        assert_eq!(config.gateway_url, "http://node:9000");
        assert_eq!(config.ipfs_gateway_host, "dweb.link");
        assert_eq!(config.unlock_policy, UnlockCheckPolicy::FailClosed);
        assert_eq!(config.confirmation, ConfirmationPolicy::Finality);
    }

    #[test]
    fn bad_policy_is_rejected() {
        let args = Args::parse_from(["toon-reader", "--unlock-policy", "sometimes", "nft"]);
        assert!(matches!(build_config(&args.global), Err(CliError::InvalidOption("unlock policy", _))));
    }

    #[test]
    fn publish_takes_several_pages() {
        let args = Args::parse_from([
            "toon-reader", "publish", "--series-id", "3", "--episode", "1", "--title", "Ep 1", "--page", "a.png", "b.png",
        ]);
        match args.command {
            CliCmd::Publish { pages, price, .. } => {
                assert_eq!(pages.len(), 2);
                assert_eq!(price, "0");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
