use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use toonchain::chain::{value_as_u64, ChainEvent, QueryRequest, SignedOperation, TxReceipt, TxStatus};
use toonchain::config::AppIds;
use toonchain::model::{Episode, EpisodeNft, Series};
use toonchain::pki::{verify_signature, PubKey, Sig};
use toonchain::storage::{BlobStore, FileUpload, StorageError};
use toonchain::{Amount, ChainClient, ChainError, Config, Session};

pub const SERIES_APP: &str = "e476series";
pub const EPISODE_APP: &str = "e476episode";
pub const EPISODE_NFT_APP: &str = "e476nft";
pub const GATEWAY_HOST: &str = "gw.test";

/// Config pointing at the in-memory applications, polling fast enough for tests.
pub fn test_config() -> Config {
    Config {
        apps: AppIds { series: SERIES_APP.into(), episode: EPISODE_APP.into(), episode_nft: EPISODE_NFT_APP.into() },
        poll_interval: Duration::from_millis(2),
        finality_timeout: Duration::from_secs(5),
        ipfs_gateway_host: GATEWAY_HOST.into(),
        ..Config::default()
    }
}

pub fn session_on(chain: &Arc<MemoryChain>, config: Config) -> Arc<Session> {
    Arc::new(Session::with_client(config, Arc::clone(chain) as Arc<dyn ChainClient>))
}

fn arg_u64(args: &Value, key: &str) -> Result<u64, ChainError> {
    args.get(key).and_then(value_as_u64).ok_or_else(|| ChainError::Rejected(format!("missing argument {key}")))
}

fn arg_str(args: &Value, key: &str) -> Result<String, ChainError> {
    args.get(key).and_then(Value::as_str).map(str::to_string).ok_or_else(|| ChainError::Rejected(format!("missing argument {key}")))
}

#[derive(Default)]
struct Ledger {
    series: BTreeMap<u64, Series>,
    episodes: BTreeMap<u64, Episode>,
    unlocks: HashSet<(u64, u32, String)>,
    nfts: BTreeMap<u64, (EpisodeNft, String)>,
    receipts: HashMap<String, TxReceipt>,
    submissions: Vec<SignedOperation>,
    clock: u64,
}

impl Ledger {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        1_700_000_000 + self.clock
    }
}

/// Series, episode and episode-NFT applications kept in memory.
///
/// Submissions must carry a valid signature. Receipts come back unconfirmed and turn final on the
/// first `receipt` poll, so every write goes through the confirmation wait.
#[derive(Default)]
pub struct MemoryChain {
    ledger: Mutex<Ledger>,
    failing: Mutex<HashSet<String>>,
    queries: AtomicUsize,
}

impl MemoryChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every query or submission of `method` fail with a 500.
    pub fn fail(&self, method: &str) {
        self.failing.lock().unwrap().insert(method.to_string());
    }

    pub fn recover(&self, method: &str) {
        self.failing.lock().unwrap().remove(method);
    }

    pub fn insert_series(&self, id: u64, title: &str, creator: &str) {
        let mut ledger = self.ledger.lock().unwrap();
        let created_at = ledger.tick();
        let series = Series {
            id,
            title: title.into(),
            description: String::new(),
            cover_uri: String::new(),
            creator: creator.into(),
            episode_count: 0,
            created_at,
        };
        ledger.series.insert(id, series);
    }

    pub fn submissions(&self) -> Vec<SignedOperation> {
        self.ledger.lock().unwrap().submissions.clone()
    }

    pub fn submitted_methods(&self) -> Vec<String> {
        self.submissions().into_iter().map(|s| s.operation.method).collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn check_failing(&self, method: &str) -> Result<(), ChainError> {
        if self.failing.lock().unwrap().contains(method) {
            return Err(ChainError::Http(500));
        }
        Ok(())
    }

    fn answer(&self, ledger: &Ledger, app_id: &str, method: &str, args: &Value) -> Result<Value, ChainError> {
        match (app_id, method) {
            (SERIES_APP, "getCreatorSeries") => {
                let creator = arg_str(args, "creator")?;
                let list: Vec<&Series> = ledger.series.values().filter(|s| s.creator == creator).collect();
                Ok(serde_json::to_value(list)?)
            }
            (SERIES_APP, "getSeries") => {
                let id = arg_u64(args, "seriesId")?;
                Ok(ledger.series.get(&id).map(serde_json::to_value).transpose()?.unwrap_or(Value::Null))
            }
            (EPISODE_APP, "getSeriesEpisodes") => {
                let series_id = arg_u64(args, "seriesId")?;
                // Tuple layout, the way ABI-style applications return structs
                let list: Vec<Value> = ledger
                    .episodes
                    .values()
                    .filter(|e| e.series_id == series_id)
                    .map(|e| {
                        json!([
                            format!("{:#x}", e.id),
                            e.series_id,
                            e.episode_number,
                            e.metadata_uri,
                            e.price,
                            e.creator,
                            e.published_at.to_string()
                        ])
                    })
                    .collect();
                Ok(Value::Array(list))
            }
            (EPISODE_APP, "hasUnlocked") => {
                let key = (arg_u64(args, "seriesId")?, arg_u64(args, "episodeNumber")? as u32, arg_str(args, "user")?);
                Ok(Value::Bool(ledger.unlocks.contains(&key)))
            }
            (EPISODE_NFT_APP, "getEpisodeData") => {
                let token_id = arg_u64(args, "tokenId")?;
                Ok(ledger.nfts.get(&token_id).map(|(nft, _)| serde_json::to_value(nft)).transpose()?.unwrap_or(Value::Null))
            }
            (EPISODE_NFT_APP, "tokenURI") => {
                let token_id = arg_u64(args, "tokenId")?;
                Ok(ledger.nfts.get(&token_id).map(|(_, uri)| Value::String(uri.clone())).unwrap_or(Value::Null))
            }
            (EPISODE_NFT_APP, "totalSupply") => Ok(Value::String(format!("{:#x}", ledger.nfts.len()))),
            (app, method) => Err(ChainError::Rejected(format!("{app} has no query {method}"))),
        }
    }

    fn apply(&self, ledger: &mut Ledger, signed: &SignedOperation) -> Result<Vec<ChainEvent>, ChainError> {
        let op = &signed.operation;
        let args = &op.args;
        let event = |name: &str, data: Value| ChainEvent { name: name.into(), data };
        match (op.app_id.as_str(), op.method.as_str()) {
            (SERIES_APP, "createSeries") => {
                let id = ledger.series.keys().next_back().map_or(1, |last| last + 1);
                let created_at = ledger.tick();
                let series = Series {
                    id,
                    title: arg_str(args, "title")?,
                    description: arg_str(args, "description")?,
                    cover_uri: arg_str(args, "coverURI")?,
                    creator: signed.signer.clone(),
                    episode_count: 0,
                    created_at,
                };
                ledger.series.insert(id, series);
                Ok(vec![event("SeriesCreated", json!({ "seriesId": id.to_string() }))])
            }
            (EPISODE_APP, "publishEpisode") => {
                let series_id = arg_u64(args, "seriesId")?;
                let episode_number = arg_u64(args, "episodeNumber")? as u32;
                let price: Amount = args
                    .get("price")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()?
                    .ok_or_else(|| ChainError::Rejected("missing argument price".into()))?;
                if !ledger.series.contains_key(&series_id) {
                    return Err(ChainError::Rejected(format!("series {series_id} does not exist")));
                }
                if ledger.episodes.values().any(|e| e.series_id == series_id && e.episode_number == episode_number) {
                    return Err(ChainError::Rejected(format!("episode {episode_number} already published")));
                }
                let id = ledger.episodes.len() as u64 + 1;
                let published_at = ledger.tick();
                let episode = Episode {
                    id,
                    series_id,
                    episode_number,
                    metadata_uri: arg_str(args, "metadataURI")?,
                    price,
                    creator: signed.signer.clone(),
                    published_at,
                };
                ledger.episodes.insert(id, episode);
                if let Some(series) = ledger.series.get_mut(&series_id) {
                    series.episode_count += 1;
                }
                Ok(vec![event("EpisodePublished", json!({ "episodeId": id, "seriesId": series_id }))])
            }
            (EPISODE_APP, "unlockEpisode") => {
                let series_id = arg_u64(args, "seriesId")?;
                let episode_number = arg_u64(args, "episodeNumber")? as u32;
                let episode = ledger
                    .episodes
                    .values()
                    .find(|e| e.series_id == series_id && e.episode_number == episode_number)
                    .ok_or_else(|| ChainError::Rejected("episode does not exist".into()))?;
                if op.value.unwrap_or_default() < episode.price {
                    return Err(ChainError::Rejected("insufficient payment".into()));
                }
                ledger.unlocks.insert((series_id, episode_number, signed.signer.clone()));
                Ok(vec![event("EpisodeUnlocked", json!({ "seriesId": series_id, "episodeNumber": episode_number }))])
            }
            (EPISODE_NFT_APP, "mintEpisode") => {
                let token_id = ledger.nfts.len() as u64 + 1;
                let minted_at = ledger.tick();
                let nft = EpisodeNft {
                    series_id: arg_u64(args, "seriesId")?,
                    episode_number: arg_u64(args, "episodeNumber")? as u32,
                    creator: arg_str(args, "creator")?,
                    minted_at,
                };
                ledger.nfts.insert(token_id, (nft, arg_str(args, "metadataURI")?));
                Ok(vec![event("EpisodeMinted", json!({ "tokenId": format!("{token_id:#x}") }))])
            }
            (app, method) => Err(ChainError::Rejected(format!("{app} has no method {method}"))),
        }
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn query(&self, request: &QueryRequest) -> Result<Value, ChainError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_failing(&request.method)?;
        let ledger = self.ledger.lock().unwrap();
        self.answer(&ledger, &request.app_id, &request.method, &request.args)
    }

    async fn submit(&self, signed: &SignedOperation) -> Result<TxReceipt, ChainError> {
        self.check_failing(&signed.operation.method)?;
        let signer = PubKey::from_hex(&signed.signer).ok_or_else(|| ChainError::Rejected("bad signer".into()))?;
        let sig = Sig::from_hex(&signed.signature).ok_or_else(|| ChainError::Rejected("bad signature".into()))?;
        if !verify_signature(&signer, &signed.operation.digest(signed.nonce), &sig) {
            return Err(ChainError::Rejected("signature does not match operation".into()));
        }

        let mut ledger = self.ledger.lock().unwrap();
        let events = self.apply(&mut ledger, signed)?;
        ledger.submissions.push(signed.clone());
        let tx_hash = format!("0x{:064x}", ledger.submissions.len());
        let receipt = TxReceipt {
            tx_hash: tx_hash.clone(),
            status: TxStatus { acceptance_height: Some(ledger.clock), confirmations: Some(0), finality: Some(false) },
            events,
        };
        let final_receipt = TxReceipt {
            status: TxStatus { confirmations: Some(10), finality: Some(true), ..receipt.status.clone() },
            ..receipt.clone()
        };
        ledger.receipts.insert(tx_hash, final_receipt);
        Ok(receipt)
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError> {
        Ok(self.ledger.lock().unwrap().receipts.get(tx_hash).cloned())
    }
}

/// Content-addressed blob store answering both gateway URL layouts for host [`GATEWAY_HOST`].
#[derive(Default)]
pub struct MemoryBlobStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    directories: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    uploads: AtomicUsize,
    fetches: AtomicUsize,
    unreachable: Mutex<bool>,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Makes every fetch fail, as an unreachable gateway would.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }

    pub fn file(&self, cid: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(cid).cloned()
    }

    pub fn directory_names(&self, cid: &str) -> Vec<String> {
        let dirs = self.directories.lock().unwrap();
        let mut names: Vec<String> = dirs.get(cid).map(|d| d.keys().cloned().collect()).unwrap_or_default();
        names.sort();
        names
    }

    pub fn put_json(&self, value: &Value) -> String {
        let bytes = serde_json::to_vec(value).unwrap();
        let cid = content_id(&[&bytes]);
        self.files.lock().unwrap().insert(cid.clone(), bytes);
        cid
    }

    fn lookup(&self, cid: &str, name: Option<&str>) -> Option<Vec<u8>> {
        match name {
            None => self.files.lock().unwrap().get(cid).cloned(),
            Some(name) => self.directories.lock().unwrap().get(cid).and_then(|d| d.get(name).cloned()),
        }
    }
}

fn content_id(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    format!("bafy{}", &faster_hex::hex_string(&digest)[..40])
}

/// Splits `https://<cid>.ipfs.<host>/<name>` or `https://<host>/ipfs/<cid>/<name>` into cid and name.
pub fn parse_gateway_url(url: &str) -> Option<(String, Option<String>)> {
    let rest = url.strip_prefix("https://")?;
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    let (cid, name) = if authority == GATEWAY_HOST {
        let path = path.strip_prefix("ipfs/")?;
        match path.split_once('/') {
            Some((cid, name)) => (cid, Some(name)),
            None => (path, None),
        }
    } else {
        let cid = authority.strip_suffix(&format!(".ipfs.{GATEWAY_HOST}"))?;
        (cid, Some(path).filter(|p| !p.is_empty()))
    };
    Some((cid.to_string(), name.map(str::to_string)))
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload_file(&self, file: FileUpload) -> Result<String, StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let cid = content_id(&[&file.bytes]);
        self.files.lock().unwrap().insert(cid.clone(), file.bytes);
        Ok(cid)
    }

    async fn upload_directory(&self, files: Vec<FileUpload>) -> Result<String, StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let parts: Vec<&[u8]> = files.iter().flat_map(|f| [f.name.as_bytes(), f.bytes.as_slice()]).collect();
        let cid = content_id(&parts);
        let entries = files.into_iter().map(|f| (f.name, f.bytes)).collect();
        self.directories.lock().unwrap().insert(cid.clone(), entries);
        Ok(cid)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.unreachable.lock().unwrap() {
            return Err(StorageError::Transport("gateway unreachable".into()));
        }
        let (cid, name) = parse_gateway_url(url).ok_or(StorageError::Http(400))?;
        self.lookup(&cid, name.as_deref()).ok_or(StorageError::Http(404))
    }
}
