//! Typed calls into the series, episode and episode-NFT applications.
//!
//! Writes are signed by the session wallet, awaited until the configured confirmation policy is
//! met, and resolved to the identifier announced in the receipt's event log. Reads never fail:
//! a broken query is logged and degrades to an empty list, `None` or zero so callers can render
//! an empty state.

use log::{debug, error, info, warn};
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Instant};

use crate::amount::Amount;
use crate::chain::{value_as_u64, ChainClient, ChainError, Operation, QueryRequest, TxReceipt};
use crate::model::{Episode, EpisodeNft, EpisodeNumber, Series, SeriesId, WriteOutcome};
use crate::session::Session;

pub const SERIES_CREATED: &str = "SeriesCreated";
pub const EPISODE_PUBLISHED: &str = "EpisodePublished";
pub const EPISODE_MINTED: &str = "EpisodeMinted";
pub const TRANSFER: &str = "Transfer";

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("no wallet connected")]
    WalletUnavailable,
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("{method}: receipt {tx_hash} has no {event} event")]
    MissingEvent { method: &'static str, event: &'static str, tx_hash: String },
    #[error("malformed {record} record: {reason}")]
    Malformed { record: &'static str, reason: String },
}

fn malformed(record: &'static str, reason: impl Into<String>) -> ContractError {
    ContractError::Malformed { record, reason: reason.into() }
}

/// A record as applications return it: either a struct keyed by field name or a positional tuple.
enum Record<'a> {
    Struct(&'a Map<String, Value>),
    Tuple(&'a [Value]),
}

impl<'a> Record<'a> {
    fn new(record: &'static str, value: &'a Value) -> Result<Self, ContractError> {
        match value {
            Value::Object(map) => Ok(Record::Struct(map)),
            Value::Array(items) => Ok(Record::Tuple(items)),
            other => Err(malformed(record, format!("expected object or tuple, got {other}"))),
        }
    }

    fn field(&self, record: &'static str, name: &str, index: usize) -> Result<&'a Value, ContractError> {
        let found = match self {
            Record::Struct(map) => map.get(name),
            Record::Tuple(items) => items.get(index),
        };
        found.ok_or_else(|| malformed(record, format!("missing `{name}`")))
    }

    fn u64(&self, record: &'static str, name: &str, index: usize) -> Result<u64, ContractError> {
        let value = self.field(record, name, index)?;
        value_as_u64(value).ok_or_else(|| malformed(record, format!("`{name}` is not an unsigned integer: {value}")))
    }

    fn u32(&self, record: &'static str, name: &str, index: usize) -> Result<u32, ContractError> {
        let value = self.u64(record, name, index)?;
        u32::try_from(value).map_err(|_| malformed(record, format!("`{name}` out of range: {value}")))
    }

    fn string(&self, record: &'static str, name: &str, index: usize) -> Result<String, ContractError> {
        match self.field(record, name, index)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(malformed(record, format!("`{name}` is not a string: {other}"))),
        }
    }

    fn amount(&self, record: &'static str, name: &str, index: usize) -> Result<Amount, ContractError> {
        let value = self.field(record, name, index)?;
        serde_json::from_value(value.clone()).map_err(|e| malformed(record, format!("`{name}`: {e}")))
    }
}

pub fn decode_series(value: &Value) -> Result<Series, ContractError> {
    const R: &str = "series";
    let r = Record::new(R, value)?;
    Ok(Series {
        id: r.u64(R, "id", 0)?,
        title: r.string(R, "title", 1)?,
        description: r.string(R, "description", 2)?,
        cover_uri: r.string(R, "coverURI", 3)?,
        creator: r.string(R, "creator", 4)?,
        episode_count: r.u32(R, "episodeCount", 5)?,
        created_at: r.u64(R, "createdAt", 6)?,
    })
}

pub fn decode_episode(value: &Value) -> Result<Episode, ContractError> {
    const R: &str = "episode";
    let r = Record::new(R, value)?;
    Ok(Episode {
        id: r.u64(R, "id", 0)?,
        series_id: r.u64(R, "seriesId", 1)?,
        episode_number: r.u32(R, "episodeNumber", 2)?,
        metadata_uri: r.string(R, "metadataURI", 3)?,
        price: r.amount(R, "price", 4)?,
        creator: r.string(R, "creator", 5)?,
        published_at: r.u64(R, "publishedAt", 6)?,
    })
}

pub fn decode_episode_nft(value: &Value) -> Result<EpisodeNft, ContractError> {
    const R: &str = "episode nft";
    let r = Record::new(R, value)?;
    Ok(EpisodeNft {
        series_id: r.u64(R, "seriesId", 0)?,
        episode_number: r.u32(R, "episodeNumber", 1)?,
        creator: r.string(R, "creator", 2)?,
        minted_at: r.u64(R, "mintedAt", 3)?,
    })
}

/// Decodes a list, skipping entries that do not parse.
fn decode_list<T>(value: Value, decode: fn(&Value) -> Result<T, ContractError>) -> Result<Vec<T>, ContractError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        other => return Err(malformed("list", format!("expected array, got {other}"))),
    };
    Ok(items
        .iter()
        .filter_map(|item| match decode(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("skipping entry: {e}");
                None
            }
        })
        .collect())
}

pub struct Contracts<'s> {
    session: &'s Session,
}

impl<'s> Contracts<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    async fn query(&self, app_id: &str, method: &str, args: Value) -> Result<Value, ContractError> {
        let client = self.session.client()?;
        Ok(client.query(&QueryRequest::new(app_id, method, args)).await?)
    }

    async fn execute(&self, operation: Operation) -> Result<TxReceipt, ContractError> {
        let signer = self.session.signer().ok_or(ContractError::WalletUnavailable)?;
        let client = self.session.client()?;
        let method = operation.method.clone();
        let signed = operation.sign(signer.as_ref(), rand::random());
        info!("submitting {method} from {}", signed.signer);
        let receipt = client.submit(&signed).await?;
        debug!("{method} accepted as {}", receipt.tx_hash);
        self.await_finality(client.as_ref(), receipt).await
    }

    async fn await_finality(&self, client: &dyn ChainClient, receipt: TxReceipt) -> Result<TxReceipt, ContractError> {
        let config = self.session.config();
        let policy = config.confirmation;
        if policy.reached(&receipt.status) {
            return Ok(receipt);
        }
        let deadline = Instant::now() + config.finality_timeout;
        let mut latest = receipt;
        loop {
            if Instant::now() >= deadline {
                warn!("{} did not reach {policy} in {:?}", latest.tx_hash, config.finality_timeout);
                return Err(ChainError::Timeout(latest.tx_hash).into());
            }
            sleep(config.poll_interval).await;
            // The operation is already accepted, so a failed poll only costs this round.
            match client.receipt(&latest.tx_hash).await {
                Ok(Some(mut update)) => {
                    if update.events.is_empty() {
                        update.events = std::mem::take(&mut latest.events);
                    }
                    latest = update;
                    if policy.reached(&latest.status) {
                        info!("{} reached {policy}", latest.tx_hash);
                        return Ok(latest);
                    }
                }
                Ok(None) => debug!("{} not visible yet", latest.tx_hash),
                Err(e) => warn!("receipt poll for {} failed: {e}", latest.tx_hash),
            }
        }
    }

    async fn write_with_id(
        &self,
        operation: Operation,
        method: &'static str,
        events: &[(&'static str, &'static str)],
    ) -> Result<WriteOutcome, ContractError> {
        let receipt = self.execute(operation).await.inspect_err(|e| error!("{method} failed: {e}"))?;
        let id = events.iter().find_map(|(event, key)| receipt.event_u64(event, key)).ok_or_else(|| {
            ContractError::MissingEvent { method, event: events[0].0, tx_hash: receipt.tx_hash.clone() }
        })?;
        Ok(WriteOutcome { tx_hash: receipt.tx_hash, id })
    }

    pub async fn create_series(&self, title: &str, description: &str, cover_uri: &str) -> Result<WriteOutcome, ContractError> {
        let apps = &self.session.config().apps;
        let op = Operation::new(
            &apps.series,
            "createSeries",
            json!({ "title": title, "description": description, "coverURI": cover_uri }),
        );
        self.write_with_id(op, "createSeries", &[(SERIES_CREATED, "seriesId")]).await
    }

    pub async fn publish_episode(
        &self,
        series_id: SeriesId,
        episode_number: EpisodeNumber,
        metadata_uri: &str,
        price: Amount,
    ) -> Result<WriteOutcome, ContractError> {
        let apps = &self.session.config().apps;
        let op = Operation::new(
            &apps.episode,
            "publishEpisode",
            json!({
                "seriesId": series_id,
                "episodeNumber": episode_number,
                "metadataURI": metadata_uri,
                "price": price,
            }),
        );
        self.write_with_id(op, "publishEpisode", &[(EPISODE_PUBLISHED, "episodeId")]).await
    }

    /// Pays `price` to unlock a paid episode for the connected wallet.
    pub async fn unlock_episode(
        &self,
        series_id: SeriesId,
        episode_number: EpisodeNumber,
        price: Amount,
    ) -> Result<String, ContractError> {
        let apps = &self.session.config().apps;
        let op = Operation::new(&apps.episode, "unlockEpisode", json!({ "seriesId": series_id, "episodeNumber": episode_number }))
            .with_value(price);
        let receipt = self.execute(op).await.inspect_err(|e| error!("unlockEpisode failed: {e}"))?;
        Ok(receipt.tx_hash)
    }

    pub async fn mint_episode(
        &self,
        creator: &str,
        metadata_uri: &str,
        series_id: SeriesId,
        episode_number: EpisodeNumber,
    ) -> Result<WriteOutcome, ContractError> {
        let apps = &self.session.config().apps;
        let op = Operation::new(
            &apps.episode_nft,
            "mintEpisode",
            json!({
                "creator": creator,
                "metadataURI": metadata_uri,
                "seriesId": series_id,
                "episodeNumber": episode_number,
            }),
        );
        self.write_with_id(op, "mintEpisode", &[(EPISODE_MINTED, "tokenId"), (TRANSFER, "tokenId")]).await
    }

    pub async fn try_get_creator_series(&self, creator: &str) -> Result<Vec<Series>, ContractError> {
        let apps = &self.session.config().apps;
        let value = self.query(&apps.series, "getCreatorSeries", json!({ "creator": creator })).await?;
        decode_list(value, decode_series)
    }

    pub async fn get_creator_series(&self, creator: &str) -> Vec<Series> {
        self.try_get_creator_series(creator).await.unwrap_or_else(|e| {
            error!("getCreatorSeries({creator}) failed: {e}");
            Vec::new()
        })
    }

    pub async fn try_get_series_episodes(&self, series_id: SeriesId) -> Result<Vec<Episode>, ContractError> {
        let apps = &self.session.config().apps;
        let value = self.query(&apps.episode, "getSeriesEpisodes", json!({ "seriesId": series_id })).await?;
        decode_list(value, decode_episode)
    }

    pub async fn get_series_episodes(&self, series_id: SeriesId) -> Vec<Episode> {
        self.try_get_series_episodes(series_id).await.unwrap_or_else(|e| {
            error!("getSeriesEpisodes({series_id}) failed: {e}");
            Vec::new()
        })
    }

    pub async fn get_episode(&self, series_id: SeriesId, episode_number: EpisodeNumber) -> Option<Episode> {
        self.get_series_episodes(series_id).await.into_iter().find(|e| e.episode_number == episode_number)
    }

    pub async fn try_get_series(&self, series_id: SeriesId) -> Result<Option<Series>, ContractError> {
        let apps = &self.session.config().apps;
        match self.query(&apps.series, "getSeries", json!({ "seriesId": series_id })).await? {
            Value::Null => Ok(None),
            value => decode_series(&value).map(Some),
        }
    }

    pub async fn get_series(&self, series_id: SeriesId) -> Option<Series> {
        self.try_get_series(series_id).await.unwrap_or_else(|e| {
            error!("getSeries({series_id}) failed: {e}");
            None
        })
    }

    pub async fn try_check_episode_unlocked(
        &self,
        series_id: SeriesId,
        episode_number: EpisodeNumber,
        user: &str,
    ) -> Result<bool, ContractError> {
        let apps = &self.session.config().apps;
        let args = json!({ "seriesId": series_id, "episodeNumber": episode_number, "user": user });
        match self.query(&apps.episode, "hasUnlocked", args).await? {
            Value::Bool(unlocked) => Ok(unlocked),
            other => Err(malformed("hasUnlocked", format!("expected bool, got {other}"))),
        }
    }

    /// Unlock check with the session's [`UnlockCheckPolicy`](crate::gate::UnlockCheckPolicy)
    /// deciding the answer when the chain cannot be asked.
    pub async fn check_episode_unlocked(&self, series_id: SeriesId, episode_number: EpisodeNumber, user: &str) -> bool {
        match self.try_check_episode_unlocked(series_id, episode_number, user).await {
            Ok(unlocked) => unlocked,
            Err(e) => {
                let policy = self.session.config().unlock_policy;
                let fallback = policy.fallback();
                error!("hasUnlocked({series_id}, {episode_number}, {user}) failed: {e}; {policy} policy answers {fallback}");
                fallback
            }
        }
    }

    pub async fn get_episode_nft(&self, token_id: u64) -> Option<EpisodeNft> {
        let apps = &self.session.config().apps;
        let result = match self.query(&apps.episode_nft, "getEpisodeData", json!({ "tokenId": token_id })).await {
            Ok(Value::Null) => return None,
            Ok(value) => decode_episode_nft(&value),
            Err(e) => Err(e),
        };
        result.inspect_err(|e| error!("getEpisodeData({token_id}) failed: {e}")).ok()
    }

    pub async fn token_uri(&self, token_id: u64) -> Option<String> {
        let apps = &self.session.config().apps;
        match self.query(&apps.episode_nft, "tokenURI", json!({ "tokenId": token_id })).await {
            Ok(Value::String(uri)) => Some(uri),
            Ok(Value::Null) => None,
            Ok(other) => {
                error!("tokenURI({token_id}) returned {other}");
                None
            }
            Err(e) => {
                error!("tokenURI({token_id}) failed: {e}");
                None
            }
        }
    }

    pub async fn total_supply(&self) -> u64 {
        let apps = &self.session.config().apps;
        match self.query(&apps.episode_nft, "totalSupply", json!({})).await {
            Ok(value) => value_as_u64(&value).unwrap_or_else(|| {
                error!("totalSupply returned {value}");
                0
            }),
            Err(e) => {
                error!("totalSupply failed: {e}");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{SignedOperation, TxStatus};
    use crate::config::Config;
    use crate::gate::UnlockCheckPolicy;
    use crate::wallet::KeySigner;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedChain {
        answers: Mutex<VecDeque<Result<Value, ChainError>>>,
        submitted: Mutex<Vec<SignedOperation>>,
        accepted: Mutex<Option<TxReceipt>>,
        updates: Mutex<VecDeque<Result<TxReceipt, ChainError>>>,
        polls: Mutex<usize>,
    }

    impl ScriptedChain {
        fn answer(&self, answer: Result<Value, ChainError>) {
            self.answers.lock().unwrap().push_back(answer);
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedChain {
        async fn query(&self, _request: &QueryRequest) -> Result<Value, ChainError> {
            self.answers.lock().unwrap().pop_front().unwrap_or(Err(ChainError::Http(503)))
        }

        async fn submit(&self, operation: &SignedOperation) -> Result<TxReceipt, ChainError> {
            self.submitted.lock().unwrap().push(operation.clone());
            self.accepted.lock().unwrap().clone().ok_or_else(|| ChainError::Rejected("no receipt scripted".into()))
        }

        async fn receipt(&self, _tx_hash: &str) -> Result<Option<TxReceipt>, ChainError> {
            *self.polls.lock().unwrap() += 1;
            self.updates.lock().unwrap().pop_front().transpose()
        }
    }

    fn session_with(chain: Arc<ScriptedChain>, config: Config) -> Session {
        Session::with_client(config, chain)
    }

    fn receipt(confirmations: u64, events: Value) -> TxReceipt {
        TxReceipt {
            tx_hash: "0xfeed".into(),
            status: TxStatus { confirmations: Some(confirmations), ..TxStatus::default() },
            events: serde_json::from_value(events).unwrap(),
        }
    }

    #[test]
    fn decodes_struct_and_tuple_shapes() {
        let structured = json!({
            "id": "0x3", "title": "Test", "description": "Desc", "coverURI": "bafycover",
            "creator": "02aa", "episodeCount": 2, "createdAt": "1700000000"
        });
        let tuple = json!([3, "Test", "Desc", "bafycover", "02aa", "2", 1700000000u64]);
        assert_eq!(decode_series(&structured).unwrap(), decode_series(&tuple).unwrap());

        let episode = decode_episode(&json!([9, 3, 1, "bafymeta", "1500000000000000000", "02aa", 5])).unwrap();
        assert_eq!(episode.price.to_decimal(), "1.5");

        let nft = decode_episode_nft(&json!({ "seriesId": 3, "episodeNumber": 2, "creator": "02aa", "mintedAt": 7 })).unwrap();
        assert_eq!(nft.episode_number, 2);
    }

    #[test]
    fn rejects_malformed_records() {
        assert!(matches!(decode_series(&json!("nope")), Err(ContractError::Malformed { .. })));
        assert!(matches!(decode_series(&json!([1, "t"])), Err(ContractError::Malformed { .. })));
        assert!(matches!(decode_episode(&json!([1, 3, -1, "m", "0", "c", 0])), Err(ContractError::Malformed { .. })));
    }

    #[tokio::test]
    async fn failed_reads_degrade_to_empty() {
        let chain = Arc::new(ScriptedChain::default());
        chain.answer(Err(ChainError::Http(500)));
        chain.answer(Err(ChainError::Transport("down".into())));
        chain.answer(Ok(json!({ "unexpected": true })));
        chain.answer(Err(ChainError::Http(500)));
        let session = session_with(chain, Config::default());
        let contracts = session.contracts();
        assert!(contracts.get_creator_series("02aa").await.is_empty());
        assert!(contracts.get_series_episodes(1).await.is_empty());
        assert!(contracts.get_series_episodes(1).await.is_empty());
        assert_eq!(contracts.get_series(1).await, None);
        assert_eq!(contracts.total_supply().await, 0);
    }

    #[tokio::test]
    async fn list_reads_skip_broken_entries() {
        let chain = Arc::new(ScriptedChain::default());
        chain.answer(Ok(json!([
            [1, 3, 1, "bafy1", "0", "02aa", 1],
            { "id": 2 },
            [3, 3, 2, "bafy2", "10", "02aa", 2]
        ])));
        let session = session_with(chain, Config::default());
        let episodes = session.contracts().get_series_episodes(3).await;
        assert_eq!(episodes.iter().map(|e| e.id).collect::<Vec<_>>(), [1, 3]);
    }

    #[tokio::test]
    async fn unlock_check_failure_follows_policy() {
        let chain = Arc::new(ScriptedChain::default());
        chain.answer(Err(ChainError::Http(502)));
        let session = session_with(chain.clone(), Config::default());
        // Fail-open is the shipped behaviour: an unreachable chain unlocks the episode
        assert!(session.contracts().check_episode_unlocked(3, 1, "02aa").await);

        chain.answer(Err(ChainError::Http(502)));
        let config = Config { unlock_policy: UnlockCheckPolicy::FailClosed, ..Config::default() };
        let session = session_with(chain.clone(), config);
        assert!(!session.contracts().check_episode_unlocked(3, 1, "02aa").await);

        chain.answer(Ok(json!("yes")));
        assert!(session.contracts().try_check_episode_unlocked(3, 1, "02aa").await.is_err());
    }

    #[tokio::test]
    async fn writes_need_a_wallet() {
        let chain = Arc::new(ScriptedChain::default());
        let session = session_with(chain.clone(), Config::default());
        let err = session.contracts().create_series("Test", "Desc", "bafy").await.unwrap_err();
        assert!(matches!(err, ContractError::WalletUnavailable));
        assert!(chain.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_polls_until_confirmed_and_reads_event_id() {
        let chain = Arc::new(ScriptedChain::default());
        *chain.accepted.lock().unwrap() = Some(receipt(0, json!([{ "name": "SeriesCreated", "data": { "seriesId": 41 } }])));
        chain.updates.lock().unwrap().push_back(Ok(receipt(1, json!([]))));
        let config = Config { poll_interval: Duration::from_millis(1), ..Config::default() };
        let session = session_with(chain.clone(), config);
        session.connect_wallet(Arc::new(KeySigner::random()));

        let outcome = session.contracts().create_series("Test", "Desc", "bafy").await.unwrap();
        assert_eq!(outcome, WriteOutcome { tx_hash: "0xfeed".into(), id: 41 });
        let submitted = chain.submitted.lock().unwrap();
        assert_eq!(submitted[0].operation.method, "createSeries");
        assert_eq!(submitted[0].operation.args["coverURI"], "bafy");
    }

    #[tokio::test]
    async fn write_without_event_is_an_error() {
        let chain = Arc::new(ScriptedChain::default());
        *chain.accepted.lock().unwrap() = Some(receipt(1, json!([{ "name": "Other", "data": {} }])));
        let session = session_with(chain, Config::default());
        session.connect_wallet(Arc::new(KeySigner::random()));
        let err = session.contracts().publish_episode(3, 1, "bafy", Amount::ZERO).await.unwrap_err();
        assert!(matches!(err, ContractError::MissingEvent { event: "EpisodePublished", .. }));
    }

    #[tokio::test]
    async fn write_times_out_when_never_confirmed() {
        let chain = Arc::new(ScriptedChain::default());
        *chain.accepted.lock().unwrap() = Some(receipt(0, json!([])));
        let config = Config {
            poll_interval: Duration::from_millis(1),
            finality_timeout: Duration::from_millis(20),
            ..Config::default()
        };
        let session = session_with(chain, config);
        session.connect_wallet(Arc::new(KeySigner::random()));
        let err = session.contracts().unlock_episode(3, 1, Amount::from_base_units(5)).await.unwrap_err();
        assert!(matches!(err, ContractError::Chain(ChainError::Timeout(ref hash)) if hash == "0xfeed"));
    }

    #[tokio::test]
    async fn failed_receipt_poll_keeps_waiting() {
        let chain = Arc::new(ScriptedChain::default());
        *chain.accepted.lock().unwrap() = Some(receipt(0, json!([])));
        chain.updates.lock().unwrap().extend([Err(ChainError::Http(503)), Ok(receipt(5, json!([])))]);
        let config = Config { poll_interval: Duration::from_millis(1), ..Config::default() };
        let session = session_with(chain.clone(), config);
        session.connect_wallet(Arc::new(KeySigner::random()));

        let tx_hash = session.contracts().unlock_episode(3, 1, Amount::from_base_units(5)).await.unwrap();
        assert_eq!(tx_hash, "0xfeed");
        assert_eq!(chain.submitted.lock().unwrap().len(), 1);
        assert_eq!(*chain.polls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn failing_receipt_polls_end_in_timeout() {
        let chain = Arc::new(ScriptedChain::default());
        *chain.accepted.lock().unwrap() = Some(receipt(0, json!([])));
        chain.updates.lock().unwrap().extend((0..100).map(|_| Err(ChainError::Http(503))));
        let config = Config {
            poll_interval: Duration::from_millis(1),
            finality_timeout: Duration::from_millis(20),
            ..Config::default()
        };
        let session = session_with(chain, config);
        session.connect_wallet(Arc::new(KeySigner::random()));
        let err = session.contracts().unlock_episode(3, 1, Amount::from_base_units(5)).await.unwrap_err();
        assert!(matches!(err, ContractError::Chain(ChainError::Timeout(ref hash)) if hash == "0xfeed"));
    }
}
