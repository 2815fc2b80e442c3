//! Wire types and the client seam for the chain application gateway.
//!
//! Every contract call is addressed to an application id and a method name with JSON arguments.
//! Queries are free and unsigned; transactions carry a nonce and a secp256k1 signature over the
//! borsh digest of the operation.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use borsh::BorshSerialize;
use secp256k1::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::amount::Amount;
use crate::config::InvalidSetting;
use crate::pki::to_message;
use crate::wallet::Signer;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("http status {0}")]
    Http(u16),
    #[error("transport: {0}")]
    Transport(String),
    #[error("rejected by application: {0}")]
    Rejected(String),
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
    #[error("transaction {0} not final before timeout")]
    Timeout(String),
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ChainError::Http(status.as_u16()),
            None => ChainError::Transport(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub app_id: String,
    pub method: String,
    pub args: Value,
}

impl QueryRequest {
    pub fn new(app_id: impl Into<String>, method: impl Into<String>, args: Value) -> Self {
        Self { app_id: app_id.into(), method: method.into(), args }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub app_id: String,
    pub method: String,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Amount>,
}

#[derive(BorshSerialize)]
struct OperationDigest {
    app_id: String,
    method: String,
    args: String,
    value: Option<u128>,
    nonce: u64,
}

impl Operation {
    pub fn new(app_id: impl Into<String>, method: impl Into<String>, args: Value) -> Self {
        Self { app_id: app_id.into(), method: method.into(), args, value: None }
    }

    /// Attaches a payment for payable methods.
    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = Some(value);
        self
    }

    pub fn digest(&self, nonce: u64) -> Message {
        to_message(&OperationDigest {
            app_id: self.app_id.clone(),
            method: self.method.clone(),
            args: self.args.to_string(),
            value: self.value.map(|v| v.base_units()),
            nonce,
        })
    }

    pub fn sign(self, signer: &dyn Signer, nonce: u64) -> SignedOperation {
        let signature = signer.sign(&self.digest(nonce)).to_hex();
        SignedOperation { operation: self, nonce, signer: signer.address(), signature }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedOperation {
    #[serde(flatten)]
    pub operation: Operation,
    pub nonce: u64,
    pub signer: String,
    pub signature: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxStatus {
    #[serde(default)]
    pub acceptance_height: Option<u64>,
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub finality: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl ChainEvent {
    pub fn field_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(value_as_u64)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: String,
    #[serde(default)]
    pub status: TxStatus,
    #[serde(default)]
    pub events: Vec<ChainEvent>,
}

impl TxReceipt {
    /// First `key` field found on an event called `name`.
    pub fn event_u64(&self, name: &str, key: &str) -> Option<u64> {
        self.events.iter().filter(|e| e.name == name).find_map(|e| e.field_u64(key))
    }
}

/// Reads an unsigned integer the way applications tend to emit them: JSON numbers, decimal strings
/// or `0x` prefixed hex strings.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

/// Access to deployed chain applications.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<Value, ChainError>;

    /// Submits a signed operation and returns the receipt as known at submission time.
    async fn submit(&self, operation: &SignedOperation) -> Result<TxReceipt, ChainError>;

    /// Latest receipt for `tx_hash`, `None` while the gateway has not seen it.
    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError>;
}

/// How settled a write must be before it counts as done. Finality always satisfies it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    Finality,
    Depth(u64),
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        ConfirmationPolicy::Depth(1)
    }
}

impl ConfirmationPolicy {
    pub fn reached(&self, status: &TxStatus) -> bool {
        let finalized = status.finality == Some(true);
        match *self {
            ConfirmationPolicy::Finality => finalized,
            ConfirmationPolicy::Depth(depth) => finalized || status.confirmations.is_some_and(|n| n >= depth),
        }
    }
}

/// `finality` (or `finalized`), or a confirmation depth such as `3`.
impl FromStr for ConfirmationPolicy {
    type Err = InvalidSetting;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "finality" | "finalized" => Ok(ConfirmationPolicy::Finality),
            depth => depth.parse().map(ConfirmationPolicy::Depth).map_err(|_| InvalidSetting(value.to_string())),
        }
    }
}

impl fmt::Display for ConfirmationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationPolicy::Finality => f.write_str("finality"),
            ConfirmationPolicy::Depth(depth) => write!(f, "{depth} confirmations"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::{verify_signature, PubKey, Sig};
    use crate::wallet::KeySigner;
    use serde_json::json;

    #[test]
    fn policy_parses_finality_or_depth() {
        assert_eq!("finalized".parse::<ConfirmationPolicy>(), Ok(ConfirmationPolicy::Finality));
        assert_eq!(" FINALITY ".parse::<ConfirmationPolicy>(), Ok(ConfirmationPolicy::Finality));
        assert_eq!("3".parse::<ConfirmationPolicy>(), Ok(ConfirmationPolicy::Depth(3)));
        assert!("".parse::<ConfirmationPolicy>().is_err());
        assert_eq!("soon".parse::<ConfirmationPolicy>(), Err(InvalidSetting("soon".into())));
    }

    #[test]
    fn policy_checks_status() {
        let two = TxStatus { confirmations: Some(2), finality: Some(false), ..TxStatus::default() };
        let final_ = TxStatus { confirmations: None, finality: Some(true), ..TxStatus::default() };
        assert!(ConfirmationPolicy::Depth(2).reached(&two));
        assert!(!ConfirmationPolicy::Depth(3).reached(&two));
        assert!(ConfirmationPolicy::Depth(3).reached(&final_));
        assert!(!ConfirmationPolicy::Finality.reached(&two));
        assert!(ConfirmationPolicy::Finality.reached(&final_));
        assert!(!ConfirmationPolicy::Finality.reached(&TxStatus::default()));
    }

    #[test]
    fn receipt_event_ids_accept_numbers_and_hex() {
        let receipt: TxReceipt = serde_json::from_value(json!({
            "txHash": "0xabc",
            "events": [
                { "name": "Transfer", "data": { "tokenId": "0x10" } },
                { "name": "SeriesCreated", "data": { "seriesId": "12" } },
                { "name": "EpisodeMinted", "data": { "tokenId": 7 } }
            ]
        }))
        .unwrap();
        assert_eq!(receipt.status, TxStatus::default());
        assert_eq!(receipt.event_u64("SeriesCreated", "seriesId"), Some(12));
        assert_eq!(receipt.event_u64("Transfer", "tokenId"), Some(16));
        assert_eq!(receipt.event_u64("EpisodeMinted", "tokenId"), Some(7));
        assert_eq!(receipt.event_u64("EpisodePublished", "episodeId"), None);
    }

    #[test]
    fn signed_operation_verifies_against_its_digest() {
        let signer = KeySigner::random();
        let op = Operation::new("app", "unlockEpisode", json!({ "seriesId": 3, "episodeNumber": 1 }))
            .with_value(Amount::from_decimal("0.5").unwrap());
        let signed = op.clone().sign(&signer, 99);

        let pk = PubKey::from_hex(&signed.signer).unwrap();
        let sig = Sig::from_hex(&signed.signature).unwrap();
        assert!(verify_signature(&pk, &op.digest(99), &sig));
        assert!(!verify_signature(&pk, &op.digest(100), &sig));

        let wire = serde_json::to_value(&signed).unwrap();
        assert_eq!(wire["method"], "unlockEpisode");
        assert_eq!(wire["value"], "500000000000000000");
        assert_eq!(wire["nonce"], 99);
    }
}
