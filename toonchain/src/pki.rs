use std::fmt;

use borsh::BorshSerialize;
use secp256k1::{ecdsa::Signature, Message, PublicKey, SecretKey, SECP256K1};
use sha2::{Digest, Sha256};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PubKey(pub PublicKey);

impl PubKey {
    pub fn from_hex(hex: &str) -> Option<Self> {
        let bytes = decode_hex(hex)?;
        PublicKey::from_slice(&bytes).ok().map(PubKey)
    }

    pub fn to_hex(&self) -> String {
        faster_hex::hex_string(&self.0.serialize())
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sig(pub Signature);

impl Sig {
    pub fn from_hex(hex: &str) -> Option<Self> {
        let bytes = decode_hex(hex)?;
        Signature::from_der(&bytes).ok().map(Sig)
    }

    pub fn to_hex(&self) -> String {
        faster_hex::hex_string(&self.0.serialize_der())
    }
}

pub fn generate_keypair() -> (SecretKey, PubKey) {
    let (sk, pk) = SECP256K1.generate_keypair(&mut rand::thread_rng());
    (sk, PubKey(pk))
}

/// SHA-256 over the borsh encoding of `data`.
pub fn to_message<T: BorshSerialize>(data: &T) -> Message {
    let mut hasher = Sha256::new();
    // Writing into a Vec cannot fail
    let bytes = borsh::to_vec(data).unwrap_or_default();
    hasher.update(bytes);
    Message::from_digest(hasher.finalize().into())
}

pub fn sign_message(sk: &SecretKey, msg: &Message) -> Sig {
    Sig(SECP256K1.sign_ecdsa(msg, sk))
}

pub fn verify_signature(pk: &PubKey, msg: &Message, sig: &Sig) -> bool {
    SECP256K1.verify_ecdsa(msg, &sig.0, &pk.0).is_ok()
}

pub fn parse_secret_key(hex: &str) -> Option<SecretKey> {
    let bytes = decode_hex(hex)?;
    if bytes.len() != 32 {
        return None;
    }
    SecretKey::from_slice(&bytes).ok()
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    let mut buf = vec![0u8; hex.len() / 2];
    faster_hex::hex_decode(hex.as_bytes(), &mut buf).ok()?;
    Some(buf)
}
