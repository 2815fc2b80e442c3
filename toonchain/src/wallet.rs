//! The wallet seam. Transactions are signed by whatever sits behind [`Signer`]; the session never
//! touches key material directly.

use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use crate::pki::{generate_keypair, sign_message, PubKey, Sig};

pub trait Signer: Send + Sync {
    /// Address the chain credits writes to. For secp256k1 wallets this is the compressed key in hex.
    fn address(&self) -> String;

    fn sign(&self, msg: &Message) -> Sig;
}

/// A wallet backed by a local secp256k1 secret key.
pub struct KeySigner {
    sk: SecretKey,
    pk: PubKey,
}

impl KeySigner {
    pub fn new(sk: SecretKey) -> Self {
        let pk = PubKey(PublicKey::from_secret_key(SECP256K1, &sk));
        Self { sk, pk }
    }

    pub fn random() -> Self {
        let (sk, pk) = generate_keypair();
        Self { sk, pk }
    }
}

impl Signer for KeySigner {
    fn address(&self) -> String {
        self.pk.to_hex()
    }

    fn sign(&self, msg: &Message) -> Sig {
        sign_message(&self.sk, msg)
    }
}

impl std::fmt::Debug for KeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySigner").field("pk", &self.pk).finish_non_exhaustive()
    }
}
