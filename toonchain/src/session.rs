//! Explicit connection state shared by the contract wrapper, the reader and the creator flows.
//!
//! The chain client is built on first use and dropped again on [`Session::disconnect`], together
//! with the wallet. A session is cheap to share behind an `Arc`.

use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::chain::{ChainClient, ChainError};
use crate::config::Config;
use crate::contract::Contracts;
use crate::wallet::Signer;

type Connector = dyn Fn(&Config) -> Result<Arc<dyn ChainClient>, ChainError> + Send + Sync;

pub struct Session {
    config: Config,
    connector: Box<Connector>,
    client: Mutex<Option<Arc<dyn ChainClient>>>,
    signer: Mutex<Option<Arc<dyn Signer>>>,
}

impl Session {
    /// Session talking to the HTTP gateway at `config.gateway_url`.
    #[cfg(feature = "http")]
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, |config| {
            let client = crate::rpc::RpcClient::new(&config.gateway_url, config.request_timeout)?;
            Ok(Arc::new(client) as Arc<dyn ChainClient>)
        })
    }

    /// Session whose client comes from `connector`, called again after every disconnect.
    pub fn with_connector<F>(config: Config, connector: F) -> Self
    where
        F: Fn(&Config) -> Result<Arc<dyn ChainClient>, ChainError> + Send + Sync + 'static,
    {
        Self { config, connector: Box::new(connector), client: Mutex::new(None), signer: Mutex::new(None) }
    }

    /// Session reusing one already built client.
    pub fn with_client(config: Config, client: Arc<dyn ChainClient>) -> Self {
        Self::with_connector(config, move |_| Ok(Arc::clone(&client)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> Result<Arc<dyn ChainClient>, ChainError> {
        let mut slot = self.client.lock().map_err(|_| ChainError::Transport("session lock poisoned".into()))?;
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        debug!("connecting chain client to {}", self.config.gateway_url);
        let client = (self.connector)(&self.config)?;
        slot.replace(Arc::clone(&client));
        Ok(client)
    }

    pub fn connect_wallet(&self, signer: Arc<dyn Signer>) {
        info!("wallet connected: {}", signer.address());
        if let Ok(mut slot) = self.signer.lock() {
            slot.replace(signer);
        }
    }

    /// Forgets the wallet and tears the chain client down.
    pub fn disconnect(&self) {
        if let Ok(mut slot) = self.signer.lock() {
            if let Some(signer) = slot.take() {
                info!("wallet disconnected: {}", signer.address());
            }
        }
        if let Ok(mut slot) = self.client.lock() {
            slot.take();
        }
    }

    pub fn signer(&self) -> Option<Arc<dyn Signer>> {
        self.signer.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn wallet_address(&self) -> Option<String> {
        self.signer().map(|s| s.address())
    }

    pub fn is_client_connected(&self) -> bool {
        self.client.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    pub fn contracts(&self) -> Contracts<'_> {
        Contracts::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{QueryRequest, SignedOperation, TxReceipt};
    use crate::wallet::KeySigner;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullChain;

    #[async_trait]
    impl ChainClient for NullChain {
        async fn query(&self, _request: &QueryRequest) -> Result<Value, ChainError> {
            Ok(Value::Null)
        }

        async fn submit(&self, _operation: &SignedOperation) -> Result<TxReceipt, ChainError> {
            Err(ChainError::Rejected("read only".into()))
        }

        async fn receipt(&self, _tx_hash: &str) -> Result<Option<TxReceipt>, ChainError> {
            Ok(None)
        }
    }

    #[test]
    fn client_is_built_lazily_and_rebuilt_after_disconnect() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let session = Session::with_connector(Config::default(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullChain) as Arc<dyn ChainClient>)
        });
        assert!(!session.is_client_connected());
        assert_eq!(built.load(Ordering::SeqCst), 0);

        session.client().unwrap();
        session.client().unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);

        session.connect_wallet(Arc::new(KeySigner::random()));
        assert!(session.wallet_address().is_some());

        session.disconnect();
        assert!(session.wallet_address().is_none());
        assert!(!session.is_client_connected());

        session.client().unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn connector_errors_surface_and_leave_session_unconnected() {
        let session = Session::with_connector(Config::default(), |_| Err(ChainError::Transport("no route".into())));
        assert!(matches!(session.client(), Err(ChainError::Transport(_))));
        assert!(!session.is_client_connected());
    }
}
