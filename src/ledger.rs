//! Balance and transfer calls against the coordinator's ledger endpoints.

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::client::check_status;
use crate::error::{MinerError, MinerResult};
use crate::keystore::KeyStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub user_from: String,
    pub user_to: String,
    pub amount: f64,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterKey {
    pub user_id: String,
    pub public_key: String,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: Value,
}

#[derive(Deserialize)]
struct KeyExistsResponse {
    exists: bool,
}

/// The signed payload of a transfer.
pub fn transfer_message(user_from: &str, user_to: &str, amount: f64) -> String {
    format!("{user_from}-{user_to}-{amount}")
}

pub struct LedgerClient<K> {
    client: Client,
    base_url: String,
    keys: K,
}

impl<K: KeyStore> LedgerClient<K> {
    pub fn new(base_url: impl Into<String>, keys: K) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: Client::new(),
            base_url,
            keys,
        }
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    /// `base_url` plus escaped path segments, so ids can't break out of theirs.
    fn endpoint(&self, segments: &[&str]) -> MinerResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| MinerError::Ledger(format!("bad ledger url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| MinerError::Ledger(format!("ledger url {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn balance(&self, user_id: &str) -> MinerResult<f64> {
        let response = self
            .client
            .get(self.endpoint(&["balance", user_id])?)
            .send()
            .await?;
        let body: BalanceResponse = check_status(response).await?.json().await?;
        // Some ledgers send the balance as a string.
        match &body.balance {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| MinerError::Ledger(format!("unexpected balance {}", body.balance)))
    }

    pub async fn key_exists(&self, user_id: &str) -> MinerResult<bool> {
        let response = self
            .client
            .get(self.endpoint(&["key_exists", user_id])?)
            .send()
            .await?;
        let body: KeyExistsResponse = check_status(response).await?.json().await?;
        Ok(body.exists)
    }

    /// Upload the user's public key, generating a key pair first if needed.
    pub async fn register_key(&self, user_id: &str) -> MinerResult<String> {
        let public_key = if self.keys.exists(user_id)? {
            self.keys.public_key(user_id)?
        } else {
            self.keys.generate(user_id)?
        };
        let request = RegisterKey {
            user_id: user_id.to_string(),
            public_key: public_key.clone(),
        };
        let response = self
            .client
            .post(self.endpoint(&["register_key"])?)
            .json(&request)
            .send()
            .await?;
        check_status(response).await?;
        info!(user_id, "Registered public key");
        Ok(public_key)
    }

    /// Sign and submit a transfer; registers the sender's key if the ledger has none.
    pub async fn transfer(&self, user_from: &str, user_to: &str, amount: f64) -> MinerResult<String> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(MinerError::Ledger(format!("invalid amount {amount}")));
        }
        if !self.keys.exists(user_from)? || !self.key_exists(user_from).await? {
            self.register_key(user_from).await?;
        }

        let message = transfer_message(user_from, user_to, amount);
        let request = TransferRequest {
            user_from: user_from.to_string(),
            user_to: user_to.to_string(),
            amount,
            signature: self.keys.sign(user_from, message.as_bytes())?,
        };
        let response = self
            .client
            .post(self.endpoint(&["transaction"])?)
            .json(&request)
            .send()
            .await?;
        Ok(check_status(response).await?.text().await?)
    }
}
