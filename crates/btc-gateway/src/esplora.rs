//! Esplora-compatible explorer client (mempool.space, blockstream.info).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chain_btc::address;
use chain_btc::utxo::Utxo;
use chain_btc::BtcNetwork;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::{AddressStats, NetworkGateway, TxInfo, TxStatus};

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    #[serde(default)]
    status: TxStatus,
}

/// HTTP gateway against an Esplora REST API.
#[derive(Debug, Clone)]
pub struct EsploraGateway {
    client: Client,
    config: GatewayConfig,
    cancel: CancellationToken,
}

impl EsploraGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn for_network(network: BtcNetwork) -> Result<Self, GatewayError> {
        Self::new(GatewayConfig::for_network(network))
    }

    /// Tie in-flight requests and retry sleeps to `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url(), path)
    }

    /// Send with bounded retries. Transport errors, per-attempt timeouts, 429
    /// and 5xx are retried; anything else is returned to the caller.
    async fn send<F>(&self, what: &str, make_request: F) -> Result<Response, GatewayError>
    where
        F: Fn() -> RequestBuilder,
    {
        let attempts = self.config.max_attempts();
        let timeout = self.config.timeout();
        let mut delay = self.config.retry_delay();
        let mut last_cause = String::new();

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(GatewayError::Cancelled),
                outcome = tokio::time::timeout(timeout, make_request().send()) => outcome,
            };

            match outcome {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        last_cause = format!("{what}: HTTP {status}");
                    } else {
                        debug!(what, attempt, %status, "gateway response");
                        return Ok(response);
                    }
                }
                Ok(Err(e)) => last_cause = format!("{what}: {e}"),
                Err(_) => last_cause = format!("{what}: no response within {}ms", timeout.as_millis()),
            }

            if attempt < attempts {
                warn!(what, attempt, cause = %last_cause, delay_ms = delay.as_millis() as u64, "gateway request failed, retrying");
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(GatewayError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = delay.mul_f64(self.config.backoff_multiplier);
            }
        }

        Err(GatewayError::NetworkTimeout {
            attempts,
            last_cause,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, what: &str, path: &str) -> Result<T, GatewayError> {
        let url = self.url(path);
        let response = self.send(what, || self.client.get(&url)).await?;
        let response = error_for_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("{what}: {e}")))
    }

    /// Raw `/fee-estimates` table: confirmation target → sat/vB.
    pub async fn fee_rates(&self) -> Result<BTreeMap<u16, f64>, GatewayError> {
        let raw: BTreeMap<String, f64> = self.get_json("fee-estimates", "/fee-estimates").await?;
        let mut rates = BTreeMap::new();
        for (target, rate) in raw {
            let target: u16 = target
                .parse()
                .map_err(|_| GatewayError::InvalidResponse(format!("fee target '{target}' is not a block count")))?;
            if !rate.is_finite() || rate < 0.0 {
                return Err(GatewayError::InvalidResponse(format!(
                    "fee rate {rate} for target {target}"
                )));
            }
            rates.insert(target, rate);
        }
        Ok(rates)
    }
}

async fn error_for_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Rate for the largest listed target not above `target_blocks`, or the
/// fastest listed one when every target is slower. At least 1 sat/vB.
pub fn pick_fee_rate(rates: &BTreeMap<u16, f64>, target_blocks: u16) -> Option<u64> {
    let rate = rates
        .range(..=target_blocks)
        .next_back()
        .or_else(|| rates.iter().next())
        .map(|(_, rate)| *rate)?;
    Some((rate.ceil() as u64).max(1))
}

#[async_trait]
impl NetworkGateway for EsploraGateway {
    async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, GatewayError> {
        // Esplora omits the locking script; it follows from the address
        let script_pubkey = address::script_pubkey_for(address, self.config.network)?.to_bytes();
        let raw: Vec<EsploraUtxo> = self
            .get_json("utxo", &format!("/address/{address}/utxo"))
            .await?;

        Ok(raw
            .into_iter()
            .map(|u| Utxo {
                txid: u.txid,
                vout: u.vout,
                amount_sat: u.value,
                script_pubkey: script_pubkey.clone(),
                address: Some(address.to_string()),
                confirmed: u.status.confirmed,
                block_height: u.status.block_height,
            })
            .collect())
    }

    async fn estimate_fee(&self, target_blocks: u16) -> Result<u64, GatewayError> {
        let rates = self.fee_rates().await?;
        pick_fee_rate(&rates, target_blocks)
            .ok_or_else(|| GatewayError::InvalidResponse("empty fee estimate table".into()))
    }

    async fn broadcast_transaction(&self, raw_hex: &str) -> Result<String, GatewayError> {
        let url = self.url("/tx");
        let response = self
            .send("broadcast", || self.client.post(&url).body(raw_hex.to_string()))
            .await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Decode(format!("broadcast: {e}")))?;
        if !status.is_success() {
            return Err(GatewayError::Broadcast(format!("HTTP {status}: {}", body.trim())));
        }

        let txid = body.trim().to_string();
        if txid.len() != 64 || !txid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GatewayError::InvalidResponse(format!("broadcast returned '{txid}'")));
        }
        Ok(txid)
    }

    async fn get_transaction(&self, txid: &str) -> Result<Option<TxInfo>, GatewayError> {
        let url = self.url(&format!("/tx/{txid}"));
        let response = self.send("transaction", || self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = error_for_status(response).await?;
        let info = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("transaction: {e}")))?;
        Ok(Some(info))
    }

    async fn get_address_info(&self, address: &str) -> Result<AddressStats, GatewayError> {
        let mut stats: AddressStats = self
            .get_json("address", &format!("/address/{address}"))
            .await?;
        stats.address = address.to_string();
        Ok(stats)
    }
}
