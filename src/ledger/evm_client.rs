//! EVM Ledger Client
//!
//! JSON-RPC implementation of the ledger adapter. Reads go through `eth_call` and
//! `eth_getBalance`; state-changing calls are handed to the node's account manager
//! via `eth_sendTransaction` (the wallet signs) and confirmed by polling
//! `eth_getTransactionReceipt`.

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::abi::{decode_hex_data, ContractCall};
use super::{Address, LedgerAdapter, LedgerError, PendingTx, TxReceipt};
use crate::config::LedgerConfig;
use crate::units::NativeAmount;

/// EVM JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// EVM JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Subset of the transaction receipt the client needs
#[derive(Debug, Deserialize)]
struct RawReceipt {
    #[serde(rename = "transactionHash")]
    transaction_hash: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    #[serde(rename = "gasUsed")]
    gas_used: Option<String>,
    /// "0x1" = success, "0x0" = reverted
    status: Option<String>,
}

/// Client for an EVM-compatible node
pub struct EvmLedgerClient {
    /// HTTP client for JSON-RPC calls
    client: Client,
    /// Base RPC URL
    base_url: String,
    /// Chain ID the node must report
    chain_id: u64,
    /// Preferred account; first node account when unset
    preferred_account: Option<Address>,
    /// Delay between receipt polls
    receipt_poll_interval: Duration,
    /// Upper bound on receipt polls (unbounded when None)
    max_receipt_polls: Option<u32>,
    /// Account selected by `connect`
    account: RwLock<Option<Address>>,
}

impl EvmLedgerClient {
    /// Creates a new EVM ledger client
    ///
    /// # Arguments
    ///
    /// * `config` - Ledger configuration
    ///
    /// # Returns
    ///
    /// * `Ok(EvmLedgerClient)` - Successfully created client
    /// * `Err(LedgerError)` - Invalid preferred account or HTTP client failure
    pub fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .no_proxy() // Avoid macOS system-configuration issues in tests
            .build()
            .map_err(|e| LedgerError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        let preferred_account = config
            .account
            .as_deref()
            .map(Address::parse)
            .transpose()
            .map_err(|e| LedgerError::Decode(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.rpc_url.clone(),
            chain_id: config.chain_id,
            preferred_account,
            receipt_poll_interval: Duration::from_millis(config.receipt_poll_interval_ms),
            max_receipt_polls: config.max_receipt_polls,
            account: RwLock::new(None),
        })
    }

    /// Generic JSON-RPC call helper
    async fn json_rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, LedgerError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        debug!("Sending {} request to {}", method, self.base_url);

        let response: JsonRpcResponse = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("Failed to send {} request to {}: {}", method, self.base_url, e)))?
            .json()
            .await
            .map_err(|e| LedgerError::Transport(format!("Failed to parse {} response from {}: {}", method, self.base_url, e)))?;

        if let Some(error) = response.error {
            warn!("JSON-RPC error from {} ({}): {} (code: {})", self.base_url, method, error.message, error.code);
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(response.result.unwrap_or(serde_json::Value::Null))
            .map_err(|e| LedgerError::Decode(format!("Failed to deserialize {} result: {}", method, e)))
    }

    /// Gets the chain ID reported by the node
    pub async fn get_chain_id(&self) -> Result<u64, LedgerError> {
        let chain_hex: String = self.json_rpc("eth_chainId", vec![]).await?;
        parse_hex_u64(&chain_hex)
    }

    /// Lists the accounts the node (or wallet) exposes.
    ///
    /// Prefers `eth_requestAccounts`; nodes that do not implement it are asked
    /// for `eth_accounts` instead.
    async fn list_accounts(&self) -> Result<Vec<String>, LedgerError> {
        match self.json_rpc::<Vec<String>>("eth_requestAccounts", vec![]).await {
            Ok(accounts) => Ok(accounts),
            Err(LedgerError::Rpc { code, message }) => {
                debug!("eth_requestAccounts unavailable ({}: {}), falling back to eth_accounts", code, message);
                self.json_rpc("eth_accounts", vec![]).await
            }
            Err(e) => Err(e),
        }
    }

    fn current_account(&self) -> Option<Address> {
        *self.account.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LedgerAdapter for EvmLedgerClient {
    async fn connect(&self) -> Result<Address, LedgerError> {
        let reported_chain_id = self.get_chain_id().await?;
        if reported_chain_id != self.chain_id {
            return Err(LedgerError::Decode(format!(
                "Node at {} reports chain ID {}, expected {}",
                self.base_url, reported_chain_id, self.chain_id
            )));
        }

        let accounts = self
            .list_accounts()
            .await?
            .iter()
            .map(|raw| Address::parse(raw).map_err(|e| LedgerError::Decode(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let selected = match self.preferred_account {
            Some(preferred) => accounts.into_iter().find(|a| *a == preferred).ok_or_else(|| {
                LedgerError::Decode(format!("Configured account {} is not available on the node", preferred))
            })?,
            None => accounts
                .into_iter()
                .next()
                .ok_or_else(|| LedgerError::Decode("Node exposes no accounts".to_string()))?,
        };

        *self.account.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(selected);
        info!("Connected to chain {} as {}", self.chain_id, selected);
        Ok(selected)
    }

    fn connected_account(&self) -> Option<Address> {
        self.current_account()
    }

    async fn read_call(&self, contract: &Address, call: &ContractCall) -> Result<Vec<u8>, LedgerError> {
        let result: String = self
            .json_rpc(
                "eth_call",
                vec![
                    serde_json::json!({
                        "to": contract.to_lower_hex(),
                        "data": call.encode(),
                    }),
                    serde_json::json!("latest"),
                ],
            )
            .await?;

        debug!("eth_call {}.{} -> {}", contract, call.method_name(), result);
        decode_hex_data(&result)
    }

    async fn submit_call(
        &self,
        contract: &Address,
        call: &ContractCall,
        value: Option<NativeAmount>,
    ) -> Result<PendingTx, LedgerError> {
        let from = self.current_account().ok_or(LedgerError::NotConnected)?;

        let mut tx = serde_json::json!({
            "from": from.to_lower_hex(),
            "to": contract.to_lower_hex(),
            "data": call.encode(),
        });
        if let Some(value) = value {
            tx["value"] = serde_json::json!(value.to_hex_quantity());
        }

        let tx_hash: String = self.json_rpc("eth_sendTransaction", vec![tx]).await?;

        info!(
            "Submitted {} to {} (value: {}): {}",
            call.method_name(),
            contract,
            value.map(|v| v.to_string()).unwrap_or_else(|| "0.0".to_string()),
            tx_hash
        );

        Ok(PendingTx {
            tx_hash,
            to: *contract,
            method: call.method_name().to_string(),
            submitted_at: Utc::now(),
        })
    }

    async fn wait_for_confirmation(&self, pending: &PendingTx) -> Result<TxReceipt, LedgerError> {
        let mut polls: u32 = 0;

        loop {
            let receipt: Option<RawReceipt> = self
                .json_rpc("eth_getTransactionReceipt", vec![serde_json::json!(pending.tx_hash)])
                .await?;

            if let Some(receipt) = receipt {
                if receipt.status.as_deref() != Some("0x1") {
                    return Err(LedgerError::Reverted {
                        tx_hash: pending.tx_hash.clone(),
                    });
                }

                let block_number = match receipt.block_number.as_deref() {
                    Some(hex) => parse_hex_u64(hex)?,
                    None => 0,
                };
                let gas_used = receipt.gas_used.as_deref().map(parse_hex_u64).transpose()?;

                info!("{} confirmed in block {}: {}", pending.method, block_number, pending.tx_hash);
                return Ok(TxReceipt {
                    tx_hash: receipt.transaction_hash.unwrap_or_else(|| pending.tx_hash.clone()),
                    block_number,
                    gas_used,
                });
            }

            polls += 1;
            if let Some(max) = self.max_receipt_polls {
                if polls >= max {
                    return Err(LedgerError::Timeout(format!(
                        "No receipt for {} after {} polls",
                        pending.tx_hash, polls
                    )));
                }
            }

            debug!("Receipt for {} not yet available (poll {})", pending.tx_hash, polls);
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    async fn balance_of(&self, address: &Address) -> Result<NativeAmount, LedgerError> {
        let balance_hex: String = self
            .json_rpc(
                "eth_getBalance",
                vec![serde_json::json!(address.to_lower_hex()), serde_json::json!("latest")],
            )
            .await?;

        NativeAmount::from_hex_quantity(&balance_hex).map_err(|e| LedgerError::Decode(e.to_string()))
    }
}

fn parse_hex_u64(hex: &str) -> Result<u64, LedgerError> {
    u64::from_str_radix(hex.strip_prefix("0x").unwrap_or(hex), 16)
        .map_err(|e| LedgerError::Decode(format!("Invalid hex quantity '{}': {}", hex, e)))
}
