//! Shared test helpers for escrow client tests
//!
//! This module provides constants, config builders and JSON-RPC mock helpers.

#![allow(dead_code)]

use escrow_client::config::{
    ClientConfig, LedgerConfig, PriceFeedConfig, PriceFeedKind, ServiceConfig, TokenConfig,
};
use escrow_client::escrow::{EscrowRoles, EscrowSnapshot, LifecycleState};
use escrow_client::ledger::abi::selector;
use escrow_client::{Address, NativeAmount};
use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

// ============================================================================
// CONSTANTS
// ============================================================================

// -------------------------------- USERS ---------------------------------

/// Dummy buyer address
pub const DUMMY_BUYER_ADDR: &str = "0x0000000000000000000000000000000000000001";

/// Dummy buyer's solicitor address (the only account allowed to deposit and verify)
pub const DUMMY_SOLICITOR_ADDR: &str = "0x0000000000000000000000000000000000000002";

/// Dummy seller address
pub const DUMMY_SELLER_ADDR: &str = "0x0000000000000000000000000000000000000003";

/// Dummy address holding no role in any escrow
pub const DUMMY_OUTSIDER_ADDR: &str = "0x0000000000000000000000000000000000000009";

// ------------------------------ CONTRACTS -------------------------------

/// Dummy property token contract address
pub const DUMMY_TOKEN_ADDR: &str = "0x000000000000000000000000000000000000000a";

/// Dummy escrow contract address
pub const DUMMY_ESCROW_ADDR: &str = "0x000000000000000000000000000000000000000e";

/// Second escrow contract address, for switching tests
pub const DUMMY_OTHER_ESCROW_ADDR: &str = "0x000000000000000000000000000000000000000f";

// -------------------------------- OTHER ---------------------------------

/// Dummy transaction hash (64 hex characters)
pub const DUMMY_TX_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000012";

/// 1 native unit in subunits, as a JSON-RPC hex quantity
pub const ONE_NATIVE_HEX: &str = "0xde0b6b3a7640000";

/// Hardhat's default chain ID
pub const DUMMY_CHAIN_ID: u64 = 31337;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

pub fn addr(raw: &str) -> Address {
    Address::parse(raw).unwrap()
}

pub fn native(raw: &str) -> NativeAmount {
    NativeAmount::parse(raw).unwrap()
}

/// Create a default ledger config pointing at `rpc_url`.
/// This can be customized using Rust's struct update syntax:
/// ```
/// let ledger = LedgerConfig {
///     max_receipt_polls: Some(2),
///     ..create_default_ledger_config(&server.uri())
/// };
/// ```
pub fn create_default_ledger_config(rpc_url: &str) -> LedgerConfig {
    LedgerConfig {
        name: "test-ledger".to_string(),
        rpc_url: rpc_url.to_string(),
        chain_id: DUMMY_CHAIN_ID,
        account: None,
        request_timeout_secs: 5,
        receipt_poll_interval_ms: 10,
        max_receipt_polls: None,
    }
}

/// Create a default price feed config of `kind` pointing at `base_url`.
pub fn create_default_price_feed_config(kind: PriceFeedKind, base_url: &str) -> PriceFeedConfig {
    PriceFeedConfig {
        kind,
        base_url: base_url.to_string(),
        fiat: "USD".to_string(),
        decimals: 6,
    }
}

/// Create a default client config with fast polling and auto-refresh on.
pub fn create_default_client_config(rpc_url: &str, price_feed_url: &str) -> ClientConfig {
    ClientConfig {
        service: ServiceConfig {
            polling_interval_ms: 20,
            auto_refresh: true,
        },
        ledger: create_default_ledger_config(rpc_url),
        price_feed: create_default_price_feed_config(PriceFeedKind::Coinbase, price_feed_url),
        token: Some(TokenConfig {
            property_token_addr: DUMMY_TOKEN_ADDR.to_string(),
        }),
    }
}

/// Create a snapshot of the default escrow in `state`.
pub fn create_default_snapshot(state: LifecycleState) -> EscrowSnapshot {
    EscrowSnapshot {
        contract_address: addr(DUMMY_ESCROW_ADDR),
        price_native: native("1"),
        lifecycle_state: state,
        roles: EscrowRoles {
            buyer: addr(DUMMY_BUYER_ADDR),
            buyer_solicitor: addr(DUMMY_SOLICITOR_ADDR),
            seller: addr(DUMMY_SELLER_ADDR),
        },
        held_balance: NativeAmount::zero(),
    }
}

// ============================================================================
// JSON-RPC MOCKING
// ============================================================================

/// ABI word holding `value`, as hex return data
pub fn uint_word(value: u64) -> String {
    format!("0x{:064x}", value)
}

/// ABI word holding a 1-native (10^18) uint
pub fn one_native_word() -> String {
    format!("0x{:0>64}", ONE_NATIVE_HEX.trim_start_matches("0x"))
}

/// ABI word holding `address`, left-padded to 32 bytes
pub fn address_word(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x").to_lowercase())
}

/// JSON-RPC success response
pub fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result
    }))
}

/// JSON-RPC error response
pub fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": code, "message": message }
    }))
}

fn rpc_body(request: &Request) -> Option<Value> {
    serde_json::from_slice(&request.body).ok()
}

/// Matches JSON-RPC requests by `method`
pub struct RpcMethod(pub &'static str);

impl Match for RpcMethod {
    fn matches(&self, request: &Request) -> bool {
        rpc_body(request)
            .and_then(|body| body.get("method").and_then(|m| m.as_str()).map(|m| m == self.0))
            .unwrap_or(false)
    }
}

/// Matches `eth_call` requests whose calldata starts with the selector of `signature`
pub struct CallSelector(pub &'static str);

impl Match for CallSelector {
    fn matches(&self, request: &Request) -> bool {
        let expected = format!("0x{}", hex::encode(selector(self.0)));
        rpc_body(request)
            .and_then(|body| {
                body.pointer("/params/0/data")
                    .and_then(|d| d.as_str())
                    .map(|data| data.starts_with(&expected))
            })
            .unwrap_or(false)
    }
}

/// Matches `eth_sendTransaction` requests carrying exactly `value`
pub struct TxValue(pub &'static str);

impl Match for TxValue {
    fn matches(&self, request: &Request) -> bool {
        rpc_body(request)
            .and_then(|body| body.pointer("/params/0/value").and_then(|v| v.as_str()).map(|v| v == self.0))
            .unwrap_or(false)
    }
}

/// Mounts the answer to one read-only escrow method.
pub async fn mount_read(server: &MockServer, signature: &'static str, data: String) {
    Mock::given(method("POST"))
        .and(RpcMethod("eth_call"))
        .and(CallSelector(signature))
        .respond_with(rpc_result(json!(data)))
        .mount(server)
        .await;
}

/// Mounts every read the mirror makes for an escrow priced at 1 native with the default roles.
pub async fn mount_escrow(server: &MockServer, state_ordinal: u64, balance_hex: &str) {
    mount_read(server, "price()", one_native_word()).await;
    mount_read(server, "getState()", uint_word(state_ordinal)).await;
    mount_read(server, "buyer()", address_word(DUMMY_BUYER_ADDR)).await;
    mount_read(server, "buyerSolicitor()", address_word(DUMMY_SOLICITOR_ADDR)).await;
    mount_read(server, "seller()", address_word(DUMMY_SELLER_ADDR)).await;
    Mock::given(method("POST"))
        .and(RpcMethod("eth_getBalance"))
        .respond_with(rpc_result(json!(balance_hex)))
        .mount(server)
        .await;
}

/// Mounts `eth_chainId` and `eth_requestAccounts` so `connect` selects `account`.
pub async fn mount_connect(server: &MockServer, account: &str) {
    Mock::given(method("POST"))
        .and(RpcMethod("eth_chainId"))
        .respond_with(rpc_result(json!(format!("0x{:x}", DUMMY_CHAIN_ID))))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(RpcMethod("eth_requestAccounts"))
        .respond_with(rpc_result(json!([account])))
        .mount(server)
        .await;
}
