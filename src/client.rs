//! Escrow Client
//!
//! Wires the ledger adapter, mirror, orchestrator, poller and converter around a
//! single session. This is what a UI or the CLI drives.

use anyhow::Context;
use ethereum_types::U256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::EscrowError;
use crate::escrow::{EscrowMirror, EscrowSnapshot};
use crate::ledger::{Address, EvmLedgerClient, LedgerAdapter};
use crate::price_feed::{Conversion, CurrencyConverter, SpotRate};
use crate::service::{EscrowAction, PollingSynchronizer, TransactionOrchestrator, TxOutcome};
use crate::session::Session;
use crate::token::PropertyTokenClient;

pub struct EscrowClient<L: LedgerAdapter = EvmLedgerClient> {
    mirror: Arc<EscrowMirror<L>>,
    orchestrator: TransactionOrchestrator<L>,
    poller: PollingSynchronizer<L>,
    converter: CurrencyConverter,
    token: Option<PropertyTokenClient<L>>,
    session: Arc<Session>,
    polling_interval: Duration,
}

impl EscrowClient<EvmLedgerClient> {
    /// Connects to the configured node and opens a session for the selected account.
    pub async fn connect(config: &ClientConfig) -> anyhow::Result<Self> {
        let ledger = EvmLedgerClient::new(&config.ledger)
            .with_context(|| format!("Failed to create ledger client for {}", config.ledger.name))?;
        Self::with_ledger(Arc::new(ledger), config).await
    }
}

impl<L: LedgerAdapter> EscrowClient<L> {
    /// Builds a client over an existing ledger adapter and connects it.
    pub async fn with_ledger(ledger: Arc<L>, config: &ClientConfig) -> anyhow::Result<Self> {
        let account = ledger
            .connect()
            .await
            .with_context(|| format!("Failed to connect to {}", config.ledger.name))?;
        info!("Connected to {} as {}", config.ledger.name, account);

        let token = config
            .token
            .as_ref()
            .map(|t| Address::parse(&t.property_token_addr))
            .transpose()
            .context("Invalid property token address")?
            .map(|contract| PropertyTokenClient::new(ledger.clone(), contract));

        let mirror = Arc::new(EscrowMirror::new(ledger.clone()));
        Ok(Self {
            orchestrator: TransactionOrchestrator::new(ledger, mirror.clone()),
            poller: PollingSynchronizer::new(mirror.clone()),
            mirror,
            converter: CurrencyConverter::new(&config.price_feed).context("Failed to create price feed client")?,
            token,
            session: Arc::new(Session::new(account, config.service.auto_refresh)),
            polling_interval: Duration::from_millis(config.service.polling_interval_ms),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn account(&self) -> Address {
        self.session.account()
    }

    pub async fn snapshot(&self) -> Option<EscrowSnapshot> {
        self.session.snapshot().await
    }

    /// Loads (or reloads) an escrow into the session.
    ///
    /// Starts polling when auto-refresh is enabled. A malformed address fails
    /// before any network call; a failed read leaves the previous snapshot shown.
    ///
    /// # Returns
    ///
    /// * `Ok(EscrowSnapshot)` - The snapshot that was read
    /// * `Err(EscrowError::InvalidAddress)` - Malformed address
    /// * `Err(EscrowError::ReadFailure)` - A read failed
    pub async fn load_escrow(&self, contract_address: &str) -> Result<EscrowSnapshot, EscrowError> {
        let contract = Address::parse(contract_address)?;
        let ticket = self.session.begin_load(contract).await?;
        let snapshot = match self.mirror.refresh_address(&contract).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.session.abandon_load(ticket).await;
                return Err(e);
            }
        };

        if self.session.apply_snapshot(ticket, snapshot.clone()).await {
            info!("Loaded escrow {} ({})", contract, snapshot.lifecycle_state);
        } else {
            debug!("Load of {} was superseded", contract);
        }

        if self.session.auto_refresh_enabled().await {
            self.poller.start(&self.session, self.polling_interval);
        }
        Ok(snapshot)
    }

    pub async fn deposit(&self) -> Result<TxOutcome, EscrowError> {
        self.orchestrator.submit(EscrowAction::Deposit, &self.session).await
    }

    pub async fn verify_and_complete(&self) -> Result<TxOutcome, EscrowError> {
        self.orchestrator.submit(EscrowAction::VerifyAndComplete, &self.session).await
    }

    /// Turns polling on or off. Turning it on only starts a loop once an escrow is loaded.
    pub async fn set_auto_refresh(&self, enabled: bool) {
        self.session.set_auto_refresh_enabled(enabled).await;
        if enabled {
            if self.session.snapshot().await.is_some() {
                self.poller.start(&self.session, self.polling_interval);
            }
        } else {
            self.poller.stop(&self.session);
        }
    }

    pub async fn convert(&self, fiat_amount: &str) -> Result<Conversion, EscrowError> {
        self.converter.convert(fiat_amount).await
    }

    pub async fn spot_rate(&self) -> Result<SpotRate, EscrowError> {
        self.converter.spot_rate().await
    }

    pub fn last_conversion(&self) -> Option<Conversion> {
        self.converter.last_conversion()
    }

    /// Owner of a property token. Needs the `[token]` config section.
    pub async fn owner_of(&self, token_id: U256) -> Result<Address, EscrowError> {
        match &self.token {
            Some(token) => token.owner_of(token_id).await,
            None => Err(EscrowError::ReadFailure("No property token contract configured".to_string())),
        }
    }

    /// Ends the session: stops polling and discards anything still in flight.
    pub async fn shutdown(&self) {
        self.session.end().await;
    }
}
