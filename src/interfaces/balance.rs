// ============================================================================
// Balance Provider Interface
// Off-chain collateral balance and reservation ledger per maker
// ============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::BalanceError;
use crate::numeric::UsdcMicro;

/// The core reads balances and moves reservations but does not own
/// balance state. Reservation moves are compensating operations and are
/// never assumed atomic with a match.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    /// Available off-chain USDC balance of `maker`.
    async fn balance(&self, maker: &str) -> Result<UsdcMicro, BalanceError>;

    /// Notional currently reserved against `maker`'s balance.
    async fn reserved(&self, maker: &str) -> Result<UsdcMicro, BalanceError>;

    async fn reserve(&self, maker: &str, amount: UsdcMicro) -> Result<(), BalanceError>;

    /// Release up to `amount`; the reservation never goes below zero.
    async fn release(&self, maker: &str, amount: UsdcMicro) -> Result<(), BalanceError>;
}

#[derive(Debug, Default, Clone, Copy)]
struct Account {
    balance: UsdcMicro,
    reserved: UsdcMicro,
}

/// In-process balance ledger for single-instance hosts and tests.
#[derive(Default)]
pub struct InMemoryBalances {
    accounts: Mutex<HashMap<String, Account>>,
    unavailable: AtomicBool,
}

impl InMemoryBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, maker: &str, balance: UsdcMicro) {
        self.accounts
            .lock()
            .entry(maker.to_lowercase())
            .or_default()
            .balance = balance;
    }

    pub fn reserved_now(&self, maker: &str) -> UsdcMicro {
        self.accounts
            .lock()
            .get(&maker.to_lowercase())
            .map(|account| account.reserved)
            .unwrap_or_default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), BalanceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BalanceError::Unavailable("in-memory ledger disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BalanceProvider for InMemoryBalances {
    async fn balance(&self, maker: &str) -> Result<UsdcMicro, BalanceError> {
        self.check()?;
        Ok(self
            .accounts
            .lock()
            .get(&maker.to_lowercase())
            .map(|account| account.balance)
            .unwrap_or_default())
    }

    async fn reserved(&self, maker: &str) -> Result<UsdcMicro, BalanceError> {
        self.check()?;
        Ok(self.reserved_now(maker))
    }

    async fn reserve(&self, maker: &str, amount: UsdcMicro) -> Result<(), BalanceError> {
        self.check()?;
        let mut accounts = self.accounts.lock();
        let account = accounts.entry(maker.to_lowercase()).or_default();
        account.reserved = account.reserved.saturating_add(amount);
        Ok(())
    }

    async fn release(&self, maker: &str, amount: UsdcMicro) -> Result<(), BalanceError> {
        self.check()?;
        if let Some(account) = self.accounts.lock().get_mut(&maker.to_lowercase()) {
            account.reserved = account.reserved.saturating_sub(amount);
        }
        Ok(())
    }
}
