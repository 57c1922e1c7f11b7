//! In-memory trade store.
//!
//! Any store with per-trade read-modify-write atomicity works here. A
//! DashMap shard lock provides that atomicity: `with_trade_mut` holds the
//! entry lock for the duration of the mutation closure.

use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::Trade;
use crate::error::{Result, TradelaneError};

#[derive(Default)]
pub struct TradeStore {
    trades: DashMap<Uuid, Trade>,
}

impl TradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trade: Trade) -> Result<()> {
        if self.trades.contains_key(&trade.id) {
            return Err(TradelaneError::Internal(format!(
                "trade {} already exists",
                trade.id
            )));
        }
        self.trades.insert(trade.id, trade);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Trade> {
        self.trades
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or(TradelaneError::TradeNotFound(id))
    }

    /// Atomic read-modify-write on one trade. The closure runs under the
    /// entry lock; it must not call back into the store.
    pub fn with_trade_mut<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Trade) -> Result<R>,
    ) -> Result<R> {
        let mut entry = self
            .trades
            .get_mut(&id)
            .ok_or(TradelaneError::TradeNotFound(id))?;

        let result = f(entry.value_mut());
        if result.is_ok() {
            entry.updated_at = chrono::Utc::now();
        }
        result
    }

    pub fn all(&self) -> Vec<Trade> {
        self.trades.iter().map(|entry| entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}
