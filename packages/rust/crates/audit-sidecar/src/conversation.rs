//! Per-conversation token accumulator.
//!
//! Tracks a running token total for each `(account key, conversation id)`
//! pair. The admission engine folds this *accumulated* total, not the
//! per-request delta, into the rolling window counters — a long-running
//! conversation therefore debits its account's window by an
//! ever-increasing amount per turn. That is carried over unchanged because
//! downstream consumers (dashboards, the 3-hour throttle) have come to
//! depend on totals that grow faster for longer conversations.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::kv::KvStore;

/// Accumulates tokens per `(account key, conversation id)` pair.
pub struct ConversationCounter {
    store: Arc<dyn KvStore>,
}

impl ConversationCounter {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key(api_key: &str, conversation_id: &str) -> String {
        format!("token_usage:{api_key}:{conversation_id}")
    }

    /// Current accumulated token count for a conversation, `0` if never
    /// recorded.
    pub async fn get(&self, api_key: &str, conversation_id: &str) -> Result<i64> {
        let value = self.store.get(&Self::key(api_key, conversation_id)).await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Add `amount` tokens to the conversation's running total and return
    /// the new accumulated value.
    pub async fn increment(
        &self,
        api_key: &str,
        conversation_id: &str,
        amount: i64,
    ) -> Result<i64> {
        self.store.incrby(&Self::key(api_key, conversation_id), amount).await
    }

    /// All conversation totals for a single account key, keyed by
    /// conversation id.
    pub async fn get_all_for_key(&self, api_key: &str) -> Result<HashMap<String, i64>> {
        let pattern = format!("token_usage:{api_key}:*");
        let prefix = format!("token_usage:{api_key}:");
        let keys = self.store.keys(&pattern).await?;
        let mut result = HashMap::with_capacity(keys.len());
        for key in keys {
            let Some(conversation_id) = key.strip_prefix(&prefix) else { continue };
            result.insert(conversation_id.to_string(), self.get(api_key, conversation_id).await?);
        }
        Ok(result)
    }

    /// All conversation totals across every account key, grouped by
    /// account key then conversation id. Admin/aggregate use only.
    pub async fn get_all(&self) -> Result<HashMap<String, HashMap<String, i64>>> {
        let keys = self.store.keys("token_usage:*").await?;
        let mut result: HashMap<String, HashMap<String, i64>> = HashMap::new();
        for key in keys {
            let Some(rest) = key.strip_prefix("token_usage:") else { continue };
            let Some((api_key, conversation_id)) = rest.split_once(':') else { continue };
            let value = self.get(api_key, conversation_id).await?;
            result.entry(api_key.to_string()).or_default().insert(conversation_id.to_string(), value);
        }
        Ok(result)
    }
}
