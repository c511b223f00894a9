//! Symbol rule cache.
//!
//! Trading constraints are fetched in bulk on first use and kept for the
//! lifetime of the process. Rules are never invalidated: a symbol whose
//! filters change mid-session keeps its old rules until restart, and orders
//! sized against stale rules are rejected by the exchange.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use hedgeline_domain::{Symbol, SymbolRule};

use crate::error::{ExecError, ExecResult};
use crate::ports::{ExchangeService, SymbolMetadata};

/// Lazily populated, never invalidated cache of per-symbol trading rules.
pub struct SymbolRuleCache {
    exchange: Arc<dyn ExchangeService>,
    rules: RwLock<HashMap<Symbol, SymbolRule>>,
    /// Serializes bulk fetches so only one is in flight
    fetch_guard: Mutex<()>,
    fetches: AtomicU64,
}

impl SymbolRuleCache {
    /// Create an empty cache backed by `exchange`.
    pub fn new(exchange: Arc<dyn ExchangeService>) -> Self {
        Self {
            exchange,
            rules: RwLock::new(HashMap::new()),
            fetch_guard: Mutex::new(()),
            fetches: AtomicU64::new(0),
        }
    }

    /// Rules for `symbol`.
    ///
    /// The first call for an uncached symbol performs one bulk metadata fetch
    /// and caches every symbol it returns. Concurrent callers wait for that
    /// fetch instead of starting their own.
    ///
    /// # Errors
    ///
    /// - `ExecError::MetadataFetchFailed` if the bulk fetch fails
    /// - `ExecError::SymbolNotFound` if the exchange does not list the symbol
    pub async fn get_rules(&self, symbol: &Symbol) -> ExecResult<SymbolRule> {
        if let Some(rule) = self.cached(symbol).await {
            return Ok(rule);
        }

        let _guard = self.fetch_guard.lock().await;

        // Another caller may have completed the fetch while we waited
        if let Some(rule) = self.cached(symbol).await {
            return Ok(rule);
        }

        self.load_all().await?;

        self.cached(symbol)
            .await
            .ok_or_else(|| ExecError::SymbolNotFound(symbol.to_string()))
    }

    /// Number of bulk metadata fetches performed so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of cached symbols
    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    /// Whether nothing has been cached yet
    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }

    async fn cached(&self, symbol: &Symbol) -> Option<SymbolRule> {
        self.rules.read().await.get(symbol).cloned()
    }

    async fn load_all(&self) -> ExecResult<()> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let metadata = self
            .exchange
            .fetch_symbol_metadata()
            .await
            .map_err(|e| match e {
                ExecError::MetadataFetchFailed(msg) => ExecError::MetadataFetchFailed(msg),
                other => ExecError::MetadataFetchFailed(other.to_string()),
            })?;

        let total = metadata.len();
        let parsed: HashMap<Symbol, SymbolRule> = metadata
            .iter()
            .filter_map(|entry| match parse_rule(entry) {
                Ok(rule) => Some((rule.symbol().clone(), rule)),
                Err(e) => {
                    warn!(symbol = %entry.symbol, error = %e, "Skipping unparseable symbol metadata");
                    None
                }
            })
            .collect();

        if total > 0 && parsed.is_empty() {
            return Err(ExecError::MetadataFetchFailed(
                "no symbol metadata entry could be parsed".to_string(),
            ));
        }

        info!(symbols = parsed.len(), skipped = total - parsed.len(), "Symbol rules loaded");

        self.rules.write().await.extend(parsed);
        Ok(())
    }
}

/// Parse one metadata record into a validated rule.
pub fn parse_rule(entry: &SymbolMetadata) -> ExecResult<SymbolRule> {
    let symbol = Symbol::from_pair(&entry.symbol)?;
    let min_quantity = parse_decimal("min quantity", &entry.min_quantity)?;
    let quantity_step = parse_decimal("quantity step", &entry.quantity_step)?;
    let price_step = parse_decimal("price step", &entry.price_step)?;

    let rule = SymbolRule::new(symbol, min_quantity, quantity_step, price_step)?;
    debug!(
        symbol = %rule.symbol(),
        quantity_precision = rule.quantity_precision(),
        price_precision = rule.price_precision(),
        "Parsed symbol rule"
    );
    Ok(rule)
}

fn parse_decimal(field: &str, value: &str) -> ExecResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| ExecError::Protocol(format!("invalid {} '{}': {}", field, value, e)))
}

// =============================================================================
// Tests
// =============================================================================
