use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;
use rw_core::types::TokenUsage;
use thiserror::Error;

use crate::types::ModelInfo;
use crate::{anthropic, gemini, ollama, openai};

#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    #[error("no pricing for model {0}")]
    ModelUnknown(String),
}

/// USD per 1,000 tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPrice {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let cost = usage.input_tokens as f64 / 1000.0 * self.input_per_1k
            + usage.output_tokens as f64 / 1000.0 * self.output_per_1k;
        cost.max(0.0)
    }
}

/// Rate charged for models missing from the table, so a pricing gap never
/// blocks execution.
pub const FALLBACK_PRICE: ModelPrice = ModelPrice::new(0.001, 0.002);

/// Catalogs of all built-in adapters.
pub fn default_table() -> Vec<ModelInfo> {
    let mut table = openai::static_catalog();
    table.extend(anthropic::static_catalog());
    table.extend(gemini::static_catalog());
    table.extend(ollama::static_catalog());
    table
}

/// Model-name keyed price table. Read on every finished run, written at
/// adapter registration and config load.
#[derive(Debug, Default)]
pub struct CostCalculator {
    prices: RwLock<AHashMap<String, ModelPrice>>,
}

impl CostCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded from [`default_table`].
    pub fn with_defaults() -> Self {
        let calc = Self::new();
        calc.merge_catalog(&default_table());
        calc
    }

    fn read(&self) -> RwLockReadGuard<'_, AHashMap<String, ModelPrice>> {
        self.prices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AHashMap<String, ModelPrice>> {
        self.prices.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Set one model's price. Last write wins.
    pub fn set_price(&self, model: impl Into<String>, price: ModelPrice) {
        self.write().insert(model.into(), price);
    }

    pub fn merge_catalog(&self, models: &[ModelInfo]) {
        let mut prices = self.write();
        for m in models {
            prices.insert(
                m.id.clone(),
                ModelPrice::new(m.input_price_per_1k, m.output_price_per_1k),
            );
        }
    }

    pub fn lookup(&self, model: &str) -> Result<ModelPrice, PricingError> {
        self.read()
            .get(model)
            .copied()
            .ok_or_else(|| PricingError::ModelUnknown(model.to_string()))
    }

    /// `input/1000 * input_price + output/1000 * output_price`, using
    /// [`FALLBACK_PRICE`] for unknown models. Never fails.
    pub fn calculate(&self, model: &str, usage: &TokenUsage) -> f64 {
        let price = self.lookup(model).unwrap_or_else(|_| {
            tracing::debug!(model, "model missing from pricing table, using fallback rate");
            FALLBACK_PRICE
        });
        price.cost(usage)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
