pub mod config;
pub mod engine;
pub mod quote;
pub mod selection;

pub use config::{BulkTier, PricingConfig};
pub use engine::PricingEngine;
pub use quote::{
    bulk_quote, compute_quote, BreakdownEntry, BulkQuote, FactorSource, PriceBreakdown,
    PriceComponent, PriceQuote, QuoteOverrides, QuoteRequest,
};
pub use selection::{select_rule, PriceSource, RuleSelection};
