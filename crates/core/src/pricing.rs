//! Bid pricing.
//!
//! The price comes from the first source available, in order: listed budget
//! blended with the average competing bid, listed budget alone, average bid
//! alone, and finally a per-page formula. The result never drops below the
//! profitability floor.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::ItemDetail;

/// Share of the bid the author keeps after platform commission.
const AUTHOR_SHARE: f64 = 0.975;

/// Income must cover estimated reasoning spend this many times over.
const PROFIT_MULTIPLIER: f64 = 3.0;

/// Pricing configuration. Amounts are in the platform currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Absolute minimum bid.
    #[serde(default = "default_min_bid")]
    pub min_bid: u32,

    /// Estimated reasoning spend per item when the work type has no entry
    /// in `api_cost_estimates`.
    #[serde(default = "default_api_cost")]
    pub api_cost_estimate: u32,

    #[serde(default)]
    pub api_cost_estimates: BTreeMap<String, u32>,

    #[serde(default = "default_price_per_page")]
    pub default_price_per_page: u32,

    /// Per-page price by work type (case-insensitive).
    #[serde(default = "default_base_prices")]
    pub base_price_per_page: BTreeMap<String, u32>,

    /// Page count assumed when the item does not state one.
    #[serde(default = "default_pages")]
    pub default_pages: u32,

    /// A bid outside `[min_price, max_price]` rejects the item.
    #[serde(default = "default_min_price")]
    pub min_price: u32,

    #[serde(default = "default_max_price")]
    pub max_price: u32,

    /// Comment sent with the bid. `{title}`, `{work_type}` and `{price}` are
    /// substituted.
    #[serde(default = "default_bid_comment")]
    pub bid_comment: String,
}

fn default_min_bid() -> u32 {
    300
}

fn default_api_cost() -> u32 {
    30
}

fn default_price_per_page() -> u32 {
    150
}

fn default_base_prices() -> BTreeMap<String, u32> {
    BTreeMap::from([
        ("essay".to_string(), 150),
        ("referat".to_string(), 120),
        ("report".to_string(), 120),
        ("article".to_string(), 120),
        ("coursework".to_string(), 200),
        ("business plan".to_string(), 200),
        ("diploma".to_string(), 250),
        ("thesis".to_string(), 250),
        ("test".to_string(), 100),
        ("translation".to_string(), 100),
        ("copywriting".to_string(), 80),
    ])
}

fn default_pages() -> u32 {
    15
}

fn default_min_price() -> u32 {
    300
}

fn default_max_price() -> u32 {
    50_000
}

fn default_bid_comment() -> String {
    "Hello! I have experience with this kind of work and can deliver \"{title}\" on time, \
     following all your requirements."
        .to_string()
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            min_bid: default_min_bid(),
            api_cost_estimate: default_api_cost(),
            api_cost_estimates: BTreeMap::new(),
            default_price_per_page: default_price_per_page(),
            base_price_per_page: default_base_prices(),
            default_pages: default_pages(),
            min_price: default_min_price(),
            max_price: default_max_price(),
            bid_comment: default_bid_comment(),
        }
    }
}

/// Which source produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceMethod {
    Blended,
    Budget,
    AverageBid,
    Formula,
}

impl PriceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceMethod::Blended => "blended",
            PriceMethod::Budget => "budget",
            PriceMethod::AverageBid => "average_bid",
            PriceMethod::Formula => "formula",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub price: u32,
    pub method: PriceMethod,
}

/// Computes bids from item details.
#[derive(Debug, Clone)]
pub struct PriceCalculator {
    config: PricingConfig,
}

impl PriceCalculator {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    pub fn quote<R: Rng + ?Sized>(&self, detail: &ItemDetail, rng: &mut R) -> Quote {
        let budget = detail.budget.midpoint().map(f64::from);
        let average = detail.average_bid.filter(|v| *v > 0).map(f64::from);

        let (raw, method) = match (budget, average) {
            (Some(budget), Some(average)) => (
                (0.6 * budget + 0.4 * average) * rng.random_range(0.85..=0.95),
                PriceMethod::Blended,
            ),
            (Some(budget), None) => (budget * rng.random_range(0.85..=0.95), PriceMethod::Budget),
            (None, Some(average)) => (
                average * rng.random_range(0.85..=0.98),
                PriceMethod::AverageBid,
            ),
            (None, None) => (self.formula_price(detail), PriceMethod::Formula),
        };

        let price = (raw as u32).max(self.floor(&detail.work_type));
        debug!(
            work_type = %detail.work_type,
            method = method.as_str(),
            price,
            "Bid quoted"
        );
        Quote { price, method }
    }

    /// `max(min_bid, min_profitable_bid)` for a work type.
    pub fn floor(&self, work_type: &str) -> u32 {
        self.config.min_bid.max(self.min_profitable_bid(work_type))
    }

    /// Smallest bid whose income covers the estimated reasoning spend
    /// [`PROFIT_MULTIPLIER`] times.
    pub fn min_profitable_bid(&self, work_type: &str) -> u32 {
        let cost = lookup(&self.config.api_cost_estimates, work_type)
            .unwrap_or(self.config.api_cost_estimate);
        (f64::from(cost) * PROFIT_MULTIPLIER / AUTHOR_SHARE).ceil() as u32
    }

    pub fn within_bounds(&self, price: u32) -> bool {
        (self.config.min_price..=self.config.max_price).contains(&price)
    }

    pub fn bid_comment(&self, detail: &ItemDetail, price: u32) -> String {
        self.config
            .bid_comment
            .replace("{title}", &detail.title)
            .replace("{work_type}", &detail.work_type)
            .replace("{price}", &price.to_string())
    }

    fn formula_price(&self, detail: &ItemDetail) -> f64 {
        let per_page = lookup(&self.config.base_price_per_page, &detail.work_type)
            .unwrap_or(self.config.default_price_per_page);
        let pages = detail.pages().unwrap_or(self.config.default_pages);
        f64::from(per_page) * f64::from(pages) * complexity(detail)
    }
}

fn complexity(detail: &ItemDetail) -> f64 {
    let mut factor = 1.0;
    match detail.required_uniqueness {
        Some(u) if u > 80.0 => factor += 0.15,
        Some(u) if u > 70.0 => factor += 0.05,
        _ => {}
    }
    if !detail.attachments.is_empty() {
        factor += 0.05;
    }
    factor
}

fn lookup(table: &BTreeMap<String, u32>, work_type: &str) -> Option<u32> {
    let key = work_type.trim().to_lowercase();
    table
        .iter()
        .find(|(k, _)| k.to_lowercase() == key)
        .map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Budget;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn detail() -> ItemDetail {
        ItemDetail {
            title: "Market analysis".to_string(),
            work_type: "coursework".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_budget_only_quote_in_range() {
        let calc = PriceCalculator::new(PricingConfig::default());
        let mut detail = detail();
        detail.budget = Budget::range(2700, 3000);

        for seed in 0..50 {
            let quote = calc.quote(&detail, &mut StdRng::seed_from_u64(seed));
            assert_eq!(quote.method, PriceMethod::Budget);
            assert!((2422..=2708).contains(&quote.price), "price {}", quote.price);
            assert!(calc.within_bounds(quote.price));
        }
    }

    #[test]
    fn test_blended_quote() {
        let calc = PriceCalculator::new(PricingConfig::default());
        let mut detail = detail();
        detail.budget = Budget::range(1000, 1000);
        detail.average_bid = Some(2000);

        let quote = calc.quote(&detail, &mut StdRng::seed_from_u64(3));
        assert_eq!(quote.method, PriceMethod::Blended);
        // 0.6 * 1000 + 0.4 * 2000 = 1400
        assert!((1190..=1330).contains(&quote.price), "price {}", quote.price);
    }

    #[test]
    fn test_average_bid_only() {
        let calc = PriceCalculator::new(PricingConfig::default());
        let mut detail = detail();
        detail.average_bid = Some(1000);

        let quote = calc.quote(&detail, &mut StdRng::seed_from_u64(9));
        assert_eq!(quote.method, PriceMethod::AverageBid);
        assert!((850..=980).contains(&quote.price));
    }

    #[test]
    fn test_formula_with_complexity() {
        let calc = PriceCalculator::new(PricingConfig::default());
        let mut detail = detail();
        detail.pages_max = Some(10);
        detail.required_uniqueness = Some(85.0);
        detail.attachments = vec!["requirements.pdf".to_string()];

        let quote = calc.quote(&detail, &mut StdRng::seed_from_u64(0));
        assert_eq!(quote.method, PriceMethod::Formula);
        // 200 * 10 * 1.2
        assert!((2399..=2400).contains(&quote.price), "price {}", quote.price);
    }

    #[test]
    fn test_formula_defaults() {
        let calc = PriceCalculator::new(PricingConfig::default());
        let mut detail = detail();
        detail.work_type = "Unknown".to_string();

        let quote = calc.quote(&detail, &mut StdRng::seed_from_u64(0));
        assert_eq!(quote.price, 150 * 15);
    }

    #[test]
    fn test_floor_applies() {
        let mut config = PricingConfig::default();
        config.api_cost_estimates.insert("Diploma".to_string(), 220);
        let calc = PriceCalculator::new(config);

        assert_eq!(calc.min_profitable_bid("coursework"), 93);
        assert_eq!(calc.floor("coursework"), 300);
        // ceil(220 * 3 / 0.975) = 677
        assert_eq!(calc.floor("diploma"), 677);

        let mut detail = detail();
        detail.work_type = "diploma".to_string();
        detail.average_bid = Some(100);
        let quote = calc.quote(&detail, &mut StdRng::seed_from_u64(1));
        assert_eq!(quote.price, 677);
    }

    #[test]
    fn test_bounds_and_comment() {
        let config = PricingConfig {
            min_price: 500,
            max_price: 5000,
            bid_comment: "{work_type}: {title} for {price}".to_string(),
            ..Default::default()
        };
        let calc = PriceCalculator::new(config);
        assert!(!calc.within_bounds(499));
        assert!(calc.within_bounds(5000));
        assert!(!calc.within_bounds(5001));
        assert_eq!(
            calc.bid_comment(&detail(), 1200),
            "coursework: Market analysis for 1200"
        );
    }
}
