// src/detect/keyword.rs

//! Keyword scan over the stripped body text.
//!
//! Two curated multilingual marker lists. One-sided matches produce a
//! verdict whose confidence grows with the match count; pages showing
//! both sides (e.g. a product grid) stay inconclusive.

use async_trait::async_trait;

use crate::models::{DetectorResult, Verdict};

use super::{DetectionInput, Detector};

pub const NAME: &str = "keyword";

/// Markers meaning the product cannot be bought right now.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "out of stock",
    "out-of-stock",
    "sold out",
    "currently unavailable",
    "not available",
    "temporarily out of stock",
    "not in stock",
    "no stock",
    "stock: 0",
    "unavailable",
    "缺货",
    "售罄",
    "补货中",
    "暂时缺货",
    "已售完",
    "库存不足",
    "无货",
    "断货",
    "无库存",
    "暂无库存",
    "等待补货",
];

/// Markers meaning an order can be placed.
const AVAILABLE_MARKERS: &[&str] = &[
    "add to cart",
    "buy now",
    "order now",
    "in stock",
    "configure now",
    "select options",
    "立即购买",
    "加入购物车",
    "立即订购",
    "马上购买",
    "有货",
    "现货",
    "选择配置",
];

pub struct KeywordDetector;

impl KeywordDetector {
    pub fn new() -> Self {
        Self
    }

    fn matches<'m>(text: &str, markers: &[&'m str]) -> Vec<&'m str> {
        markers
            .iter()
            .copied()
            .filter(|m| text.contains(m))
            .collect()
    }
}

impl Default for KeywordDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for KeywordDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, input: &DetectionInput<'_>) -> DetectorResult {
        if input.text.is_empty() {
            return DetectorResult::inconclusive("empty body");
        }

        let unavailable = Self::matches(&input.text, UNAVAILABLE_MARKERS);
        let available = Self::matches(&input.text, AVAILABLE_MARKERS);

        match (available.is_empty(), unavailable.is_empty()) {
            (false, true) => {
                let confidence = (0.6 + 0.1 * available.len() as f64).min(0.9);
                DetectorResult::new(
                    Verdict::Available,
                    confidence,
                    format!("matched {:?}", available),
                )
            }
            (true, false) => {
                let confidence = (0.6 + 0.1 * unavailable.len() as f64).min(0.9);
                DetectorResult::new(
                    Verdict::Unavailable,
                    confidence,
                    format!("matched {:?}", unavailable),
                )
            }
            (false, false) => DetectorResult::new(
                Verdict::Inconclusive,
                0.3,
                format!(
                    "both sides matched: {:?} vs {:?}",
                    available, unavailable
                ),
            ),
            (true, true) => DetectorResult::inconclusive("no markers matched"),
        }
    }
}
