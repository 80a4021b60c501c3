// src/detect/dom.rs

//! Rendered-DOM inspection.
//!
//! Applies a small library of per-vendor selector rules, falling back to
//! a generic order-form heuristic. A vendor-specific rule always wins
//! over the generic rule.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::models::{DetectorResult, Verdict};

use super::{DetectionInput, Detector};

pub const NAME: &str = "dom";

/// Selector rules for one vendor, keyed by the item's vendor tag.
struct VendorRule {
    tag: &'static str,
    /// CSS selectors whose presence means the plan is gone.
    unavailable_selectors: &'static [&'static str],
    /// Visible text fragments meaning the plan is gone.
    unavailable_texts: &'static [&'static str],
    /// Button/link texts that mean an order can start.
    available_texts: &'static [&'static str],
}

/// Vendor rule library. Ordered; first tag match wins.
const VENDOR_RULES: &[VendorRule] = &[
    VendorRule {
        tag: "dmit",
        unavailable_selectors: &[".out-of-stock", ".stock-refresh"],
        unavailable_texts: &["缺货中", "刷新库存", "refresh stock", "暂无库存"],
        available_texts: &["立即订购", "order now", "configure", "add to cart"],
    },
    VendorRule {
        tag: "racknerd",
        unavailable_selectors: &[".out-of-stock"],
        unavailable_texts: &["out of stock", "sold out", "temporarily unavailable"],
        available_texts: &["order now", "add to cart", "configure", "choose plan"],
    },
    VendorRule {
        tag: "bandwagon",
        unavailable_selectors: &[],
        unavailable_texts: &["out of stock", "sold out", "currently unavailable"],
        available_texts: &["add to cart", "purchase", "buy now"],
    },
    VendorRule {
        tag: "cloudcone",
        unavailable_selectors: &[".sold-out"],
        unavailable_texts: &["out of stock", "sold out"],
        available_texts: &["order now", "add to cart", "deploy"],
    },
    VendorRule {
        tag: "vultr",
        unavailable_selectors: &[],
        unavailable_texts: &["out of stock", "not available"],
        available_texts: &["deploy", "deploy now", "create instance"],
    },
];

/// Form action fragments that mark an order entry point.
const ORDER_ACTION_HINTS: &[&str] = &["add", "cart", "buy", "order", "checkout"];

pub struct DomDetector;

impl DomDetector {
    pub fn new() -> Self {
        Self
    }

    fn rule_for(tag: Option<&str>) -> Option<&'static VendorRule> {
        let tag = tag?;
        VENDOR_RULES.iter().find(|r| tag.starts_with(r.tag))
    }

    fn apply_vendor_rule(document: &Html, rule: &VendorRule) -> Option<DetectorResult> {
        for css in rule.unavailable_selectors {
            if let Ok(sel) = Selector::parse(css) {
                if document.select(&sel).next().is_some() {
                    return Some(DetectorResult::new(
                        Verdict::Unavailable,
                        0.8,
                        format!("{} rule: selector {css} present", rule.tag),
                    ));
                }
            }
        }

        let clickable = Selector::parse("button, a, input[type=submit], input[type=button]").ok()?;
        let mut available_hit: Option<String> = None;
        for element in document.select(&clickable) {
            let text = element_text(&element).to_lowercase();
            if text.is_empty() {
                continue;
            }
            if rule.unavailable_texts.iter().any(|t| text.contains(t)) {
                return Some(DetectorResult::new(
                    Verdict::Unavailable,
                    0.8,
                    format!("{} rule: control reads {text:?}", rule.tag),
                ));
            }
            if available_hit.is_none()
                && rule.available_texts.iter().any(|t| text.contains(t))
                && !is_disabled(&element)
            {
                available_hit = Some(text);
            }
        }
        // Body-level unavailable text beats an enabled order button: vendors
        // grey the page copy before they remove the button.
        if let Some(body_sel) = Selector::parse("body").ok() {
            if let Some(body) = document.select(&body_sel).next() {
                let text = element_text(&body).to_lowercase();
                if rule.unavailable_texts.iter().any(|t| text.contains(t)) {
                    return Some(DetectorResult::new(
                        Verdict::Unavailable,
                        0.8,
                        format!("{} rule: page reads an out-of-stock phrase", rule.tag),
                    ));
                }
            }
        }
        available_hit.map(|text| {
            DetectorResult::new(
                Verdict::Available,
                0.8,
                format!("{} rule: enabled control reads {text:?}", rule.tag),
            )
        })
    }

    /// Generic rule: a submittable form pointing at an add/cart/buy
    /// endpoint means available; the same form disabled means unavailable.
    fn apply_generic_rule(document: &Html) -> DetectorResult {
        let forms = match Selector::parse("form") {
            Ok(sel) => sel,
            Err(_) => return DetectorResult::inconclusive("selector library failure"),
        };

        for form in document.select(&forms) {
            let action = form
                .value()
                .attr("action")
                .unwrap_or_default()
                .to_lowercase();
            if !ORDER_ACTION_HINTS.iter().any(|h| action.contains(h)) {
                continue;
            }

            if is_disabled(&form) || submit_disabled(&form) {
                return DetectorResult::new(
                    Verdict::Unavailable,
                    0.8,
                    format!("order form {action:?} is disabled"),
                );
            }
            return DetectorResult::new(
                Verdict::Available,
                0.8,
                format!("submittable order form {action:?}"),
            );
        }

        // A "notify me when back" widget is a strong negative even without
        // an order form on the page.
        if let Ok(sel) = Selector::parse("form, button, a") {
            for element in document.select(&sel) {
                let text = element_text(&element).to_lowercase();
                if text.contains("notify me") || text.contains("notify when") {
                    return DetectorResult::new(
                        Verdict::Unavailable,
                        0.8,
                        "restock-notification widget present",
                    );
                }
            }
        }

        DetectorResult::inconclusive("no order form found")
    }
}

impl Default for DomDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for DomDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, input: &DetectionInput<'_>) -> DetectorResult {
        let rendered = match &input.fetch.rendered_body {
            Some(body) if !body.trim().is_empty() => body,
            _ => return DetectorResult::inconclusive("no rendered body"),
        };

        let document = Html::parse_document(rendered);

        if let Some(rule) = Self::rule_for(input.vendor_tag) {
            if let Some(result) = Self::apply_vendor_rule(&document, rule) {
                return result;
            }
        }
        Self::apply_generic_rule(&document)
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn is_disabled(element: &ElementRef<'_>) -> bool {
    element.value().attr("disabled").is_some()
        || element
            .value()
            .attr("class")
            .map(|c| c.contains("disabled"))
            .unwrap_or(false)
}

fn submit_disabled(form: &ElementRef<'_>) -> bool {
    let submits = match Selector::parse("button, input[type=submit]") {
        Ok(sel) => sel,
        Err(_) => return false,
    };
    let mut saw_submit = false;
    for submit in form.select(&submits) {
        saw_submit = true;
        if !is_disabled(&submit) {
            return false;
        }
    }
    saw_submit
}
