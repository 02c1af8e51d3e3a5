//! Pricing evaluator contract.
//!
//! The evaluator itself is a deterministic pure function over an immutable
//! configuration snapshot. The snapshot lives behind a lock-wrapped `Arc`;
//! reload swaps the pointer, so readers never observe a half-built config.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::{ApiResult, AppError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct PricingConfig {
    /// Base price per cleaning type, cents.
    pub base_cents: std::collections::BTreeMap<String, i64>,
    pub per_bedroom_cents: i64,
    pub per_bathroom_cents: i64,
    /// Hours of work added per bedroom+bathroom unit.
    pub hours_per_room: f64,
    pub minimum_hours: f64,
    /// Multiplier keyed by addon name, basis points over the subtotal.
    pub addon_bp: std::collections::BTreeMap<String, i64>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut base_cents = std::collections::BTreeMap::new();
        base_cents.insert("standard".to_string(), 9_000);
        base_cents.insert("deep".to_string(), 16_000);
        base_cents.insert("move_out_empty".to_string(), 20_000);

        let mut addon_bp = std::collections::BTreeMap::new();
        addon_bp.insert("inside_fridge".to_string(), 500);
        addon_bp.insert("inside_oven".to_string(), 500);
        addon_bp.insert("windows".to_string(), 1_000);

        Self {
            base_cents,
            per_bedroom_cents: 2_500,
            per_bathroom_cents: 3_000,
            hours_per_room: 0.75,
            minimum_hours: 2.0,
            addon_bp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct EstimateInputs {
    #[validate(range(min = 0, max = 20))]
    pub bedrooms: i32,
    #[validate(range(min = 0, max = 20))]
    pub bathrooms: i32,
    #[schema(example = "deep")]
    pub cleaning_type: String,
    #[serde(default)]
    pub addons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EstimateSnapshot {
    pub total_before_tax_cents: i64,
    pub time_on_site_hours: f64,
    pub line_items: Vec<EstimateLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EstimateLine {
    pub label: String,
    pub amount_cents: i64,
}

#[derive(Clone)]
pub struct PricingEngine {
    snapshot: Arc<RwLock<Arc<PricingConfig>>>,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn current(&self) -> Arc<PricingConfig> {
        self.snapshot
            .read()
            .expect("pricing snapshot lock")
            .clone()
    }

    /// Atomically replaces the snapshot. In-flight estimates keep the old
    /// config through their own `Arc`.
    pub fn reload(&self, config: PricingConfig) {
        *self.snapshot.write().expect("pricing snapshot lock") = Arc::new(config);
    }

    /// Deterministic: same inputs + same snapshot → same estimate.
    pub fn estimate(&self, inputs: &EstimateInputs) -> ApiResult<EstimateSnapshot> {
        let config = self.current();

        let base = *config
            .base_cents
            .get(&inputs.cleaning_type)
            .ok_or_else(|| AppError::validation("Unknown cleaning type"))?;

        let mut lines = vec![EstimateLine {
            label: format!("{} clean", inputs.cleaning_type),
            amount_cents: base,
        }];

        let rooms_cents = inputs.bedrooms as i64 * config.per_bedroom_cents
            + inputs.bathrooms as i64 * config.per_bathroom_cents;
        if rooms_cents > 0 {
            lines.push(EstimateLine {
                label: format!("{} bed / {} bath", inputs.bedrooms, inputs.bathrooms),
                amount_cents: rooms_cents,
            });
        }

        let subtotal = base + rooms_cents;

        let mut addon_total = 0i64;
        for addon in &inputs.addons {
            let bp = config
                .addon_bp
                .get(addon)
                .ok_or_else(|| AppError::validation(format!("Unknown addon: {}", addon)))?;
            let amount = subtotal * bp / 10_000;
            addon_total += amount;
            lines.push(EstimateLine {
                label: addon.clone(),
                amount_cents: amount,
            });
        }

        let hours = (inputs.bedrooms + inputs.bathrooms) as f64 * config.hours_per_room;
        let hours = hours.max(config.minimum_hours);
        // Deep cleans run longer.
        let hours = if inputs.cleaning_type == "standard" {
            hours
        } else {
            hours * 1.5
        };

        Ok(EstimateSnapshot {
            total_before_tax_cents: subtotal + addon_total,
            time_on_site_hours: (hours * 2.0).ceil() / 2.0,
            line_items: lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PricingEngine {
        PricingEngine::new(PricingConfig::default())
    }

    fn inputs(beds: i32, baths: i32, kind: &str) -> EstimateInputs {
        EstimateInputs {
            bedrooms: beds,
            bathrooms: baths,
            cleaning_type: kind.to_string(),
            addons: Vec::new(),
        }
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let engine = engine();
        let a = engine.estimate(&inputs(2, 2, "deep")).unwrap();
        let b = engine.estimate(&inputs(2, 2, "deep")).unwrap();
        assert_eq!(a.total_before_tax_cents, b.total_before_tax_cents);
        assert_eq!(a.time_on_site_hours, b.time_on_site_hours);
    }

    #[test]
    fn test_estimate_components() {
        let engine = engine();
        let snapshot = engine.estimate(&inputs(2, 2, "deep")).unwrap();
        // 16000 base + 2*2500 + 2*3000 = 27000
        assert_eq!(snapshot.total_before_tax_cents, 27_000);
        // 4 rooms * 0.75h = 3h, deep ×1.5 = 4.5h
        assert_eq!(snapshot.time_on_site_hours, 4.5);
    }

    #[test]
    fn test_minimum_hours_floor() {
        let engine = engine();
        let snapshot = engine.estimate(&inputs(0, 0, "standard")).unwrap();
        assert_eq!(snapshot.time_on_site_hours, 2.0);
    }

    #[test]
    fn test_unknown_cleaning_type_rejected() {
        let engine = engine();
        assert!(engine.estimate(&inputs(1, 1, "arcane")).is_err());
    }

    #[test]
    fn test_addons_priced_from_subtotal() {
        let engine = engine();
        let mut req = inputs(1, 1, "standard");
        req.addons = vec!["windows".to_string()];
        let snapshot = engine.estimate(&req).unwrap();
        // subtotal 9000+2500+3000 = 14500; windows 10% = 1450
        assert_eq!(snapshot.total_before_tax_cents, 15_950);
    }

    #[test]
    fn test_reload_swaps_snapshot_atomically() {
        let engine = engine();
        let before = engine.estimate(&inputs(1, 0, "standard")).unwrap();

        let mut config = PricingConfig::default();
        config.per_bedroom_cents = 10_000;
        engine.reload(config);

        let after = engine.estimate(&inputs(1, 0, "standard")).unwrap();
        assert!(after.total_before_tax_cents > before.total_before_tax_cents);
    }
}
