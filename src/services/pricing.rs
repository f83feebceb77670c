//! Plan catalog and pricing resolver
//!
//! Pure functions over static plan data: add-on and billing-cycle pricing
//! plus EMI schedules. The catalog ships built in and can be replaced with
//! a JSON file at startup.

use bigdecimal::rounding::RoundingMode;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

use crate::config::PlanConfig;
use crate::error::PaymentError;

/// Yearly billing discount, percent
const YEARLY_DISCOUNT_PERCENT: u32 = 10;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read plan catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid plan catalog {path}: {message}")]
    Invalid { path: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl FromStr for BillingCycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "yearly" | "annual" => Ok(Self::Yearly),
            other => Err(format!("unknown billing cycle: {}", other)),
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOn {
    pub id: String,
    pub name: String,
    pub price: BigDecimal,
}

/// One installment tier a plan offers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmiTier {
    pub tenure_months: u32,
    /// Flat interest over the whole tenure, percent
    pub interest_rate: BigDecimal,
    /// Smallest amount that qualifies for this tier
    pub min_amount: BigDecimal,
}

/// Immutable pricing/feature bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub slug: String,
    pub name: String,
    /// Monthly base price in the catalog currency
    pub base_price: BigDecimal,
    pub currency: String,
    pub features: Vec<String>,
    #[serde(default)]
    pub add_ons: Vec<AddOn>,
    #[serde(default)]
    pub emi_tiers: Vec<EmiTier>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingLineItem {
    pub id: String,
    pub name: String,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingBreakdown {
    pub plan_id: String,
    pub billing_cycle: BillingCycle,
    pub currency: String,
    pub base_price: BigDecimal,
    pub add_ons: Vec<PricingLineItem>,
    /// Base plus add-ons, per month
    pub monthly_total: BigDecimal,
    /// Yearly discount applied, zero for monthly billing
    pub discount: BigDecimal,
    pub total_price: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmiOption {
    pub tenure_months: u32,
    pub interest_rate: BigDecimal,
    pub monthly_amount: BigDecimal,
    pub total_amount: BigDecimal,
}

/// Static plan data plus the pricing and EMI math over it
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    /// Catalog from configuration: the JSON file override when set, the
    /// built-in plans otherwise.
    pub fn from_config(config: &PlanConfig) -> Result<Self, CatalogError> {
        match &config.catalog_path {
            Some(path) => {
                let catalog = Self::from_file(path)?;
                info!(path = %path, plans = catalog.plans.len(), "Plan catalog loaded from file");
                Ok(catalog)
            }
            None => Ok(Self::builtin()),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let plans: Vec<Plan> = serde_json::from_str(&raw).map_err(|e| CatalogError::Invalid {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if plans.is_empty() {
            return Err(CatalogError::Invalid {
                path: path.display().to_string(),
                message: "catalog must contain at least one plan".to_string(),
            });
        }
        Ok(Self { plans })
    }

    /// The seeded hosting plans
    pub fn builtin() -> Self {
        let plans = vec![
            Plan {
                id: "starter".to_string(),
                slug: "starter".to_string(),
                name: "Starter".to_string(),
                base_price: BigDecimal::from(499),
                currency: "INR".to_string(),
                features: vec![
                    "1 website".to_string(),
                    "10 GB storage".to_string(),
                    "Free SSL".to_string(),
                ],
                add_ons: vec![
                    add_on("daily-backup", "Daily Backups", 99),
                    add_on("email-pro", "Professional Email", 149),
                ],
                emi_tiers: Vec::new(),
            },
            Plan {
                id: "business".to_string(),
                slug: "business".to_string(),
                name: "Business".to_string(),
                base_price: BigDecimal::from(999),
                currency: "INR".to_string(),
                features: vec![
                    "5 websites".to_string(),
                    "50 GB storage".to_string(),
                    "Free SSL".to_string(),
                    "Staging environment".to_string(),
                ],
                add_ons: vec![
                    add_on("daily-backup", "Daily Backups", 99),
                    add_on("email-pro", "Professional Email", 149),
                    add_on("cdn-boost", "CDN Boost", 299),
                ],
                emi_tiers: vec![
                    emi_tier(3, 2, 3_000),
                    emi_tier(6, 5, 6_000),
                ],
            },
            Plan {
                id: "enterprise".to_string(),
                slug: "enterprise".to_string(),
                name: "Enterprise".to_string(),
                base_price: BigDecimal::from(2_499),
                currency: "INR".to_string(),
                features: vec![
                    "Unlimited websites".to_string(),
                    "500 GB storage".to_string(),
                    "Free SSL".to_string(),
                    "Staging environment".to_string(),
                    "Priority support".to_string(),
                ],
                add_ons: vec![
                    add_on("daily-backup", "Daily Backups", 99),
                    add_on("cdn-boost", "CDN Boost", 299),
                    add_on("dedicated-ip", "Dedicated IP", 499),
                ],
                emi_tiers: vec![
                    emi_tier(3, 2, 6_000),
                    emi_tier(6, 5, 12_000),
                    emi_tier(12, 9, 24_000),
                ],
            },
        ];
        Self { plans }
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn find_by_id(&self, plan_id: &str) -> Result<&Plan, PaymentError> {
        self.plans
            .iter()
            .find(|p| p.id == plan_id)
            .ok_or_else(|| PaymentError::PlanNotFound {
                plan: plan_id.to_string(),
            })
    }

    pub fn find_by_slug(&self, slug: &str) -> Result<&Plan, PaymentError> {
        self.plans
            .iter()
            .find(|p| p.slug == slug)
            .ok_or_else(|| PaymentError::PlanNotFound {
                plan: slug.to_string(),
            })
    }

    /// Price a plan with add-ons for a billing cycle.
    ///
    /// Yearly billing charges twelve months less a fixed discount. Unknown
    /// add-on ids are a validation error naming the offenders.
    pub fn calculate_pricing(
        &self,
        plan_id: &str,
        add_on_ids: &[String],
        billing_cycle: BillingCycle,
    ) -> Result<PricingBreakdown, PaymentError> {
        let plan = self.find_by_id(plan_id)?;

        let mut items = Vec::new();
        let mut unknown = Vec::new();
        for id in add_on_ids {
            match plan.add_ons.iter().find(|a| &a.id == id) {
                Some(add_on) => items.push(PricingLineItem {
                    id: add_on.id.clone(),
                    name: add_on.name.clone(),
                    price: add_on.price.clone(),
                }),
                None => unknown.push(id.clone()),
            }
        }
        if !unknown.is_empty() {
            return Err(PaymentError::validation_field(
                format!("unknown add-on ids: {}", unknown.join(", ")),
                "addOnIds",
            ));
        }

        let monthly_total = items
            .iter()
            .fold(plan.base_price.clone(), |acc, item| acc + &item.price);

        let (discount, total_price) = match billing_cycle {
            BillingCycle::Monthly => (BigDecimal::from(0), monthly_total.clone()),
            BillingCycle::Yearly => {
                let annual = &monthly_total * BigDecimal::from(12);
                let discount = (&annual * BigDecimal::from(YEARLY_DISCOUNT_PERCENT)
                    / BigDecimal::from(100))
                .with_scale_round(2, RoundingMode::HalfUp);
                let total = (&annual - &discount).with_scale_round(2, RoundingMode::HalfUp);
                (discount, total)
            }
        };

        Ok(PricingBreakdown {
            plan_id: plan.id.clone(),
            billing_cycle,
            currency: plan.currency.clone(),
            base_price: plan.base_price.clone(),
            add_ons: items,
            monthly_total,
            discount,
            total_price,
        })
    }

    /// EMI schedules the plan offers for this amount, cheapest tenure first
    pub fn emi_options(
        &self,
        plan_id: &str,
        amount: &BigDecimal,
    ) -> Result<Vec<EmiOption>, PaymentError> {
        if amount <= &BigDecimal::from(0) {
            return Err(PaymentError::validation_field(
                "amount must be greater than zero",
                "amount",
            ));
        }
        let plan = self.find_by_id(plan_id)?;

        let mut options: Vec<EmiOption> = plan
            .emi_tiers
            .iter()
            .filter(|tier| amount >= &tier.min_amount)
            .map(|tier| {
                let total_amount = (amount
                    * (BigDecimal::from(100) + &tier.interest_rate)
                    / BigDecimal::from(100))
                .with_scale_round(2, RoundingMode::HalfUp);
                let monthly_amount = (&total_amount / BigDecimal::from(tier.tenure_months))
                    .with_scale_round(2, RoundingMode::HalfUp);
                EmiOption {
                    tenure_months: tier.tenure_months,
                    interest_rate: tier.interest_rate.clone(),
                    monthly_amount,
                    total_amount,
                }
            })
            .collect();
        options.sort_by_key(|o| o.tenure_months);
        Ok(options)
    }
}

fn add_on(id: &str, name: &str, price: i64) -> AddOn {
    AddOn {
        id: id.to_string(),
        name: name.to_string(),
        price: BigDecimal::from(price),
    }
}

fn emi_tier(tenure_months: u32, interest_rate: i64, min_amount: i64) -> EmiTier {
    EmiTier {
        tenure_months,
        interest_rate: BigDecimal::from(interest_rate),
        min_amount: BigDecimal::from(min_amount),
    }
}
