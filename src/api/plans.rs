//! Plan catalog endpoints: listing, pricing calculation, EMI schedules

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::{api_error, ApiError, AppState};
use crate::error::PaymentError;
use crate::services::pricing::{BillingCycle, EmiOption, Plan, PricingBreakdown};

#[derive(Debug, Serialize)]
pub struct PlanListResponse {
    pub plans: Vec<Plan>,
}

/// GET /plans
pub async fn list_plans(State(state): State<AppState>) -> Json<PlanListResponse> {
    Json(PlanListResponse {
        plans: state.catalog.plans().to_vec(),
    })
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub plan: Plan,
}

/// GET /plans/{plan_id}, matching by slug or id
pub async fn get_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<String>,
) -> Result<Json<PlanResponse>, ApiError> {
    let plan = state
        .catalog
        .find_by_slug(&plan_id)
        .or_else(|_| state.catalog.find_by_id(&plan_id))
        .map_err(|e| api_error(e, &headers))?;

    Ok(Json(PlanResponse { plan: plan.clone() }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatePricingRequest {
    #[serde(default)]
    pub add_on_ids: Vec<String>,
    pub billing_cycle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PricingResponse {
    pub pricing: PricingBreakdown,
}

/// POST /plans/{plan_id}/calculate
pub async fn calculate_pricing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<String>,
    Json(payload): Json<CalculatePricingRequest>,
) -> Result<Json<PricingResponse>, ApiError> {
    let billing_cycle = match payload.billing_cycle {
        Some(raw) => BillingCycle::from_str(&raw)
            .map_err(|message| api_error(PaymentError::validation_field(message, "billingCycle"), &headers))?,
        None => BillingCycle::Monthly,
    };

    let pricing = state
        .catalog
        .calculate_pricing(&plan_id, &payload.add_on_ids, billing_cycle)
        .map_err(|e| api_error(e, &headers))?;

    Ok(Json(PricingResponse { pricing }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmiOptionsResponse {
    pub emi_options: Vec<EmiOption>,
}

/// GET /plans/{plan_id}/emi/{amount}
pub async fn emi_options(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((plan_id, amount)): Path<(String, String)>,
) -> Result<Json<EmiOptionsResponse>, ApiError> {
    let amount = BigDecimal::from_str(amount.trim()).map_err(|_| {
        api_error(
            PaymentError::validation_field(
                format!("'{}' is not a valid amount", amount),
                "amount",
            ),
            &headers,
        )
    })?;

    let options = state
        .catalog
        .emi_options(&plan_id, &amount)
        .map_err(|e| api_error(e, &headers))?;

    Ok(Json(EmiOptionsResponse {
        emi_options: options,
    }))
}
