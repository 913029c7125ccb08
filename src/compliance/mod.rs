use bigdecimal::BigDecimal;
use std::collections::HashMap;

use crate::config::tables::LimitTier;
use crate::db::models::{
    ComplianceSnapshot, KYC_APPROVED, LimitSnapshot, RISK_HIGH, RISK_LOW, RISK_MEDIUM, risk_rank,
};
use crate::error::{AppError, codes};

/// Everything a screening run needs, assembled by the caller before the
/// pipeline starts. Stages are pure: usage totals are fetched up front and
/// injected so no stage touches the database or the network.
#[derive(Debug, Clone)]
pub struct ComplianceContext {
    pub merchant_kyc_status: String,
    pub merchant_risk_level: String,
    pub merchant_edd_approved: bool,
    pub amount: BigDecimal,
    pub currency: String,
    pub customer_email: Option<String>,
    pub daily_spend: BigDecimal,
    pub monthly_spend: BigDecimal,
    pub limits: HashMap<String, LimitTier>,
    pub edd_threshold: BigDecimal,

    // Annotations accumulated by the stages.
    pub risk_score: i32,
    pub risk_level: String,
    pub aml_report: String,
    pub edd_required: bool,
    pub requires_review: bool,
}

impl ComplianceContext {
    pub fn new(
        merchant_kyc_status: String,
        merchant_risk_level: String,
        merchant_edd_approved: bool,
        amount: BigDecimal,
        currency: String,
        customer_email: Option<String>,
        daily_spend: BigDecimal,
        monthly_spend: BigDecimal,
        limits: HashMap<String, LimitTier>,
        edd_threshold: BigDecimal,
    ) -> Self {
        Self {
            merchant_kyc_status,
            merchant_risk_level,
            merchant_edd_approved,
            amount,
            currency,
            customer_email,
            daily_spend,
            monthly_spend,
            limits,
            edd_threshold,
            risk_score: 0,
            risk_level: RISK_LOW.to_string(),
            aml_report: String::new(),
            edd_required: false,
            requires_review: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: &'static str,
    pub reason: String,
}

impl Rejection {
    fn new(code: &'static str, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        AppError::rejected(rejection.code, rejection.reason)
    }
}

pub type Stage = fn(ComplianceContext) -> Result<ComplianceContext, Rejection>;

/// The gate, in order. Each stage may short-circuit the chain; nothing is
/// persisted until every stage has passed.
pub const STAGES: &[(&str, Stage)] = &[
    ("kyc", check_kyc),
    ("aml", screen_aml),
    ("limits", enforce_limits),
    ("edd", evaluate_edd),
];

pub fn run(mut ctx: ComplianceContext) -> Result<ComplianceContext, Rejection> {
    for &(name, stage) in STAGES {
        ctx = stage(ctx).map_err(|rejection| {
            tracing::info!(
                stage = name,
                code = rejection.code,
                "compliance stage rejected payment request"
            );
            rejection
        })?;
        tracing::debug!(stage = name, "compliance stage passed");
    }
    Ok(ctx)
}

/// Run the full gate and produce the immutable snapshot persisted with the
/// transaction, plus whether the payment starts under a review hold.
pub fn screen(ctx: ComplianceContext) -> Result<(ComplianceSnapshot, bool), Rejection> {
    let ctx = run(ctx)?;

    let tier = ctx
        .limits
        .get(&ctx.merchant_risk_level)
        .ok_or_else(|| Rejection::new(codes::LIMIT_EXCEEDED, "no limit tier configured"))?;

    let snapshot = ComplianceSnapshot {
        kyc_verified: true,
        aml_checked: true,
        risk_score: ctx.risk_score,
        risk_level: ctx.risk_level.clone(),
        aml_report: ctx.aml_report.clone(),
        edd_required: ctx.edd_required,
        edd_approved: ctx.merchant_edd_approved,
        limits: LimitSnapshot {
            single_transaction: tier.single_transaction.clone(),
            daily: tier.daily.clone(),
            monthly: tier.monthly.clone(),
        },
    };

    Ok((snapshot, ctx.requires_review))
}

/// Stage 1: fail closed unless the merchant's KYC is approved.
fn check_kyc(ctx: ComplianceContext) -> Result<ComplianceContext, Rejection> {
    if ctx.merchant_kyc_status != KYC_APPROVED {
        return Err(Rejection::new(
            codes::KYC_NOT_APPROVED,
            format!(
                "merchant KYC status is '{}'; payments require approval",
                ctx.merchant_kyc_status
            ),
        ));
    }
    Ok(ctx)
}

const AML_HIGH_AMOUNT: i64 = 10_000;
const AML_MEDIUM_AMOUNT: i64 = 3_000;

/// Stage 2: always passes, annotates risk from amount thresholds and
/// counterpart heuristics, escalated by the merchant's standing risk level.
fn screen_aml(mut ctx: ComplianceContext) -> Result<ComplianceContext, Rejection> {
    let (mut score, amount_level) = if ctx.amount >= BigDecimal::from(AML_HIGH_AMOUNT) {
        (75, RISK_HIGH)
    } else if ctx.amount >= BigDecimal::from(AML_MEDIUM_AMOUNT) {
        (45, RISK_MEDIUM)
    } else {
        (15, RISK_LOW)
    };

    // Anonymous counterpart: no contact point for the payer.
    if ctx.customer_email.is_none() {
        score += 10;
    }

    score += 15 * risk_rank(&ctx.merchant_risk_level) as i32;
    let score = score.min(100);

    let effective = if risk_rank(&ctx.merchant_risk_level) > risk_rank(amount_level) {
        ctx.merchant_risk_level.clone()
    } else {
        amount_level.to_string()
    };

    ctx.aml_report = format!(
        "{} {} screened at risk level '{}' (score {}); merchant risk '{}'",
        ctx.amount, ctx.currency, effective, score, ctx.merchant_risk_level
    );
    ctx.risk_score = score;
    ctx.risk_level = effective;
    Ok(ctx)
}

/// Stage 3: per-transaction, daily, and monthly caps for the merchant's
/// current risk tier.
fn enforce_limits(ctx: ComplianceContext) -> Result<ComplianceContext, Rejection> {
    let tier = ctx
        .limits
        .get(&ctx.merchant_risk_level)
        .ok_or_else(|| Rejection::new(codes::LIMIT_EXCEEDED, "no limit tier configured"))?;

    if ctx.amount > tier.single_transaction {
        return Err(Rejection::new(
            codes::LIMIT_EXCEEDED,
            format!(
                "amount {} exceeds the per-transaction limit of {} for '{}' risk",
                ctx.amount, tier.single_transaction, ctx.merchant_risk_level
            ),
        ));
    }
    if &ctx.daily_spend + &ctx.amount > tier.daily {
        return Err(Rejection::new(
            codes::LIMIT_EXCEEDED,
            format!(
                "daily volume {} would exceed the limit of {} for '{}' risk",
                &ctx.daily_spend + &ctx.amount,
                tier.daily,
                ctx.merchant_risk_level
            ),
        ));
    }
    if &ctx.monthly_spend + &ctx.amount > tier.monthly {
        return Err(Rejection::new(
            codes::LIMIT_EXCEEDED,
            format!(
                "monthly volume {} would exceed the limit of {} for '{}' risk",
                &ctx.monthly_spend + &ctx.amount,
                tier.monthly,
                ctx.merchant_risk_level
            ),
        ));
    }

    Ok(ctx)
}

/// Stage 4: high-risk merchants and large amounts need manual review. The
/// payment is still created, but stays unpayable until the hold is cleared.
fn evaluate_edd(mut ctx: ComplianceContext) -> Result<ComplianceContext, Rejection> {
    ctx.edd_required = ctx.risk_level == RISK_HIGH || ctx.amount >= ctx.edd_threshold;
    ctx.requires_review = ctx.edd_required && !ctx.merchant_edd_approved;
    Ok(ctx)
}
