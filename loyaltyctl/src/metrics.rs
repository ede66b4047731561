//! Prometheus counters for ledger activity. HTTP-level metrics come from axum-prometheus; these
//! are rendered alongside them at `/internal/metrics`.

use crate::db::errors::DbError;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

#[derive(Clone)]
pub struct LedgerMetrics {
    registry: Registry,
    points_credited: IntCounter,
    points_redeemed: IntCounter,
    points_adjusted: IntCounterVec,
    rejections: IntCounterVec,
}

impl LedgerMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let points_credited = IntCounter::new("loyalty_points_credited_total", "Points credited for completed orders")?;
        let points_redeemed = IntCounter::new("loyalty_points_redeemed_total", "Points spent on redemptions")?;
        let points_adjusted = IntCounterVec::new(
            Opts::new("loyalty_points_adjusted_total", "Points moved by manual adjustments"),
            &["direction"],
        )?;
        let rejections = IntCounterVec::new(
            Opts::new("loyalty_ledger_rejections_total", "Ledger operations rejected, by reason"),
            &["reason"],
        )?;

        registry.register(Box::new(points_credited.clone()))?;
        registry.register(Box::new(points_redeemed.clone()))?;
        registry.register(Box::new(points_adjusted.clone()))?;
        registry.register(Box::new(rejections.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            points_credited,
            points_redeemed,
            points_adjusted,
            rejections,
        })
    }

    pub fn record_credit(&self, points: i64) {
        self.points_credited.inc_by(points.unsigned_abs());
    }

    pub fn record_redemption(&self, points: i64) {
        self.points_redeemed.inc_by(points.unsigned_abs());
    }

    pub fn record_adjustment(&self, delta: i64) {
        let direction = if delta < 0 { "removed" } else { "added" };
        self.points_adjusted.with_label_values(&[direction]).inc_by(delta.unsigned_abs());
    }

    /// Count a failed ledger operation. Errors that are not ledger rejections are ignored.
    pub fn record_rejection(&self, error: &DbError) {
        let reason = match error {
            DbError::InsufficientPoints { .. } => "insufficient_points",
            DbError::Validation { .. } => "validation",
            DbError::NotFound => "not_found",
            DbError::TransactionConflict { .. } => "transaction_conflict",
            _ => return,
        };
        self.rejections.with_label_values(&[reason]).inc();
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> String {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = vec![];
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode ledger metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
