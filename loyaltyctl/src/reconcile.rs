//! Background crediting of completed orders.
//!
//! Orders are credited right after the status change that completes them commits. If that
//! step fails (database hiccup, process killed between the two), the order is left completed
//! but uncredited. This task sweeps for such orders on an interval and credits them; crediting
//! is idempotent per order, so racing the request path is harmless. Orders that fail are
//! stamped and retried after the ones not yet tried.

use crate::{
    config::{PointsConfig, ReconcilerConfig},
    db::{handlers::Points, models::points::CreditOutcome},
    metrics::LedgerMetrics,
};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Counts from one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub credited: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct CreditReconciler {
    pool: PgPool,
    points: PointsConfig,
    config: ReconcilerConfig,
    metrics: Option<LedgerMetrics>,
}

impl CreditReconciler {
    pub fn new(pool: PgPool, points: PointsConfig, config: ReconcilerConfig, metrics: Option<LedgerMetrics>) -> Self {
        Self {
            pool,
            points,
            config,
            metrics,
        }
    }

    /// Credit up to `batch_size` completed orders that have no credit entry
    #[instrument(skip(self), err)]
    pub async fn sweep(&self) -> anyhow::Result<SweepReport> {
        let mut conn = self.pool.acquire().await?;
        let mut points = Points::new(&mut conn);
        let pending = points.list_uncredited_completed_orders(self.config.batch_size).await?;

        let mut report = SweepReport::default();
        for order_id in pending {
            match points.credit_for_completed_order(order_id, &self.points).await {
                Ok(CreditOutcome::Credited(mutation)) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_credit(mutation.entry.points);
                    }
                    report.credited += 1;
                }
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    warn!(%order_id, retryable = e.is_retryable(), "Failed to credit order: {}", e);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rejection(&e);
                    }
                    if let Err(e) = points.record_failed_credit_attempt(order_id).await {
                        warn!(%order_id, "Failed to record credit attempt: {}", e);
                    }
                    report.failed += 1;
                }
            }
        }

        if report.credited > 0 || report.failed > 0 {
            info!(
                credited = report.credited,
                skipped = report.skipped,
                failed = report.failed,
                "Reconciled uncredited orders"
            );
        }
        Ok(report)
    }

    /// Sweep on the configured interval until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Starting credit reconciler, sweeping every {}",
            humantime::format_duration(self.config.interval)
        );
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Credit reconciler stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Credit reconciler sweep failed: {:#}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::models::orders::OrderStatus, test_utils::*};
    use std::time::Duration;

    fn reconciler(pool: PgPool) -> CreditReconciler {
        CreditReconciler::new(
            pool,
            PointsConfig::default(),
            ReconcilerConfig {
                enabled: true,
                interval: Duration::from_millis(50),
                batch_size: 10,
            },
            None,
        )
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_sweep_credits_orders_missed_by_the_hook(pool: PgPool) {
        let user_id = create_bare_user(&pool).await;
        let product = create_test_product(&pool, 50).await;
        // Written straight to the database, so no credit was attempted
        let order = create_test_order(&pool, user_id, &[(product.id, 2)], OrderStatus::Completed).await;

        let report = reconciler(pool.clone()).sweep().await.unwrap();
        assert_eq!(report, SweepReport { credited: 1, skipped: 0, failed: 0 });

        let mut conn = pool.acquire().await.unwrap();
        let mut points = Points::new(&mut conn);
        assert_eq!(points.get_balance(user_id).await.unwrap(), 200);
        let entries = points.list_user_entries(user_id, 0, 10).await.unwrap();
        assert_eq!(entries[0].order_id, Some(order.id));

        // Nothing left to do on the next pass
        let report = reconciler(pool.clone()).sweep().await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_failing_orders_do_not_starve_newer_ones(pool: PgPool) {
        let user_id = create_bare_user(&pool).await;
        let broken = create_test_product(&pool, i64::MAX).await;
        let product = create_test_product(&pool, 50).await;
        // Completed first, and overflows on every attempt
        create_test_order(&pool, user_id, &[(broken.id, 2)], OrderStatus::Completed).await;
        let order = create_test_order(&pool, user_id, &[(product.id, 1)], OrderStatus::Completed).await;

        let reconciler = CreditReconciler::new(
            pool.clone(),
            PointsConfig::default(),
            ReconcilerConfig {
                enabled: true,
                interval: Duration::from_millis(50),
                batch_size: 1,
            },
            None,
        );
        assert_eq!(reconciler.sweep().await.unwrap(), SweepReport { credited: 0, skipped: 0, failed: 1 });
        assert_eq!(reconciler.sweep().await.unwrap(), SweepReport { credited: 1, skipped: 0, failed: 0 });

        let mut conn = pool.acquire().await.unwrap();
        let mut points = Points::new(&mut conn);
        assert_eq!(points.get_balance(user_id).await.unwrap(), 150);
        let entries = points.list_user_entries(user_id, 0, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].order_id, Some(order.id));

        // The failing order is still retried once nothing newer is waiting
        assert_eq!(reconciler.sweep().await.unwrap(), SweepReport { credited: 0, skipped: 0, failed: 1 });
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_run_stops_on_cancel(pool: PgPool) {
        let user_id = create_bare_user(&pool).await;
        let product = create_test_product(&pool, 10).await;
        create_test_order(&pool, user_id, &[(product.id, 1)], OrderStatus::Completed).await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(reconciler(pool.clone()).run(shutdown.clone()));

        // The first tick fires immediately
        let mut balance = 0;
        for _ in 0..50 {
            let mut conn = pool.acquire().await.unwrap();
            balance = Points::new(&mut conn).get_balance(user_id).await.unwrap();
            if balance > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(balance, 110);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reconciler should stop")
            .unwrap();
    }
}
