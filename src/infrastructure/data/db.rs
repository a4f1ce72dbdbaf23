// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use crate::common::error::AppError;
use crate::data::schema::{FillEventRecord, PlanRow, TrancheRow};
use crate::domain::tranche::{PlanStatus, Tranche, TrancheStatus, TwapPlan};
use alloy::primitives::{B256, U256};
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;

const TRANCHE_COLUMNS: &str = "t.plan_id, t.idx, t.source_amount, t.target_estimate, t.eligible_at, \
     t.status, t.attempts, t.tx_hash, t.raw_tx, t.quoted_out, t.amount_out, t.block_number, \
     t.submitted_at, t.last_error";

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

fn to_i64(field: &str, value: u64) -> Result<i64, AppError> {
    i64::try_from(value)
        .map_err(|_| AppError::Database(format!("{field} {value} does not fit in sqlite INTEGER")))
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::Initialization(format!("DB Connect failed: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every in-memory connection is its own database; pin the pool to a single one.
        let in_memory = database_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::Initialization(format!("DB Connect failed: {}", e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Initialization(format!("DB Migration failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Persist a plan with its tranches. Returns `false` when the plan already existed,
    /// in which case nothing is written.
    pub async fn insert_plan(&self, plan: &TwapPlan, tranches: &[Tranche]) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO twap_plans (
                id, chain_id, src_token, dst_token, total_amount, slices, interval_secs,
                start_at, slippage_bps, max_drift_bps, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&plan.id)
        .bind(to_i64("chain_id", plan.chain_id)?)
        .bind(format!("{:#x}", plan.src_token))
        .bind(format!("{:#x}", plan.dst_token))
        .bind(plan.total_amount.to_string())
        .bind(i64::from(plan.slices))
        .bind(to_i64("interval_secs", plan.interval_secs)?)
        .bind(to_i64("start_at", plan.start_at)?)
        .bind(to_i64("slippage_bps", plan.slippage_bps)?)
        .bind(to_i64("max_drift_bps", plan.max_drift_bps)?)
        .bind(plan.status.as_str())
        .bind(to_i64("created_at", plan.created_at)?)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            tx.rollback().await?;
            return Ok(false);
        }

        for tranche in tranches {
            sqlx::query(
                r#"
                INSERT INTO tranches (plan_id, idx, source_amount, target_estimate, eligible_at, status)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&plan.id)
            .bind(i64::from(tranche.index))
            .bind(tranche.source_amount.to_string())
            .bind(tranche.target_amount_estimate.to_string())
            .bind(to_i64("eligible_at", tranche.eligible_at)?)
            .bind(TrancheStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn load_plan(&self, plan_id: &str) -> Result<Option<TwapPlan>, AppError> {
        let row = sqlx::query_as::<_, PlanRow>("SELECT * FROM twap_plans WHERE id = ?")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TwapPlan::try_from).transpose()
    }

    pub async fn list_plans(&self, status: Option<PlanStatus>) -> Result<Vec<TwapPlan>, AppError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, PlanRow>(
                    "SELECT * FROM twap_plans WHERE status = ? ORDER BY created_at, id",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, PlanRow>("SELECT * FROM twap_plans ORDER BY created_at, id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(TwapPlan::try_from).collect()
    }

    pub async fn load_tranches(&self, plan_id: &str) -> Result<Vec<Tranche>, AppError> {
        let sql = format!("SELECT {TRANCHE_COLUMNS} FROM tranches t WHERE t.plan_id = ? ORDER BY t.idx");
        let rows = sqlx::query_as::<_, TrancheRow>(&sql)
            .bind(plan_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Tranche::try_from).collect()
    }

    pub async fn load_tranche(&self, plan_id: &str, index: u32) -> Result<Option<Tranche>, AppError> {
        let sql = format!("SELECT {TRANCHE_COLUMNS} FROM tranches t WHERE t.plan_id = ? AND t.idx = ?");
        let row = sqlx::query_as::<_, TrancheRow>(&sql)
            .bind(plan_id)
            .bind(i64::from(index))
            .fetch_optional(&self.pool)
            .await?;
        row.map(Tranche::try_from).transpose()
    }

    /// Pending tranches of active plans whose eligibility time has passed.
    ///
    /// Rows are ranked within their plan, so the batch holds the earliest due tranche
    /// of every plan before the second of any. `plan` restricts the batch to one plan.
    pub async fn due_tranches(
        &self,
        now: u64,
        limit: u32,
        plan: Option<&str>,
    ) -> Result<Vec<Tranche>, AppError> {
        let sql = format!(
            r#"
            WITH due AS (
                SELECT {TRANCHE_COLUMNS},
                       ROW_NUMBER() OVER (PARTITION BY t.plan_id ORDER BY t.eligible_at, t.idx) AS plan_rank
                FROM tranches t
                JOIN twap_plans p ON p.id = t.plan_id
                WHERE p.status = 'active'
                  AND t.status = 'pending'
                  AND t.eligible_at <= ?
                  AND (? IS NULL OR t.plan_id = ?)
            )
            SELECT {TRANCHE_COLUMNS}
            FROM due t
            ORDER BY t.plan_rank, t.eligible_at, t.plan_id, t.idx
            LIMIT ?
            "#
        );
        let rows = sqlx::query_as::<_, TrancheRow>(&sql)
            .bind(to_i64("now", now)?)
            .bind(plan)
            .bind(plan)
            .bind(i64::from(limit.max(1)))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Tranche::try_from).collect()
    }

    pub async fn submitted_tranches(&self) -> Result<Vec<Tranche>, AppError> {
        let sql = format!(
            "SELECT {TRANCHE_COLUMNS} FROM tranches t WHERE t.status = 'submitted' ORDER BY t.submitted_at, t.idx"
        );
        let rows = sqlx::query_as::<_, TrancheRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Tranche::try_from).collect()
    }

    /// Move a pending tranche to `claimed`. Only one caller can win; the loser gets `false`.
    pub async fn claim_tranche(&self, plan_id: &str, index: u32) -> Result<bool, AppError> {
        let claimed = sqlx::query(
            r#"
            UPDATE tranches
            SET status = 'claimed',
                attempts = attempts + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE plan_id = ? AND idx = ? AND status = 'pending'
            "#,
        )
        .bind(plan_id)
        .bind(i64::from(index))
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;
        if claimed {
            self.record_fill_event(plan_id, index, "claimed", None, None).await?;
        }
        Ok(claimed)
    }

    /// Record the signed transaction before it is broadcast, so a restart can reconcile it.
    pub async fn mark_submitted(
        &self,
        plan_id: &str,
        index: u32,
        tx_hash: B256,
        raw_tx: &[u8],
        quoted_out: U256,
        submitted_at: u64,
    ) -> Result<(), AppError> {
        let hash = format!("{tx_hash:#x}");
        let updated = sqlx::query(
            r#"
            UPDATE tranches
            SET status = 'submitted',
                tx_hash = ?,
                raw_tx = ?,
                quoted_out = ?,
                submitted_at = ?,
                last_error = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE plan_id = ? AND idx = ? AND status = 'claimed'
            "#,
        )
        .bind(&hash)
        .bind(hex::encode(raw_tx))
        .bind(quoted_out.to_string())
        .bind(to_i64("submitted_at", submitted_at)?)
        .bind(plan_id)
        .bind(i64::from(index))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Transaction {
            hash: hash.clone(),
            reason: e.to_string(),
        })?
        .rows_affected();
        if updated != 1 {
            return Err(AppError::Database(format!(
                "tranche {plan_id}/{index} is not claimed; refusing to record {hash}"
            )));
        }
        self.record_fill_event(plan_id, index, "submitted", None, Some(&hash))
            .await
    }

    pub async fn mark_filled(
        &self,
        plan_id: &str,
        index: u32,
        amount_out: U256,
        block_number: Option<u64>,
    ) -> Result<bool, AppError> {
        let block = block_number.map(|b| to_i64("block_number", b)).transpose()?;
        let updated = sqlx::query(
            r#"
            UPDATE tranches
            SET status = 'filled',
                amount_out = ?,
                block_number = ?,
                raw_tx = NULL,
                last_error = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE plan_id = ? AND idx = ? AND status = 'submitted'
            "#,
        )
        .bind(amount_out.to_string())
        .bind(block)
        .bind(plan_id)
        .bind(i64::from(index))
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;
        if updated {
            self.record_fill_event(plan_id, index, "filled", Some(&amount_out.to_string()), None)
                .await?;
        }
        Ok(updated)
    }

    /// Fail an in-flight tranche. Retryable failures go back to `pending` until
    /// `max_attempts` claims have been spent. Returns the resulting status.
    pub async fn mark_failed(
        &self,
        plan_id: &str,
        index: u32,
        reason: &str,
        retryable: bool,
        max_attempts: u32,
    ) -> Result<Option<TrancheStatus>, AppError> {
        let previous_hash: Option<Option<String>> = sqlx::query_scalar(
            "SELECT tx_hash FROM tranches WHERE plan_id = ? AND idx = ?",
        )
        .bind(plan_id)
        .bind(i64::from(index))
        .fetch_optional(&self.pool)
        .await?;

        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE tranches
            SET status = CASE WHEN ? AND attempts < ? THEN 'pending' ELSE 'failed' END,
                tx_hash = CASE WHEN ? AND attempts < ? THEN NULL ELSE tx_hash END,
                raw_tx = NULL,
                submitted_at = CASE WHEN ? AND attempts < ? THEN NULL ELSE submitted_at END,
                last_error = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE plan_id = ? AND idx = ? AND status IN ('claimed', 'submitted')
            RETURNING status
            "#,
        )
        .bind(retryable)
        .bind(i64::from(max_attempts))
        .bind(retryable)
        .bind(i64::from(max_attempts))
        .bind(retryable)
        .bind(i64::from(max_attempts))
        .bind(reason)
        .bind(plan_id)
        .bind(i64::from(index))
        .fetch_optional(&self.pool)
        .await?;

        let Some(status) = status else {
            return Ok(None);
        };
        let status = TrancheStatus::from_str(&status)?;
        let event = if status == TrancheStatus::Pending {
            "retry"
        } else {
            "failed"
        };
        self.record_fill_event(plan_id, index, event, Some(reason), previous_hash.flatten().as_deref())
            .await?;
        Ok(Some(status))
    }

    /// Leave a pending tranche pending but remember why it was not executed.
    pub async fn note_deferral(&self, plan_id: &str, index: u32, reason: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE tranches
            SET last_error = ?, updated_at = CURRENT_TIMESTAMP
            WHERE plan_id = ? AND idx = ? AND status = 'pending'
            "#,
        )
        .bind(reason)
        .bind(plan_id)
        .bind(i64::from(index))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_expired(&self, plan_id: &str, index: u32) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE tranches
            SET status = 'expired', updated_at = CURRENT_TIMESTAMP
            WHERE plan_id = ? AND idx = ? AND status = 'pending'
            "#,
        )
        .bind(plan_id)
        .bind(i64::from(index))
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;
        if updated {
            self.record_fill_event(plan_id, index, "expired", None, None).await?;
        }
        Ok(updated)
    }

    /// Cancel every tranche that has not been handed to the chain yet.
    /// Submitted tranches keep reconciling. Returns the number of cancelled tranches.
    pub async fn cancel_plan(&self, plan_id: &str) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        let cancelled = sqlx::query(
            r#"
            UPDATE tranches
            SET status = 'cancelled', updated_at = CURRENT_TIMESTAMP
            WHERE plan_id = ? AND status IN ('pending', 'claimed')
            "#,
        )
        .bind(plan_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query("UPDATE twap_plans SET status = 'cancelled' WHERE id = ? AND status = 'active'")
            .bind(plan_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO fill_events (plan_id, idx, event, detail) VALUES (?, -1, 'plan_cancelled', ?)",
        )
        .bind(plan_id)
        .bind(cancelled.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(cancelled)
    }

    /// Claims left behind by a crash never reached the chain; hand them back to the scheduler.
    pub async fn release_stale_claims(&self) -> Result<u64, AppError> {
        let released = sqlx::query(
            r#"
            UPDATE tranches
            SET status = 'pending',
                attempts = CASE WHEN attempts > 0 THEN attempts - 1 ELSE 0 END,
                updated_at = CURRENT_TIMESTAMP
            WHERE status = 'claimed'
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        if released > 0 {
            tracing::warn!(target: "db", released, "Released stale tranche claims");
        }
        Ok(released)
    }

    /// Mark an active plan completed once none of its tranches can still change.
    pub async fn finalize_plan_if_done(&self, plan_id: &str) -> Result<bool, AppError> {
        let done = sqlx::query(
            r#"
            UPDATE twap_plans
            SET status = 'completed'
            WHERE id = ?
              AND status = 'active'
              AND NOT EXISTS (
                  SELECT 1 FROM tranches
                  WHERE plan_id = ? AND status IN ('pending', 'claimed', 'submitted')
              )
            "#,
        )
        .bind(plan_id)
        .bind(plan_id)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;
        Ok(done)
    }

    pub async fn record_fill_event(
        &self,
        plan_id: &str,
        index: u32,
        event: &str,
        detail: Option<&str>,
        tx_hash: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO fill_events (plan_id, idx, event, detail, tx_hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(plan_id)
        .bind(i64::from(index))
        .bind(event)
        .bind(detail)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fill_events(&self, plan_id: &str) -> Result<Vec<FillEventRecord>, AppError> {
        let recs = sqlx::query_as::<_, FillEventRecord>(
            "SELECT * FROM fill_events WHERE plan_id = ? ORDER BY id",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(recs)
    }
}
