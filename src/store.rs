use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

use crate::models::{
    CheckRun, CheckRunOutcome, EventType, Notification, PriceSnapshot, TrackedItem,
};
use crate::utils::error::Result;

/// The single source of shared state. All cross-run coordination (budget
/// aggregation, notification claims, change detection) goes through here;
/// nothing is held in memory between checks.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // SQLite permits limited write concurrency; a single connection
        // avoids "database is locked" failures under sweep concurrency
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS tracked_items (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                canonical_url TEXT NOT NULL,
                site_host TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )",
            // At most one active item per canonical URL; retired rows stay
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_items_active_canonical
                ON tracked_items(canonical_url) WHERE active = 1",
            "CREATE TABLE IF NOT EXISTS price_snapshots (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL REFERENCES tracked_items(id),
                checked_at TEXT NOT NULL,
                product_name TEXT NOT NULL,
                price_cents INTEGER,
                in_stock INTEGER,
                stock_state TEXT NOT NULL,
                extraction_method TEXT NOT NULL,
                confidence REAL NOT NULL,
                evidence_json TEXT NOT NULL,
                content_hash TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_snapshots_item_checked
                ON price_snapshots(item_id, checked_at DESC)",
            "CREATE TABLE IF NOT EXISTS check_runs (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL REFERENCES tracked_items(id),
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT NOT NULL,
                error_code TEXT,
                error_message TEXT,
                used_playwright INTEGER NOT NULL DEFAULT 0,
                used_ai INTEGER NOT NULL DEFAULT 0,
                token_input INTEGER,
                token_output INTEGER,
                estimated_cost_usd REAL
            )",
            "CREATE INDEX IF NOT EXISTS idx_runs_item_started
                ON check_runs(item_id, started_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_runs_started_ai
                ON check_runs(started_at, used_ai)",
            "CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL REFERENCES tracked_items(id),
                snapshot_id TEXT NOT NULL REFERENCES price_snapshots(id),
                event_type TEXT NOT NULL,
                webhook_status INTEGER,
                webhook_response TEXT,
                created_at TEXT NOT NULL,
                sent_at TEXT,
                UNIQUE(item_id, snapshot_id, event_type)
            )",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ---- tracked items ----

    pub async fn insert_item(&self, item: &TrackedItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO tracked_items (id, url, canonical_url, site_host, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(&item.url)
        .bind(&item.canonical_url)
        .bind(&item.site_host)
        .bind(item.active)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_active_by_canonical_url(&self, url: &str) -> Result<Option<TrackedItem>> {
        let item = sqlx::query_as::<_, TrackedItem>(
            "SELECT * FROM tracked_items WHERE canonical_url = ? AND active = 1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn get_item(&self, id: &str) -> Result<Option<TrackedItem>> {
        let item = sqlx::query_as::<_, TrackedItem>("SELECT * FROM tracked_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    pub async fn get_active_item(&self, id: &str) -> Result<Option<TrackedItem>> {
        let item = sqlx::query_as::<_, TrackedItem>(
            "SELECT * FROM tracked_items WHERE id = ? AND active = 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn list_active_items(&self, limit: i64) -> Result<Vec<TrackedItem>> {
        let items = sqlx::query_as::<_, TrackedItem>(
            "SELECT * FROM tracked_items WHERE active = 1 ORDER BY created_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Soft delete. Returns false when no active row matched.
    pub async fn deactivate_item(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE tracked_items SET active = 0 WHERE id = ? AND active = 1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- price snapshots ----

    pub async fn insert_snapshot(&self, snapshot: &PriceSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO price_snapshots
                (id, item_id, checked_at, product_name, price_cents, in_stock,
                 stock_state, extraction_method, confidence, evidence_json, content_hash)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.item_id)
        .bind(snapshot.checked_at)
        .bind(&snapshot.product_name)
        .bind(snapshot.price_cents)
        .bind(snapshot.in_stock)
        .bind(snapshot.stock_state)
        .bind(snapshot.extraction_method)
        .bind(snapshot.confidence)
        .bind(&snapshot.evidence_json)
        .bind(&snapshot.content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_snapshot(&self, item_id: &str) -> Result<Option<PriceSnapshot>> {
        let snapshot = sqlx::query_as::<_, PriceSnapshot>(
            "SELECT * FROM price_snapshots WHERE item_id = ?
             ORDER BY checked_at DESC LIMIT 1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(snapshot)
    }

    pub async fn snapshots_for_item(&self, item_id: &str, limit: i64) -> Result<Vec<PriceSnapshot>> {
        let snapshots = sqlx::query_as::<_, PriceSnapshot>(
            "SELECT * FROM price_snapshots WHERE item_id = ?
             ORDER BY checked_at DESC LIMIT ?",
        )
        .bind(item_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(snapshots)
    }

    /// Latest snapshots from other active items on the same host, used as
    /// extraction hints for the model fallback.
    pub async fn recent_host_snapshots(
        &self,
        site_host: &str,
        exclude_item_id: &str,
        limit: i64,
    ) -> Result<Vec<PriceSnapshot>> {
        let snapshots = sqlx::query_as::<_, PriceSnapshot>(
            "SELECT s.* FROM price_snapshots s
             JOIN tracked_items i ON i.id = s.item_id
             WHERE i.site_host = ? AND i.active = 1 AND i.id != ?
             ORDER BY s.checked_at DESC LIMIT ?",
        )
        .bind(site_host)
        .bind(exclude_item_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(snapshots)
    }

    // ---- check runs ----

    pub async fn insert_check_run(&self, run: &CheckRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO check_runs
                (id, item_id, started_at, finished_at, status, error_code, error_message,
                 used_playwright, used_ai, token_input, token_output, estimated_cost_usd)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.item_id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.status)
        .bind(&run.error_code)
        .bind(&run.error_message)
        .bind(run.used_playwright)
        .bind(run.used_ai)
        .bind(run.token_input)
        .bind(run.token_output)
        .bind(run.estimated_cost_usd)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finalize_check_run(
        &self,
        run_id: &str,
        outcome: &CheckRunOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE check_runs SET
                finished_at = ?, status = ?, error_code = ?, error_message = ?,
                used_playwright = ?, used_ai = ?, token_input = ?, token_output = ?,
                estimated_cost_usd = ?
             WHERE id = ?",
        )
        .bind(finished_at)
        .bind(outcome.status)
        .bind(&outcome.error_code)
        .bind(&outcome.error_message)
        .bind(outcome.used_playwright)
        .bind(outcome.used_ai)
        .bind(outcome.token_input)
        .bind(outcome.token_output)
        .bind(outcome.estimated_cost_usd)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_check_run(&self, run_id: &str) -> Result<Option<CheckRun>> {
        let run = sqlx::query_as::<_, CheckRun>("SELECT * FROM check_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    pub async fn runs_for_item(&self, item_id: &str, limit: i64) -> Result<Vec<CheckRun>> {
        let runs = sqlx::query_as::<_, CheckRun>(
            "SELECT * FROM check_runs WHERE item_id = ?
             ORDER BY started_at DESC LIMIT ?",
        )
        .bind(item_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    /// Aggregate model spend since `since` across runs that entered the AI
    /// path. Read-time aggregation keeps the budget crash-safe.
    pub async fn ai_spend_since(&self, since: DateTime<Utc>) -> Result<f64> {
        let total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(estimated_cost_usd), 0.0) FROM check_runs
             WHERE started_at >= ? AND used_ai = 1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    // ---- notifications ----

    /// Claim an event by inserting its row. Returns false when another run
    /// already holds the `(item_id, snapshot_id, event_type)` key.
    pub async fn claim_notification(&self, notification: &Notification) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO notifications
                (id, item_id, snapshot_id, event_type, webhook_status, webhook_response,
                 created_at, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&notification.id)
        .bind(&notification.item_id)
        .bind(&notification.snapshot_id)
        .bind(notification.event_type)
        .bind(notification.webhook_status)
        .bind(&notification.webhook_response)
        .bind(notification.created_at)
        .bind(notification.sent_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let app_err = crate::utils::error::AppError::Database(e);
                if app_err.is_unique_violation() {
                    Ok(false)
                } else {
                    Err(app_err)
                }
            }
        }
    }

    pub async fn record_notification_outcome(
        &self,
        notification_id: &str,
        webhook_status: i64,
        webhook_response: &str,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE notifications SET webhook_status = ?, webhook_response = ?, sent_at = ?
             WHERE id = ?",
        )
        .bind(webhook_status)
        .bind(webhook_response)
        .bind(sent_at)
        .bind(notification_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn notifications_for_item(
        &self,
        item_id: &str,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE item_id = ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(item_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }

    /// Claim time of the most recent event of the given type for an item.
    pub async fn latest_event_time(
        &self,
        item_id: &str,
        event_type: EventType,
    ) -> Result<Option<DateTime<Utc>>> {
        let time: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT created_at FROM notifications
             WHERE item_id = ? AND event_type = ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(item_id)
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(time)
    }
}
