use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanhub_core::error::{CoordinatorError, Result};
use scanhub_core::pagination::Cursor;
use scanhub_core::scan::{Scan, ScanStatus};
use scanhub_core::store::{DispatchedScan, ListFilters, Page, Pagination, ScanStore};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_scan(row: &sqlx::postgres::PgRow) -> sqlx::Result<Scan> {
    Ok(Scan {
        scan_id: row.try_get("scan_id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        status: row.try_get("status")?,
        score: row.try_get("score")?,
        inspector_url: row.try_get("inspector_url")?,
        commit_hash: row.try_get("commit_hash")?,
        files: row.try_get("files")?,
        fail_reason: row.try_get("fail_reason")?,
        queued_at: row.try_get("queued_at")?,
        queued_by: row.try_get("queued_by")?,
        pending_at: row.try_get("pending_at")?,
        pending_by: row.try_get("pending_by")?,
        finished_at: row.try_get("finished_at")?,
        finished_by: row.try_get("finished_by")?,
        reported_at: row.try_get("reported_at")?,
        reported_by: row.try_get("reported_by")?,
        download_urls: Vec::new(),
        matched_rules: Vec::new(),
    })
}

const SCAN_COLUMNS: &str = "scan_id, name, version, status, score, inspector_url, commit_hash, \
    files, fail_reason, queued_at, queued_by, pending_at, pending_by, finished_at, finished_by, \
    reported_at, reported_by";

#[async_trait]
impl ScanStore for PgScanStore {
    async fn insert_scan(
        &self,
        name: &str,
        version: &str,
        urls: &[String],
        actor: &str,
    ) -> Result<Uuid> {
        let scan_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO scans (scan_id, name, version, status, queued_at, queued_by)
            VALUES ($1, $2, $3, 'queued', now(), $4)
            ON CONFLICT (name, version) DO NOTHING
            "#,
        )
        .bind(scan_id)
        .bind(name)
        .bind(version)
        .bind(actor)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(CoordinatorError::DuplicateScan);
        }

        for url in urls {
            sqlx::query("INSERT INTO download_urls (scan_id, url) VALUES ($1, $2)")
                .bind(scan_id)
                .bind(url)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(scan_id)
    }

    async fn claim_next(
        &self,
        actor: &str,
        now: DateTime<Utc>,
        lease_expiry_cutoff: DateTime<Utc>,
        ruleset_commit_hash: &str,
        ruleset_rule_names: &[String],
    ) -> Result<Option<DispatchedScan>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            WITH candidate AS (
                SELECT scan_id, status AS prior_status
                FROM scans
                WHERE status = 'queued'
                   OR (status = 'pending' AND pending_at < $1)
                ORDER BY
                    (status = 'pending')::int,
                    CASE WHEN status = 'queued' THEN queued_at ELSE pending_at END,
                    scan_id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE scans AS s
            SET status = 'pending',
                pending_at = $2,
                pending_by = $3,
                commit_hash = $4
            FROM candidate
            WHERE s.scan_id = candidate.scan_id
            RETURNING s.scan_id, s.name, s.version, candidate.prior_status
            "#,
        )
        .bind(lease_expiry_cutoff)
        .bind(now)
        .bind(actor)
        .bind(ruleset_commit_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let scan_id: Uuid = row.try_get("scan_id")?;
        let name: String = row.try_get("name")?;
        let version: String = row.try_get("version")?;
        let prior_status: ScanStatus = row.try_get("prior_status")?;
        let was_reclaimed = prior_status == ScanStatus::Pending;

        let url_rows = sqlx::query("SELECT url FROM download_urls WHERE scan_id = $1")
            .bind(scan_id)
            .fetch_all(&mut *tx)
            .await?;
        let download_urls = url_rows
            .into_iter()
            .map(|r| r.try_get::<String, _>("url"))
            .collect::<sqlx::Result<Vec<_>>>()?;

        tx.commit().await?;

        Ok(Some(DispatchedScan {
            scan_id,
            name,
            version,
            download_urls,
            commit_hash: ruleset_commit_hash.to_string(),
            rule_names: ruleset_rule_names.to_vec(),
            was_reclaimed,
        }))
    }

    async fn submit(
        &self,
        scan_id: Uuid,
        actor: &str,
        score: i64,
        inspector_url: &str,
        matched_rule_names: &[String],
        files: Value,
    ) -> Result<Scan> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status, pending_by FROM scans WHERE scan_id = $1 FOR UPDATE")
            .bind(scan_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CoordinatorError::NotFound)?;

        let status: ScanStatus = row.try_get("status")?;
        let pending_by: Option<String> = row.try_get("pending_by")?;

        if status != ScanStatus::Pending {
            return Err(CoordinatorError::WrongState);
        }
        if pending_by.as_deref() != Some(actor) {
            return Err(CoordinatorError::NotOwned);
        }

        let mut rule_ids = Vec::with_capacity(matched_rule_names.len());
        for rule_name in matched_rule_names {
            let rule_row = sqlx::query("SELECT id FROM rules WHERE name = $1")
                .bind(rule_name)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| CoordinatorError::UnknownRule(rule_name.clone()))?;
            rule_ids.push(rule_row.try_get::<i64, _>("id")?);
        }

        sqlx::query(
            r#"
            UPDATE scans
            SET status = 'finished',
                finished_at = now(),
                finished_by = $2,
                score = $3,
                inspector_url = $4,
                files = $5
            WHERE scan_id = $1
            "#,
        )
        .bind(scan_id)
        .bind(actor)
        .bind(score)
        .bind(inspector_url)
        .bind(files)
        .execute(&mut *tx)
        .await?;

        for rule_id in rule_ids {
            sqlx::query(
                "INSERT INTO package_rules (scan_id, rule_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(scan_id)
            .bind(rule_id)
            .execute(&mut *tx)
            .await?;
        }

        let scan = fetch_scan_tx(&mut tx, scan_id).await?;
        tx.commit().await?;
        Ok(scan)
    }

    async fn fail(&self, scan_id: Uuid, actor: &str, reason: &str) -> Result<Scan> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status, pending_by FROM scans WHERE scan_id = $1 FOR UPDATE")
            .bind(scan_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CoordinatorError::NotFound)?;

        let status: ScanStatus = row.try_get("status")?;
        let pending_by: Option<String> = row.try_get("pending_by")?;

        if status != ScanStatus::Pending {
            return Err(CoordinatorError::WrongState);
        }
        if pending_by.as_deref() != Some(actor) {
            return Err(CoordinatorError::NotOwned);
        }

        sqlx::query(
            r#"
            UPDATE scans
            SET status = 'failed',
                finished_at = now(),
                finished_by = $2,
                fail_reason = $3
            WHERE scan_id = $1
            "#,
        )
        .bind(scan_id)
        .bind(actor)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        let scan = fetch_scan_tx(&mut tx, scan_id).await?;
        tx.commit().await?;
        Ok(scan)
    }

    async fn mark_reported(&self, scan_id: Uuid, actor: &str, now: DateTime<Utc>) -> Result<Scan> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status, reported_at FROM scans WHERE scan_id = $1 FOR UPDATE")
            .bind(scan_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CoordinatorError::NotFound)?;

        let status: ScanStatus = row.try_get("status")?;
        let reported_at: Option<DateTime<Utc>> = row.try_get("reported_at")?;

        if status != ScanStatus::Finished {
            return Err(CoordinatorError::WrongState);
        }
        if reported_at.is_some() {
            return Err(CoordinatorError::AlreadyReported);
        }

        let updated = sqlx::query(
            r#"
            UPDATE scans
            SET reported_at = $2, reported_by = $3
            WHERE scan_id = $1 AND reported_at IS NULL
            "#,
        )
        .bind(scan_id)
        .bind(now)
        .bind(actor)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(CoordinatorError::AlreadyReported);
        }

        let scan = fetch_scan_tx(&mut tx, scan_id).await?;
        tx.commit().await?;
        Ok(scan)
    }

    async fn clear_reported(&self, scan_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE scans SET reported_at = NULL, reported_by = NULL WHERE scan_id = $1")
            .bind(scan_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_by_name_version(&self, name: &str, version: &str) -> Result<Option<Scan>> {
        let row = sqlx::query(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans WHERE name = $1 AND version = $2"
        ))
        .bind(name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.with_associations(row_to_scan(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn get(&self, scan_id: Uuid) -> Result<Option<Scan>> {
        let row = sqlx::query(&format!("SELECT {SCAN_COLUMNS} FROM scans WHERE scan_id = $1"))
            .bind(scan_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.with_associations(row_to_scan(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filters: ListFilters, pagination: Pagination) -> Result<Page<Scan>> {
        let mut sql = format!("SELECT {SCAN_COLUMNS} FROM scans WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(status) = filters.status {
            binds.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ${}::scan_status", binds.len()));
        }
        if let Some(name) = &filters.name {
            binds.push(name.clone());
            sql.push_str(&format!(" AND name = ${}", binds.len()));
        }
        if let Some(version) = &filters.version {
            binds.push(version.clone());
            sql.push_str(&format!(" AND version = ${}", binds.len()));
        }

        if let Some(since) = filters.since {
            binds.push(since.to_rfc3339());
            sql.push_str(&format!(" AND finished_at >= ${}::timestamptz", binds.len()));
        }
        if let Some(until) = filters.until {
            binds.push(until.to_rfc3339());
            sql.push_str(&format!(" AND finished_at <= ${}::timestamptz", binds.len()));
        }

        // Queue introspection (QUEUED/PENDING) orders by queued_at ASC; everything
        // else (finished/failed, or an unfiltered mix) orders by finished_at DESC
        // (spec §4.7). Each branch paginates on its own ordering column.
        let queue_introspection = matches!(
            filters.status,
            Some(ScanStatus::Queued) | Some(ScanStatus::Pending)
        );

        if let Some(cursor) = pagination.cursor {
            binds.push(cursor.sort_key.to_rfc3339());
            let key_idx = binds.len();
            binds.push(cursor.scan_id.to_string());
            let id_idx = binds.len();
            if queue_introspection {
                sql.push_str(&format!(
                    " AND (queued_at, scan_id) > (${key_idx}::timestamptz, ${id_idx}::uuid)"
                ));
            } else {
                sql.push_str(&format!(
                    " AND (finished_at, scan_id) < (${key_idx}::timestamptz, ${id_idx}::uuid)"
                ));
            }
        }

        if queue_introspection {
            sql.push_str(" ORDER BY queued_at ASC, scan_id ASC");
        } else {
            sql.push_str(" ORDER BY finished_at DESC NULLS LAST, scan_id DESC");
        }
        let limit = pagination.limit.max(1) as i64 + 1;
        sql.push_str(&format!(" LIMIT {limit}"));

        let mut query = sqlx::query(&sql);
        for b in &binds {
            query = query.bind(b);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut scans = Vec::with_capacity(rows.len());
        for row in &rows {
            scans.push(self.with_associations(row_to_scan(row)?).await?);
        }

        let next_cursor = if scans.len() > pagination.limit as usize {
            scans.truncate(pagination.limit as usize);
            scans.last().and_then(|s| {
                let sort_key = if queue_introspection {
                    Some(s.queued_at)
                } else {
                    s.finished_at
                };
                sort_key.map(|sort_key| Cursor {
                    sort_key,
                    scan_id: s.scan_id,
                })
            })
        } else {
            None
        };

        Ok(Page {
            items: scans,
            next_cursor,
        })
    }

    async fn reconcile_rules(&self, rule_names: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for name in rule_names {
            sqlx::query("INSERT INTO rules (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            DELETE FROM rules
            WHERE NOT (name = ANY($1))
              AND id NOT IN (SELECT DISTINCT rule_id FROM package_rules)
            "#,
        )
        .bind(rule_names)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

impl PgScanStore {
    async fn with_associations(&self, mut scan: Scan) -> Result<Scan> {
        let url_rows = sqlx::query("SELECT url FROM download_urls WHERE scan_id = $1")
            .bind(scan.scan_id)
            .fetch_all(&self.pool)
            .await?;
        scan.download_urls = url_rows
            .into_iter()
            .map(|r| r.try_get::<String, _>("url"))
            .collect::<sqlx::Result<Vec<_>>>()?;

        let rule_rows = sqlx::query(
            "SELECT r.name FROM package_rules pr JOIN rules r ON r.id = pr.rule_id \
             WHERE pr.scan_id = $1",
        )
        .bind(scan.scan_id)
        .fetch_all(&self.pool)
        .await?;
        scan.matched_rules = rule_rows
            .into_iter()
            .map(|r| r.try_get::<String, _>("name"))
            .collect::<sqlx::Result<Vec<_>>>()?;

        Ok(scan)
    }
}

async fn fetch_scan_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    scan_id: Uuid,
) -> Result<Scan> {
    let row = sqlx::query(&format!("SELECT {SCAN_COLUMNS} FROM scans WHERE scan_id = $1"))
        .bind(scan_id)
        .fetch_one(&mut **tx)
        .await?;
    let mut scan = row_to_scan(&row)?;

    let url_rows = sqlx::query("SELECT url FROM download_urls WHERE scan_id = $1")
        .bind(scan_id)
        .fetch_all(&mut **tx)
        .await?;
    scan.download_urls = url_rows
        .into_iter()
        .map(|r| r.try_get::<String, _>("url"))
        .collect::<sqlx::Result<Vec<_>>>()?;

    let rule_rows = sqlx::query(
        "SELECT r.name FROM package_rules pr JOIN rules r ON r.id = pr.rule_id \
         WHERE pr.scan_id = $1",
    )
    .bind(scan_id)
    .fetch_all(&mut **tx)
    .await?;
    scan.matched_rules = rule_rows
        .into_iter()
        .map(|r| r.try_get::<String, _>("name"))
        .collect::<sqlx::Result<Vec<_>>>()?;

    Ok(scan)
}
