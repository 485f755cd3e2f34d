// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed instance registry.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{
    INSTANCE_COLUMNS, Instance, InstanceRegistry, InstanceRow, InstanceStatus, LeaseDuration,
    NewInstance, StatusCounts, generate_instance_id, map_insert_error, rows_to_instances,
    transition_rejected,
};
use crate::error::{Error, Result};

/// PostgreSQL-backed registry scoped to one server identity.
#[derive(Clone)]
pub struct PostgresRegistry {
    pool: PgPool,
    server_name: String,
}

impl PostgresRegistry {
    /// Create a registry over an existing, migrated pool.
    pub fn new(pool: PgPool, server_name: impl Into<String>) -> Self {
        Self {
            pool,
            server_name: server_name.into(),
        }
    }

    /// Connect to `url`, run migrations, and return a registry.
    pub async fn connect(url: &str, server_name: impl Into<String>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;

        crate::migrations::run_postgres(&pool).await?;

        Ok(Self::new(pool, server_name))
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn approve_from(
        &self,
        instance_id: &str,
        from: InstanceStatus,
        duration: LeaseDuration,
        port: u16,
    ) -> Result<Instance> {
        let now = Utc::now();
        let query = format!(
            r#"
            UPDATE bot_instances
            SET status = 'approved',
                duration_months = $1,
                approved_at = $2,
                expires_at = $3,
                port = $4,
                updated_at = $2
            WHERE id = $5 AND server_name = $6 AND status = $7
            RETURNING {}
            "#,
            INSTANCE_COLUMNS
        );

        let row: Option<InstanceRow> = sqlx::query_as(&query)
            .bind(duration.months() as i32)
            .bind(now)
            .bind(duration.expires_at(now))
            .bind(i32::from(port))
            .bind(instance_id)
            .bind(&self.server_name)
            .bind(from.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(transition_rejected(self, instance_id, from).await),
        }
    }
}

#[async_trait]
impl InstanceRegistry for PostgresRegistry {
    fn server_identity(&self) -> &str {
        &self.server_name
    }

    async fn create(&self, request: &NewInstance) -> Result<Instance> {
        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM bot_instances WHERE phone_number = $1 AND server_name = $2",
        )
        .bind(&request.phone_number)
        .bind(&self.server_name)
        .fetch_optional(&self.pool)
        .await?;

        if existing.is_some() {
            return Err(Error::Conflict(format!(
                "Phone number '{}' already registered on this server",
                request.phone_number
            )));
        }

        let now = Utc::now();
        let query = format!(
            r#"
            INSERT INTO bot_instances
                (id, name, phone_number, status, server_name, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, 'new', $4, $5, $6, $6)
            RETURNING {}
            "#,
            INSTANCE_COLUMNS
        );

        let row: InstanceRow = sqlx::query_as(&query)
            .bind(generate_instance_id())
            .bind(&request.name)
            .bind(&request.phone_number)
            .bind(&self.server_name)
            .bind(&request.owner_id)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, &request.phone_number))?;

        row.try_into()
    }

    async fn get(&self, instance_id: &str) -> Result<Instance> {
        let query = format!(
            "SELECT {} FROM bot_instances WHERE id = $1 AND server_name = $2",
            INSTANCE_COLUMNS
        );

        let row: Option<InstanceRow> = sqlx::query_as(&query)
            .bind(instance_id)
            .bind(&self.server_name)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::NotFound(instance_id.to_string()))?
            .try_into()
    }

    async fn list(&self, status: Option<InstanceStatus>) -> Result<Vec<Instance>> {
        let query = format!(
            r#"
            SELECT {}
            FROM bot_instances
            WHERE server_name = $1 AND ($2::VARCHAR IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#,
            INSTANCE_COLUMNS
        );

        let rows: Vec<InstanceRow> = sqlx::query_as(&query)
            .bind(&self.server_name)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;

        rows_to_instances(rows)
    }

    async fn transition_to_approved(
        &self,
        instance_id: &str,
        duration: LeaseDuration,
        port: u16,
    ) -> Result<Instance> {
        self.approve_from(instance_id, InstanceStatus::New, duration, port)
            .await
    }

    async fn transition_to_approved_from_expired(
        &self,
        instance_id: &str,
        duration: LeaseDuration,
        port: u16,
    ) -> Result<Instance> {
        self.approve_from(instance_id, InstanceStatus::Expired, duration, port)
            .await
    }

    async fn transition_to_expired_bulk(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE bot_instances
            SET status = 'expired', updated_at = $1
            WHERE status = 'approved'
              AND expires_at <= $1
              AND server_name = $2
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(&self.server_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM bot_instances WHERE id = $1 AND server_name = $2 AND status = 'approved'",
        )
        .bind(instance_id)
        .bind(&self.server_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(transition_rejected(self, instance_id, InstanceStatus::Approved).await);
        }

        Ok(())
    }

    async fn record_process_reference(&self, instance_id: &str, pid: Option<u32>) -> Result<()> {
        sqlx::query(
            "UPDATE bot_instances SET pid = $1, updated_at = $2 WHERE id = $3 AND server_name = $4",
        )
        .bind(pid.and_then(|p| i32::try_from(p).ok()))
        .bind(Utc::now())
        .bind(instance_id)
        .bind(&self.server_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_process_references(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE bot_instances
            SET pid = NULL, updated_at = $1
            WHERE server_name = $2 AND pid IS NOT NULL
            "#,
        )
        .bind(Utc::now())
        .bind(&self.server_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM bot_instances WHERE server_name = $1 GROUP BY status",
        )
        .bind(&self.server_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(StatusCounts::from_grouped(rows))
    }

    async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}
