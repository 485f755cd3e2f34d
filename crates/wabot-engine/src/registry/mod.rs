// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance Registry
//!
//! Durable store of instance records, the single source of truth for what
//! exists. Every registry is bound to one server identity at construction and
//! never reads or writes rows owned by another server.
//!
//! Status transitions are conditional updates (`... WHERE status = 'new'`), so
//! two concurrent callers racing on the same instance resolve to exactly one
//! winner; the loser observes [`Error::InvalidState`].

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresRegistry;
pub use self::sqlite::SqliteRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Days credited per leased month. Not calendar-accurate.
pub const DAYS_PER_MONTH: i64 = 30;

/// Instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Created, awaiting approval. No port, no process, no expiry.
    New,
    /// Lease active; the worker is entitled to run.
    Approved,
    /// Lease lapsed; the worker is stopped until renewal.
    Expired,
}

impl InstanceStatus {
    /// Status string as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::New => "new",
            InstanceStatus::Approved => "approved",
            InstanceStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(InstanceStatus::New),
            "approved" => Ok(InstanceStatus::Approved),
            "expired" => Ok(InstanceStatus::Expired),
            _ => Err(Error::InvalidInput(format!("Unknown status: {}", s))),
        }
    }
}

/// A validated lease length in months.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseDuration(u32);

impl LeaseDuration {
    /// Accepted month counts.
    pub const ALLOWED_MONTHS: [u32; 5] = [1, 2, 3, 6, 12];

    /// Validate a month count.
    pub fn from_months(months: i64) -> Result<Self> {
        match u32::try_from(months) {
            Ok(m) if Self::ALLOWED_MONTHS.contains(&m) => Ok(Self(m)),
            _ => Err(Error::InvalidInput(
                "Duration must be 1, 2, 3, 6, or 12 months".to_string(),
            )),
        }
    }

    /// Month count.
    pub fn months(&self) -> u32 {
        self.0
    }

    /// Lease length as a chrono duration (30 days per month).
    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::days(DAYS_PER_MONTH * i64::from(self.0))
    }

    /// Expiry of a lease approved at `approved_at`.
    pub fn expires_at(&self, approved_at: DateTime<Utc>) -> DateTime<Utc> {
        approved_at + self.as_chrono()
    }
}

/// One worker lease.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instance {
    /// Opaque unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Phone number the worker pairs with.
    pub phone_number: String,
    /// Owning tenant, if any.
    pub owner_id: Option<String>,
    /// Server identity owning this record.
    pub server_name: String,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Control port; set on first start and kept across expire/renew.
    pub port: Option<u16>,
    /// Last known worker PID. Observability only, never authoritative.
    pub pid: Option<u32>,
    /// Months granted by the last approval or renewal.
    pub duration_months: Option<u32>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
    /// Start of the current lease.
    pub approved_at: Option<DateTime<Utc>>,
    /// End of the current lease.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Raw `bot_instances` row shared by both backends.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct InstanceRow {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    pub owner_id: Option<String>,
    pub server_name: String,
    pub status: String,
    pub port: Option<i32>,
    pub pid: Option<i32>,
    pub duration_months: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<InstanceRow> for Instance {
    type Error = Error;

    fn try_from(row: InstanceRow) -> Result<Self> {
        let status = row.status.parse().map_err(|_| {
            Error::Other(format!(
                "Instance '{}' has unrecognised status '{}'",
                row.id, row.status
            ))
        })?;

        Ok(Instance {
            status,
            port: row.port.and_then(|p| u16::try_from(p).ok()),
            pid: row.pid.and_then(|p| u32::try_from(p).ok()),
            duration_months: row.duration_months.and_then(|d| u32::try_from(d).ok()),
            id: row.id,
            name: row.name,
            phone_number: row.phone_number,
            owner_id: row.owner_id,
            server_name: row.server_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
            approved_at: row.approved_at,
            expires_at: row.expires_at,
        })
    }
}

pub(crate) fn rows_to_instances(rows: Vec<InstanceRow>) -> Result<Vec<Instance>> {
    rows.into_iter().map(Instance::try_from).collect()
}

/// Column list selected by every query returning a full row.
pub(crate) const INSTANCE_COLUMNS: &str = "id, name, phone_number, owner_id, server_name, status, \
     port, pid, duration_months, created_at, updated_at, approved_at, expires_at";

/// Data needed to create an instance.
#[derive(Debug, Clone, Deserialize)]
pub struct NewInstance {
    /// Display name.
    pub name: String,
    /// Phone number, unique per server.
    pub phone_number: String,
    /// Owning tenant, if any.
    #[serde(default)]
    pub owner_id: Option<String>,
}

impl NewInstance {
    /// Reject blank names and phone numbers.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("name is required".to_string()));
        }
        if self.phone_number.trim().is_empty() {
            return Err(Error::InvalidInput("phone_number is required".to_string()));
        }
        Ok(())
    }
}

/// Per-status record counts for one server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// All records.
    pub total: i64,
    /// Records in `new`.
    pub new: i64,
    /// Records in `approved`.
    pub approved: i64,
    /// Records in `expired`.
    pub expired: i64,
}

impl StatusCounts {
    pub(crate) fn from_grouped(rows: Vec<(String, i64)>) -> Self {
        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "new" => counts.new = count,
                "approved" => counts.approved = count,
                "expired" => counts.expired = count,
                _ => {}
            }
            counts.total += count;
        }
        counts
    }
}

/// Generate a short opaque instance id.
pub fn generate_instance_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Durable store of instance records for one server identity.
///
/// Implementations must make each transition a single conditional write so
/// concurrent callers cannot both succeed.
#[async_trait]
pub trait InstanceRegistry: Send + Sync {
    /// Server identity this registry is scoped to.
    fn server_identity(&self) -> &str;

    /// Insert a record in `new`. Fails with `Conflict` on a duplicate phone number.
    async fn create(&self, request: &NewInstance) -> Result<Instance>;

    /// Fetch a record. Fails with `NotFound` for unknown or foreign ids.
    async fn get(&self, instance_id: &str) -> Result<Instance>;

    /// List records, newest first, optionally filtered by status.
    async fn list(&self, status: Option<InstanceStatus>) -> Result<Vec<Instance>>;

    /// `new` → `approved`, stamping the lease and port.
    async fn transition_to_approved(
        &self,
        instance_id: &str,
        duration: LeaseDuration,
        port: u16,
    ) -> Result<Instance>;

    /// `expired` → `approved` (renewal), stamping a fresh lease.
    async fn transition_to_approved_from_expired(
        &self,
        instance_id: &str,
        duration: LeaseDuration,
        port: u16,
    ) -> Result<Instance>;

    /// Atomically flip every lapsed `approved` record to `expired`.
    ///
    /// Returns the ids that changed. A record is returned by at most one call.
    async fn transition_to_expired_bulk(&self) -> Result<Vec<String>>;

    /// Remove an `approved` record permanently.
    async fn delete(&self, instance_id: &str) -> Result<()>;

    /// Store or clear the observability PID. Best-effort for callers.
    async fn record_process_reference(&self, instance_id: &str, pid: Option<u32>) -> Result<()>;

    /// Clear every PID on this server. Returns the number of rows touched.
    async fn reset_process_references(&self) -> Result<u64>;

    /// Count records per status.
    async fn count_by_status(&self) -> Result<StatusCounts>;

    /// Whether the store answers a trivial query.
    async fn health_check(&self) -> bool;
}

/// Explain why a conditional transition touched no row.
///
/// Returns `NotFound` when the record is absent, otherwise `InvalidState`
/// carrying the status the record actually has.
pub(crate) async fn transition_rejected<R>(
    registry: &R,
    instance_id: &str,
    expected: InstanceStatus,
) -> Error
where
    R: InstanceRegistry + ?Sized,
{
    match registry.get(instance_id).await {
        Ok(instance) => Error::invalid_state(instance_id, expected, instance.status),
        Err(e) => e,
    }
}

/// Map a unique-index violation on insert to `Conflict`.
pub(crate) fn map_insert_error(err: sqlx::Error, phone_number: &str) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict(format!(
            "Phone number '{}' already registered on this server",
            phone_number
        )),
        _ => Error::StoreUnavailable(err),
    }
}
