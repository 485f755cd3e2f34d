// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for wabot-engine.

use thiserror::Error;

/// Engine errors.
///
/// `NotFound`, `Conflict`, `InvalidState` and `InvalidInput` are validation
/// failures reported straight to the caller. `StoreUnavailable` wraps any
/// store I/O failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Store operation failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown instance id, or an id owned by another server.
    #[error("Instance not found: {0}")]
    NotFound(String),

    /// Duplicate phone number on this server.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The instance's status does not permit the requested transition.
    #[error("Instance '{instance_id}' is {actual}, expected {expected}")]
    InvalidState {
        /// The instance ID.
        instance_id: String,
        /// The status the transition requires.
        expected: String,
        /// The status the instance actually has.
        actual: String,
    },

    /// Request validation failed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The worker process could not be spawned.
    #[error("Failed to start worker: {0}")]
    ProcessStart(#[from] crate::runner::RunnerError),

    /// A control command could not reach the worker.
    #[error("Failed to communicate with worker: {0}")]
    UpstreamUnreachable(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an [`Error::InvalidState`].
    pub fn invalid_state(
        instance_id: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Error::InvalidState {
            instance_id: instance_id.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type using the engine Error.
pub type Result<T> = std::result::Result<T, Error>;
