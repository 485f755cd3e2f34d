// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wabot Engine - Bot Instance Lease Management
//!
//! Control plane for per-customer messaging-bot workers. Each instance is a
//! time-boxed lease: an operator approves it for a number of months, the
//! engine starts a dedicated worker process on its own control port, and a
//! background sweeper stops it again once the lease lapses.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Admin panel / HTTP clients                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                  │  /api
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    wabot-engine (This Crate)                        │
//! │                          Port 8001                                  │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌──────────────┐   │
//! │  │ Lifecycle  │  │  Process   │  │   Port     │  │  Expiration  │   │
//! │  │ Controller │─►│ Supervisor │  │ Allocator  │  │   Sweeper    │   │
//! │  └────────────┘  └────────────┘  └────────────┘  └──────────────┘   │
//! │        │               │ spawn                                      │
//! │        │ Status Proxy  ▼                                            │
//! │        └────────►  worker processes  (one per approved instance,    │
//! │    GET /status     listening on 127.0.0.1:<port>)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    PostgreSQL or SQLite                             │
//! │           (bot_instances, scoped by server identity)                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Instance Status State Machine
//!
//! ```text
//!   ┌─────┐  approve   ┌──────────┐  lease lapses  ┌─────────┐
//!   │ NEW │───────────►│ APPROVED │───────────────►│ EXPIRED │
//!   └─────┘            └──────────┘◄───────────────└─────────┘
//!                         │   ▲        renew
//!                  delete │   │ stop (worker only, lease kept)
//!                         ▼   │
//!                      (removed)
//! ```
//!
//! # HTTP API
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /api/health` | Store connectivity and server identity |
//! | `GET /api/server-info` | Instance counts per status |
//! | `POST /api/login` | Check the shared admin credential |
//! | `POST /api/instances` | Create an instance |
//! | `GET /api/instances?status=` | List instances |
//! | `GET /api/instances/{id}` | Instance with live worker state |
//! | `POST /api/instances/{id}/approve` | Start a lease |
//! | `POST /api/instances/{id}/renew` | Renew an expired lease |
//! | `POST /api/instances/{id}/stop` | Stop the worker, keep the lease |
//! | `DELETE /api/instances/{id}` | Remove an approved instance and its files |
//! | `GET /api/instances/{id}/pairing-code` | Current pairing code |
//! | `POST /api/instances/{id}/regenerate-code` | Ask the worker for a new code |
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `WABOT_DATABASE_URL` | Yes* | - | `postgres://...` or `sqlite:...` |
//! | `DATABASE_URL` | Yes* | - | Fallback if above not set |
//! | `SERVERNAME` | No | `server1` | Server identity |
//! | `ADMIN_USERNAME` / `ADMIN_PASSWORD` | No | `admin` / `admin123` | Admin credential |
//! | `WABOT_HTTP_PORT` | No | `8001` | HTTP port |
//! | `WABOT_BOT_DIR` | No | `bot` | Worker working directory |
//! | `WABOT_WORKER_PROGRAM` | No | `node` | Worker executable |
//! | `WABOT_WORKER_SCRIPT` | No | `instance.js` | Script argument (empty for none) |
//! | `WABOT_PORT_BASE` | No | `4000` | Port allocator seed |
//! | `WABOT_SWEEP_INTERVAL_SECS` | No | `60` | Sweeper interval |
//! | `WABOT_STOP_GRACE_SECS` | No | `5` | SIGTERM to SIGKILL grace |

#![deny(missing_docs)]

/// Embedded SQL migrations for both store backends.
pub mod migrations;

/// Server configuration loaded from environment variables.
pub mod config;

/// Error types for engine operations.
pub mod error;

/// Durable instance records.
pub mod registry;

/// Monotonic worker port allocation.
pub mod port_allocator;

/// Worker process execution backends.
pub mod runner;

/// Live worker process tracking.
pub mod supervisor;

/// Advisory live status from worker control endpoints.
pub mod status_proxy;

/// Instance state machine.
pub mod controller;

/// Background worker expiring lapsed leases.
pub mod sweeper;

/// HTTP adapter over the controller.
pub mod server;

/// Embeddable runtime for wabot-engine.
pub mod runtime;

pub use config::Config;
pub use error::Error;
