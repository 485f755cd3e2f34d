// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for wabot-engine integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use wabot_engine::controller::{ControllerConfig, LifecycleController};
use wabot_engine::port_allocator::PortAllocator;
use wabot_engine::registry::{InstanceRegistry, NewInstance, PostgresRegistry};
use wabot_engine::runner::Runner;
use wabot_engine::status_proxy::HttpStatusProxy;
use wabot_engine::supervisor::Supervisor;

/// Registry on the test database under a fresh, random server identity so
/// tests never see each other's rows.
pub async fn postgres_registry() -> Option<PostgresRegistry> {
    let database_url = std::env::var("TEST_WABOT_DATABASE_URL").ok()?;
    let server_name = format!("test-{}", uuid::Uuid::new_v4().simple());
    PostgresRegistry::connect(&database_url, server_name).await.ok()
}

/// Creation request with the given phone number.
pub fn new_instance(phone: &str) -> NewInstance {
    NewInstance {
        name: format!("Shop {}", phone),
        phone_number: phone.to_string(),
        owner_id: None,
    }
}

/// Controller over `registry` and `runner` with short timeouts.
pub fn controller(
    registry: Arc<dyn InstanceRegistry>,
    runner: Arc<dyn Runner>,
    instances_dir: &Path,
) -> LifecycleController {
    LifecycleController::new(
        registry,
        Arc::new(Supervisor::new(runner)),
        Arc::new(PortAllocator::new(4000)),
        Arc::new(HttpStatusProxy::new()),
        ControllerConfig {
            instances_dir: instances_dir.to_path_buf(),
            stop_grace: Duration::from_millis(200),
            read_timeout: Duration::from_millis(200),
            ..Default::default()
        },
    )
}
