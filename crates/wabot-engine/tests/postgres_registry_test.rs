// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL registry tests.
//!
//! Run against the database in `TEST_WABOT_DATABASE_URL`; skipped otherwise.

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{new_instance, postgres_registry};
use wabot_engine::error::Error;
use wabot_engine::registry::{InstanceRegistry, InstanceStatus, LeaseDuration, PostgresRegistry};
use wabot_engine::runner::MockRunner;

/// Skip test if database URL is not set
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_WABOT_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_WABOT_DATABASE_URL not set");
            return;
        }
    };
}

async fn backdate(registry: &PostgresRegistry, id: &str) {
    sqlx::query("UPDATE bot_instances SET expires_at = $1 WHERE id = $2")
        .bind(Utc::now() - chrono::Duration::hours(1))
        .bind(id)
        .execute(registry.pool())
        .await
        .expect("Failed to backdate expiry");
}

#[tokio::test]
async fn test_create_get_list() {
    skip_if_no_db!();
    let registry = postgres_registry().await.expect("registry");

    let a = registry.create(&new_instance("+1")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let b = registry.create(&new_instance("+2")).await.unwrap();

    assert_eq!(registry.get(&a.id).await.unwrap().status, InstanceStatus::New);

    let listed = registry.list(None).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|i| i.id.clone()).collect();
    assert_eq!(ids, vec![b.id.clone(), a.id.clone()]);

    assert!(
        registry
            .list(Some(InstanceStatus::Approved))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_phone_unique_per_server() {
    skip_if_no_db!();
    let one = postgres_registry().await.expect("registry");
    let two = PostgresRegistry::new(one.pool().clone(), format!("{}-b", one.server_identity()));

    one.create(&new_instance("+1555")).await.unwrap();
    assert!(matches!(
        one.create(&new_instance("+1555")).await,
        Err(Error::Conflict(_))
    ));
    let other = two.create(&new_instance("+1555")).await.unwrap();

    assert!(matches!(one.get(&other.id).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_approve_expire_renew_delete() {
    skip_if_no_db!();
    let registry = postgres_registry().await.expect("registry");
    let created = registry.create(&new_instance("+1555")).await.unwrap();

    let approved = registry
        .transition_to_approved(&created.id, LeaseDuration::from_months(6).unwrap(), 4001)
        .await
        .unwrap();
    assert_eq!(
        approved.expires_at.unwrap() - approved.approved_at.unwrap(),
        chrono::Duration::days(180)
    );

    let err = registry
        .transition_to_approved(&created.id, LeaseDuration::from_months(1).unwrap(), 4002)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    backdate(&registry, &created.id).await;
    assert_eq!(
        registry.transition_to_expired_bulk().await.unwrap(),
        vec![created.id.clone()]
    );
    assert!(registry.transition_to_expired_bulk().await.unwrap().is_empty());

    let renewed = registry
        .transition_to_approved_from_expired(
            &created.id,
            LeaseDuration::from_months(3).unwrap(),
            4001,
        )
        .await
        .unwrap();
    assert_eq!(renewed.port, Some(4001));
    assert_eq!(renewed.status, InstanceStatus::Approved);

    registry.delete(&created.id).await.unwrap();
    assert!(matches!(
        registry.get(&created.id).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_process_references_and_counts() {
    skip_if_no_db!();
    let registry = postgres_registry().await.expect("registry");
    let a = registry.create(&new_instance("+1")).await.unwrap();
    registry.create(&new_instance("+2")).await.unwrap();

    registry.record_process_reference(&a.id, Some(1234)).await.unwrap();
    assert_eq!(registry.get(&a.id).await.unwrap().pid, Some(1234));
    assert_eq!(registry.reset_process_references().await.unwrap(), 1);
    assert!(registry.get(&a.id).await.unwrap().pid.is_none());

    let counts = registry.count_by_status().await.unwrap();
    assert_eq!(counts.total, 2);
    assert_eq!(counts.new, 2);
    assert!(registry.health_check().await);
}

#[tokio::test]
async fn test_controller_lifecycle_on_postgres() {
    skip_if_no_db!();
    let registry = Arc::new(postgres_registry().await.expect("registry"));
    let runner = Arc::new(MockRunner::new());
    let dir = tempfile::TempDir::new().unwrap();
    let controller = common::controller(registry.clone(), runner.clone(), dir.path());

    let created = controller.create(new_instance("+1555")).await.unwrap();
    let approved = controller.approve(&created.id, 1).await.unwrap();
    let port = approved.port.unwrap();

    backdate(&registry, &created.id).await;
    assert_eq!(
        controller.expire_lapsed().await.unwrap(),
        vec![created.id.clone()]
    );
    assert!(runner.running_instances().await.is_empty());

    let renewed = controller.renew(&created.id, 3).await.unwrap();
    assert_eq!(renewed.port, Some(port));

    controller.delete(&created.id).await.unwrap();
    assert!(matches!(
        controller.get(&created.id).await,
        Err(Error::NotFound(_))
    ));
}
