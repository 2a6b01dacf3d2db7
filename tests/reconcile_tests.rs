//! Integration tests for reconcile passes against an in-memory server.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

use common::{claim, complex, harness, harness_with, settings};
use dbclaim::models::claim::Phase;
use dbclaim::reconcile::{Action, Requeue};

#[tokio::test]
async fn test_fresh_claim_converges_in_four_passes() {
    let h = harness().await;
    let claim = claim("app1", Some(complex("15")));

    let first = h.reconciler.reconcile(&claim).await;
    assert_eq!(first.action, Some(Action::CreateDatabase));
    assert_eq!(first.phase, Phase::Provisioning);
    assert_eq!(first.requeue, Requeue::Immediately);

    let second = h.reconciler.reconcile(&claim).await;
    assert_eq!(second.action, Some(Action::CreateGroup));

    let third = h.reconciler.reconcile(&claim).await;
    assert_eq!(third.action, Some(Action::CreateUser));
    assert_eq!(h.secrets.count(), 1);

    let fourth = h.reconciler.reconcile(&claim).await;
    assert_eq!(fourth.phase, Phase::Ready);
    assert!(matches!(fourth.action, Some(Action::Done { .. })));
    match fourth.requeue {
        Requeue::After(delay) => assert!(delay <= Duration::from_secs(300)),
        other => panic!("unexpected requeue: {other:?}"),
    }

    let payload = h.secrets.latest().unwrap();
    assert_eq!(payload.username, "app1");
    assert_eq!(payload.role, "app1_role");
    assert_eq!(payload.version, 1);
    assert_eq!(payload.password.len(), 15);
    assert!(payload.dsn.contains("dbname='tenant1'"));

    {
        let catalog = h.server.catalog();
        assert_eq!(catalog.databases["tenant1"].len(), 3);
        assert!(catalog.groups.contains("app1_role"));
        assert!(
            catalog
                .grants
                .contains(&("tenant1".to_string(), "app1_role".to_string()))
        );
        let user = &catalog.users["app1"];
        assert_eq!(user.password, payload.password);
        assert_eq!(user.group, "app1_role");
        assert_eq!(catalog.connects, catalog.closes);
    }

    let status = h.store.get_claim_status(&claim.key).await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Ready);
    assert_eq!(status.active_username.as_deref(), Some("app1"));
    assert_eq!(status.credential_version, 1);
    assert!(status.last_rotated_at.is_some());
    assert_eq!(status.last_action.as_deref(), Some("Done"));
    assert!(status.last_error.is_none());

    assert_eq!(h.metrics.count("reconcile:progress"), 3);
    assert_eq!(h.metrics.count("reconcile:ready"), 1);
}

#[tokio::test]
async fn test_ready_claim_is_stable() {
    let h = harness().await;
    let claim = claim("app1", None);

    for _ in 0..4 {
        h.reconciler.reconcile(&claim).await;
    }
    let password = h.secrets.latest().unwrap().password;

    let again = h.reconciler.reconcile(&claim).await;
    assert_eq!(again.phase, Phase::Ready);
    assert_eq!(h.secrets.count(), 1);
    assert_eq!(h.server.catalog().users["app1"].password, password);
}

#[tokio::test]
async fn test_elapsed_rotation_period_mints_new_password() {
    let h = harness().await;
    let claim = claim("app1", Some(complex("20")));

    for _ in 0..4 {
        h.reconciler.reconcile(&claim).await;
    }
    let original = h.secrets.latest().unwrap();

    let mut status = h.store.get_claim_status(&claim.key).await.unwrap().unwrap();
    status.last_rotated_at = Some(Utc::now() - ChronoDuration::days(61));
    h.store.put_claim_status(&claim.key, &status).await.unwrap();

    let outcome = h.reconciler.reconcile(&claim).await;
    assert_eq!(outcome.action, Some(Action::UpdatePassword));
    assert_eq!(outcome.requeue, Requeue::Immediately);

    let rotated = h.secrets.latest().unwrap();
    assert_eq!(rotated.version, original.version + 1);
    assert_eq!(rotated.password.len(), 20);
    assert_ne!(rotated.password, original.password);
    assert_eq!(h.server.catalog().users["app1"].password, rotated.password);

    let settled = h.reconciler.reconcile(&claim).await;
    assert_eq!(settled.phase, Phase::Ready);
}

#[tokio::test]
async fn test_username_change_renames_user() {
    let h = harness().await;
    let original = claim("app1", None);
    for _ in 0..4 {
        h.reconciler.reconcile(&original).await;
    }

    let renamed = claim("app2", None);
    let outcome = h.reconciler.reconcile(&renamed).await;
    assert_eq!(
        outcome.action,
        Some(Action::RotateUser {
            from: "app1".to_string()
        })
    );

    let payload = h.secrets.latest().unwrap();
    assert_eq!(payload.username, "app2");
    assert_eq!(payload.version, 2);
    {
        let catalog = h.server.catalog();
        assert!(!catalog.users.contains_key("app1"));
        assert_eq!(catalog.users["app2"].password, payload.password);
    }

    let settled = h.reconciler.reconcile(&renamed).await;
    assert_eq!(settled.phase, Phase::Ready);

    let status = h.store.get_claim_status(&renamed.key).await.unwrap().unwrap();
    assert_eq!(status.active_username.as_deref(), Some("app2"));
}

#[tokio::test]
async fn test_policy_violation_is_terminal() {
    let h = harness().await;
    let claim = claim("app1", Some(complex("3")));

    let outcome = h.reconciler.reconcile(&claim).await;
    assert_eq!(outcome.phase, Phase::Failed);
    assert_eq!(outcome.requeue, Requeue::Never);
    assert!(outcome.error.is_some());

    assert_eq!(h.server.catalog().connects, 0);
    assert_eq!(h.secrets.count(), 0);

    let status = h.store.get_claim_status(&claim.key).await.unwrap().unwrap();
    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(status.error_category.as_deref(), Some("policy violation"));
    assert_eq!(h.metrics.count("reconcile:failed"), 1);
}

#[tokio::test]
async fn test_oversized_password_length_is_terminal() {
    let h = harness().await;
    let claim = claim("app1", Some(complex("18446744073709551615")));

    let outcome = h.reconciler.reconcile(&claim).await;
    assert_eq!(outcome.phase, Phase::Failed);
    assert_eq!(outcome.requeue, Requeue::Never);
    assert_eq!(h.server.catalog().connects, 0);

    let status = h.store.get_claim_status(&claim.key).await.unwrap().unwrap();
    assert_eq!(status.error_category.as_deref(), Some("policy violation"));
}

#[tokio::test]
async fn test_unparseable_policy_is_terminal() {
    let h = harness().await;
    let mut config = complex("15");
    config.password_rotation_period = "sixty".to_string();

    let outcome = h.reconciler.reconcile(&claim("app1", Some(config))).await;
    assert_eq!(outcome.phase, Phase::Failed);
    assert_eq!(outcome.requeue, Requeue::Never);
}

#[tokio::test]
async fn test_connect_failures_back_off_exponentially() {
    let h = harness().await;
    h.server.catalog().refuse_connects = 3;
    let claim = claim("app1", None);

    let delays: Vec<Requeue> = [
        h.reconciler.reconcile(&claim).await,
        h.reconciler.reconcile(&claim).await,
        h.reconciler.reconcile(&claim).await,
    ]
    .into_iter()
    .map(|outcome| {
        assert_eq!(outcome.phase, Phase::Pending);
        outcome.requeue
    })
    .collect();

    assert_eq!(
        delays,
        vec![
            Requeue::After(Duration::from_millis(100)),
            Requeue::After(Duration::from_millis(200)),
            Requeue::After(Duration::from_millis(350)),
        ]
    );

    let status = h.store.get_claim_status(&claim.key).await.unwrap().unwrap();
    assert_eq!(status.consecutive_failures, 3);
    assert_eq!(status.error_category.as_deref(), Some("connect error"));
    assert_eq!(status.last_action.as_deref(), Some("Evaluate"));

    let recovered = h.reconciler.reconcile(&claim).await;
    assert_eq!(recovered.action, Some(Action::CreateDatabase));
    let status = h.store.get_claim_status(&claim.key).await.unwrap().unwrap();
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_rejected_secret_is_retried_with_fresh_password() {
    let h = harness().await;
    let claim = claim("app1", None);

    h.reconciler.reconcile(&claim).await;
    h.reconciler.reconcile(&claim).await;

    h.secrets.set_reject(true);
    let failed = h.reconciler.reconcile(&claim).await;
    assert_eq!(failed.phase, Phase::Pending);
    assert!(matches!(failed.requeue, Requeue::After(_)));

    let status = h.store.get_claim_status(&claim.key).await.unwrap().unwrap();
    assert_eq!(status.credential_version, 0);
    assert!(status.active_username.is_none());
    assert_eq!(status.error_category.as_deref(), Some("secret error"));
    assert!(h.server.catalog().users.contains_key("app1"));

    h.secrets.set_reject(false);
    let retried = h.reconciler.reconcile(&claim).await;
    assert_eq!(retried.action, Some(Action::UpdatePassword));

    let payload = h.secrets.latest().unwrap();
    assert_eq!(payload.version, 1);
    assert_eq!(h.server.catalog().users["app1"].password, payload.password);

    assert_eq!(h.reconciler.reconcile(&claim).await.phase, Phase::Ready);
}

#[tokio::test]
async fn test_preexisting_user_gets_managed_password() {
    let h = harness().await;
    h.server.catalog().users.insert(
        "app1".to_string(),
        common::FakeUser {
            password: "set-by-hand".to_string(),
            group: "app1_role".to_string(),
        },
    );
    let claim = claim("app1", None);

    assert_eq!(
        h.reconciler.reconcile(&claim).await.action,
        Some(Action::CreateDatabase)
    );
    assert_eq!(
        h.reconciler.reconcile(&claim).await.action,
        Some(Action::CreateGroup)
    );
    assert_eq!(
        h.reconciler.reconcile(&claim).await.action,
        Some(Action::UpdatePassword)
    );

    let password = h.server.catalog().users["app1"].password.clone();
    assert_ne!(password, "set-by-hand");
    assert_eq!(h.secrets.latest().unwrap().password, password);
}

#[tokio::test]
async fn test_zero_rotation_period_waits_for_resync_only() {
    let mut settings = settings();
    settings.resync_interval = None;
    let h = harness_with(settings).await;

    let mut config = complex("15");
    config.password_rotation_period = "0".to_string();
    let claim = claim("app1", Some(config));

    for _ in 0..3 {
        h.reconciler.reconcile(&claim).await;
    }
    let done = h.reconciler.reconcile(&claim).await;
    assert_eq!(done.phase, Phase::Ready);
    assert_eq!(
        done.action,
        Some(Action::Done {
            next_rotation: None
        })
    );
    assert_eq!(done.requeue, Requeue::Never);
}

#[tokio::test]
async fn test_unbuildable_uri_retries_without_publishing() {
    let h = harness().await;
    let mut claim = claim("app1", None);
    claim.spec.host = "bad host".to_string();

    h.reconciler.reconcile(&claim).await;
    h.reconciler.reconcile(&claim).await;

    let outcome = h.reconciler.reconcile(&claim).await;
    assert_eq!(outcome.phase, Phase::Pending);
    assert!(matches!(outcome.requeue, Requeue::After(_)));
    assert_eq!(h.secrets.count(), 0);

    let status = h.store.get_claim_status(&claim.key).await.unwrap().unwrap();
    assert_eq!(status.error_category.as_deref(), Some("secret error"));
    assert_eq!(status.credential_version, 0);
    assert!(status.active_username.is_none());
}

#[tokio::test]
async fn test_rename_onto_existing_user_fails_terminally() {
    let h = harness().await;
    let original = claim("app1", None);
    for _ in 0..4 {
        h.reconciler.reconcile(&original).await;
    }
    h.server.catalog().users.insert(
        "app2".to_string(),
        common::FakeUser {
            password: "taken".to_string(),
            group: "other_role".to_string(),
        },
    );

    let outcome = h.reconciler.reconcile(&claim("app2", None)).await;
    assert_eq!(outcome.phase, Phase::Failed);
    assert_eq!(outcome.requeue, Requeue::Never);
    assert_eq!(h.secrets.count(), 1);

    {
        let catalog = h.server.catalog();
        assert!(catalog.users.contains_key("app1"));
        assert_eq!(catalog.users["app2"].password, "taken");
    }

    let status = h.store.get_claim_status(&original.key).await.unwrap().unwrap();
    assert_eq!(status.error_category.as_deref(), Some("user conflict"));
    assert_eq!(status.active_username.as_deref(), Some("app1"));
}

#[tokio::test]
async fn test_drifted_ready_claim_passes_through_pending() {
    let h = harness().await;
    let claim = claim("app1", None);
    for _ in 0..4 {
        h.reconciler.reconcile(&claim).await;
    }
    assert_eq!(h.statuses.take().last(), Some(&Phase::Ready));

    h.server.catalog().users.remove("app1");
    let outcome = h.reconciler.reconcile(&claim).await;
    assert_eq!(outcome.action, Some(Action::CreateUser));
    assert_eq!(
        h.statuses.take(),
        vec![Phase::Pending, Phase::Provisioning, Phase::Provisioning]
    );

    assert_eq!(h.reconciler.reconcile(&claim).await.phase, Phase::Ready);
    assert_eq!(h.statuses.take(), vec![Phase::Ready]);
}
