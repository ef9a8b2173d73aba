//! Concurrency tests for request deduplication across stores
//!
//! A refresh triggered by focus and a load-more triggered by scrolling can
//! race on the same page. Identical requests must collapse into one network
//! call; distinct pages must not.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use libfeomo::api::mock::{credentials_fixture, status_fixture, MockApi, MockConnector};
use libfeomo::config::{build_app_config, AppConfigInput};
use libfeomo::platform::MemoryStorage;
use libfeomo::stores::{run_unless_cancelled, CancelFlag, StatusStore};
use libfeomo::types::{AccountTimelineParams, Status, TimelineParams};
use libfeomo::GoToSocialClient;

fn timeline(ids: &[&str], account_id: &str) -> Vec<Status> {
    ids.iter().map(|id| status_fixture(id, account_id)).collect()
}

async fn signed_in_store(api: MockApi) -> Result<(Arc<MockApi>, StatusStore)> {
    let api = Arc::new(
        api.with_credentials(credentials_fixture("me"))
            .with_delay(Duration::from_millis(40)),
    );
    let config = build_app_config(&AppConfigInput {
        instance_url: Some("https://gts.example".to_string()),
        origin: "https://feomo.example".to_string(),
        default_redirect_path: Some("/auth/callback".to_string()),
        ..Default::default()
    })?;
    let client = Arc::new(GoToSocialClient::with_config(
        Arc::new(MemoryStorage::new()),
        config,
        Arc::new(MockConnector::new(api.clone())),
    ));
    client.initialize_with_token("token").await?;
    Ok((api, StatusStore::new(client)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_identical_fetches_hit_the_network_once() -> Result<()> {
    let (api, store) = signed_in_store(MockApi::new().with_timeline(timeline(&["3", "2", "1"], "a"))).await?;

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.fetch_public_timeline(TimelineParams::default()).await })
        })
        .collect();

    for task in tasks {
        let page = task.await??;
        assert_eq!(page.len(), 3);
    }

    assert_eq!(api.call_count("public_timeline"), 1);
    assert_eq!(store.state().public_timeline, vec!["3", "2", "1"]);
    Ok(())
}

#[tokio::test]
async fn test_distinct_pages_are_not_collapsed() -> Result<()> {
    let (api, store) =
        signed_in_store(MockApi::new().with_timeline(timeline(&["4", "3", "2", "1"], "a"))).await?;

    let (first, older) = tokio::join!(
        store.fetch_home_timeline(TimelineParams::default()),
        store.fetch_home_timeline(TimelineParams::older_than("2")),
    );
    first?;
    older?;

    assert_eq!(api.call_count("home_timeline"), 2);
    Ok(())
}

#[tokio::test]
async fn test_account_pages_collapse_per_cursor() -> Result<()> {
    let (api, store) = signed_in_store(MockApi::new().with_timeline(timeline(&["2", "1"], "A"))).await?;

    let (a, b) = tokio::join!(
        store.fetch_account_timeline("A", AccountTimelineParams::default()),
        store.fetch_account_timeline(
            "A",
            AccountTimelineParams {
                limit: Some(20),
                ..Default::default()
            }
        ),
    );

    assert_eq!(a?, b?);
    assert_eq!(api.call_count("account_statuses"), 1);
    assert_eq!(store.state().account_timeline, vec!["2", "1"]);
    Ok(())
}

#[tokio::test]
async fn test_failed_request_is_retried_fresh() -> Result<()> {
    let (api, store) = signed_in_store(MockApi::new().with_timeline(timeline(&["1"], "a"))).await?;
    api.fail(
        "home_timeline",
        libfeomo::error::ApiError::Server("unavailable".to_string()),
    );

    let (a, b) = tokio::join!(
        store.fetch_home_timeline(TimelineParams::default()),
        store.fetch_home_timeline(TimelineParams::default()),
    );
    assert!(a.is_err() && b.is_err());
    assert_eq!(api.call_count("home_timeline"), 1);

    api.recover("home_timeline");
    store.fetch_home_timeline(TimelineParams::default()).await?;
    assert_eq!(api.call_count("home_timeline"), 2);
    assert_eq!(store.state().home_timeline, vec!["1"]);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_screen_does_not_apply_result() -> Result<()> {
    let (_, store) = signed_in_store(MockApi::new().with_timeline(timeline(&["1"], "a"))).await?;
    let flag = CancelFlag::new();

    let load = {
        let store = store.clone();
        let flag = flag.clone();
        tokio::spawn(async move {
            let mut shown = Vec::new();
            let applied = run_unless_cancelled(
                &flag,
                store.fetch_status_context("1"),
                |context| shown = context.descendants,
            )
            .await;
            (applied, shown)
        })
    };

    tokio::time::sleep(Duration::from_millis(5)).await;
    flag.cancel();

    let (applied, shown) = load.await?;
    assert!(!applied?);
    assert!(shown.is_empty());
    Ok(())
}
