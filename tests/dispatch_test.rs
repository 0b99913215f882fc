//! Integration tests for the dispatcher and retry engine.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use social_scheduler::config::Config;
use social_scheduler::db::{
    get_account, get_post, get_targets_for_post, insert_media, AccountStatus, Database,
    MediaKind, NewMedia, Platform, PostStatus, PostTarget,
};
use social_scheduler::dispatcher::{retry_post, Dispatcher};
use social_scheduler::error::ServiceError;
use social_scheduler::media::MediaStore;
use social_scheduler::platforms::PlatformRegistry;
use social_scheduler::scheduler::{FanoutScheduler, PostRequest};

use common::{seed_account, setup_db, Behavior, FakeClient, OWNER};

fn dispatcher(db: &Database, fake: &Arc<FakeClient>, config: Config) -> Dispatcher {
    let mut registry = PlatformRegistry::new();
    registry.register(fake.clone());
    Dispatcher::new(Arc::new(config), db.clone(), Arc::new(registry))
}

async fn create(
    db: &Database,
    targets: Vec<i64>,
    media_ids: Vec<i64>,
    scheduled_for: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> i64 {
    FanoutScheduler::new(db.clone())
        .create_post(
            OWNER,
            PostRequest {
                content: "Launch day".to_string(),
                target_account_ids: targets,
                media_ids,
                scheduled_for,
                ..PostRequest::default()
            },
            now,
        )
        .await
        .expect("create_post failed")
        .post
        .id
}

async fn targets(db: &Database, post_id: i64) -> Vec<PostTarget> {
    get_targets_for_post(db.pool(), post_id).await.unwrap()
}

async fn post_status(db: &Database, post_id: i64) -> PostStatus {
    get_post(db.pool(), post_id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_facebook_and_instagram_publish_at_schedule() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let (_, subs) = seed_account(
        &db,
        OWNER,
        Platform::Facebook,
        "fb",
        None,
        &[("page-1", Platform::Facebook), ("ig-1", Platform::Instagram)],
        now,
    )
    .await;
    let media_id = insert_media(
        db.pool(),
        &NewMedia {
            owner: OWNER.to_string(),
            kind: MediaKind::Image,
            file_name: "a.jpg".to_string(),
            url: "http://localhost:8080/media/files/a.jpg".to_string(),
            thumbnail_url: None,
            width: Some(1080),
            height: Some(1080),
            size_bytes: 2048,
            content_type: "image/jpeg".to_string(),
        },
        now,
    )
    .await
    .unwrap();

    let at = now + Duration::hours(1);
    let post_id = create(&db, subs, vec![media_id], Some(at), now).await;
    assert_eq!(post_status(&db, post_id).await, PostStatus::Scheduled);

    let fake = FakeClient::new();
    let dispatcher = dispatcher(&db, &fake, Config::for_testing());

    // Not due yet
    assert_eq!(dispatcher.run_once(now).await.unwrap(), 0);
    assert_eq!(fake.calls(), 0);

    assert_eq!(dispatcher.run_once(at).await.unwrap(), 2);

    let post = get_post(db.pool(), post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Published);
    assert!(post.published_at.is_some());
    for target in targets(&db, post_id).await {
        assert_eq!(target.status, PostStatus::Published);
        assert!(target.published_url.is_some());
        assert!(target.platform_post_id.is_some());
        assert!(target.error.is_none());
        assert!(target.next_attempt_at.is_none());
    }

    let mut platforms: Vec<Platform> = fake.published().iter().map(|p| p.0).collect();
    platforms.sort();
    assert_eq!(platforms, vec![Platform::Facebook, Platform::Instagram]);

    // Published targets are never dispatched again
    assert_eq!(
        dispatcher.run_once(at + Duration::minutes(1)).await.unwrap(),
        0
    );
    assert_eq!(fake.calls(), 2);
}

async fn seed_image(db: &Database, now: DateTime<Utc>) -> i64 {
    insert_media(
        db.pool(),
        &NewMedia {
            owner: OWNER.to_string(),
            kind: MediaKind::Image,
            file_name: "b.jpg".to_string(),
            url: "http://localhost:8080/media/files/b.jpg".to_string(),
            thumbnail_url: None,
            width: Some(1080),
            height: Some(1080),
            size_bytes: 2048,
            content_type: "image/jpeg".to_string(),
        },
        now,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_instagram_failure_retry_resends_only_instagram() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let (_, subs) = seed_account(
        &db,
        OWNER,
        Platform::Facebook,
        "fb",
        None,
        &[("page-1", Platform::Facebook), ("ig-1", Platform::Instagram)],
        now,
    )
    .await;
    let media_id = seed_image(&db, now).await;
    let post_id = create(&db, subs, vec![media_id], None, now).await;

    let fake = FakeClient::new();
    fake.set(
        Platform::Instagram,
        Behavior::Reject("Media aspect ratio unsupported".to_string()),
    );
    let dispatcher = dispatcher(&db, &fake, Config::for_testing());

    assert_eq!(dispatcher.run_once(now).await.unwrap(), 2);
    assert_eq!(post_status(&db, post_id).await, PostStatus::Failed);

    let all = targets(&db, post_id).await;
    let facebook = all.iter().find(|t| t.platform == Platform::Facebook).unwrap();
    let instagram = all.iter().find(|t| t.platform == Platform::Instagram).unwrap();
    assert_eq!(facebook.status, PostStatus::Published);
    assert_eq!(instagram.status, PostStatus::Failed);
    assert_eq!(
        instagram.error.as_deref(),
        Some("Media aspect ratio unsupported")
    );

    fake.set(Platform::Instagram, Behavior::Succeed);
    let later = now + Duration::minutes(1);
    let retried = retry_post(&db, OWNER, post_id, None, later).await.unwrap();
    assert_eq!(retried, vec![instagram.id]);

    assert_eq!(dispatcher.run_once(later).await.unwrap(), 1);
    assert_eq!(post_status(&db, post_id).await, PostStatus::Published);

    let published = fake.published();
    assert_eq!(published.len(), 2);
    assert_eq!(
        published.iter().filter(|p| p.0 == Platform::Facebook).count(),
        1
    );
    assert_eq!(published.last().unwrap().0, Platform::Instagram);
}

#[tokio::test]
async fn test_media_of_failed_post_kept_until_published() {
    let (db, temp_dir) = setup_db().await;
    let now = common::now();
    let (_, subs) = seed_account(
        &db,
        OWNER,
        Platform::Facebook,
        "fb",
        None,
        &[("ig-1", Platform::Instagram)],
        now,
    )
    .await;
    let media_id = seed_image(&db, now).await;
    let post_id = create(&db, subs, vec![media_id], None, now).await;

    let fake = FakeClient::new();
    fake.set(Platform::Instagram, Behavior::Reject("busy".to_string()));
    let config = Config {
        media_dir: temp_dir.path().join("media"),
        ..Config::for_testing()
    };
    let dispatcher = dispatcher(&db, &fake, config.clone());
    let store = MediaStore::new(db.clone(), Arc::new(config));

    assert_eq!(dispatcher.run_once(now).await.unwrap(), 1);
    assert_eq!(post_status(&db, post_id).await, PostStatus::Failed);

    // The failed post can still be retried, so it still needs its media
    let err = store.delete(OWNER, media_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    let post = FanoutScheduler::new(db.clone())
        .get_post(OWNER, post_id)
        .await
        .unwrap();
    assert_eq!(post.media.len(), 1);

    fake.set(Platform::Instagram, Behavior::Succeed);
    let later = now + Duration::minutes(1);
    retry_post(&db, OWNER, post_id, None, later).await.unwrap();
    assert_eq!(dispatcher.run_once(later).await.unwrap(), 1);
    assert_eq!(post_status(&db, post_id).await, PostStatus::Published);

    store.delete(OWNER, media_id).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_dispatchers_publish_each_target_once() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let (_, subs) = seed_account(
        &db,
        OWNER,
        Platform::Facebook,
        "fb",
        None,
        &[
            ("p1", Platform::Facebook),
            ("p2", Platform::Facebook),
            ("p3", Platform::Facebook),
            ("p4", Platform::Facebook),
        ],
        now,
    )
    .await;
    let post_id = create(&db, subs, Vec::new(), None, now).await;

    let fake = FakeClient::new();
    let first = dispatcher(&db, &fake, Config::for_testing());
    let second = dispatcher(&db, &fake, Config::for_testing());

    let (a, b) = tokio::join!(first.run_once(now), second.run_once(now));
    assert_eq!(a.unwrap() + b.unwrap(), 4);
    assert_eq!(fake.calls(), 4);

    let mut pages: Vec<String> = fake.published().into_iter().map(|p| p.1).collect();
    pages.sort();
    assert_eq!(pages, vec!["p1", "p2", "p3", "p4"]);
    assert_eq!(post_status(&db, post_id).await, PostStatus::Published);
}

#[tokio::test]
async fn test_failure_is_isolated_and_retry_is_idempotent() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let (_, fb) = seed_account(
        &db,
        OWNER,
        Platform::Facebook,
        "fb",
        None,
        &[("page", Platform::Facebook)],
        now,
    )
    .await;
    let (_, tw) = seed_account(
        &db,
        OWNER,
        Platform::Twitter,
        "tw",
        None,
        &[("tw", Platform::Twitter)],
        now,
    )
    .await;
    let post_id = create(&db, vec![fb[0], tw[0]], Vec::new(), None, now).await;

    let fake = FakeClient::new();
    fake.set(
        Platform::Twitter,
        Behavior::Reject("Status is a duplicate.".to_string()),
    );
    let dispatcher = dispatcher(&db, &fake, Config::for_testing());

    assert_eq!(dispatcher.run_once(now).await.unwrap(), 2);
    assert_eq!(post_status(&db, post_id).await, PostStatus::Failed);

    let all = targets(&db, post_id).await;
    let facebook = all.iter().find(|t| t.platform == Platform::Facebook).unwrap();
    let twitter = all.iter().find(|t| t.platform == Platform::Twitter).unwrap();
    assert_eq!(facebook.status, PostStatus::Published);
    assert_eq!(twitter.status, PostStatus::Failed);
    assert_eq!(twitter.error.as_deref(), Some("Status is a duplicate."));
    assert_eq!(twitter.retry_count, 1);
    assert!(twitter.next_attempt_at.is_none());
    assert!(twitter.published_url.is_none());

    // Retrying a published target is a no-op
    let retried = retry_post(&db, OWNER, post_id, Some(&[facebook.id]), now)
        .await
        .unwrap();
    assert!(retried.is_empty());

    let later = now + Duration::minutes(1);
    let retried = retry_post(&db, OWNER, post_id, None, later).await.unwrap();
    assert_eq!(retried, vec![twitter.id]);
    assert_eq!(post_status(&db, post_id).await, PostStatus::Publishing);

    // A second retry before dispatch changes nothing
    let retried = retry_post(&db, OWNER, post_id, None, later).await.unwrap();
    assert!(retried.is_empty());

    fake.set(Platform::Twitter, Behavior::Succeed);
    assert_eq!(dispatcher.run_once(later).await.unwrap(), 1);
    assert_eq!(post_status(&db, post_id).await, PostStatus::Published);
    assert_eq!(fake.published().len(), 2);
}

#[tokio::test]
async fn test_publish_timeout_records_timeout_error() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let (_, subs) = seed_account(
        &db,
        OWNER,
        Platform::Threads,
        "th",
        None,
        &[("th", Platform::Threads)],
        now,
    )
    .await;
    let post_id = create(&db, subs, Vec::new(), None, now).await;

    let fake = FakeClient::new();
    fake.set(Platform::Threads, Behavior::Hang);
    let config = Config {
        publish_timeout: StdDuration::from_millis(100),
        ..Config::for_testing()
    };
    let dispatcher = dispatcher(&db, &fake, config);

    assert_eq!(dispatcher.run_once(now).await.unwrap(), 1);

    let target = &targets(&db, post_id).await[0];
    assert_eq!(target.status, PostStatus::Failed);
    assert_eq!(target.error.as_deref(), Some("timeout"));
    assert_eq!(post_status(&db, post_id).await, PostStatus::Failed);
}

#[tokio::test]
async fn test_auth_error_marks_account_and_skips_auto_retry() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let (account_id, subs) = seed_account(
        &db,
        OWNER,
        Platform::LinkedinIndividual,
        "li",
        None,
        &[("urn:li:person:1", Platform::LinkedinIndividual)],
        now,
    )
    .await;
    let post_id = create(&db, subs, Vec::new(), None, now).await;

    let fake = FakeClient::new();
    fake.set(Platform::LinkedinIndividual, Behavior::AuthError);
    let config = Config {
        auto_retry_max: 3,
        ..Config::for_testing()
    };
    let dispatcher = dispatcher(&db, &fake, config);

    assert_eq!(dispatcher.run_once(now).await.unwrap(), 1);

    let target = &targets(&db, post_id).await[0];
    assert_eq!(target.status, PostStatus::Failed);
    assert!(target.next_attempt_at.is_none());

    let account = get_account(db.pool(), account_id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Error);
    assert!(account.last_error.is_some());
}

#[tokio::test]
async fn test_auto_retry_backs_off_then_succeeds() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let (_, subs) = seed_account(
        &db,
        OWNER,
        Platform::Facebook,
        "fb",
        None,
        &[("page", Platform::Facebook)],
        now,
    )
    .await;
    let post_id = create(&db, subs, Vec::new(), None, now).await;

    let fake = FakeClient::new();
    fake.set(Platform::Facebook, Behavior::Reject("try later".to_string()));
    let config = Config {
        auto_retry_max: 1,
        ..Config::for_testing()
    };
    let dispatcher = dispatcher(&db, &fake, config);

    assert_eq!(dispatcher.run_once(now).await.unwrap(), 1);
    let target = &targets(&db, post_id).await[0];
    assert_eq!(target.status, PostStatus::Failed);
    // Backoff counts from when the attempt finished
    let next_attempt = target.next_attempt_at.unwrap();
    assert!(next_attempt >= now + Duration::minutes(5));
    assert!(next_attempt < now + Duration::minutes(5) + Duration::seconds(10));

    fake.set(Platform::Facebook, Behavior::Succeed);
    assert_eq!(
        dispatcher.run_once(now + Duration::minutes(4)).await.unwrap(),
        0
    );
    assert_eq!(
        dispatcher.run_once(now + Duration::minutes(6)).await.unwrap(),
        1
    );

    let target = &targets(&db, post_id).await[0];
    assert_eq!(target.status, PostStatus::Published);
    assert_eq!(target.retry_count, 1);
    assert_eq!(post_status(&db, post_id).await, PostStatus::Published);
}

#[tokio::test]
async fn test_missing_client_fails_with_description() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let (_, subs) = seed_account(
        &db,
        OWNER,
        Platform::Facebook,
        "fb",
        None,
        &[("page", Platform::Facebook)],
        now,
    )
    .await;
    let post_id = create(&db, subs, Vec::new(), None, now).await;

    let dispatcher = Dispatcher::new(
        Arc::new(Config::for_testing()),
        db.clone(),
        Arc::new(PlatformRegistry::new()),
    );
    assert_eq!(dispatcher.run_once(now).await.unwrap(), 1);

    let target = &targets(&db, post_id).await[0];
    assert_eq!(target.status, PostStatus::Failed);
    assert!(target.error.as_deref().unwrap().contains("facebook"));
}
