//! Integration tests for database operations.

mod common;

use chrono::{DateTime, Duration, Utc};
use social_scheduler::db::{
    claim_target, count_stale_claims, delete_expired_oauth_states, delete_post, delete_target,
    get_due_targets,
    get_media, get_post_media, get_target, get_targets_for_post, insert_media, insert_oauth_state,
    insert_post, insert_target, list_posts, reschedule_target, set_post_media, set_target_failed,
    set_target_published, take_oauth_state, ChannelOverrides, Database, MediaKind, NewMedia,
    NewPost, NewTarget, OAuthState, Platform, PostFilter, PostSort, PostStatus,
};

use common::{seed_account, setup_db, OWNER};

const LEASE_MINUTES: i64 = 5;

fn cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(LEASE_MINUTES)
}

async fn post_with_target(
    db: &Database,
    sub_account_id: i64,
    platform: Platform,
    content: &str,
    status: PostStatus,
    next_attempt_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (i64, i64) {
    let post_id = insert_post(
        db.pool(),
        &NewPost {
            owner: OWNER.to_string(),
            content: content.to_string(),
            channel_overrides: ChannelOverrides::new(),
            platform_options: None,
            status,
            scheduled_for: next_attempt_at,
        },
        now,
    )
    .await
    .expect("Failed to insert post");
    let target_id = insert_target(
        db.pool(),
        &NewTarget {
            post_id,
            sub_account_id,
            platform,
            account_name: "Page".to_string(),
            status,
            scheduled_for: next_attempt_at,
            next_attempt_at,
        },
        now,
    )
    .await
    .expect("Failed to insert target");
    (post_id, target_id)
}

async fn one_sub(db: &Database, platform: Platform, now: DateTime<Utc>) -> i64 {
    seed_account(db, OWNER, platform, "ext", None, &[("page", platform)], now)
        .await
        .1[0]
}

#[tokio::test]
async fn test_claim_is_exclusive_and_fenced() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let sub = one_sub(&db, Platform::Facebook, now).await;
    let (_, target_id) = post_with_target(
        &db,
        sub,
        Platform::Facebook,
        "hello",
        PostStatus::Scheduled,
        Some(now),
        now,
    )
    .await;

    assert!(claim_target(db.pool(), target_id, now, cutoff(now)).await.unwrap());
    assert!(!claim_target(db.pool(), target_id, now, cutoff(now)).await.unwrap());

    let target = get_target(db.pool(), target_id).await.unwrap().unwrap();
    assert_eq!(target.status, PostStatus::Publishing);
    assert_eq!(target.claimed_at, Some(now));

    // Outcomes only land for the current claim
    let stale = now - Duration::seconds(1);
    assert!(!set_target_failed(db.pool(), target_id, stale, "boom", None, now)
        .await
        .unwrap());
    assert!(
        set_target_published(db.pool(), target_id, now, "https://fb.example/1", "1", now)
            .await
            .unwrap()
    );

    let target = get_target(db.pool(), target_id).await.unwrap().unwrap();
    assert_eq!(target.status, PostStatus::Published);
    assert_eq!(target.published_url.as_deref(), Some("https://fb.example/1"));
    assert_eq!(target.platform_post_id.as_deref(), Some("1"));
    assert_eq!(target.published_at, Some(now));
    assert!(target.claimed_at.is_none());
    assert!(target.next_attempt_at.is_none());

    // Published targets are never claimed again
    let later = now + Duration::hours(1);
    assert!(!claim_target(db.pool(), target_id, later, cutoff(later))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_claimed_target_cannot_be_rescheduled_or_removed() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let sub = one_sub(&db, Platform::Facebook, now).await;
    let (_, target_id) = post_with_target(
        &db,
        sub,
        Platform::Facebook,
        "hello",
        PostStatus::Scheduled,
        Some(now),
        now,
    )
    .await;
    assert!(claim_target(db.pool(), target_id, now, cutoff(now)).await.unwrap());

    let later = now + Duration::hours(1);
    assert!(!reschedule_target(
        db.pool(),
        target_id,
        PostStatus::Scheduled,
        Some(later),
        Some(later),
        now
    )
    .await
    .unwrap());
    assert!(!delete_target(db.pool(), target_id).await.unwrap());

    let target = get_target(db.pool(), target_id).await.unwrap().unwrap();
    assert_eq!(target.status, PostStatus::Publishing);
    assert_eq!(target.next_attempt_at, Some(now));
}

#[tokio::test]
async fn test_abandoned_claim_becomes_due_after_lease() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let sub = one_sub(&db, Platform::Twitter, now).await;
    let (_, target_id) = post_with_target(
        &db,
        sub,
        Platform::Twitter,
        "hello",
        PostStatus::Publishing,
        Some(now),
        now,
    )
    .await;
    assert!(claim_target(db.pool(), target_id, now, cutoff(now)).await.unwrap());

    let soon = now + Duration::minutes(1);
    assert!(get_due_targets(db.pool(), soon, cutoff(soon), 10)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(count_stale_claims(db.pool(), cutoff(soon)).await.unwrap(), 0);

    let later = now + Duration::minutes(LEASE_MINUTES + 1);
    let due = get_due_targets(db.pool(), later, cutoff(later), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, target_id);
    assert_eq!(count_stale_claims(db.pool(), cutoff(later)).await.unwrap(), 1);

    assert!(claim_target(db.pool(), target_id, later, cutoff(later))
        .await
        .unwrap());

    // The first worker finishing late cannot overwrite the new claim
    assert!(
        !set_target_published(db.pool(), target_id, now, "https://x.example/1", "1", later)
            .await
            .unwrap()
    );
    assert!(
        set_target_failed(db.pool(), target_id, later, "rejected", None, later)
            .await
            .unwrap()
    );
    let target = get_target(db.pool(), target_id).await.unwrap().unwrap();
    assert_eq!(target.status, PostStatus::Failed);
    assert_eq!(target.retry_count, 1);
    assert_eq!(target.error.as_deref(), Some("rejected"));
}

#[tokio::test]
async fn test_due_targets_ordering_and_exclusions() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let sub = one_sub(&db, Platform::Facebook, now).await;

    let (_, draft) =
        post_with_target(&db, sub, Platform::Facebook, "d", PostStatus::Draft, None, now).await;
    let (_, future) = post_with_target(
        &db,
        sub,
        Platform::Facebook,
        "f",
        PostStatus::Scheduled,
        Some(now + Duration::minutes(10)),
        now,
    )
    .await;
    let (_, late) = post_with_target(
        &db,
        sub,
        Platform::Facebook,
        "l",
        PostStatus::Scheduled,
        Some(now - Duration::minutes(1)),
        now,
    )
    .await;
    let (_, later) = post_with_target(
        &db,
        sub,
        Platform::Facebook,
        "n",
        PostStatus::Publishing,
        Some(now),
        now,
    )
    .await;

    let due: Vec<i64> = get_due_targets(db.pool(), now, cutoff(now), 10)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(due, vec![late, later]);
    assert!(!due.contains(&draft));
    assert!(!due.contains(&future));

    let limited = get_due_targets(db.pool(), now, cutoff(now), 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_list_posts_filters_and_pages() {
    let (db, _temp_dir) = setup_db().await;
    let base = common::now();
    let fb = one_sub(&db, Platform::Facebook, base).await;
    let tw = seed_account(&db, OWNER, Platform::Twitter, "tw", None, &[("tw", Platform::Twitter)], base)
        .await
        .1[0];

    for i in 0..5 {
        let created = base + Duration::minutes(i);
        let (sub, platform) = if i % 2 == 0 {
            (fb, Platform::Facebook)
        } else {
            (tw, Platform::Twitter)
        };
        post_with_target(
            &db,
            sub,
            platform,
            &format!("post {i}"),
            PostStatus::Scheduled,
            Some(created + Duration::days(1)),
            created,
        )
        .await;
    }
    post_with_target(&db, fb, Platform::Facebook, "100% off_sale", PostStatus::Draft, None, base)
        .await;

    let filter = |f: PostFilter| PostFilter {
        page: 1,
        per_page: 20,
        descending: true,
        ..f
    };

    let (posts, total) = list_posts(db.pool(), OWNER, &filter(PostFilter::default()))
        .await
        .unwrap();
    assert_eq!(total, 6);
    assert_eq!(posts.len(), 6);

    let (_, total) = list_posts(
        db.pool(),
        OWNER,
        &filter(PostFilter {
            platform: Some(Platform::Twitter),
            ..PostFilter::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(total, 2);

    let (_, total) = list_posts(
        db.pool(),
        OWNER,
        &filter(PostFilter {
            status: Some(PostStatus::Draft),
            ..PostFilter::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(total, 1);

    // LIKE wildcards in the search are literal
    let (posts, total) = list_posts(
        db.pool(),
        OWNER,
        &filter(PostFilter {
            search: Some("0% off_".to_string()),
            ..PostFilter::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(total, 1);
    assert_eq!(posts[0].content, "100% off_sale");
    let (_, total) = list_posts(
        db.pool(),
        OWNER,
        &filter(PostFilter {
            search: Some("post_".to_string()),
            ..PostFilter::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(total, 0);

    let (page, total) = list_posts(
        db.pool(),
        OWNER,
        &PostFilter {
            page: 2,
            per_page: 2,
            sort: PostSort::ScheduledFor,
            descending: false,
            status: Some(PostStatus::Scheduled),
            ..PostFilter::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(total, 5);
    let contents: Vec<&str> = page.iter().map(|p| p.content.as_str()).collect();
    assert_eq!(contents, vec!["post 2", "post 3"]);

    // Pages far past the end are empty
    let (page, total) = list_posts(
        db.pool(),
        OWNER,
        &filter(PostFilter {
            page: i64::MAX,
            ..PostFilter::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(total, 6);
    assert!(page.is_empty());

    let (_, total) = list_posts(db.pool(), "someone-else", &filter(PostFilter::default()))
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_deleting_post_removes_targets_and_attachments() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();
    let sub = one_sub(&db, Platform::Instagram, now).await;
    let (post_id, _) = post_with_target(
        &db,
        sub,
        Platform::Instagram,
        "pic",
        PostStatus::Scheduled,
        Some(now + Duration::hours(1)),
        now,
    )
    .await;

    let mut media_ids = Vec::new();
    for name in ["a.png", "b.png"] {
        media_ids.push(
            insert_media(
                db.pool(),
                &NewMedia {
                    owner: OWNER.to_string(),
                    kind: MediaKind::Image,
                    file_name: name.to_string(),
                    url: format!("http://localhost:8080/media/files/{name}"),
                    thumbnail_url: None,
                    width: None,
                    height: None,
                    size_bytes: 10,
                    content_type: "image/png".to_string(),
                },
                now,
            )
            .await
            .unwrap(),
        );
    }
    // Order is the order given, not insertion order
    let ordered = vec![media_ids[1], media_ids[0]];
    let mut conn = db.pool().acquire().await.unwrap();
    set_post_media(&mut conn, post_id, &ordered).await.unwrap();
    drop(conn);

    let attached: Vec<i64> = get_post_media(db.pool(), post_id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(attached, ordered);

    assert_eq!(delete_post(db.pool(), post_id).await.unwrap(), 1);
    assert!(get_targets_for_post(db.pool(), post_id).await.unwrap().is_empty());
    assert!(get_post_media(db.pool(), post_id).await.unwrap().is_empty());
    // The uploads themselves stay in the library
    assert!(get_media(db.pool(), media_ids[0]).await.unwrap().is_some());
}

#[tokio::test]
async fn test_oauth_state_is_single_use() {
    let (db, _temp_dir) = setup_db().await;
    let now = common::now();

    for (state, created_at) in [("fresh", now), ("old", now - Duration::hours(2))] {
        insert_oauth_state(
            db.pool(),
            &OAuthState {
                state: state.to_string(),
                owner: OWNER.to_string(),
                platform: Platform::Twitter,
                code_verifier: "verifier".to_string(),
                frontend_origin: None,
                created_at,
            },
        )
        .await
        .unwrap();
    }

    assert_eq!(
        delete_expired_oauth_states(db.pool(), now - Duration::minutes(15))
            .await
            .unwrap(),
        1
    );
    assert!(take_oauth_state(db.pool(), "old").await.unwrap().is_none());

    let taken = take_oauth_state(db.pool(), "fresh").await.unwrap().unwrap();
    assert_eq!(taken.owner, OWNER);
    assert_eq!(taken.platform, Platform::Twitter);
    assert_eq!(taken.code_verifier, "verifier");
    assert!(take_oauth_state(db.pool(), "fresh").await.unwrap().is_none());
}
