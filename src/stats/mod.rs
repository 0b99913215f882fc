//! Dashboard, per-platform, upcoming and calendar views.
//!
//! Everything here is a pure function of a [`Snapshot`] of one owner's data.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::{
    list_accounts, list_all_posts, list_sub_accounts_for_owner, list_targets_for_owner, Account,
    AccountStatus, Platform, Post, PostStatus, PostTarget, SubAccount,
};

/// One owner's accounts, posts and targets at a point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub accounts: Vec<Account>,
    pub sub_accounts: Vec<SubAccount>,
    pub posts: Vec<Post>,
    pub targets: Vec<PostTarget>,
}

impl Snapshot {
    pub async fn load(pool: &SqlitePool, owner: &str) -> Result<Self> {
        Ok(Self {
            accounts: list_accounts(pool, owner).await?,
            sub_accounts: list_sub_accounts_for_owner(pool, owner).await?,
            posts: list_all_posts(pool, owner).await?,
            targets: list_targets_for_owner(pool, owner).await?,
        })
    }

    fn post_content(&self) -> HashMap<i64, &Post> {
        self.posts.iter().map(|p| (p.id, p)).collect()
    }

    fn content_for(posts: &HashMap<i64, &Post>, target: &PostTarget) -> String {
        posts
            .get(&target.post_id)
            .map(|p| p.effective_content(target.platform).to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_accounts: usize,
    pub total_posts: usize,
    pub scheduled_posts: usize,
    pub published_targets: usize,
    pub failed_targets: usize,
    /// Published targets over non-draft targets, 0 when there are none.
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformStats {
    pub platform: Platform,
    pub connected_accounts: usize,
    pub scheduled: usize,
    pub published_today: usize,
    pub failed: usize,
    pub success_rate: f64,
    /// Worst effective status among the platform's accounts.
    pub status: Option<AccountStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpcomingPost {
    pub target_id: i64,
    pub post_id: i64,
    pub platform: Platform,
    pub account_name: String,
    pub status: PostStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarEntry {
    pub target_id: i64,
    pub post_id: i64,
    pub platform: Platform,
    pub account_name: String,
    pub status: PostStatus,
    pub at: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub entries: Vec<CalendarEntry>,
}

fn success_rate<'a>(targets: impl Iterator<Item = &'a PostTarget>) -> f64 {
    let (mut published, mut attempted) = (0usize, 0usize);
    for target in targets {
        if target.status != PostStatus::Draft {
            attempted += 1;
        }
        if target.status == PostStatus::Published {
            published += 1;
        }
    }
    if attempted == 0 {
        0.0
    } else {
        published as f64 / attempted as f64
    }
}

#[must_use]
pub fn dashboard(snapshot: &Snapshot) -> DashboardStats {
    let count = |status: PostStatus| snapshot.targets.iter().filter(|t| t.status == status).count();
    DashboardStats {
        total_accounts: snapshot
            .accounts
            .iter()
            .filter(|a| a.status != AccountStatus::Disconnected)
            .count(),
        total_posts: snapshot.posts.len(),
        scheduled_posts: snapshot
            .posts
            .iter()
            .filter(|p| p.status == PostStatus::Scheduled)
            .count(),
        published_targets: count(PostStatus::Published),
        failed_targets: count(PostStatus::Failed),
        success_rate: success_rate(snapshot.targets.iter()),
    }
}

/// Per-platform rollup. "Today" is the calendar day of `now` in `tz`.
#[must_use]
pub fn platform_rollup(snapshot: &Snapshot, now: DateTime<Utc>, tz: Tz) -> Vec<PlatformStats> {
    let parent_status: HashMap<i64, AccountStatus> =
        snapshot.accounts.iter().map(|a| (a.id, a.status)).collect();
    let today = now.with_timezone(&tz).date_naive();

    let live_subs: Vec<(&SubAccount, AccountStatus)> = snapshot
        .sub_accounts
        .iter()
        .filter_map(|s| {
            let parent = *parent_status.get(&s.account_id)?;
            let effective = s.effective_status(parent);
            (effective != AccountStatus::Disconnected).then_some((s, effective))
        })
        .collect();

    let platforms: BTreeSet<Platform> = live_subs
        .iter()
        .map(|(s, _)| s.platform)
        .chain(snapshot.targets.iter().map(|t| t.platform))
        .collect();

    platforms
        .into_iter()
        .map(|platform| {
            let subs: Vec<AccountStatus> = live_subs
                .iter()
                .filter(|(s, _)| s.platform == platform)
                .map(|(_, status)| *status)
                .collect();
            let targets: Vec<&PostTarget> = snapshot
                .targets
                .iter()
                .filter(|t| t.platform == platform)
                .collect();

            PlatformStats {
                platform,
                connected_accounts: subs.len(),
                scheduled: targets
                    .iter()
                    .filter(|t| t.status == PostStatus::Scheduled)
                    .count(),
                published_today: targets
                    .iter()
                    .filter(|t| {
                        t.status == PostStatus::Published
                            && t.published_at
                                .is_some_and(|at| at.with_timezone(&tz).date_naive() == today)
                    })
                    .count(),
                failed: targets
                    .iter()
                    .filter(|t| t.status == PostStatus::Failed)
                    .count(),
                success_rate: success_rate(targets.iter().copied()),
                status: subs.into_iter().max(),
            }
        })
        .collect()
}

/// Targets waiting to go out, soonest first. Unscheduled (publish-now)
/// targets come before scheduled ones.
#[must_use]
pub fn upcoming(snapshot: &Snapshot, limit: usize) -> Vec<UpcomingPost> {
    let posts = snapshot.post_content();
    let mut pending: Vec<&PostTarget> = snapshot
        .targets
        .iter()
        .filter(|t| matches!(t.status, PostStatus::Scheduled | PostStatus::Publishing))
        .collect();
    pending.sort_by_key(|t| (t.scheduled_for, t.id));

    pending
        .into_iter()
        .take(limit)
        .map(|t| UpcomingPost {
            target_id: t.id,
            post_id: t.post_id,
            platform: t.platform,
            account_name: t.account_name.clone(),
            status: t.status,
            scheduled_for: t.scheduled_for,
            content: Snapshot::content_for(&posts, t),
        })
        .collect()
}

/// Targets grouped by local day in `tz`, days ascending.
///
/// A target is placed by its schedule, falling back to when it was
/// published, then when it was created. `from`/`to` bound the days
/// inclusively.
#[must_use]
pub fn calendar(
    snapshot: &Snapshot,
    tz: Tz,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Vec<CalendarDay> {
    let posts = snapshot.post_content();
    let mut days: BTreeMap<NaiveDate, Vec<CalendarEntry>> = BTreeMap::new();

    for target in &snapshot.targets {
        let at = target
            .scheduled_for
            .or(target.published_at)
            .unwrap_or(target.created_at);
        let date = at.with_timezone(&tz).date_naive();
        if from.is_some_and(|f| date < f) || to.is_some_and(|t| date > t) {
            continue;
        }
        days.entry(date).or_default().push(CalendarEntry {
            target_id: target.id,
            post_id: target.post_id,
            platform: target.platform,
            account_name: target.account_name.clone(),
            status: target.status,
            at,
            content: Snapshot::content_for(&posts, target),
        });
    }

    days.into_iter()
        .map(|(date, mut entries)| {
            entries.sort_by_key(|e| (e.at, e.target_id));
            CalendarDay { date, entries }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ChannelOverrides;
    use chrono::{Duration, TimeZone};
    use sqlx::types::Json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn account(id: i64, status: AccountStatus) -> Account {
        Account {
            id,
            owner: "u".into(),
            platform: Platform::Facebook,
            external_user_id: format!("ext{id}"),
            display_name: format!("Account {id}"),
            access_token: "t".into(),
            refresh_token: None,
            token_expires_at: None,
            status,
            last_error: None,
            connected_at: now(),
            last_refreshed_at: now(),
            updated_at: now(),
        }
    }

    fn sub(id: i64, account_id: i64, platform: Platform, status: AccountStatus) -> SubAccount {
        SubAccount {
            id,
            account_id,
            external_id: format!("page{id}"),
            name: format!("Page {id}"),
            platform,
            follower_count: 0,
            can_post: true,
            can_schedule: true,
            can_upload_media: true,
            max_media_count: 10,
            max_characters: 1000,
            status,
            access_token: None,
            created_at: now(),
        }
    }

    fn post(id: i64, status: PostStatus) -> Post {
        Post {
            id,
            owner: "u".into(),
            content: format!("post {id}"),
            channel_overrides: Json(ChannelOverrides::new()),
            platform_options: None,
            status,
            scheduled_for: None,
            created_at: now(),
            updated_at: now(),
            published_at: None,
        }
    }

    fn target(
        id: i64,
        post_id: i64,
        platform: Platform,
        status: PostStatus,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> PostTarget {
        PostTarget {
            id,
            post_id,
            sub_account_id: Some(1),
            platform,
            account_name: "Page".into(),
            status,
            published_url: None,
            published_at: (status == PostStatus::Published).then(now),
            platform_post_id: None,
            error: None,
            scheduled_for,
            retry_count: 0,
            next_attempt_at: None,
            claimed_at: None,
            created_at: now() - Duration::days(1),
            updated_at: now(),
        }
    }

    #[test]
    fn test_dashboard_counts_and_success_rate() {
        let snapshot = Snapshot {
            accounts: vec![
                account(1, AccountStatus::Healthy),
                account(2, AccountStatus::Disconnected),
            ],
            sub_accounts: vec![],
            posts: vec![post(1, PostStatus::Scheduled), post(2, PostStatus::Failed)],
            targets: vec![
                target(1, 1, Platform::Facebook, PostStatus::Published, None),
                target(2, 1, Platform::Instagram, PostStatus::Failed, None),
                target(3, 2, Platform::Twitter, PostStatus::Scheduled, None),
                target(4, 2, Platform::Twitter, PostStatus::Draft, None),
            ],
        };

        let stats = dashboard(&snapshot);
        assert_eq!(stats.total_accounts, 1);
        assert_eq!(stats.total_posts, 2);
        assert_eq!(stats.scheduled_posts, 1);
        assert_eq!(stats.published_targets, 1);
        assert_eq!(stats.failed_targets, 1);
        assert!((stats.success_rate - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dashboard_empty_success_rate_is_zero() {
        assert!(dashboard(&Snapshot::default()).success_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_platform_rollup_uses_worst_effective_status() {
        let snapshot = Snapshot {
            accounts: vec![
                account(1, AccountStatus::Warning),
                account(2, AccountStatus::Healthy),
            ],
            sub_accounts: vec![
                sub(1, 1, Platform::Facebook, AccountStatus::Healthy),
                sub(2, 2, Platform::Facebook, AccountStatus::Healthy),
                sub(3, 2, Platform::Instagram, AccountStatus::Healthy),
            ],
            posts: vec![post(1, PostStatus::Publishing)],
            targets: vec![
                target(1, 1, Platform::Facebook, PostStatus::Published, None),
                target(2, 1, Platform::Instagram, PostStatus::Scheduled, None),
            ],
        };

        let rollup = platform_rollup(&snapshot, now(), chrono_tz::UTC);
        assert_eq!(rollup.len(), 2);

        let facebook = &rollup[0];
        assert_eq!(facebook.platform, Platform::Facebook);
        assert_eq!(facebook.connected_accounts, 2);
        assert_eq!(facebook.published_today, 1);
        assert_eq!(facebook.status, Some(AccountStatus::Warning));

        let instagram = &rollup[1];
        assert_eq!(instagram.scheduled, 1);
        assert_eq!(instagram.status, Some(AccountStatus::Healthy));
    }

    #[test]
    fn test_upcoming_orders_unscheduled_first_then_by_time() {
        let later = now() + Duration::hours(5);
        let sooner = now() + Duration::hours(1);
        let snapshot = Snapshot {
            posts: vec![post(1, PostStatus::Scheduled)],
            targets: vec![
                target(1, 1, Platform::Facebook, PostStatus::Scheduled, Some(later)),
                target(2, 1, Platform::Twitter, PostStatus::Scheduled, Some(sooner)),
                target(3, 1, Platform::Threads, PostStatus::Publishing, None),
                target(4, 1, Platform::Threads, PostStatus::Published, None),
                target(5, 1, Platform::Facebook, PostStatus::Scheduled, Some(sooner)),
            ],
            ..Snapshot::default()
        };

        let ids: Vec<i64> = upcoming(&snapshot, 10).iter().map(|u| u.target_id).collect();
        assert_eq!(ids, vec![3, 2, 5, 1]);
        assert_eq!(upcoming(&snapshot, 2).len(), 2);
        assert_eq!(upcoming(&snapshot, 1)[0].content, "post 1");
    }

    #[test]
    fn test_calendar_buckets_by_local_day() {
        // 23:30 UTC on the 10th is already the 11th in Tokyo
        let late = Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();
        let snapshot = Snapshot {
            posts: vec![post(1, PostStatus::Scheduled)],
            targets: vec![
                target(1, 1, Platform::Facebook, PostStatus::Scheduled, Some(late)),
                target(2, 1, Platform::Twitter, PostStatus::Published, None),
            ],
            ..Snapshot::default()
        };

        let utc = calendar(&snapshot, chrono_tz::UTC, None, None);
        assert_eq!(utc.len(), 1);
        assert_eq!(utc[0].entries.len(), 2);

        let tokyo = calendar(&snapshot, chrono_tz::Asia::Tokyo, None, None);
        assert_eq!(tokyo.len(), 2);
        assert_eq!(tokyo[0].date, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(tokyo[1].date, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!(tokyo[1].entries[0].target_id, 1);

        let bounded = calendar(
            &snapshot,
            chrono_tz::Asia::Tokyo,
            NaiveDate::from_ymd_opt(2024, 3, 11),
            None,
        );
        assert_eq!(bounded.len(), 1);
    }
}
