use chrono::{TimeDelta, Utc};
use flightdeck_core::ats::{AtsType, Confidence};
use flightdeck_core::error::AppError;
use flightdeck_core::source::{NewSource, Region, SourceFilter, SourcePatch, SourceStatus, Tier};
use flightdeck_db::SourceRepository;

use crate::common::setup_test_db;

fn checked_hours_ago(hours: i64) -> SourcePatch {
    SourcePatch {
        last_checked_at: Some(Utc::now() - TimeDelta::hours(hours)),
        ..SourcePatch::default()
    }
}

#[tokio::test]
async fn upsert_and_get_source() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    let created = repo
        .upsert(
            NewSource::new("Ryanair", "https://careers.ryanair.com/pilots")
                .with_tier(Tier::One)
                .with_region(Region::Europe)
                .with_country("Ireland")
                .with_codes(Some("FR".into()), Some("RYR".into())),
        )
        .await
        .unwrap();

    assert_eq!(created.name, "Ryanair");
    assert_eq!(created.tier, Tier::One);
    assert_eq!(created.frequency_hours, 3);
    assert_eq!(created.status, SourceStatus::Active);
    assert!(created.last_checked_at.is_none());
    assert!(!created.ats_override);

    let fetched = repo.get("Ryanair").await.unwrap().expect("source exists");
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.region, Some(Region::Europe));
    assert_eq!(fetched.iata_code.as_deref(), Some("FR"));
    assert_eq!(fetched.icao_code.as_deref(), Some("RYR"));

    assert!(repo.get("Nobody Air").await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_with_pinned_ats_sets_override() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    let source = repo
        .upsert(NewSource::new("Emirates", "https://emirates.example/careers").with_ats_type(AtsType::Taleo))
        .await
        .unwrap();

    assert_eq!(source.ats_type, Some(AtsType::Taleo));
    assert_eq!(source.ats_confidence, Some(Confidence::High));
    assert!(source.ats_override);
}

#[tokio::test]
async fn upsert_existing_keeps_schedule_and_health() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    let first = repo
        .upsert(NewSource::new("Wizz Air", "https://wizzair.example/jobs").with_region(Region::Europe))
        .await
        .unwrap();

    let checked = Utc::now() - TimeDelta::hours(2);
    repo.update(
        "Wizz Air",
        &SourcePatch {
            last_checked_at: Some(checked),
            consecutive_failures: Some(3),
            ..SourcePatch::default()
        },
    )
    .await
    .unwrap();

    let second = repo
        .upsert(NewSource::new("Wizz Air", "https://wizzair.example/careers/pilots"))
        .await
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.url, "https://wizzair.example/careers/pilots");
    assert_eq!(second.region, Some(Region::Europe));
    assert_eq!(second.consecutive_failures, 3);
    assert!(second.last_checked_at.is_some());
    assert_eq!(repo.list(SourceFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn due_sources_ordered_by_tier_then_overdue() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    for (name, tier) in [
        ("Tier3 Fresh", Tier::Three),
        ("Tier2 Never", Tier::Two),
        ("Tier2 Overdue", Tier::Two),
        ("Tier1 Recent", Tier::One),
    ] {
        repo.upsert(
            NewSource::new(name, format!("https://{}.example/jobs", name.replace(' ', "-")))
                .with_tier(tier),
        )
        .await
        .unwrap();
    }
    // Tier 2 defaults to a 12h interval; 20h ago is overdue.
    repo.update("Tier2 Overdue", &checked_hours_ago(20)).await.unwrap();
    // Tier 1 defaults to 3h; checked an hour ago, not due.
    repo.update("Tier1 Recent", &checked_hours_ago(1)).await.unwrap();

    let due = repo.list_due(None, false, Utc::now()).await.unwrap();
    let names: Vec<_> = due.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Tier2 Never", "Tier2 Overdue", "Tier3 Fresh"]);

    let tier_two = repo.list_due(Some(Tier::Two), false, Utc::now()).await.unwrap();
    assert_eq!(tier_two.len(), 2);
}

#[tokio::test]
async fn error_sources_need_opt_in_and_retry_budget() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    for name in ["Broken", "Given Up", "Paused"] {
        repo.upsert(NewSource::new(name, format!("https://{}.example", name.replace(' ', "-"))))
            .await
            .unwrap();
    }
    for (name, failures) in [("Broken", 5), ("Given Up", 10)] {
        repo.update(
            name,
            &SourcePatch {
                status: Some(SourceStatus::Error),
                consecutive_failures: Some(failures),
                last_checked_at: Some(Utc::now()),
                ..SourcePatch::default()
            },
        )
        .await
        .unwrap();
    }
    repo.update(
        "Paused",
        &SourcePatch {
            status: Some(SourceStatus::Inactive),
            ..SourcePatch::default()
        },
    )
    .await
    .unwrap();

    assert!(repo.list_due(None, false, Utc::now()).await.unwrap().is_empty());

    let retry = repo.list_due(None, true, Utc::now()).await.unwrap();
    let names: Vec<_> = retry.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Broken"]);
}

#[tokio::test]
async fn update_sets_and_clears_last_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);
    repo.upsert(NewSource::new("Qantas", "https://qantas.example/careers"))
        .await
        .unwrap();

    repo.update(
        "Qantas",
        &SourcePatch {
            status: Some(SourceStatus::Error),
            consecutive_failures: Some(5),
            last_error: Some(Some("HTTP 503".into())),
            ..SourcePatch::default()
        },
    )
    .await
    .unwrap();

    let broken = repo.get("Qantas").await.unwrap().unwrap();
    assert_eq!(broken.status, SourceStatus::Error);
    assert_eq!(broken.last_error.as_deref(), Some("HTTP 503"));

    // An unrelated patch leaves the error alone.
    repo.update("Qantas", &checked_hours_ago(1)).await.unwrap();
    let still = repo.get("Qantas").await.unwrap().unwrap();
    assert_eq!(still.last_error.as_deref(), Some("HTTP 503"));

    repo.update("Qantas", &SourcePatch::reset()).await.unwrap();
    let reset = repo.get("Qantas").await.unwrap().unwrap();
    assert_eq!(reset.status, SourceStatus::Active);
    assert_eq!(reset.consecutive_failures, 0);
    assert!(reset.last_error.is_none());
}

#[tokio::test]
async fn update_unknown_source_is_not_found() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    let err = repo
        .update("Ghost Airways", &SourcePatch::reset())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn list_filters_and_stats() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    repo.upsert(NewSource::new("A", "https://a.example").with_tier(Tier::One))
        .await
        .unwrap();
    repo.upsert(NewSource::new("B", "https://b.example").with_tier(Tier::Three))
        .await
        .unwrap();
    repo.upsert(
        NewSource::new("C", "https://c.example")
            .with_tier(Tier::Three)
            .with_status(SourceStatus::PendingReview),
    )
    .await
    .unwrap();

    let tier_three = repo
        .list(SourceFilter {
            tier: Some(Tier::Three),
            ..SourceFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(tier_three.len(), 2);

    let pending = repo
        .list(SourceFilter {
            status: Some(SourceStatus::PendingReview),
            ..SourceFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "C");

    let stats = repo.stats(Utc::now()).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_tier.get(&1), Some(&1));
    assert_eq!(stats.by_tier.get(&3), Some(&2));
    assert_eq!(stats.by_status.get("active"), Some(&2));
    assert_eq!(stats.by_status.get("pending_review"), Some(&1));
    assert_eq!(stats.due, 2);
}
