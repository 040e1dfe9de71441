use chrono::{NaiveDate, TimeDelta, Utc};
use flightdeck_core::ats::AtsType;
use flightdeck_core::error::ExtractionKind;
use flightdeck_core::posting::{NormalizedJob, PositionCategory, PostingFilter};
use flightdeck_core::run::{NewRunRecord, RunStatus};
use flightdeck_core::source::{NewSource, Region};
use flightdeck_db::{PostingRepository, SourceRepository};

use crate::common::setup_test_db;

fn job(url: &str, title: &str, region: Region, position: PositionCategory) -> NormalizedJob {
    NormalizedJob {
        application_url: url.into(),
        source_name: "Lufthansa".into(),
        title: title.into(),
        company: "Lufthansa".into(),
        location: Some("Frankfurt, Germany".into()),
        region,
        position,
        aircraft_type: Some("A320".into()),
        contract_type: None,
        min_total_hours: None,
        min_pic_hours: None,
        min_type_hours: None,
        license_required: Some("EASA ATPL".into()),
        type_rating_required: false,
        type_rating_provided: true,
        is_entry_level: position == PositionCategory::Cadet,
        visa_sponsorship: false,
        description: None,
        date_posted: NaiveDate::from_ymd_opt(2026, 3, 1),
        ats_type: Some(AtsType::Workday),
    }
}

fn run(source_id: uuid::Uuid, status: RunStatus, minutes_ago: i64) -> NewRunRecord {
    let started_at = Utc::now() - TimeDelta::minutes(minutes_ago);
    NewRunRecord {
        source_id,
        source_name: "Lufthansa".into(),
        ats_type: AtsType::Workday,
        strategy: Some("workday".into()),
        status,
        jobs_found: 3,
        jobs_new: 1,
        jobs_updated: 2,
        duration_ms: 1840,
        error_kind: (status == RunStatus::Failed).then_some(ExtractionKind::Network),
        error_message: (status == RunStatus::Failed).then(|| "connection reset".to_string()),
        content_hash: Some("ab".repeat(32)),
        started_at,
        completed_at: started_at + TimeDelta::seconds(2),
    }
}

#[tokio::test]
async fn upsert_counts_inserts_and_updates() {
    let (pool, _container) = setup_test_db().await;
    let repo = PostingRepository::new(pool);

    let first = vec![
        job("https://lh.example/jobs/1", "First Officer A320", Region::Europe, PositionCategory::FirstOfficer),
        job("https://lh.example/jobs/2", "Cadet Pilot Programme", Region::Europe, PositionCategory::Cadet),
    ];
    let counts = repo.upsert(&first).await.unwrap();
    assert_eq!(counts.inserted, 2);
    assert_eq!(counts.updated, 0);

    let mut second = first.clone();
    second[0].title = "Senior First Officer A320".into();
    second.push(job("https://lh.example/jobs/3", "Captain A350", Region::Europe, PositionCategory::Captain));
    let counts = repo.upsert(&second).await.unwrap();
    assert_eq!(counts.inserted, 1);
    assert_eq!(counts.updated, 2);

    let active = repo.list_active(&PostingFilter::default()).await.unwrap();
    assert_eq!(active.len(), 3);
    let renamed = active
        .iter()
        .find(|p| p.job.application_url == "https://lh.example/jobs/1")
        .unwrap();
    assert_eq!(renamed.job.title, "Senior First Officer A320");
    assert_eq!(renamed.job.ats_type, Some(AtsType::Workday));
}

#[tokio::test]
async fn repeat_upsert_takes_latest_fields_and_restamps() {
    let (pool, _container) = setup_test_db().await;
    let repo = PostingRepository::new(pool);
    let url = "https://lh.example/jobs/7";

    let mut first = job(url, "First Officer A320", Region::Europe, PositionCategory::FirstOfficer);
    first.min_total_hours = Some(1500);
    first.contract_type = Some("Permanent".into());
    first.description = Some("Based in Frankfurt".into());
    repo.upsert(std::slice::from_ref(&first)).await.unwrap();
    let before = repo.list_active(&PostingFilter::default()).await.unwrap();
    assert_eq!(before.len(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut second = job(url, "Senior First Officer A321", Region::Europe, PositionCategory::FirstOfficer);
    second.location = None;
    second.aircraft_type = None;
    second.license_required = None;
    second.date_posted = None;
    second.ats_type = None;
    second.type_rating_provided = false;
    let counts = repo.upsert(std::slice::from_ref(&second)).await.unwrap();
    assert_eq!(counts.updated, 1);

    let after = repo.list_active(&PostingFilter::default()).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, before[0].id);
    assert!(after[0].date_scraped > before[0].date_scraped);
    assert_eq!(after[0].job, second);
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let (pool, _container) = setup_test_db().await;
    let repo = PostingRepository::new(pool);

    let counts = repo.upsert(&[]).await.unwrap();
    assert_eq!(counts.total(), 0);
}

#[tokio::test]
async fn deactivate_then_rescrape_reactivates() {
    let (pool, _container) = setup_test_db().await;
    let repo = PostingRepository::new(pool);
    let url = "https://lh.example/jobs/9";
    let batch = vec![job(url, "First Officer B787", Region::Europe, PositionCategory::FirstOfficer)];
    repo.upsert(&batch).await.unwrap();

    assert!(repo.deactivate(url).await.unwrap());
    assert!(!repo.deactivate(url).await.unwrap());
    assert!(repo.list_active(&PostingFilter::default()).await.unwrap().is_empty());

    let counts = repo.upsert(&batch).await.unwrap();
    assert_eq!(counts.updated, 1);
    assert_eq!(repo.list_active(&PostingFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn list_active_applies_filters_and_limit() {
    let (pool, _container) = setup_test_db().await;
    let repo = PostingRepository::new(pool);

    repo.upsert(&[
        job("https://x.example/1", "Cadet Pilot", Region::Europe, PositionCategory::Cadet),
        job("https://x.example/2", "Captain B737", Region::Europe, PositionCategory::Captain),
        job("https://x.example/3", "Captain A330", Region::Asia, PositionCategory::Captain),
    ])
    .await
    .unwrap();

    let captains = repo
        .list_active(&PostingFilter {
            position: Some(PositionCategory::Captain),
            ..PostingFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(captains.len(), 2);

    let asia = repo
        .list_active(&PostingFilter {
            region: Some(Region::Asia),
            ..PostingFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(asia.len(), 1);
    assert_eq!(asia[0].job.title, "Captain A330");

    let entry = repo
        .list_active(&PostingFilter {
            entry_level: Some(true),
            ..PostingFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(entry.len(), 1);
    assert!(entry[0].job.is_entry_level);

    let limited = repo
        .list_active(&PostingFilter {
            limit: 2,
            ..PostingFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn run_log_is_newest_first() {
    let (pool, _container) = setup_test_db().await;
    let source = SourceRepository::new(pool.clone())
        .upsert(NewSource::new("Lufthansa", "https://lh.example/careers"))
        .await
        .unwrap();
    let repo = PostingRepository::new(pool);

    repo.append_run(&run(source.id, RunStatus::Failed, 30)).await.unwrap();
    repo.append_run(&run(source.id, RunStatus::Success, 5)).await.unwrap();

    let runs = repo.recent("Lufthansa", 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run.status, RunStatus::Success);
    assert_eq!(runs[1].run.status, RunStatus::Failed);
    assert_eq!(runs[1].run.error_kind, Some(ExtractionKind::Network));
    assert_eq!(runs[1].run.error_message.as_deref(), Some("connection reset"));
    assert_eq!(runs[0].run.duration_ms, 1840);

    assert_eq!(repo.recent("Lufthansa", 1).await.unwrap().len(), 1);
    assert!(repo.recent("Unknown", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn run_log_rejects_mutation() {
    let (pool, _container) = setup_test_db().await;
    let source = SourceRepository::new(pool.clone())
        .upsert(NewSource::new("Lufthansa", "https://lh.example/careers"))
        .await
        .unwrap();
    let repo = PostingRepository::new(pool.clone());
    repo.append_run(&run(source.id, RunStatus::Success, 1)).await.unwrap();

    let update = sqlx::query("UPDATE scrape_runs SET jobs_found = 0")
        .execute(&pool)
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM scrape_runs").execute(&pool).await;
    assert!(delete.is_err());

    assert_eq!(repo.recent("Lufthansa", 10).await.unwrap().len(), 1);
}
