use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use flightdeck_core::posting::{NormalizedJob, PositionCategory};
use flightdeck_core::source::{NewSource, Region, SourceStatus, Tier};

use crate::common::{TEST_ADMIN_TOKEN, setup_test_app, setup_test_app_no_auth};

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn authed_post(uri: &str) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {TEST_ADMIN_TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn job(url: &str, title: &str, region: Region, position: PositionCategory) -> NormalizedJob {
    NormalizedJob {
        application_url: url.into(),
        source_name: "Qantas".into(),
        title: title.into(),
        company: "Qantas".into(),
        location: Some("Sydney, Australia".into()),
        region,
        position,
        aircraft_type: Some("B737".into()),
        contract_type: None,
        min_total_hours: Some(1500),
        min_pic_hours: None,
        min_type_hours: None,
        license_required: Some("CASA ATPL".into()),
        type_rating_required: true,
        type_rating_provided: false,
        is_entry_level: false,
        visa_sponsorship: false,
        description: None,
        date_posted: None,
        ats_type: None,
    }
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn list_and_get_sources() {
    let app = setup_test_app().await;
    let repo = app.db.source_repo();
    repo.upsert(NewSource::new("Qantas", "https://careers.qantas.com").with_tier(Tier::One))
        .await
        .unwrap();
    repo.upsert(NewSource::new("Rex", "https://rex.example/careers"))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/v1/sources?tier=1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["sources"][0]["name"], "Qantas");
    assert_eq!(json["sources"][0]["frequency_hours"], 3);
    assert_eq!(json["sources"][0]["status"], "active");

    let response = app
        .router
        .oneshot(Request::get("/v1/sources/Rex").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["tier"], 3);
    assert!(json["last_checked_at"].is_null());
}

#[tokio::test]
async fn unknown_source_returns_404() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/v1/sources/Nowhere%20Air").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn invalid_filters_return_400() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/v1/sources?tier=7").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .oneshot(
            Request::get("/v1/postings?region=atlantis")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn write_routes_require_token() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::post("/v1/batches").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .oneshot(
            Request::post("/v1/sources/Qantas/scrape")
                .header("authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn no_admin_token_returns_403() {
    let app = setup_test_app_no_auth().await;

    let response = app
        .router
        .oneshot(
            Request::post("/v1/batches")
                .header("authorization", "Bearer any-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = json_body(response).await;
    assert_eq!(json["error"], "forbidden");
}

#[tokio::test]
async fn read_routes_are_public_without_admin_token() {
    let app = setup_test_app_no_auth().await;

    let response = app
        .router
        .oneshot(Request::get("/v1/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["total"], 0);
    assert_eq!(json["batch_running"], false);
}

#[tokio::test]
async fn scrape_unreachable_source_records_failure() {
    let app = setup_test_app().await;
    app.db
        .source_repo()
        .upsert(NewSource::new("Closed Port Air", "http://127.0.0.1:9/careers"))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(authed_post("/v1/sources/Closed%20Port%20Air/scrape"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "failed");
    assert_eq!(json["dry_run"], false);
    assert_eq!(json["became_error"], false);
    assert!(json["error"].is_string());

    let source = app
        .db
        .source_repo()
        .get("Closed Port Air")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.consecutive_failures, 1);
    assert!(source.last_checked_at.is_some());

    let response = app
        .router
        .oneshot(
            Request::get("/v1/sources/Closed%20Port%20Air/runs")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["runs"][0]["status"], "failed");
}

#[tokio::test]
async fn dry_run_scrape_leaves_source_untouched() {
    let app = setup_test_app().await;
    app.db
        .source_repo()
        .upsert(NewSource::new("Closed Port Air", "http://127.0.0.1:9/careers"))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/sources/Closed%20Port%20Air/scrape?dry_run=true",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["dry_run"], true);

    let source = app
        .db
        .source_repo()
        .get("Closed Port Air")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.consecutive_failures, 0);
    assert!(source.last_checked_at.is_none());
    assert!(
        app.db
            .posting_repo()
            .recent("Closed Port Air", 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn scrape_unknown_source_returns_404() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(authed_post("/v1/sources/Nowhere/scrape"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_is_accepted_and_releases_slot() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(authed_post("/v1/batches?tier=2&retry_errors=true"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["status"], "started");
    assert_eq!(json["tier"], 2);
    assert_eq!(json["retry_errors"], true);

    // Nothing is due, so the background batch finishes almost immediately.
    for _ in 0..50 {
        if !app.state.batch_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!app.state.batch_running());
}

#[tokio::test]
async fn second_batch_conflicts_while_running() {
    let app = setup_test_app().await;
    assert!(app.state.try_start_batch());

    let response = app
        .router
        .oneshot(authed_post("/v1/batches"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = json_body(response).await;
    assert_eq!(json["error"], "conflict");
    app.state.finish_batch();
}

#[tokio::test]
async fn list_postings_filters_by_region() {
    let app = setup_test_app().await;
    app.db
        .posting_repo()
        .upsert(&[
            job(
                "https://careers.qantas.com/jobs/1",
                "B737 First Officer",
                Region::Oceania,
                PositionCategory::FirstOfficer,
            ),
            job(
                "https://careers.qantas.com/jobs/2",
                "A330 Captain",
                Region::Asia,
                PositionCategory::Captain,
            ),
        ])
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(
            Request::get("/v1/postings?region=oceania")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["postings"][0]["title"], "B737 First Officer");
    assert_eq!(json["postings"][0]["min_total_hours"], 1500);
}

#[tokio::test]
async fn stats_count_sources_by_status() {
    let app = setup_test_app().await;
    let repo = app.db.source_repo();
    repo.upsert(NewSource::new("A", "https://a.example")).await.unwrap();
    repo.upsert(NewSource::new("B", "https://b.example")).await.unwrap();

    let response = app
        .router
        .oneshot(Request::get("/v1/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let json = json_body(response).await;
    assert_eq!(json["total"], 2);
    assert_eq!(json["due"], 2);
    assert_eq!(json["by_tier"]["3"], 2);
    assert_eq!(json["by_status"][SourceStatus::Active.as_str()], 2);
}
