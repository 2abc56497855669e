//! Failure classification, deadlines, cancellation and concurrency.

mod common;

use std::time::Duration;

use common::{client_with, config, Manual, Scripted};
use smartwaste_core::{
    ApiClient, ApiErrorKind, ApiRequest, FormPart, HttpBody, HttpResponse, Location, MemoryStore,
    Period, Session, TransportError, VehicleStatusRequest,
};
use tokio_util::sync::CancellationToken;

const DASHBOARD: &str = r#"{
    "todayStats": {
        "binsCollected": 42, "wasteCollected": 1250, "fuelUsed": 85.5,
        "routesCompleted": 6, "efficiency": 87
    },
    "alerts": {"urgentBins": 3, "lowBattery": 1, "maintenanceNeeded": 2},
    "trends": {"efficiencyTrend": "up", "wasteGeneration": "stable"}
}"#;

#[tokio::test]
async fn unparseable_500_is_server_error_with_fallback_message() {
    let client = client_with(Scripted::always(500, "<html>Bad Gateway</html>"));

    let err = client.get_active_routes().await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::ServerError);
    assert_eq!(err.status(), Some(500));
    assert!(!err.message().is_empty());
}

#[tokio::test]
async fn status_codes_are_classified() {
    for (status, kind) in [
        (400, ApiErrorKind::Validation),
        (403, ApiErrorKind::Forbidden),
        (404, ApiErrorKind::NotFound),
        (502, ApiErrorKind::ServerError),
        (409, ApiErrorKind::Unknown),
    ] {
        let client = client_with(Scripted::always(status, ""));
        let err = client.get_predictions().await.unwrap_err();
        assert_eq!(err.kind(), kind, "status {status}");
        assert!(!err.message().is_empty(), "status {status}");
    }
}

#[tokio::test]
async fn forbidden_does_not_clear_session() {
    let client = client_with(Scripted::always(403, r#"{"message":"Admins only"}"#));
    client.set_session(Session::new("T1"));

    let err = client.get_users(&[]).await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Forbidden);
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn unexpected_success_shape_is_unknown_and_keeps_status() {
    let client = client_with(Scripted::always(200, r#"{"routes":"nope"}"#));
    let err = client.get_active_routes().await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unknown);
    assert_eq!(err.status(), Some(200));
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out_without_touching_session() {
    let (transport, mut pending) = Manual::new();
    let config = config().with_timeout(Duration::from_secs(3)).unwrap();
    let client = ApiClient::new(config, transport, MemoryStore::with_session(Session::new("T1")));

    let started = tokio::time::Instant::now();
    let call = tokio::spawn({
        let client = client.clone();
        async move { client.get_profile().await }
    });

    // Hold the request open and never answer it.
    let held = pending.recv().await.unwrap();
    let err = call.await.unwrap().unwrap_err();

    assert!(err.is_network());
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(client.token().as_deref(), Some("T1"));
    drop(held);
}

#[tokio::test]
async fn cancelled_request_reports_cancelled_and_keeps_session() {
    let (transport, mut pending) = Manual::new();
    let client = ApiClient::new(config(), transport, MemoryStore::with_session(Session::new("T1")));
    let cancel = CancellationToken::new();

    let call = tokio::spawn({
        let client = client.clone();
        let cancel = cancel.clone();
        async move {
            client
                .request_cancellable::<serde_json::Value>(ApiRequest::get("auth/profile"), &cancel)
                .await
        }
    });

    let held = pending.recv().await.unwrap();
    cancel.cancel();
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Cancelled);

    // A 401 arriving after cancellation must not be applied.
    held.respond(401, "");
    assert_eq!(client.token().as_deref(), Some("T1"));
}

#[tokio::test]
async fn unauthorized_clears_a_session_installed_mid_flight() {
    let (transport, mut pending) = Manual::new();
    let client = ApiClient::new(config(), transport, MemoryStore::new());

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.get_profile().await }
    });
    let held = pending.recv().await.unwrap();
    assert_eq!(held.request.header("authorization"), None);

    // A login lands while the anonymous request is still out.
    client.set_session(Session::new("T2"));
    held.respond(401, "");

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unauthorized);
    assert!(client.session().is_none());
}

#[tokio::test]
async fn upload_sends_multipart_with_bearer_and_no_json_content_type() {
    let transport = Scripted::always(200, r#"{"success":true,"files":[]}"#);
    let client = client_with(transport.clone());
    client.set_session(Session::new("T1"));

    let file = FormPart::file("file", "report.csv", b"bin,fill\nBIN001,85\n".to_vec())
        .with_mime("text/csv");
    let res = client.upload_file(file.clone(), "upload").await.unwrap();
    assert_eq!(res["success"], true);

    let sent = transport.last();
    assert_eq!(sent.method, smartwaste_core::HttpMethod::Post);
    assert_eq!(sent.url, format!("{}/upload", common::BASE_URL));
    assert_eq!(sent.header("authorization"), Some("Bearer T1"));
    assert_eq!(sent.header("content-type"), None);
    assert_eq!(sent.body, Some(HttpBody::Multipart(vec![file])));
}

#[tokio::test]
async fn upload_goes_through_the_unauthorized_pipeline() {
    let client = client_with(Scripted::always(401, r#"{"message":"Token expired"}"#));
    client.set_session(Session::new("T1"));

    let file = FormPart::file("file", "a.txt", b"x".to_vec());
    let err = client.upload_file(file, "upload").await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unauthorized);
    assert_eq!(err.message(), "Token expired");
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn upload_of_missing_path_fails_before_sending() {
    let transport = Scripted::always(200, "{}");
    let client = client_with(transport.clone());
    let dir = tempfile::tempdir().unwrap();

    let err = client
        .upload_path(dir.path().join("absent.csv"), "upload")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unknown);
    assert!(err.message().contains("absent.csv"));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn already_cancelled_token_short_circuits() {
    let transport = Scripted::always(401, "");
    let client = client_with(transport.clone());
    client.set_session(Session::new("T1"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client
        .request_cancellable::<serde_json::Value>(ApiRequest::get("routes/active"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Cancelled);
    assert!(transport.requests().is_empty());
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn concurrent_calls_complete_out_of_order() {
    let (transport, mut pending) = Manual::new();
    let client = ApiClient::new(config(), transport, MemoryStore::with_session(Session::new("T1")));

    let status_call = tokio::spawn({
        let client = client.clone();
        async move {
            let body = VehicleStatusRequest::new(Location::new(22.57, 88.36), "active");
            client.update_vehicle_status("WB1234", &body).await
        }
    });
    let first = pending.recv().await.unwrap();

    let dashboard_call = tokio::spawn({
        let client = client.clone();
        async move { client.get_dashboard_analytics(Period::Daily).await }
    });
    let second = pending.recv().await.unwrap();

    assert!(first.request.url.ends_with("/vehicles/WB1234/status"));
    assert!(second.request.url.ends_with("/analytics/dashboard?period=daily"));

    // Answer the later call first.
    second.respond(200, DASHBOARD);
    let dashboard = dashboard_call.await.unwrap().unwrap();
    assert_eq!(dashboard.today_stats.bins_collected, 42);
    assert_eq!(dashboard.alerts.urgent_bins, 3);

    first.respond(200, r#"{"success":true,"updated":true}"#);
    let status = status_call.await.unwrap().unwrap();
    assert!(status.success && status.updated);
}

#[tokio::test]
async fn batch_keeps_order_and_isolates_failures() {
    let transport = Scripted::new(|req| {
        if req.url.ends_with("/bins/BIN404/status") {
            Ok(HttpResponse::new(404, ""))
        } else if req.url.ends_with("/bins/BIN001/status") {
            Ok(HttpResponse::new(200, r#"{"binId":"BIN001"}"#))
        } else {
            Err(TransportError::Timeout)
        }
    });
    let client = client_with(transport);

    let results = client
        .batch(vec![
            ApiRequest::get("bins/BIN001/status"),
            ApiRequest::get("bins/BIN404/status"),
            ApiRequest::get("bins/BIN777/status"),
        ])
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap()["binId"], "BIN001");
    assert_eq!(results[1].as_ref().unwrap_err().kind(), ApiErrorKind::NotFound);
    assert!(results[2].as_ref().unwrap_err().is_network());
}

#[tokio::test]
async fn batch_respects_concurrency_cap() {
    let (transport, mut pending) = Manual::new();
    let config = config().with_max_concurrent_requests(2).unwrap();
    let client = ApiClient::new(config, transport, MemoryStore::new());

    let run = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .batch((0..3).map(|i| ApiRequest::get(&format!("bins/BIN00{i}/status"))).collect())
                .await
        }
    });

    let a = pending.recv().await.unwrap();
    let b = pending.recv().await.unwrap();
    tokio::task::yield_now().await;
    assert!(pending.try_recv().is_err(), "third request must wait for a free slot");

    a.respond(200, "{}");
    let c = pending.recv().await.unwrap();
    b.respond(200, "{}");
    c.respond(200, "{}");

    let results = run.await.unwrap();
    assert!(results.iter().all(Result::is_ok));
}

#[tokio::test]
async fn health_check_strips_api_segment_and_sends_no_credentials() {
    let transport = Scripted::always(200, "ok");
    let client = client_with(transport.clone());
    client.set_session(Session::new("T1"));

    assert!(client.health_check().await);
    let sent = transport.last();
    assert_eq!(sent.url, "http://mock.local/health");
    assert_eq!(sent.header("authorization"), None);
}

#[tokio::test]
async fn health_check_ignores_unauthorized() {
    let client = client_with(Scripted::always(401, ""));
    client.set_session(Session::new("T1"));

    assert!(!client.health_check().await);
    assert!(client.is_authenticated());
}
