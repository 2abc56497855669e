//! End-to-end tests against the in-memory mock API over real HTTP.

use serde_json::json;
use smartwaste_core::{
    endpoints, ApiClient, ApiErrorKind, ApiRequest, ClientConfig, CollectBinRequest, FormPart,
    Location, MaintenanceRequest, MemoryStore, NewUser, Period, ReqwestTransport,
    RouteProgressRequest, Session, UserUpdate, VehicleStatusRequest,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();
    let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
    tokio::spawn(mock_server::run(listener));
    format!("http://{addr}/api")
}

async fn client() -> ApiClient {
    let config = ClientConfig::new(&start_server().await).unwrap();
    ApiClient::new(config, ReqwestTransport::new(), MemoryStore::new())
}

#[tokio::test]
async fn health_check_reaches_server_root() {
    let client = client().await;
    assert!(client.health_check().await);
}

#[tokio::test]
async fn health_check_is_false_when_nothing_listens() {
    // Bind then drop to get a port with no listener.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = ClientConfig::new(&format!("http://127.0.0.1:{port}/api")).unwrap();
    let client = ApiClient::from_config(config);

    assert!(!client.health_check().await);
    let err = client.get_active_routes().await.unwrap_err();
    assert!(err.is_network());
}

#[tokio::test]
async fn citizen_flow() {
    let client = client().await;

    let login = client
        .login("citizen@smartwaste.com", "secret1", "citizen")
        .await
        .unwrap();
    assert!(login.success);
    assert_eq!(client.session().unwrap().user.unwrap().user_id, "u3");

    let profile = client.get_profile().await.unwrap();
    assert_eq!(profile.email, "citizen@smartwaste.com");
    assert!(profile.preferences.notifications);

    let nearby = client.get_nearby_bins(22.5726, 88.3639, 1000).await.unwrap();
    let ids: Vec<&str> = nearby.nearby_bins.iter().map(|b| b.bin_id.as_str()).collect();
    assert_eq!(ids, ["BIN001", "BIN002"]);
    assert_eq!(nearby.nearby_bins[1].bin_type, "recyclable");

    let ticket = client
        .report_maintenance(
            "BIN002",
            &MaintenanceRequest::new("damaged", "Lid broken", "u3"),
        )
        .await
        .unwrap();
    assert!(ticket.ticket_id.starts_with("TKT-"));

    let err = client.get_users(&[]).await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Forbidden);
    assert_eq!(err.message(), "Admin access required");
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn driver_flow() {
    let client = client().await;
    client
        .login("driver@smartwaste.com", "secret1", "driver")
        .await
        .unwrap();

    let route = client.get_vehicle_route("WB1234").await.unwrap();
    assert_eq!(route.route_id.as_deref(), Some("R1"));
    assert_eq!(route.assigned_bins, ["BIN001", "BIN002"]);

    let mut status = VehicleStatusRequest::new(Location::new(22.5701, 88.3602), "active");
    status.fuel_level = Some(72);
    let updated = client.update_vehicle_status("WB1234", &status).await.unwrap();
    assert!(updated.updated);

    let collected = client
        .collect_bin(
            "BIN001",
            &CollectBinRequest {
                vehicle_id: "WB1234".to_string(),
                collected_weight: 42.5,
                collection_time: "2024-01-15T10:30:00Z".to_string(),
                driver_id: "u2".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(collected.updated_status, "empty");

    let active = client.get_active_routes().await.unwrap();
    assert_eq!(active.active_routes.len(), 1);
    assert_eq!(active.active_routes[0].current_bin.as_deref(), Some("BIN001"));

    let step = |bin: &str| RouteProgressRequest {
        completed_bin_id: bin.to_string(),
        completion_time: "2024-01-15T10:45:00Z".to_string(),
        collected_weight: 30.0,
        next_bin_id: None,
    };
    let first = client.update_route_progress("R1", &step("BIN001")).await.unwrap();
    assert_eq!(first.route_progress, 50);
    assert_eq!(first.next_bin_details.unwrap().bin_id, "BIN002");

    let last = client.update_route_progress("R1", &step("BIN002")).await.unwrap();
    assert!(last.route_completed);
    assert!(last.next_bin_details.is_none());

    let err = client.get_vehicle_route("NOPE").await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::NotFound);

    let dashboard = client.get_dashboard_analytics(Period::Weekly).await.unwrap();
    assert_eq!(dashboard.today_stats.routes_completed, 1);
}

#[tokio::test]
async fn admin_manages_users() {
    let client = client().await;
    client
        .login("admin@smartwaste.com", "secret1", "admin")
        .await
        .unwrap();

    let created = client
        .create_user(&NewUser {
            name: "Nila".to_string(),
            email: "nila@smartwaste.com".to_string(),
            phone: None,
            password: "secret1".to_string(),
            user_type: "driver".to_string(),
        })
        .await
        .unwrap();

    let update = UserUpdate {
        status: Some("suspended".to_string()),
        ..UserUpdate::default()
    };
    assert!(client.update_user(&created.user_id, &update).await.unwrap().success);

    let suspended = client
        .get_users(&[("status", "suspended".into())])
        .await
        .unwrap();
    assert_eq!(suspended.users.len(), 1);
    assert_eq!(suspended.users[0].user_id, created.user_id);

    assert!(client.delete_user(&created.user_id).await.unwrap().success);
    let err = client.delete_user(&created.user_id).await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::NotFound);
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    let client = client().await;
    let err = client
        .login("citizen@smartwaste.com", "wrong", "citizen")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unauthorized);
    assert_eq!(err.message(), "Invalid email or password");
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn rejected_token_clears_session() {
    let client = client().await;
    client.set_session(Session::new("stale-token"));

    let err = client.get_profile().await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unauthorized);
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn logout_then_protected_call_is_unauthorized() {
    let client = client().await;
    client
        .login("driver@smartwaste.com", "secret1", "driver")
        .await
        .unwrap();
    client.logout().await.unwrap();

    let err = client.get_active_routes().await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unauthorized);
}

#[tokio::test]
async fn batch_over_real_http() {
    let client = client().await;
    client
        .login("driver@smartwaste.com", "secret1", "driver")
        .await
        .unwrap();

    let results = client
        .batch(vec![
            ApiRequest::get("bins/BIN003/status"),
            ApiRequest::get("bins/BIN404/status"),
            ApiRequest::get("analytics/dashboard").query("period", "monthly"),
        ])
        .await;

    assert_eq!(results[0].as_ref().unwrap()["fillPercentage"], 95);
    assert_eq!(results[1].as_ref().unwrap_err().kind(), ApiErrorKind::NotFound);
    assert!(results[2].as_ref().unwrap()["todayStats"].is_object());
}

#[tokio::test]
async fn truncated_unauthorized_body_still_clears_session() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        // Promise 100 bytes, send six, hang up.
        let head = "HTTP/1.1 401 Unauthorized\r\n\
                    content-type: application/json\r\n\
                    content-length: 100\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(b"{\"mess").await.unwrap();
        socket.shutdown().await.unwrap();
    });

    let config = ClientConfig::new(&format!("http://{addr}/api")).unwrap();
    let store = MemoryStore::with_session(Session::new("DEAD"));
    let client = ApiClient::new(config, ReqwestTransport::new(), store);

    let err = client.get_profile().await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unauthorized);
    assert!(!err.message().is_empty());
    assert_eq!(client.token(), None);
}

#[tokio::test]
async fn upload_over_real_http() {
    let client = client().await;
    client
        .login("admin@smartwaste.com", "secret1", "admin")
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bins.csv");
    std::fs::write(&path, "binId,fill\nBIN001,85\n").unwrap();

    let res = client
        .upload_path(&path, endpoints::UPLOAD.template)
        .await
        .unwrap();
    assert_eq!(res["success"], true);
    assert_eq!(res["files"][0]["field"], "file");
    assert_eq!(res["files"][0]["fileName"], "bins.csv");
    assert_eq!(res["files"][0]["size"], 21);

    let part = FormPart::file("file", "notes.txt", b"lid broken".to_vec()).with_mime("text/plain");
    let res = client.upload_file(part, "upload").await.unwrap();
    assert_eq!(res["files"][0]["size"], 10);
}

#[tokio::test]
async fn upload_without_session_is_unauthorized() {
    let client = client().await;
    let part = FormPart::file("file", "a.txt", b"x".to_vec());
    let err = client.upload_file(part, "upload").await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unauthorized);
}

#[tokio::test]
async fn supplementary_routes_are_served() {
    let client = client().await;
    client
        .login("admin@smartwaste.com", "secret1", "admin")
        .await
        .unwrap();

    let registered = client
        .register_bin(&json!({
            "binId": "BIN010",
            "location": {"lat": 22.58, "lng": 88.37},
            "type": "general",
            "capacity": 240
        }))
        .await
        .unwrap();
    assert_eq!(registered["binId"], "BIN010");

    let updated = client
        .update_bin_sensor_data("BIN010", &json!({"fillPercentage": 92}))
        .await
        .unwrap();
    assert_eq!(updated["status"], "full");
    assert_eq!(client.get_bin("BIN010").await.unwrap()["fillPercentage"], 92);
    assert_eq!(client.get_bin_analytics(&[]).await.unwrap()["totalBins"], 4);

    let vehicles = client.get_vehicles(&[("status", "idle".into())]).await.unwrap();
    assert_eq!(vehicles["vehicles"][0]["vehicleId"], "WB5678");
    let location = client.get_vehicle("WB1234").await.unwrap();
    assert!(location["location"]["lat"].is_number());
    client
        .register_vehicle(&json!({"vehicleId": "WB9999", "capacity": 2000}))
        .await
        .unwrap();
    assert_eq!(client.get_vehicle_analytics(&[]).await.unwrap()["totalVehicles"], 3);

    let optimized = client
        .optimize_route(&json!({"bins": ["BIN002", "BIN010", "BIN001"]}))
        .await
        .unwrap();
    assert_eq!(optimized["optimizedOrder"], json!(["BIN010", "BIN001", "BIN002"]));
    assert!(client.get_route_analytics(&[]).await.unwrap()["activeRoutes"].is_number());

    let impact = client.get_environmental_impact(Period::Weekly).await.unwrap();
    assert_eq!(impact["period"], "weekly");
    assert!(client.get_predictions().await.unwrap()["predictions"].is_array());
    let report = client.generate_report(&json!({"type": "weekly"})).await.unwrap();
    assert!(report["reportId"].as_str().unwrap().starts_with("RPT-"));
}
