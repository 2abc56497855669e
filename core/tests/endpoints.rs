//! Method and URL for the endpoints whose bodies are left as open JSON.

mod common;

use common::{client_with, Scripted, BASE_URL};
use serde_json::json;
use smartwaste_core::{HttpMethod, Period, ProfileUpdate};

#[tokio::test]
async fn open_json_endpoints_hit_the_right_routes() {
    let transport = Scripted::always(200, "{}");
    let client = client_with(transport.clone());
    let body = json!({"binId": "BIN009"});

    client.update_profile(&ProfileUpdate::default()).await.unwrap();
    client.get_bins(&[("status", "full".into()), ("limit", 10.into())]).await.unwrap();
    client.get_bin("BIN001").await.unwrap();
    client.register_bin(&body).await.unwrap();
    client.update_bin_sensor_data("BIN001", &json!({"fill": 40})).await.unwrap();
    client.get_bin_analytics(&[]).await.unwrap();
    client.get_vehicles(&[("status", "active".into())]).await.unwrap();
    client.get_vehicle("WB1234").await.unwrap();
    client.register_vehicle(&json!({"vehicleId": "WB9"})).await.unwrap();
    client.get_vehicle_analytics(&[]).await.unwrap();
    client.optimize_route(&json!({"bins": ["BIN001"]})).await.unwrap();
    client.get_route_analytics(&[("from", "2024-01-01".into())]).await.unwrap();
    client.get_environmental_impact(Period::Monthly).await.unwrap();
    client.get_predictions().await.unwrap();
    client.generate_report(&json!({"kind": "weekly"})).await.unwrap();

    let expected = [
        (HttpMethod::Put, "auth/profile", true),
        (HttpMethod::Get, "bins/collection-priority?status=full&limit=10", false),
        (HttpMethod::Get, "bins/BIN001/status", false),
        (HttpMethod::Post, "bins/register", true),
        (HttpMethod::Put, "bins/BIN001/sensor-data", true),
        (HttpMethod::Get, "bins/analytics", false),
        (HttpMethod::Get, "vehicles/overview?status=active", false),
        (HttpMethod::Get, "vehicles/WB1234/location", false),
        (HttpMethod::Post, "vehicles/register", true),
        (HttpMethod::Get, "vehicles/analytics", false),
        (HttpMethod::Post, "routes/optimize", true),
        (HttpMethod::Get, "routes/analytics?from=2024-01-01", false),
        (HttpMethod::Get, "analytics/environmental-impact?period=monthly", false),
        (HttpMethod::Get, "analytics/predictions", false),
        (HttpMethod::Post, "analytics/reports/generate", true),
    ];

    let sent = transport.requests();
    assert_eq!(sent.len(), expected.len());
    for (req, (method, path, has_body)) in sent.iter().zip(expected) {
        assert_eq!(req.method, method, "{path}");
        assert_eq!(req.url, format!("{BASE_URL}/{path}"));
        assert_eq!(req.body.is_some(), has_body, "{path}");
    }
}
