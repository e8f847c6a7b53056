use clearpath_infra::config::AppConfig;
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod (in-memory store), bound to an ephemeral port.
        let app = clearpath_api::app::build_app(&AppConfig::default())
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let res = client.post(url).json(&body).send().await.unwrap();
    let status = res.status();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

/// Read models are eventually consistent; poll until `ready` accepts the body.
async fn get_eventually(
    client: &reqwest::Client,
    url: String,
    ready: impl Fn(&Value) -> bool,
) -> Value {
    for _ in 0..50 {
        let res = client.get(&url).send().await.unwrap();
        if res.status() == StatusCode::OK {
            let body: Value = res.json().await.unwrap();
            if ready(&body) {
                return body;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("{url} did not reach the expected state within timeout");
}

async fn register(client: &reqwest::Client, srv: &TestServer, phone: &str, role: &str) -> String {
    let (status, body) = post(
        client,
        srv.url("/api/actors/register"),
        json!({ "name": "Asha Rao", "phone_number": phone, "organization": "Malabar Spices", "role": role }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["actor"]["actor_id"].as_str().unwrap().to_string()
}

/// Register and complete KYC; returns (actor id, private key hex).
async fn verified_actor(client: &reqwest::Client, srv: &TestServer, phone: &str, role: &str) -> (String, String) {
    let actor_id = register(client, srv, phone, role).await;
    let (status, _) = post(client, srv.url("/api/actors/request-otp"), json!({ "actor_id": actor_id })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(
        client,
        srv.url("/api/actors/verify-kyc"),
        json!({ "actor_id": actor_id, "aadhaar_number": "123456789012", "otp": "123456" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    (actor_id, body["data"]["private_key"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn health_and_banner() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.text().await.unwrap().contains("ClearPath Backend is Running"));
}

#[tokio::test]
async fn cors_preflight_is_answered() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .request(reqwest::Method::OPTIONS, srv.url("/api/products/onboard"))
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    let methods = res.headers()["access-control-allow-methods"].to_str().unwrap().to_string();
    assert!(methods.contains("POST"), "allowed methods: {methods}");

    // Simple requests carry the origin header too.
    let res = client
        .get(srv.url("/health"))
        .header("origin", "http://localhost:5173")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn registration_requires_an_organization() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = post(
        &client,
        srv.url("/api/actors/register"),
        json!({ "name": "Meena", "phone_number": "9000000151", "role": "farmer" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["message"], "organization cannot be empty");

    let (status, _) = post(
        &client,
        srv.url("/api/actors/register"),
        json!({ "name": "Meena", "phone_number": "9000000151", "organization": "   ", "role": "farmer" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The rejected attempts did not keep the phone number reserved.
    let (status, body) = post(
        &client,
        srv.url("/api/actors/register"),
        json!({ "name": "Meena", "phone_number": "9000000151", "organization": "Meena Organics", "role": "farmer" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["actor"]["organization"], "Meena Organics");
}

#[tokio::test]
async fn actor_registration_and_kyc() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // camelCase bodies from existing clients still work.
    let (status, body) = post(
        &client,
        srv.url("/api/actors/register"),
        json!({ "name": "Ravi", "phoneNumber": "9000000101", "organization": "Ravi Estates", "role": "farmer" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let actor_id = body["actor"]["actor_id"].as_str().unwrap().to_string();
    assert_eq!(body["actor"]["verified"], false);

    // Duplicate phone number.
    let (status, body) = post(
        &client,
        srv.url("/api/actors/register"),
        json!({ "name": "Someone Else", "phone_number": "9000000101", "organization": "Kochi Mart", "role": "retailer" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    // Wrong OTP, then malformed Aadhaar.
    let (status, body) = post(
        &client,
        srv.url("/api/actors/verify-kyc"),
        json!({ "actor_id": actor_id, "aadhaar_number": "123456789012", "otp": "000000" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid OTP. KYC failed.");

    let (status, _) = post(
        &client,
        srv.url("/api/actors/verify-kyc"),
        json!({ "actor_id": actor_id, "aadhaar_number": "12345", "otp": "123456" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(
        &client,
        srv.url("/api/actors/verify-kyc"),
        json!({ "actorId": actor_id, "aadhaarNumber": "123456789012", "otp": "123456" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["actor_name"], "Ravi");
    assert_eq!(body["data"]["private_key"].as_str().unwrap().len(), 64);
    let public_key = body["data"]["public_key"].as_str().unwrap().to_string();

    // An actor is verified at most once.
    let (status, _) = post(
        &client,
        srv.url("/api/actors/verify-kyc"),
        json!({ "actor_id": actor_id, "aadhaar_number": "123456789012", "otp": "123456" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let actor = get_eventually(&client, srv.url(&format!("/api/actors/{actor_id}")), |a| {
        a["verified"] == true
    })
    .await;
    assert_eq!(actor["public_key"], public_key);
    assert!(actor.get("aadhaar_hash").is_none());

    let res = client.get(srv.url("/api/actors/not-a-uuid")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_actor_cannot_request_otp() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = post(
        &client,
        srv.url("/api/actors/request-otp"),
        json!({ "actor_id": "0191b8f2-0000-7000-8000-000000000000" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Actor not found");
}

#[tokio::test]
async fn product_journey_onboard_update_verify() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (maker, maker_key) = verified_actor(&client, &srv, "9000000201", "manufacturer").await;
    let (carrier, _) = verified_actor(&client, &srv, "9000000202", "logistics").await;

    let (status, body) = post(
        &client,
        srv.url("/api/products/onboard"),
        json!({
            "name": "Green Cardamom",
            "batch_number": "GC-2025-07",
            "manufacturer_id": maker,
            "expiry_date": "2027-01-31",
            "private_key": maker_key,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let product_id = body["product"]["product_id"].as_str().unwrap().to_string();
    assert_eq!(body["product"]["status"], "MANUFACTURED");
    assert_eq!(body["product"]["current_location"], "Factory");

    // Same batch again.
    let (status, _) = post(
        &client,
        srv.url("/api/products/onboard"),
        json!({
            "name": "Green Cardamom",
            "batch_number": "GC-2025-07",
            "manufacturer_id": maker,
            "private_key": maker_key,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = post(
        &client,
        srv.url("/api/products/update-status"),
        json!({ "product_id": product_id, "actor_id": carrier, "location": "Kochi Port", "status": "IN_TRANSIT" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["current_location"], "Kochi Port");
    let first_chain = body["chain_hash"].as_str().unwrap().to_string();

    let (status, body) = post(
        &client,
        srv.url("/api/products/update-status"),
        json!({ "productId": product_id, "actorId": carrier, "location": "Rotterdam", "statusUpdate": "DELIVERED" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous_hash"], first_chain);

    let details = get_eventually(&client, srv.url(&format!("/api/products/{product_id}")), |p| {
        p["history"].as_array().map(|h| h.len()) == Some(2)
    })
    .await;
    assert_eq!(details["status"], "DELIVERED");
    assert_eq!(details["manufacturer"]["name"], "Asha Rao");
    assert_eq!(details["manufacturer"]["organization"], "Malabar Spices");

    let res = client
        .get(srv.url(&format!("/api/products/{product_id}/verify")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["authentic"], true);
    assert_eq!(report["signature_valid"], true);
    assert_eq!(report["chain_intact"], true);

    let list = get_eventually(&client, srv.url("/api/products"), |l| {
        l["items"].as_array().map(|i| i.len()) == Some(1)
    })
    .await;
    assert_eq!(list["items"][0]["batch_number"], "GC-2025-07");
}

#[tokio::test]
async fn onboarding_requires_a_verified_matching_key() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let unverified = register(&client, &srv, "9000000301", "manufacturer").await;
    let (maker, maker_key) = verified_actor(&client, &srv, "9000000302", "manufacturer").await;
    let (_, other_key) = verified_actor(&client, &srv, "9000000303", "manufacturer").await;

    let (status, body) = post(
        &client,
        srv.url("/api/products/onboard"),
        json!({ "name": "Pepper", "batch_number": "P-1", "manufacturer_id": unverified, "private_key": other_key }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unverified Actor");

    let (status, _) = post(
        &client,
        srv.url("/api/products/onboard"),
        json!({ "name": "Pepper", "batch_number": "P-1", "manufacturer_id": maker, "private_key": other_key }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post(
        &client,
        srv.url("/api/products/onboard"),
        json!({ "name": "Pepper", "batch_number": "P-1", "manufacturer_id": maker }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Rejected attempts leave the batch number free.
    let (status, _) = post(
        &client,
        srv.url("/api/products/onboard"),
        json!({ "name": "Pepper", "batch_number": "P-1", "manufacturer_id": maker, "private_key": maker_key }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn recalled_products_accept_no_updates() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (maker, key) = verified_actor(&client, &srv, "9000000401", "manufacturer").await;
    let (_, body) = post(
        &client,
        srv.url("/api/products/onboard"),
        json!({ "name": "Turmeric", "batch_number": "T-9", "manufacturer_id": maker, "private_key": key }),
    )
    .await;
    let product_id = body["product"]["product_id"].as_str().unwrap().to_string();

    let (status, _) = post(
        &client,
        srv.url("/api/products/update-status"),
        json!({ "product_id": product_id, "actor_id": maker, "location": "Factory", "status": "RECALLED" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(
        &client,
        srv.url("/api/products/update-status"),
        json!({ "product_id": product_id, "actor_id": maker, "location": "Depot", "status": "IN_TRANSIT" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invariant_violation");

    let (status, _) = post(
        &client,
        srv.url("/api/products/update-status"),
        json!({ "product_id": "0191b8f2-0000-7000-8000-000000000000", "actor_id": maker, "location": "Depot", "status": "IN_TRANSIT" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn passport_entries_chain_and_verify() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (maker, maker_key) = verified_actor(&client, &srv, "9000000501", "manufacturer").await;
    let (lab, lab_key) = verified_actor(&client, &srv, "9000000502", "testing_lab").await;
    let (_, body) = post(
        &client,
        srv.url("/api/products/onboard"),
        json!({ "name": "Vanilla", "batch_number": "V-3", "manufacturer_id": maker, "private_key": maker_key }),
    )
    .await;
    let product_id = body["product"]["product_id"].as_str().unwrap().to_string();

    let (status, first) = post(
        &client,
        srv.url("/api/events/add"),
        json!({ "product_id": product_id, "event_type": "HARVEST", "actor_id": maker, "location": "Wayanad", "data": { "kg": 120 } }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{first}");
    assert_eq!(first["sequence"], 1);
    assert!(first["previous_hash"].is_null());
    assert_eq!(first["hash"].as_str().unwrap().len(), 64);

    let (status, second) = post(
        &client,
        srv.url("/api/events/add"),
        json!({ "productId": product_id, "eventType": "QUALITY_CHECK", "actorId": lab, "data": { "grade": "A" }, "privateKey": lab_key }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["previous_hash"], first["chain_hash"]);
    assert_eq!(second["signed"], true);

    // Signing with someone else's key is rejected.
    let (status, _) = post(
        &client,
        srv.url("/api/events/add"),
        json!({ "product_id": product_id, "event_type": "SHIPMENT", "actor_id": lab, "data": {}, "private_key": maker_key }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let passport = get_eventually(&client, srv.url(&format!("/api/events/product/{product_id}")), |p| {
        p["entries"].as_array().map(|e| e.len()) == Some(2)
    })
    .await;
    assert_eq!(passport["entries"][1]["event_type"], "QUALITY_CHECK");

    let res = client
        .get(srv.url(&format!("/api/events/product/{product_id}/verify")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["authentic"], true);
    assert_eq!(report["signed_entries"], 1);

    let (status, _) = post(
        &client,
        srv.url("/api/events/add"),
        json!({ "product_id": "0191b8f2-0000-7000-8000-000000000000", "event_type": "HARVEST", "actor_id": maker, "data": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deactivated_actors_cannot_sign() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (maker, key) = verified_actor(&client, &srv, "9000000601", "manufacturer").await;

    let (status, _) = post(&client, srv.url(&format!("/api/actors/{maker}/deactivate")), json!({ "reason": "audit" })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&client, srv.url(&format!("/api/actors/{maker}/deactivate")), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = post(
        &client,
        srv.url("/api/products/onboard"),
        json!({ "name": "Clove", "batch_number": "C-1", "manufacturer_id": maker, "private_key": key }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Actor is deactivated");

    let list = get_eventually(&client, srv.url("/api/actors"), |l| {
        l["items"][0]["active"] == false
    })
    .await;
    assert_eq!(list["items"].as_array().unwrap().len(), 1);
}
