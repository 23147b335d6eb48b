use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use merchant_feed::api::{build_app, AppState, FEED_ROUTE};
use merchant_feed::catalog::rest::RestCatalog;
use merchant_feed::config::RestCatalogConfig;
use merchant_feed::delivery::{Delivery, StaticFileDelivery, FEED_DIR, FEED_FILE};
use merchant_feed::generator::FeedGenerator;
use merchant_feed::metrics::Metrics;
use merchant_feed::model::StoreInfo;
use merchant_feed::policy::{AdminAuth, NonceVerifier, DELETE_ACTION};
use merchant_feed::settings::FeedSettings;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ADMIN_KEY: &str = "admin-key";

async fn woo_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wp-json/wc/v3/products"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-WP-TotalPages", "1")
                .set_body_json(json!([
                    {
                        "id": 5,
                        "name": "Tea Tin",
                        "sku": "TIN-5",
                        "type": "simple",
                        "status": "publish",
                        "permalink": "https://shop.test/tin",
                        "price": "8.5",
                        "stock_status": "instock",
                        "images": [
                            {"id": 50, "src": "https://shop.test/tin.jpg"},
                            {"id": 51, "src": "https://shop.test/tin-2.jpg"}
                        ]
                    },
                    {
                        "id": 6,
                        "name": "Kettle",
                        "type": "variable",
                        "status": "publish",
                        "permalink": "https://shop.test/kettle",
                        "variations": [61],
                        "attributes": [{"id": 2, "name": "Finish", "slug": "pa_finish", "options": ["Copper"]}]
                    }
                ])),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/wp-json/wc/v3/products/6/variations"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-WP-TotalPages", "1")
                .set_body_json(json!([
                    {
                        "id": 61,
                        "price": "42",
                        "stock_status": "onbackorder",
                        "attributes": [{"id": 1, "name": "Color", "slug": "pa_color", "option": "Copper Red"}]
                    }
                ])),
        )
        .mount(&server)
        .await;

    server
}

fn static_app(server: &MockServer, upload_dir: &std::path::Path) -> axum::Router {
    let catalog = RestCatalog::try_new(RestCatalogConfig {
        base_url: server.uri(),
        consumer_key: "ck".to_string(),
        consumer_secret: "cs".to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    let store = StoreInfo {
        site_id: 3,
        name: "Tea House".to_string(),
        home_url: "https://shop.test".to_string(),
        currency: "GBP".to_string(),
        default_country: "GB".to_string(),
    };
    let generator = FeedGenerator::new(
        Arc::new(catalog),
        Arc::new(FeedSettings::default()),
        store,
        Duration::from_secs(10),
    );
    let delivery = StaticFileDelivery::new(generator, upload_dir, "https://shop.test/uploads");

    build_app(AppState {
        delivery: Delivery::Static(Arc::new(delivery)),
        metrics: Metrics::new().unwrap(),
        admin: AdminAuth::new(Some(ADMIN_KEY.to_string())),
        nonces: NonceVerifier::new("nonce-secret"),
        upload_dir: Some(upload_dir.to_path_buf()),
    })
}

#[tokio::test]
async fn feed_route_writes_file_and_redirects_to_it() {
    let server = woo_server().await;
    let tmp = tempfile::tempdir().unwrap();
    let app = static_app(&server, tmp.path());

    let response = app
        .clone()
        .oneshot(Request::builder().uri(FEED_ROUTE).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://shop.test/uploads/merchant-feed/facebook.xml"
    );

    let file = tmp.path().join(FEED_DIR).join(FEED_FILE);
    let written = std::fs::read_to_string(&file).unwrap();
    assert!(written.contains("<g:id>TIN-5</g:id>"));
    assert!(written.contains("<g:price>8.50 GBP</g:price>"));
    assert!(written.contains("<g:additional_image_link>https://shop.test/tin-2.jpg</g:additional_image_link>"));
    assert!(written.contains("<g:id>3-61</g:id>"));
    assert!(written.contains("<g:item_group_id>3-6</g:item_group_id>"));
    assert!(written.contains("<g:availability>preorder</g:availability>"));
    assert!(written.contains("<g:color>Copper Red</g:color>"));
    assert!(written.contains("https://shop.test/kettle?attribute_pa_color=copper-red"));
    assert!(tmp.path().join(FEED_DIR).join("index.html").exists());

    let served = app
        .oneshot(
            Request::builder()
                .uri(format!("/uploads/{FEED_DIR}/{FEED_FILE}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    let body = to_bytes(served.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), written.as_bytes());
}

#[tokio::test]
async fn admin_delete_removes_the_file() {
    let server = woo_server().await;
    let tmp = tempfile::tempdir().unwrap();
    let app = static_app(&server, tmp.path());
    let file = tmp.path().join(FEED_DIR).join(FEED_FILE);

    app.clone()
        .oneshot(Request::builder().uri(FEED_ROUTE).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(file.exists());

    let nonce = NonceVerifier::new("nonce-secret").create(DELETE_ACTION);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/admin/feed/delete?_wpnonce={nonce}"))
                .header("x-api-key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!file.exists());
}

#[tokio::test]
async fn catalog_outage_surfaces_as_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let response = static_app(&server, tmp.path())
        .oneshot(Request::builder().uri(FEED_ROUTE).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!tmp.path().join(FEED_DIR).join(FEED_FILE).exists());
}
