#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use bytes::Bytes;
use tempfile::NamedTempFile;
use tower_http::trace::TraceLayer;

use lakegate::auth::bearer::BearerAuthLayer;
use lakegate::catalog::file::{FileCatalog, FileCatalogConfig};
use lakegate::config::ServerConfig;
use lakegate::reader::delta::DeltaLogReader;
use lakegate::router::build_sharing_server_router;
use lakegate::signer::registry::SignerRegistry;
use lakegate::state::SharingServerState;

/// The bearer token accepted by the test server.
pub const TEST_TOKEN: &str = "foo_token";

/// An in-process sharing server over a yaml share file, driven through a
/// real http client.
pub struct TestClient {
    client: reqwest::Client,
    addr: SocketAddr,
    _share_file: NamedTempFile,
}

impl TestClient {
    pub async fn new(shares_yaml: &str) -> Self {
        tracing_subscriber::fmt::try_init().ok();

        let mut share_file = NamedTempFile::new().unwrap();
        share_file.write_all(shares_yaml.as_bytes()).unwrap();

        let catalog = FileCatalog::new(FileCatalogConfig::new(share_file.path())).unwrap();
        let config = ServerConfig {
            configured_bearer_token: Some(TEST_TOKEN.to_owned()),
            ..Default::default()
        };
        let state = SharingServerState::new(
            Arc::new(catalog),
            Arc::new(DeltaLogReader::new()),
            SignerRegistry::new(config.signed_url_ttl()),
            config.clone(),
        );

        let app = build_sharing_server_router(Arc::new(state))
            .layer(BearerAuthLayer::from_config(&config, None))
            .layer(TraceLayer::new_for_http());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("could not bind ephemeral socket");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server error");
        });

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        TestClient {
            client,
            addr,
            _share_file: share_file,
        }
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        RequestBuilder {
            builder: self.client.get(format!("http://{}{}", self.addr, url)),
            authorized: true,
        }
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        RequestBuilder {
            builder: self.client.post(format!("http://{}{}", self.addr, url)),
            authorized: true,
        }
    }
}

pub struct RequestBuilder {
    builder: reqwest::RequestBuilder,
    authorized: bool,
}

impl RequestBuilder {
    pub async fn send(self) -> TestResponse {
        let builder = if self.authorized {
            self.builder
                .header("Authorization", format!("Bearer {TEST_TOKEN}"))
        } else {
            self.builder
        };
        TestResponse {
            response: builder.send().await.unwrap(),
        }
    }

    /// Send the request without an Authorization header.
    pub fn anonymous(mut self) -> Self {
        self.authorized = false;
        self
    }

    pub fn json<T: serde::Serialize>(mut self, json: &T) -> Self {
        self.builder = self.builder.json(json);
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.builder = self.builder.header(key, value);
        self
    }
}

/// A wrapper around [`reqwest::Response`] with panicking assertion
/// helpers, convenient for tests.
#[derive(Debug)]
pub struct TestResponse {
    response: reqwest::Response,
}

impl TestResponse {
    pub fn assert_status_ok(&self) {
        assert_eq!(self.status(), StatusCode::OK);
    }

    pub fn assert_status_bad_request(&self) {
        assert_eq!(self.status(), StatusCode::BAD_REQUEST);
    }

    pub fn assert_status_not_found(&self) {
        assert_eq!(self.status(), StatusCode::NOT_FOUND);
    }

    pub fn assert_status_unauthorized(&self) {
        assert_eq!(self.status(), StatusCode::UNAUTHORIZED);
    }

    pub fn assert_header_content_type_json(&self) {
        assert_eq!(
            self.headers().get(CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
    }

    pub fn assert_header_content_type_ndjson(&self) {
        assert_eq!(
            self.headers().get(CONTENT_TYPE).unwrap(),
            "application/x-ndjson; charset=utf-8"
        );
    }

    pub fn assert_header_table_version(&self, version: u64) {
        let received = self.headers().get("delta-table-version").unwrap();
        assert_eq!(received, &HeaderValue::from(version));
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn headers(&self) -> &axum::http::HeaderMap {
        self.response.headers()
    }

    pub async fn text(self) -> String {
        self.response.text().await.unwrap()
    }

    pub async fn bytes(self) -> Bytes {
        self.response.bytes().await.unwrap()
    }

    pub async fn json<T: serde::de::DeserializeOwned>(self) -> T {
        self.response.json().await.unwrap()
    }

    /// The NDJSON body as one parsed value per line.
    pub async fn ndjson_lines(self) -> Vec<serde_json::Value> {
        self.text()
            .await
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}
