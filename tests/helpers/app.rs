use super::db::{test_keys, TestDb};
use authenticator::settings::Settings;
use authenticator::tokens::TokenKeys;
use authenticator::web::{self, AppState};
use axum::body::{to_bytes, Body};
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tower::ServiceExt;

/// The full router over a throwaway database.
pub struct TestApp {
    pub db: TestDb,
    pub keys: TokenKeys,
    router: Router,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("Response body is not JSON")
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        cookie_from(&self.headers, name)
    }
}

/// Value of the `Set-Cookie` header for `name`, empty when it clears the cookie.
pub fn cookie_from(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| {
            let pair = v.split(';').next()?;
            let (key, value) = pair.split_once('=')?;
            (key == name).then(|| value.to_string())
        })
}

impl TestApp {
    pub async fn new() -> Self {
        let db = TestDb::new().await;
        let keys = test_keys();
        let state = AppState::new(Settings::default(), db.connection().clone(), keys.clone());
        Self {
            db,
            keys,
            router: web::router(state),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.connection()
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        cookies: &[(&str, &str)],
        body: Option<String>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if !cookies.is_empty() {
            let header = cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(COOKIE, header);
        }
        let request = match body {
            Some(json) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(json)),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router call failed");

        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body")
            .to_vec();

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, cookies: &[(&str, &str)]) -> TestResponse {
        self.send(Method::GET, uri, cookies, None).await
    }

    pub async fn post(&self, uri: &str, cookies: &[(&str, &str)], body: Value) -> TestResponse {
        self.send(Method::POST, uri, cookies, Some(body.to_string()))
            .await
    }

    /// POST a body verbatim, labelled as JSON.
    pub async fn post_raw(&self, uri: &str, body: &str) -> TestResponse {
        self.send(Method::POST, uri, &[], Some(body.to_string()))
            .await
    }
}
