// HTTP tests driving the router in-process.

mod helpers;

use authenticator::accounts;
use authenticator::totp;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, SET_COOKIE};
use axum::http::StatusCode;
use helpers::{TestApp, UserBuilder};
use serde_json::json;

const ACCESS: &str = "access-token";
const REFRESH: &str = "refresh-token";

/// Log in and return (access, refresh) cookie values.
async fn login(app: &TestApp, username: &str, password: &str) -> (String, String) {
    let res = app
        .post(
            "/auth/authorize",
            &[],
            json!({"username": username, "password": password}),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
    (
        res.cookie(ACCESS).expect("no access cookie"),
        res.cookie(REFRESH).expect("no refresh cookie"),
    )
}

#[tokio::test]
async fn test_register() {
    let app = TestApp::new().await;

    let res = app
        .post(
            "/auth/register",
            &[],
            json!({"username": "alice", "password": "password123"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
    let body = res.json();
    assert_eq!(body["status"], 201);
    assert_eq!(body["message"], "User created");
    assert!(body["id"].as_str().is_some());

    let res = app
        .post(
            "/auth/register",
            &[],
            json!({"username": "alice", "password": "password456"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::CONFLICT);
    assert_eq!(
        res.json(),
        json!({"status": 409, "message": "Username already taken"})
    );

    let res = app
        .post(
            "/auth/register",
            &[],
            json!({"username": "bob", "password": "short"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.json()["message"],
        "Password must be at least 8 characters long"
    );
}

#[tokio::test]
async fn test_authorize_sets_cookies() {
    let app = TestApp::new().await;
    let alice = UserBuilder::new("alice").create(app.connection()).await;

    let res = app
        .post(
            "/auth/authorize",
            &[],
            json!({"username": "alice", "password": alice.password}),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED);

    let body = res.json();
    assert_eq!(body["message"], "Session created");
    assert_eq!(body["id"], alice.user.id.as_str());
    assert_eq!(body["access_token"], res.cookie(ACCESS).unwrap().as_str());
    assert_eq!(body["refresh_token"], res.cookie(REFRESH).unwrap().as_str());

    let cookies: Vec<&str> = res
        .headers
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(cookies.len(), 2);
    let access = cookies.iter().find(|c| c.starts_with("access-token=")).unwrap();
    assert!(access.contains("HttpOnly"));
    assert!(access.contains("Path=/;"));
    assert!(access.ends_with("Max-Age=900"));
    let refresh = cookies.iter().find(|c| c.starts_with("refresh-token=")).unwrap();
    assert!(refresh.contains("Path=/auth;"));
    assert!(refresh.ends_with("Max-Age=3600"));
}

#[tokio::test]
async fn test_authorize_errors() {
    let app = TestApp::new().await;
    UserBuilder::new("alice").create(app.connection()).await;

    let res = app
        .post(
            "/auth/authorize",
            &[],
            json!({"username": "alice", "password": "wrong-password"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.json()["message"], "Wrong credentials");
    assert!(res.cookie(ACCESS).is_none());

    let res = app
        .post(
            "/auth/authorize",
            &[],
            json!({"username": "nobody", "password": "password123"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.json()["message"], "User not found");
}

#[tokio::test]
async fn test_security_headers_present() {
    let app = TestApp::new().await;
    let res = app.get("/user/settings/me", &[]).await;

    assert_eq!(res.headers["x-frame-options"], "DENY");
    assert_eq!(res.headers["x-content-type-options"], "nosniff");
    assert!(res.headers.contains_key("content-security-policy"));
}

#[tokio::test]
async fn test_protected_routes_require_access_cookie() {
    let app = TestApp::new().await;

    for uri in ["/user/settings/me", "/totp/verify-code?code=123456", "/totp/totp-qr"] {
        let res = app.get(uri, &[]).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(
            res.json(),
            json!({"status": 403, "message": "Invalid access token"})
        );
    }

    let res = app
        .post("/user/settings/enable-2fa", &[(ACCESS, "not-a-jwt")], json!({}))
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_user_settings() {
    let app = TestApp::new().await;
    let alice = UserBuilder::new("alice").create(app.connection()).await;
    let (access, _) = login(&app, "alice", &alice.password).await;

    let res = app.get("/user/settings/me", &[(ACCESS, access.as_str())]).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        res.json(),
        json!({"username": "alice", "is_2fa_enabled": false})
    );
}

#[tokio::test]
async fn test_two_factor_flow() {
    let app = TestApp::new().await;
    let db = app.connection();
    let alice = UserBuilder::new("alice").create(db).await;
    let (access, _) = login(&app, "alice", &alice.password).await;
    let cookies = [(ACCESS, access.as_str())];

    // not enabled yet
    let res = app.get("/totp/verify-code?code=123456", &cookies).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    let res = app.get("/totp/totp-qr", &cookies).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = app
        .post("/user/settings/enable-2fa", &cookies, json!({}))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["message"], "2FA enabled");

    let secret = accounts::two_factor_secret(db, &alice.user.id)
        .await
        .unwrap()
        .expect("secret not stored");

    let res = app
        .get(
            &format!("/totp/verify-code?code={}", totp::current_code(&secret).unwrap()),
            &cookies,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["message"], "Code verified");

    let res = app.get("/totp/verify-code?code=12345", &cookies).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.json()["message"], "Invalid code");

    // the password alone no longer yields a session
    let res = app
        .post(
            "/auth/authorize",
            &[],
            json!({"username": "alice", "password": alice.password}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.cookie(ACCESS).is_none());
    let body = res.json();
    assert_eq!(body["message"], "2FA required");
    assert_eq!(body["two_fa_required"], true);
    let challenge = body["challenge_token"].as_str().unwrap().to_string();

    let res = app
        .post(
            "/auth/2fa",
            &[],
            json!({"challenge_token": challenge, "code": "12345"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app
        .post(
            "/auth/2fa",
            &[],
            json!({"challenge_token": "bogus", "code": "123456"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app
        .post(
            "/auth/2fa",
            &[],
            json!({
                "challenge_token": challenge,
                "code": totp::current_code(&secret).unwrap(),
            }),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
    assert!(res.cookie(ACCESS).is_some());
    assert!(res.cookie(REFRESH).is_some());

    let res = app
        .post("/user/settings/disable-2fa", &cookies, json!({}))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["message"], "2FA disabled");
    let res = app.get("/user/settings/me", &cookies).await;
    assert_eq!(res.json()["is_2fa_enabled"], false);
}

#[tokio::test]
async fn test_totp_qr_png() {
    let app = TestApp::new().await;
    let alice = UserBuilder::new("alice")
        .with_two_factor()
        .create(app.connection())
        .await;

    // the second factor is on, so log in through both steps
    let challenge = app.keys.issue_challenge(&alice.user.id).unwrap();
    let code = totp::current_code(alice.totp_secret.as_deref().unwrap()).unwrap();
    let res = app
        .post(
            "/auth/2fa",
            &[],
            json!({"challenge_token": challenge, "code": code}),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
    let access = res.cookie(ACCESS).unwrap();

    let res = app
        .get("/totp/totp-qr?size=200", &[(ACCESS, access.as_str())])
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.headers[CONTENT_TYPE], "image/png");
    assert_eq!(
        res.headers[CACHE_CONTROL],
        "no-store, no-cache, must-revalidate, max-age=0"
    );
    assert_eq!(&res.body[..4], &[0x89, b'P', b'N', b'G']);
}

#[tokio::test]
async fn test_refresh_rotation() {
    let app = TestApp::new().await;
    let alice = UserBuilder::new("alice").create(app.connection()).await;
    let (old_access, old_refresh) = login(&app, "alice", &alice.password).await;

    let res = app.get("/auth/refresh", &[(REFRESH, old_refresh.as_str())]).await;
    assert_eq!(res.status, StatusCode::CREATED);
    let new_access = res.cookie(ACCESS).unwrap();
    let new_refresh = res.cookie(REFRESH).unwrap();
    assert_ne!(new_refresh, old_refresh);

    // replaying the old refresh token fails
    let res = app.get("/auth/refresh", &[(REFRESH, old_refresh.as_str())]).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        res.json(),
        json!({"status": 401, "message": "Unauthorized"})
    );

    let res = app.get("/auth/refresh", &[]).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app.get("/user/settings/me", &[(ACCESS, old_access.as_str())]).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    let res = app.get("/user/settings/me", &[(ACCESS, new_access.as_str())]).await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout() {
    let app = TestApp::new().await;
    let alice = UserBuilder::new("alice").create(app.connection()).await;
    let (access, refresh) = login(&app, "alice", &alice.password).await;

    let res = app.get("/auth/logout", &[(ACCESS, access.as_str())]).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["message"], "Logged out");
    assert_eq!(res.cookie(ACCESS).as_deref(), Some(""));
    assert_eq!(res.cookie(REFRESH).as_deref(), Some(""));

    let res = app.get("/user/settings/me", &[(ACCESS, access.as_str())]).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    let res = app.get("/auth/refresh", &[(REFRESH, refresh.as_str())]).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    // logging out without a session still clears the cookies
    let res = app.get("/auth/logout", &[]).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.cookie(ACCESS).as_deref(), Some(""));
}

#[tokio::test]
async fn test_change_password() {
    let app = TestApp::new().await;
    let alice = UserBuilder::new("alice").create(app.connection()).await;
    let (access, _) = login(&app, "alice", &alice.password).await;
    let (other_access, _) = login(&app, "alice", &alice.password).await;

    let res = app
        .post(
            "/user/settings/change-password",
            &[(ACCESS, access.as_str())],
            json!({"old_password": "not-it", "new_password": "brand-new-password"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json()["message"], "Wrong password");

    let res = app
        .post(
            "/user/settings/change-password",
            &[(ACCESS, access.as_str())],
            json!({"old_password": alice.password, "new_password": alice.password}),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.json()["message"],
        "New password must be different from old one"
    );

    let res = app
        .post(
            "/user/settings/change-password",
            &[(ACCESS, access.as_str())],
            json!({"old_password": alice.password, "new_password": "brand-new-password"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["message"], "Password changed");
    let fresh_access = res.cookie(ACCESS).expect("no fresh session");

    // every earlier session is revoked
    for token in [&access, &other_access] {
        let res = app.get("/user/settings/me", &[(ACCESS, token.as_str())]).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
    }
    let res = app.get("/user/settings/me", &[(ACCESS, fresh_access.as_str())]).await;
    assert_eq!(res.status, StatusCode::OK);

    login(&app, "alice", "brand-new-password").await;
}

#[tokio::test]
async fn test_malformed_bodies_get_json_errors() {
    let app = TestApp::new().await;
    UserBuilder::new("alice").create(app.connection()).await;

    // a missing password is checked like an empty one
    let res = app
        .post("/auth/register", &[], json!({"username": "bob"}))
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.json(),
        json!({"status": 400, "message": "Password must be at least 8 characters long"})
    );

    let res = app
        .post(
            "/auth/authorize",
            &[],
            json!({"username": "alice", "password": null}),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.json()["message"], "Wrong credentials");

    for body in ["not json", "[1, 2]", r#"{"username": 42, "password": "password123"}"#] {
        let res = app.post_raw("/auth/register", body).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST, "{body}");
        let reply = res.json();
        assert_eq!(reply["status"], 400, "{body}");
        assert!(reply["message"].as_str().is_some_and(|m| !m.is_empty()));
    }
}

#[tokio::test]
async fn test_totp_qr_size_parameter() {
    let app = TestApp::new().await;
    let alice = UserBuilder::new("alice")
        .with_two_factor()
        .create(app.connection())
        .await;

    let challenge = app.keys.issue_challenge(&alice.user.id).unwrap();
    let code = totp::current_code(alice.totp_secret.as_deref().unwrap()).unwrap();
    let res = app
        .post(
            "/auth/2fa",
            &[],
            json!({"challenge_token": challenge, "code": code}),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
    let access = res.cookie(ACCESS).unwrap();
    let cookies = [(ACCESS, access.as_str())];

    for (query, edge) in [("", 256), ("?size=300", 300), ("?size=-1", 256), ("?size=0", 256)] {
        let res = app.get(&format!("/totp/totp-qr{query}"), &cookies).await;
        assert_eq!(res.status, StatusCode::OK, "{query}");
        let img = image::load_from_memory(&res.body).expect("not an image");
        assert_eq!((img.width(), img.height()), (edge, edge), "{query}");
    }

    let res = app.get("/totp/totp-qr?size=big", &cookies).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json()["status"], 400);
}
