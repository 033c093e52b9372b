mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, TestApp, OAUTH_STATE, PASSWORD};
use friendtime::data::users::OAuthProfile;
use serde_json::json;

#[tokio::test]
async fn signup_then_me_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app
        .post_json(
            "/api/v1/auth/signup",
            &json!({ "name": "Alice", "email": "Alice@Example.com", "password": PASSWORD }),
            None,
        )
        .await?;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["tokens"]["token_type"], "Bearer");
    let token = response.body["tokens"]["access_token"]
        .as_str()
        .expect("access token")
        .to_string();

    let me = app.get("/api/v1/users/me", Some(&token)).await?;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["user"]["name"], "Alice");
    assert_eq!(me.body["user"]["email"], "alice@example.com");
    assert_eq!(me.body["user"]["provider"], "email");
    assert_eq!(me.body["user"]["version"], 1);
    assert!(me.body["user"].get("password_hash").is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn signup_rejects_invalid_and_duplicate_accounts() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let invalid = app
        .post_json(
            "/api/v1/auth/signup",
            &json!({ "name": "", "email": "not-an-email", "password": "short" }),
            None,
        )
        .await?;
    assert_eq!(invalid.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(invalid.body["code"], "validation_failed");
    assert_eq!(invalid.body["error"]["name"], "must be provided");
    assert_eq!(invalid.body["error"]["email"], "must be a valid email address");
    assert_eq!(invalid.body["error"]["password"], "must be at least 8 bytes long");

    app.insert_user("Bob", "bob@example.com").await?;
    let duplicate = app
        .post_json(
            "/api/v1/auth/signup",
            &json!({ "name": "Bobby", "email": "BOB@example.com", "password": PASSWORD }),
            None,
        )
        .await?;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);
    assert_eq!(duplicate.body["code"], "duplicate_email");
    assert!(duplicate.body["error"]["email"].is_string());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn signup_rejects_overlong_fields() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let long_email = format!("a@{}.com", "b".repeat(400));
    let response = app
        .post_json(
            "/api/v1/auth/signup",
            &json!({ "name": "Alice", "email": long_email, "password": PASSWORD }),
            None,
        )
        .await?;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        response.body["error"]["email"],
        "must not be more than 320 bytes long"
    );

    let long_name = "n".repeat(501);
    let response = app
        .post_json(
            "/api/v1/auth/signup",
            &json!({ "name": long_name, "email": "alice@example.com", "password": PASSWORD }),
            None,
        )
        .await?;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        response.body["error"]["name"],
        "must not be more than 500 bytes long"
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn login_failures_are_indistinguishable() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user("Carol", "carol@example.com").await?;

    let wrong_password = app
        .post_json(
            "/api/v1/auth/login",
            &json!({ "email": "carol@example.com", "password": "wrong-password" }),
            None,
        )
        .await?;
    let unknown_email = app
        .post_json(
            "/api/v1/auth/login",
            &json!({ "email": "nobody@example.com", "password": PASSWORD }),
            None,
        )
        .await?;

    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.body, unknown_email.body);
    assert_eq!(wrong_password.body["code"], "invalid_credentials");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn refresh_issues_new_pair_and_rejects_access_tokens() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user("Dave", "dave@example.com").await?;

    let login = app
        .post_json(
            "/api/v1/auth/login",
            &json!({ "email": "dave@example.com", "password": PASSWORD }),
            None,
        )
        .await?;
    assert_eq!(login.status, StatusCode::OK);
    let refresh_token = login.body["tokens"]["refresh_token"].as_str().expect("refresh");
    let access_token = login.body["tokens"]["access_token"].as_str().expect("access");

    let refreshed = app
        .post_json(
            "/api/v1/auth/refresh",
            &json!({ "refresh_token": refresh_token }),
            None,
        )
        .await?;
    assert_eq!(refreshed.status, StatusCode::OK);
    let new_access = refreshed.body["tokens"]["access_token"].as_str().expect("access");
    let me = app.get("/api/v1/users/me", Some(new_access)).await?;
    assert_eq!(me.status, StatusCode::OK);

    let misuse = app
        .post_json(
            "/api/v1/auth/refresh",
            &json!({ "refresh_token": access_token }),
            None,
        )
        .await?;
    assert_eq!(misuse.status, StatusCode::UNAUTHORIZED);
    assert_eq!(misuse.body["code"], "invalid_token");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let anonymous = app.get("/api/v1/users/me", None).await?;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.body["code"], "unauthorized");

    let garbage = app.get("/api/v1/free", Some("not-a-jwt")).await?;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
    assert_eq!(garbage.body["code"], "invalid_token");

    let (user, token) = app.user_with_token("Erin", "erin@example.com").await?;
    let user_id = user.id;
    app.with_conn(move |conn| friendtime::data::users::delete(conn, user_id))
        .await?;
    let deleted = app.get("/api/v1/users/me", Some(&token)).await?;
    assert_eq!(deleted.status, StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn oauth_callback_creates_account_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.identity()
        .register(
            "good-code",
            OAuthProfile {
                email: "frank@example.com".to_string(),
                name: "Frank".to_string(),
                avatar_url: "https://avatars.example.com/frank".to_string(),
                provider: "google".to_string(),
            },
        )
        .await;

    let path = format!("/api/v1/auth/callback?provider=google&code=good-code&state={OAUTH_STATE}");
    let first = app.get(&path, None).await?;
    assert_eq!(first.status, StatusCode::OK);
    let token = first.body["tokens"]["access_token"].as_str().expect("access");

    let me = app.get("/api/v1/users/me", Some(token)).await?;
    assert_eq!(me.body["user"]["provider"], "google");
    assert_eq!(me.body["user"]["activated"], true);
    let first_id = me.body["user"]["id"].clone();

    let second = app.get(&path, None).await?;
    assert_eq!(second.status, StatusCode::OK);
    let token = second.body["tokens"]["access_token"].as_str().expect("access");
    let me_again = app.get("/api/v1/users/me", Some(token)).await?;
    assert_eq!(me_again.body["user"]["id"], first_id);

    // OAuth-only accounts have no password to log in with, and say so the
    // same way an unknown address does.
    let login = app
        .post_json(
            "/api/v1/auth/login",
            &json!({ "email": "frank@example.com", "password": PASSWORD }),
            None,
        )
        .await?;
    let unknown = app
        .post_json(
            "/api/v1/auth/login",
            &json!({ "email": "nobody@example.com", "password": PASSWORD }),
            None,
        )
        .await?;
    assert_eq!(login.status, StatusCode::UNAUTHORIZED);
    assert_eq!(login.body, unknown.body);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn oauth_callback_fits_provider_profiles_to_column_limits() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let identity = app.identity();
    identity
        .register(
            "long-name",
            OAuthProfile {
                email: "grace@example.com".to_string(),
                name: format!("  {}  ", "G".repeat(600)),
                avatar_url: String::new(),
                provider: "github".to_string(),
            },
        )
        .await;
    identity
        .register(
            "long-email",
            OAuthProfile {
                email: format!("h@{}.com", "h".repeat(400)),
                name: "Henry".to_string(),
                avatar_url: String::new(),
                provider: "github".to_string(),
            },
        )
        .await;

    let path = format!("/api/v1/auth/callback?provider=github&code=long-name&state={OAUTH_STATE}");
    let created = app.get(&path, None).await?;
    assert_eq!(created.status, StatusCode::OK);
    let token = created.body["tokens"]["access_token"].as_str().expect("access");
    let me = app.get("/api/v1/users/me", Some(token)).await?;
    assert_eq!(me.body["user"]["name"], "G".repeat(500));

    let path = format!("/api/v1/auth/callback?provider=github&code=long-email&state={OAUTH_STATE}");
    let rejected = app.get(&path, None).await?;
    assert_eq!(rejected.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        rejected.body["error"]["email"],
        "must not be more than 320 bytes long"
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn oauth_callback_rejects_bad_input() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let bad_state = app
        .get("/api/v1/auth/callback?provider=github&code=x&state=wrong", None)
        .await?;
    assert_eq!(bad_state.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_state.body["error"], "invalid state");

    let unknown_provider = app
        .get(
            &format!("/api/v1/auth/callback?provider=myspace&code=x&state={OAUTH_STATE}"),
            None,
        )
        .await?;
    assert_eq!(unknown_provider.status, StatusCode::BAD_REQUEST);

    let missing_code = app
        .get(&format!("/api/v1/auth/callback?state={OAUTH_STATE}"), None)
        .await?;
    assert_eq!(missing_code.status, StatusCode::BAD_REQUEST);

    let rejected = app
        .get(
            &format!("/api/v1/auth/callback?provider=github&code=unknown&state={OAUTH_STATE}"),
            None,
        )
        .await?;
    assert_eq!(rejected.status, StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn health_and_unknown_routes() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let health = app.get("/api/v1/health", None).await?;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body["status"], "ok");
    assert_eq!(health.body["environment"], "test");

    let missing = app.get("/api/v1/nowhere", None).await?;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.body["code"], "not_found");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn limiter_sheds_excess_requests() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::with_config(|config| {
        config.limiter_enabled = true;
        config.limiter_rps = 2;
        config.limiter_window_seconds = 60;
    })
    .await?;

    let mut statuses = Vec::new();
    for _ in 0..4 {
        statuses.push(app.get("/api/v1/health", None).await?.status);
    }

    assert_eq!(statuses[0], StatusCode::OK);
    assert_eq!(statuses[1], StatusCode::OK);
    assert_eq!(statuses[3], StatusCode::TOO_MANY_REQUESTS);

    app.cleanup().await?;
    Ok(())
}
