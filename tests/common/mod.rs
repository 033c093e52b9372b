use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use friendtime::auth::jwt::JwtService;
use friendtime::auth::password;
use friendtime::config::{AppConfig, LogFormat};
use friendtime::data::users::OAuthProfile;
use friendtime::data::{friends, users, ModelResult};
use friendtime::db::{self, PgPool};
use friendtime::models::{FriendPair, User};
use friendtime::oauth::{IdentityProvider, OAuthError, Provider};
use friendtime::routes;
use friendtime::state::AppState;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;

pub const PASSWORD: &str = "pa55word-for-tests";
pub const OAUTH_STATE: &str = "test-oauth-state";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Identity provider that answers from a fixed table of authorization codes.
#[derive(Default)]
pub struct FakeIdentityProvider {
    profiles: Mutex<HashMap<String, OAuthProfile>>,
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn exchange_code(
        &self,
        provider: Provider,
        code: &str,
    ) -> Result<OAuthProfile, OAuthError> {
        let guard = self.profiles.lock().await;
        match guard.get(code) {
            Some(profile) if profile.provider == provider.as_str() => Ok(profile.clone()),
            _ => Err(OAuthError::Rejected),
        }
    }
}

impl FakeIdentityProvider {
    #[allow(dead_code)]
    pub async fn register(&self, code: &str, profile: OAuthProfile) {
        let mut guard = self.profiles.lock().await;
        guard.insert(code.to_string(), profile);
    }
}

pub struct Response {
    pub status: StatusCode,
    pub body: Value,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    identity: Arc<FakeIdentityProvider>,
}

pub fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: 4,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        app_env: "test".to_string(),
        log_format: LogFormat::Compact,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 15,
        refresh_token_audience: "test-refresh".to_string(),
        refresh_token_expiry_hours: 24,
        cors_allowed_origin: None,
        limiter_enabled: false,
        limiter_rps: 20,
        limiter_window_seconds: 1,
        shutdown_grace_seconds: 1,
        oauth_callback_state: OAUTH_STATE.to_string(),
        oauth_redirect_url: None,
        google: None,
        github: None,
    }
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let mut config = test_config(database_url);
        customize(&mut config);

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let identity = Arc::new(FakeIdentityProvider::default());
        let identity_for_state: Arc<dyn IdentityProvider> = identity.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, jwt, identity_for_state);
        let router = routes::create_app(state.clone());

        Ok(Self {
            state,
            router,
            identity,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn identity(&self) -> Arc<FakeIdentityProvider> {
        self.identity.clone()
    }

    /// Creates a password account directly in the database.
    pub async fn insert_user(&self, name: &str, email: &str) -> Result<User> {
        let name = name.to_string();
        let email = email.to_string();
        let password_hash = password::hash_password(PASSWORD)?;
        let user = self
            .with_conn(move |conn| {
                users::insert(conn, &users::new_email_user(&name, &email, password_hash))
            })
            .await?;
        Ok(user)
    }

    pub async fn login_token(&self, email: &str) -> Result<String> {
        let response = self
            .post_json(
                "/api/v1/auth/login",
                &json!({ "email": email, "password": PASSWORD }),
                None,
            )
            .await?;

        ensure!(
            response.status == StatusCode::OK,
            "login failed with status {}: {}",
            response.status,
            response.body
        );

        response.body["tokens"]["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response missing access token"))
    }

    /// Inserts a user and signs them in.
    pub async fn user_with_token(&self, name: &str, email: &str) -> Result<(User, String)> {
        let user = self.insert_user(name, email).await?;
        let token = self.login_token(email).await?;
        Ok((user, token))
    }

    /// Makes two users accepted friends without going through HTTP.
    #[allow(dead_code)]
    pub async fn befriend(&self, a: &User, b: &User) -> Result<FriendPair> {
        let (a, b) = (a.id, b.id);
        let pair = self
            .with_conn(move |conn| {
                let pending = friends::send_request(conn, &friends::new_request(a, b))?;
                friends::accept(conn, pending.id, b)
            })
            .await?;
        Ok(pair)
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> ModelResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.state
            .with_conn(f)
            .await
            .map_err(|err| anyhow!("database call failed: {err}"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<Response> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<Response> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put(&self, path: &str, token: Option<&str>) -> Result<Response> {
        self.send(Method::PUT, path, token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<Response> {
        self.send(Method::GET, path, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<Response> {
        self.send(Method::DELETE, path, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<Response> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.dispatch(builder.body(Body::from(body))?).await
    }

    async fn send(&self, method: Method, path: &str, token: Option<&str>) -> Result<Response> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.dispatch(builder.body(Body::empty())?).await
    }

    async fn dispatch(&self, request: Request<Body>) -> Result<Response> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response");
        let status = response.status();
        let bytes = body_to_vec(response.into_body()).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).context("response body was not JSON")?
        };
        Ok(Response { status, body })
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub fn hours_from_now(hours: i64) -> DateTime<Utc> {
    Utc::now() + Duration::hours(hours)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE free_time_viewers, free_times, friends, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
