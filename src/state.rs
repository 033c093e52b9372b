use std::sync::Arc;

use diesel::pg::PgConnection;

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    data::{ModelError, ModelResult, QUERY_TIMEOUT},
    db::PgPool,
    oauth::IdentityProvider,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        jwt: JwtService,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            jwt,
            identity,
        }
    }

    /// Runs a model call on the blocking pool with a pooled connection.
    ///
    /// The whole call, including the wait for a free connection, is bounded
    /// by [`QUERY_TIMEOUT`]. On timeout the caller gets
    /// [`ModelError::Timeout`]; the statement itself is cancelled by the
    /// connection's `statement_timeout`.
    pub async fn with_conn<F, T>(&self, f: F) -> ModelResult<T>
    where
        F: FnOnce(&mut PgConnection) -> ModelResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| ModelError::Pool(err.to_string()))?;
            f(&mut conn)
        });

        match tokio::time::timeout(QUERY_TIMEOUT, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ModelError::Pool(format!(
                "database task failed: {join_err}"
            ))),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = QUERY_TIMEOUT.as_millis() as u64,
                    "database call timed out"
                );
                Err(ModelError::Timeout)
            }
        }
    }
}
