use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
    refresh_audience: String,
    refresh_expiry: Duration,
}

/// Access and refresh token as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl JwtService {
    pub fn new(
        secret: &str,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        expiry: Duration,
        refresh_audience: impl Into<String>,
        refresh_expiry: Duration,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            audience: audience.into(),
            expiry,
            refresh_audience: refresh_audience.into(),
            refresh_expiry,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        anyhow::ensure!(!config.jwt_secret.is_empty(), "JWT_SECRET must not be empty");
        Ok(Self::new(
            &config.jwt_secret,
            config.jwt_issuer.clone(),
            config.jwt_audience.clone(),
            Duration::minutes(config.jwt_expiry_minutes),
            config.refresh_token_audience.clone(),
            Duration::hours(config.refresh_token_expiry_hours),
        ))
    }

    pub fn issue_pair(&self, user_id: i64, email: &str) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.generate_token(user_id, email)?,
            refresh_token: self.generate_refresh_token(user_id)?,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.expiry.num_seconds(),
        })
    }

    pub fn generate_token(&self, user_id: i64, email: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            email: email.to_owned(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    pub fn generate_refresh_token(&self, user_id: i64) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.refresh_expiry;
        let claims = RefreshClaims {
            sub: user_id,
            iss: self.issuer.clone(),
            aud: self.refresh_audience.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.refresh_audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<RefreshClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub email: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: i64,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(expiry: Duration) -> JwtService {
        JwtService::new(
            "unit-test-secret",
            "friendtime-test",
            "friendtime-clients",
            expiry,
            "friendtime-refresh",
            Duration::hours(1),
        )
    }

    #[test]
    fn access_token_round_trip() {
        let jwt = service(Duration::minutes(15));
        let pair = jwt.issue_pair(42, "alice@example.com").unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);

        let claims = jwt.verify_token(&pair.access_token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.email, "alice@example.com");

        let refresh = jwt.verify_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(refresh.sub, 42);
    }

    #[test]
    fn audiences_are_not_interchangeable() {
        let jwt = service(Duration::minutes(15));
        let pair = jwt.issue_pair(7, "bob@example.com").unwrap();
        assert!(jwt.verify_token(&pair.refresh_token).is_err());
        assert!(jwt.verify_refresh_token(&pair.access_token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = service(Duration::minutes(-10));
        let token = jwt.generate_token(1, "old@example.com").unwrap();
        assert!(jwt.verify_token(&token).is_err());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let other = JwtService::new(
            "another-secret",
            "friendtime-test",
            "friendtime-clients",
            Duration::minutes(15),
            "friendtime-refresh",
            Duration::hours(1),
        );
        let token = other.generate_token(1, "mallory@example.com").unwrap();
        assert!(service(Duration::minutes(15)).verify_token(&token).is_err());
    }
}
