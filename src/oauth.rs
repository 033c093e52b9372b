//! Authorization-code exchange with external identity providers.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use thiserror::Error;

use crate::config::{AppConfig, OAuthClient};
use crate::data::users::OAuthProfile;
use crate::models::{PROVIDER_GITHUB, PROVIDER_GOOGLE};

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    Github,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => PROVIDER_GOOGLE,
            Provider::Github => PROVIDER_GITHUB,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = OAuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            PROVIDER_GOOGLE => Ok(Provider::Google),
            PROVIDER_GITHUB => Ok(Provider::Github),
            other => Err(OAuthError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("unknown oauth provider {0:?}")]
    UnknownProvider(String),
    #[error("{0} sign-in is not configured")]
    NotConfigured(Provider),
    #[error("the provider rejected the authorization code")]
    Rejected,
    #[error("the provider did not return a verified e-mail address")]
    MissingEmail,
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Turns an authorization code into the caller's profile at `provider`.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn exchange_code(
        &self,
        provider: Provider,
        code: &str,
    ) -> Result<OAuthProfile, OAuthError>;
}

pub struct HttpIdentityProvider {
    client: Client,
    google: Option<OAuthClient>,
    github: Option<OAuthClient>,
    redirect_url: Option<String>,
}

impl HttpIdentityProvider {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .user_agent(concat!("friendtime/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            google: config.google.clone(),
            github: config.github.clone(),
            redirect_url: config.oauth_redirect_url.clone(),
        })
    }

    async fn access_token(
        &self,
        token_url: &str,
        credentials: &OAuthClient,
        code: &str,
    ) -> Result<String, OAuthError> {
        let mut form = vec![
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];
        if let Some(redirect_url) = self.redirect_url.as_deref() {
            form.push(("redirect_uri", redirect_url));
        }

        let response: TokenResponse = self
            .client
            .post(token_url)
            .header(header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?
            .json()
            .await?;

        match response.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                tracing::warn!(
                    error = response.error.as_deref().unwrap_or("missing access_token"),
                    "oauth code exchange rejected"
                );
                Err(OAuthError::Rejected)
            }
        }
    }

    async fn google_profile(&self, access_token: &str) -> Result<OAuthProfile, OAuthError> {
        let info: GoogleUserInfo = self
            .client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let email = info.email.filter(|email| !email.is_empty());
        let email = match (email, info.email_verified) {
            (Some(email), Some(true) | None) => email,
            _ => return Err(OAuthError::MissingEmail),
        };

        let name = info.name.unwrap_or_else(|| {
            join_names(
                info.given_name.as_deref().unwrap_or_default(),
                info.family_name.as_deref().unwrap_or_default(),
            )
        });

        Ok(OAuthProfile {
            email,
            name,
            avatar_url: info.picture.unwrap_or_default(),
            provider: PROVIDER_GOOGLE.to_string(),
        })
    }

    async fn github_profile(&self, access_token: &str) -> Result<OAuthProfile, OAuthError> {
        let user: GithubUser = self
            .client
            .get(GITHUB_USER_URL)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let email = match user.email.filter(|email| !email.is_empty()) {
            Some(email) => email,
            None => self.github_primary_email(access_token).await?,
        };

        Ok(OAuthProfile {
            email,
            name: user
                .name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(user.login),
            avatar_url: user.avatar_url.unwrap_or_default(),
            provider: PROVIDER_GITHUB.to_string(),
        })
    }

    /// Private GitHub addresses are only listed by the e-mails endpoint.
    async fn github_primary_email(&self, access_token: &str) -> Result<String, OAuthError> {
        let emails: Vec<GithubEmail> = self
            .client
            .get(GITHUB_EMAILS_URL)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        primary_verified(emails).ok_or(OAuthError::MissingEmail)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn exchange_code(
        &self,
        provider: Provider,
        code: &str,
    ) -> Result<OAuthProfile, OAuthError> {
        match provider {
            Provider::Google => {
                let credentials = self
                    .google
                    .as_ref()
                    .ok_or(OAuthError::NotConfigured(provider))?;
                let token = self.access_token(GOOGLE_TOKEN_URL, credentials, code).await?;
                self.google_profile(&token).await
            }
            Provider::Github => {
                let credentials = self
                    .github
                    .as_ref()
                    .ok_or(OAuthError::NotConfigured(provider))?;
                let token = self.access_token(GITHUB_TOKEN_URL, credentials, code).await?;
                self.github_profile(&token).await
            }
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

#[derive(Deserialize)]
struct GithubUser {
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

fn primary_verified(emails: Vec<GithubEmail>) -> Option<String> {
    emails
        .into_iter()
        .find(|entry| entry.primary && entry.verified)
        .map(|entry| entry.email)
}

fn join_names(given: &str, family: &str) -> String {
    format!("{} {}", given.trim(), family.trim()).trim().to_string()
}
