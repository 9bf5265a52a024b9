//! REST client for the sync server
//!
//! Endpoints:
//! - `POST api/api-token-auth/` exchanges credentials for a token
//! - `POST api/v1/rest-auth/password/change/` stores a new credential
//! - `DELETE api/v1/users/token` revokes the token
//! - `GET api/v1/{kind}/` lists payloads
//! - `POST api/v1/{kind}/bulk` upserts payloads
//! - `POST api/v1/{kind}/encryption` swaps every payload to a new key
//! - `DELETE api/v1/{kind}/{id}` deletes one payload

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::{
    AuthToken, AuthTransport, BulkWrite, EncryptedRecord, KeyExchange, RemoteStore,
    ServerContext,
};
use crate::crypto::Credential;
use crate::error::{CipherbookError, CipherbookResult};
use crate::models::EntityKind;

/// HTTP implementation of both collaborator traits
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Serialize)]
struct PasswordChange<'a> {
    new_password1: &'a str,
    new_password2: &'a str,
}

impl HttpRemote {
    /// Build a client whose calls give up after `timeout`
    pub fn new(timeout: Duration) -> CipherbookResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CipherbookError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn authorized(&self, builder: RequestBuilder, token: &AuthToken) -> RequestBuilder {
        builder.header(
            reqwest::header::AUTHORIZATION,
            format!("Token {}", token.as_str()),
        )
    }
}

/// Resolve `path` below `base`, keeping any path prefix `base` already has
pub(crate) fn endpoint(base: &Url, path: &str) -> CipherbookResult<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .map_err(|e| CipherbookError::Config(format!("Invalid endpoint '{}': {}", path, e)))
}

/// `api/v1/{kind}/{suffix}`, with `suffix` kept as a single path segment
fn collection(base: &Url, kind: EntityKind, suffix: &str) -> CipherbookResult<Url> {
    let mut url = endpoint(base, &format!("api/v1/{}/", kind.endpoint()))?;
    if !suffix.is_empty() {
        url.path_segments_mut()
            .map_err(|_| {
                CipherbookError::Config(format!("Server URL '{}' cannot hold a path", base))
            })?
            .pop_if_empty()
            .push(suffix);
    }
    Ok(url)
}

/// Map a non-success status to the error taxonomy
pub(crate) fn classify_status(status: StatusCode, body: &str) -> CipherbookError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CipherbookError::Auth(detail),
        StatusCode::REQUEST_TIMEOUT => CipherbookError::Timeout(detail),
        s if s.is_client_error() => CipherbookError::Validation(detail),
        _ => CipherbookError::Transport(detail),
    }
}

async fn check(response: Response) -> CipherbookResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

#[async_trait]
impl AuthTransport for HttpRemote {
    #[instrument(skip(self, credential), fields(server = %server_url))]
    async fn verify(
        &self,
        server_url: &Url,
        username: &str,
        credential: &Credential,
    ) -> CipherbookResult<AuthToken> {
        let url = endpoint(server_url, "api/api-token-auth/")?;
        let response = self
            .client
            .post(url)
            .json(&TokenRequest {
                username,
                password: credential.expose(),
            })
            .send()
            .await?;

        // Bad credentials come back as 400 from the token endpoint
        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(CipherbookError::Auth(format!(
                "Unable to log in with the provided credentials: {}",
                body.trim()
            )));
        }

        let token: TokenResponse = check(response).await?.json().await?;
        debug!("token issued");
        Ok(AuthToken::new(token.token))
    }

    #[instrument(skip_all, fields(server = %server.url))]
    async fn change_credential(
        &self,
        server: &ServerContext,
        new_credential: &Credential,
    ) -> CipherbookResult<()> {
        let url = endpoint(&server.url, "api/v1/rest-auth/password/change/")?;
        let body = PasswordChange {
            new_password1: new_credential.expose(),
            new_password2: new_credential.expose(),
        };
        let request = self.authorized(self.client.post(url), &server.token).json(&body);
        check(request.send().await?).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(server = %server.url))]
    async fn revoke(&self, server: &ServerContext) -> CipherbookResult<()> {
        let url = endpoint(&server.url, "api/v1/users/token")?;
        let request = self.authorized(self.client.delete(url), &server.token);
        check(request.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    #[instrument(skip(self, server), fields(server = %server.url))]
    async fn fetch_all(
        &self,
        server: &ServerContext,
        kind: EntityKind,
    ) -> CipherbookResult<Vec<EncryptedRecord>> {
        let url = collection(&server.url, kind, "")?;
        let request = self.authorized(self.client.get(url), &server.token);
        let records: Vec<EncryptedRecord> = check(request.send().await?).await?.json().await?;
        debug!(count = records.len(), "fetched payloads");
        Ok(records)
    }

    #[instrument(skip(self, server, write), fields(server = %server.url, count = write.records.len()))]
    async fn bulk_write(
        &self,
        server: &ServerContext,
        kind: EntityKind,
        write: BulkWrite,
    ) -> CipherbookResult<()> {
        let url = collection(&server.url, kind, "bulk")?;
        let request = self.authorized(self.client.post(url), &server.token).json(&write);
        check(request.send().await?).await?;
        Ok(())
    }

    #[instrument(skip(self, server, exchange), fields(server = %server.url, count = exchange.records.len()))]
    async fn reencrypt(
        &self,
        server: &ServerContext,
        kind: EntityKind,
        exchange: KeyExchange,
    ) -> CipherbookResult<()> {
        let url = collection(&server.url, kind, "encryption")?;
        let request = self
            .authorized(self.client.post(url), &server.token)
            .json(&exchange);
        check(request.send().await?).await?;
        Ok(())
    }

    #[instrument(skip(self, server), fields(server = %server.url))]
    async fn delete(
        &self,
        server: &ServerContext,
        kind: EntityKind,
        id: &str,
    ) -> CipherbookResult<()> {
        let url = collection(&server.url, kind, id)?;
        let request = self.authorized(self.client.delete(url), &server.token);
        check(request.send().await?).await?;
        Ok(())
    }
}
