//! Contact directory REST client

use crate::config::DirectoryConfig;
use crate::error::{DirectoryError, DirectoryResult};
use crate::token::{identity_from_token, TokenClaims};
use peercall_core::{Identity, UserId};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Header carrying the session token on every directory request
pub const AUTH_HEADER: &str = "x-auth-token";

/// An entry in the user's contact list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(alias = "_id")]
    pub id: UserId,
    pub username: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddContactRequest<'a> {
    share_id: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    msg: String,
}

#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: Client,
    config: DirectoryConfig,
}

impl DirectoryClient {
    pub fn new(config: DirectoryConfig) -> DirectoryResult<Self> {
        config.validate()?;

        let token = HeaderValue::from_str(config.token.trim())
            .map_err(|_| DirectoryError::invalid_token("token contains characters not allowed in a header"))?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_HEADER, token);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// The identity the configured token was issued for
    pub fn identity(&self) -> DirectoryResult<Identity> {
        identity_from_token(&self.config.token)
    }

    pub fn claims(&self) -> DirectoryResult<TokenClaims> {
        TokenClaims::decode(&self.config.token)
    }

    /// `GET /contacts`
    pub async fn list_contacts(&self) -> DirectoryResult<Vec<Contact>> {
        let url = self.config.endpoint("contacts");
        debug!("GET {}", url);
        let response = self.http.get(&url).send().await?;
        let contacts: Vec<Contact> = decode(check(response).await?).await?;
        debug!("Directory returned {} contacts", contacts.len());
        Ok(contacts)
    }

    /// `POST /contacts/add` with the other user's share id
    pub async fn add_contact(&self, share_id: &str) -> DirectoryResult<()> {
        let share_id = share_id.trim();
        if share_id.is_empty() {
            return Err(DirectoryError::rejected(400, "share id must not be empty"));
        }

        let url = self.config.endpoint("contacts/add");
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .json(&AddContactRequest { share_id })
            .send()
            .await?;
        check(response).await?;
        info!("Added contact with share id {}", share_id);
        Ok(())
    }
}

/// Turn a non-success response into [`DirectoryError::Rejected`], using the
/// body's `msg` when the directory provides one
async fn check(response: Response) -> DirectoryResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(error) => error.msg,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
    };
    warn!("Directory request failed with {}: {}", status, message);
    Err(DirectoryError::rejected(status.as_u16(), message))
}

async fn decode<T: DeserializeOwned>(response: Response) -> DirectoryResult<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| DirectoryError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contact_accepts_either_id_spelling() {
        let mongo: Contact = serde_json::from_value(json!({"_id": "a1", "username": "ann"})).unwrap();
        let plain: Contact = serde_json::from_value(json!({"id": "a1", "username": "ann"})).unwrap();
        assert_eq!(mongo, plain);
        assert_eq!(mongo.id, UserId::from("a1"));
    }

    #[test]
    fn test_add_contact_body_shape() {
        let body = serde_json::to_value(AddContactRequest { share_id: "amber-fox" }).unwrap();
        assert_eq!(body, json!({"shareId": "amber-fox"}));
    }

    #[test]
    fn test_new_rejects_header_unsafe_token() {
        let result = DirectoryClient::new(DirectoryConfig::new("http://localhost/api", "bad\ntoken"));
        assert!(matches!(result, Err(DirectoryError::InvalidToken(_))));
    }
}
