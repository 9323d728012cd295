use async_trait::async_trait;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ChatPlatform, UserInfo};
use crate::error::RelayError;

const USERS_PAGE_LIMIT: &str = "200";

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    members: Vec<UserInfo>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpen {
    url: String,
}

/// Slack Web API client authenticated with the bot token.
pub struct SlackClient {
    client: reqwest::Client,
    api_base_url: String,
    bot_token: String,
}

impl SlackClient {
    pub fn new(client: reqwest::Client, api_base_url: &str, bot_token: &str) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base_url, method)
    }

    /// Ask Slack for a fresh socket-mode WebSocket URL. Needs the app-level token.
    pub async fn open_connection(&self, app_token: &str) -> Result<String, RelayError> {
        let method = "apps.connections.open";
        let request = self.client.post(self.method_url(method)).bearer_auth(app_token);
        let opened: ConnectionsOpen = call(method, request).await?;
        Ok(opened.url)
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), RelayError> {
        let method = "chat.postMessage";
        debug!("Posting {} bytes to {}", text.len(), channel);

        let request = self
            .client
            .post(self.method_url(method))
            .bearer_auth(&self.bot_token)
            .json(&PostMessageRequest { channel, text });
        let _: IgnoredAny = call(method, request).await?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserInfo>, RelayError> {
        let method = "users.list";
        let mut users = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut query = vec![("limit", USERS_PAGE_LIMIT)];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }
            let request = self
                .client
                .get(self.method_url(method))
                .bearer_auth(&self.bot_token)
                .query(&query);
            let page: UsersPage = call(method, request).await?;
            users.extend(page.members);

            cursor = page
                .response_metadata
                .map(|meta| meta.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                break;
            }
        }

        debug!("Listed {} users", users.len());
        Ok(users)
    }
}

/// Send a Web API request and unwrap Slack's `{"ok": ..., "error": ...}` envelope.
async fn call<T: DeserializeOwned>(
    method: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, RelayError> {
    let response = request
        .send()
        .await
        .map_err(|e| RelayError::slack(method, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::slack(method, format!("HTTP {}", status)));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| RelayError::slack(method, e))?;

    if body.get("ok").and_then(Value::as_bool) != Some(true) {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        return Err(RelayError::slack(method, reason));
    }

    serde_json::from_value(body).map_err(|e| RelayError::slack(method, e))
}
