use serde::Serialize;
use tracing::{debug, info};

use crate::error::RelayError;
use crate::platform::UserInfo;

/// Where the backend lives and which team this process speaks for.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendEndpoint {
    base_url: String,
    team: String,
}

impl BackendEndpoint {
    pub fn new(base_url: &str, team: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            team: team.to_string(),
        }
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CommandRequest<'a> {
    pub team: &'a str,
    pub user: &'a str,
    pub command: &'a str,
}

#[derive(Debug, Serialize)]
struct EndpointRegistration<'a> {
    uri: &'a str,
}

#[derive(Debug, Serialize)]
struct DisplayNameUpdate<'a> {
    display_name: &'a str,
}

pub struct BackendClient {
    client: reqwest::Client,
    endpoint: BackendEndpoint,
}

impl BackendClient {
    pub fn new(client: reqwest::Client, endpoint: BackendEndpoint) -> Self {
        Self { client, endpoint }
    }

    /// Submit a user's command and return the backend's reply verbatim.
    ///
    /// Commands have side effects in the backend; this is never retried.
    pub async fn submit_command(&self, user: &str, text: &str) -> Result<String, RelayError> {
        let url = self.endpoint.url("/command");
        let request = CommandRequest {
            team: self.endpoint.team(),
            user,
            command: text,
        };

        debug!("Submitting command from {} to {}", user, url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::backend(&url, e))?;
        let response = check_status(&url, response).await?;

        response.text().await.map_err(|e| RelayError::backend(&url, e))
    }

    /// Tell the backend where to push notifications for this team.
    pub async fn register_endpoint(&self, uri: &str) -> Result<(), RelayError> {
        let url = self
            .endpoint
            .url(&format!("/team/{}/endpoint", self.endpoint.team()));

        info!("Registering notification endpoint {} at {}", uri, url);

        let response = self
            .client
            .put(&url)
            .json(&EndpointRegistration { uri })
            .send()
            .await
            .map_err(|e| RelayError::backend(&url, e))?;
        check_status(&url, response).await?;
        Ok(())
    }

    pub async fn set_display_name(&self, user_id: &str, name: &str) -> Result<(), RelayError> {
        let url = self
            .endpoint
            .url(&format!("/user/{}/{}", self.endpoint.team(), user_id));

        debug!("Setting display name of {} to {:?}", user_id, name);

        let response = self
            .client
            .put(&url)
            .json(&DisplayNameUpdate { display_name: name })
            .send()
            .await
            .map_err(|e| RelayError::backend(&url, e))?;
        check_status(&url, response).await?;
        Ok(())
    }

    pub async fn resolve_and_set_display_name(&self, user: &UserInfo) -> Result<(), RelayError> {
        let name = user.resolved_display_name()?;
        self.set_display_name(&user.id, name).await
    }
}

async fn check_status(
    url: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RelayError::backend(url, format!("HTTP {}: {}", status, body)));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::user;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::ServerGuard) -> BackendClient {
        BackendClient::new(
            reqwest::Client::new(),
            BackendEndpoint::new(&server.url(), "konsulatet"),
        )
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let endpoint = BackendEndpoint::new("http://backend:8081/", "team");
        assert_eq!(endpoint.url("/command"), "http://backend:8081/command");
    }

    #[test]
    fn test_command_request_body_shape() {
        let request = CommandRequest {
            team: "konsulatet",
            user: "U1",
            command: "LJUVAST",
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"team": "konsulatet", "user": "U1", "command": "LJUVAST"})
        );
    }

    #[tokio::test]
    async fn test_submit_command_returns_body_verbatim() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/command")
            .match_body(Matcher::Json(
                json!({"team": "konsulatet", "user": "U1", "command": "LJUVAST"}),
            ))
            .with_status(200)
            .with_body("Correct!")
            .create_async()
            .await;

        let reply = client_for(&server)
            .submit_command("U1", "LJUVAST")
            .await
            .unwrap();

        assert_eq!(reply, "Correct!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_command_non_success_is_backend_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/command")
            .with_status(503)
            .with_body("down for maintenance")
            .expect(1)
            .create_async()
            .await;

        let err = client_for(&server)
            .submit_command("U1", "LJUVAST")
            .await
            .unwrap_err();

        match err {
            RelayError::BackendUnavailable { url, reason } => {
                assert!(url.ends_with("/command"));
                assert!(reason.contains("503"));
            }
            other => panic!("expected BackendUnavailable, got {other:?}"),
        }
        // Exactly one request: no automatic retry.
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_command_connection_refused() {
        let client = BackendClient::new(
            reqwest::Client::new(),
            BackendEndpoint::new("http://127.0.0.1:1", "konsulatet"),
        );
        let err = client.submit_command("U1", "x").await.unwrap_err();
        assert!(matches!(err, RelayError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_register_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/team/konsulatet/endpoint")
            .match_body(Matcher::Json(
                json!({"uri": "http://adapter:8000/notification"}),
            ))
            .with_status(200)
            .create_async()
            .await;

        client_for(&server)
            .register_endpoint("http://adapter:8000/notification")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_register_endpoint_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/team/konsulatet/endpoint")
            .with_status(500)
            .create_async()
            .await;

        let err = client_for(&server)
            .register_endpoint("http://adapter:8000/notification")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_set_display_name_checks_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/user/konsulatet/U1")
            .match_body(Matcher::Json(json!({"display_name": "erik"})))
            .with_status(404)
            .create_async()
            .await;

        let err = client_for(&server)
            .set_display_name("U1", "erik")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::BackendUnavailable { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_prefers_display_name() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/user/konsulatet/U1")
            .match_body(Matcher::Json(json!({"display_name": "erik"})))
            .with_status(200)
            .create_async()
            .await;

        client_for(&server)
            .resolve_and_set_display_name(&user("U1", "erik", "Erik Edin"))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_real_name() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/user/konsulatet/U2")
            .match_body(Matcher::Json(json!({"display_name": "Erik Edin"})))
            .with_status(200)
            .create_async()
            .await;

        client_for(&server)
            .resolve_and_set_display_name(&user("U2", "", "Erik Edin"))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_without_any_name_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = client_for(&server)
            .resolve_and_set_display_name(&user("U3", "", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::NoDisplayName(ref id) if id == "U3"));
        mock.assert_async().await;
    }
}
