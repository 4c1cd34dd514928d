//! Discourse admin API client.
//!
//! Authenticates every call by injecting `api_key` and `api_username` as
//! query parameters. Failures are surfaced three ways by Discourse and all
//! three are normalized here: an `errors` array in the body, a
//! `success: false` field on an otherwise fine response, and plain non-2xx
//! statuses.

use crate::clients::RemoteGroup;
use crate::config::DiscourseConfig;
use crate::{Error, Result};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

const SERVICE: &str = "discourse";

/// A user record as returned by `GET /users/{username}.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscourseUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub groups: Vec<DiscourseGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscourseGroup {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub automatic: bool,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: DiscourseUser,
}

pub struct DiscourseClient {
    http: Client,
    base_url: Url,
    api_key: String,
    api_username: String,
}

impl DiscourseClient {
    pub fn new(config: &DiscourseConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::InvalidInput {
            field: "discourse.base_url".to_string(),
            reason: e.to_string(),
        })?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            api_username: config.api_username.clone(),
        })
    }

    /// Execute one admin API call and normalize the three failure shapes.
    async fn execute(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let mut url = self.base_url.join(path).map_err(|e| Error::InvalidInput {
            field: "path".to_string(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("api_key", &self.api_key)
            .append_pair("api_username", &self.api_username);

        let mut request = self.http.request(method.clone(), url);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let parsed: Option<Value> = serde_json::from_str(&text).ok();
        if parsed.is_none() && !text.is_empty() {
            warn!("No json data received for {} {}", method, path);
        }

        if let Some(errors) = parsed.as_ref().and_then(|v| v.get("errors")) {
            if errors.as_array().map_or(true, |a| !a.is_empty()) {
                error!("Discourse execution failed for {}: {}", path, errors);
                return Err(Error::remote(SERVICE, errors.to_string()));
            }
        }

        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found(SERVICE, "resource", path));
        }
        if !status.is_success() {
            return Err(Error::remote(
                SERVICE,
                format!("HTTP {} for {}: {}", status, path, text),
            ));
        }

        if parsed.as_ref().and_then(|v| v.get("success")) == Some(&Value::Bool(false)) {
            return Err(Error::remote(SERVICE, format!("execution failed for {path}")));
        }

        Ok(parsed.unwrap_or(Value::Null))
    }

    /// All non-automatic groups on the forum.
    pub async fn list_groups(&self) -> Result<Vec<RemoteGroup>> {
        let data = self.execute(Method::GET, "/admin/groups.json", None).await?;
        let groups: Vec<DiscourseGroup> = serde_json::from_value(data)?;
        Ok(groups
            .into_iter()
            .filter(|g| !g.automatic)
            .map(|g| RemoteGroup {
                id: g.id,
                name: g.name,
            })
            .collect())
    }

    pub async fn create_group(&self, name: &str) -> Result<()> {
        self.execute(
            Method::POST,
            "/admin/groups",
            Some(json!({ "name": name, "visible": true })),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_group(&self, group_id: i64) -> Result<()> {
        self.execute(
            Method::DELETE,
            &format!("/admin/groups/{group_id}.json"),
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn add_group_member(&self, group_id: i64, username: &str) -> Result<()> {
        self.execute(
            Method::PUT,
            &format!("/admin/groups/{group_id}/members.json"),
            Some(json!({ "usernames": [username] })),
        )
        .await?;
        Ok(())
    }

    pub async fn remove_group_member(&self, group_id: i64, username: &str) -> Result<()> {
        self.execute(
            Method::DELETE,
            &format!("/admin/groups/{group_id}/members.json"),
            Some(json!({ "username": username })),
        )
        .await?;
        Ok(())
    }

    /// Fetch a user record; absence is a hard [`Error::NotFound`].
    pub async fn get_user(&self, username: &str) -> Result<DiscourseUser> {
        debug!("Fetching discourse user {}", username);
        let data = self
            .execute(Method::GET, &format!("/users/{username}.json"), None)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    Error::not_found(SERVICE, "user", username)
                } else {
                    e
                }
            })?;
        let envelope: UserEnvelope = serde_json::from_value(data)?;
        Ok(envelope.user)
    }

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<()> {
        self.execute(
            Method::POST,
            "/users",
            Some(json!({
                "name": username,
                "username": username,
                "email": email,
                "password": password,
                "active": true,
            })),
        )
        .await?;
        Ok(())
    }

    pub async fn update_user(&self, user_id: i64, params: Value) -> Result<()> {
        self.execute(
            Method::PUT,
            &format!("/users/{user_id}.json"),
            Some(json!({ "params": params })),
        )
        .await?;
        Ok(())
    }

    pub async fn activate_user(&self, user_id: i64) -> Result<()> {
        self.execute(Method::PUT, &format!("/admin/users/{user_id}/activate"), None)
            .await?;
        Ok(())
    }

    pub async fn set_email(&self, username: &str, email: &str) -> Result<()> {
        self.execute(
            Method::PUT,
            &format!("/users/{username}/preferences/email"),
            Some(json!({ "email": email })),
        )
        .await?;
        Ok(())
    }

    pub async fn suspend_user(&self, user_id: i64, duration_days: u32, reason: &str) -> Result<()> {
        self.execute(
            Method::PUT,
            &format!("/admin/users/{user_id}/suspend"),
            Some(json!({ "duration": duration_days, "reason": reason })),
        )
        .await?;
        Ok(())
    }

    pub async fn unsuspend_user(&self, user_id: i64) -> Result<()> {
        self.execute(
            Method::PUT,
            &format!("/admin/users/{user_id}/unsuspend"),
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> DiscourseClient {
        DiscourseClient::new(&DiscourseConfig {
            base_url: server.uri(),
            api_key: "key".to_string(),
            api_username: "system".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn auth_is_sent_as_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin/groups.json"))
            .and(query_param("api_key", "key"))
            .and(query_param("api_username", "system"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.list_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn automatic_groups_are_filtered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin/groups.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": 1, "name": "staff", "automatic": true },
                { "id": 41, "name": "Pilots", "automatic": false },
            ])))
            .mount(&server)
            .await;

        let groups = client_for(&server).list_groups().await.unwrap();
        assert_eq!(
            groups,
            vec![RemoteGroup {
                id: 41,
                name: "Pilots".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn missing_user_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/ghost.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server).get_user("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn errors_array_becomes_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/groups"))
            .respond_with(ResponseTemplate::new(422).set_body_json(
                serde_json::json!({ "errors": ["Name has already been taken"] }),
            ))
            .mount(&server)
            .await;

        let err = client_for(&server).create_group("Pilots").await.unwrap_err();
        match err {
            Error::Remote { message, .. } => assert!(message.contains("already been taken")),
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_false_becomes_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/admin/users/7/suspend"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": false })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .suspend_user(7, 99_999, "Disabled by auth.")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
    }
}
