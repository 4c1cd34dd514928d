//! Discourse adapter scenarios against a mocked admin API.

use directory_sync::{DiscourseAdapter, DiscourseConfig};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter_for(server: &MockServer) -> DiscourseAdapter {
    DiscourseAdapter::new(&DiscourseConfig {
        base_url: server.uri(),
        api_key: "key".to_string(),
        api_username: "system".to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

fn user_body(id: i64, username: &str, groups: serde_json::Value) -> serde_json::Value {
    json!({ "user": { "id": id, "username": username, "groups": groups } })
}

#[tokio::test]
async fn add_user_reactivates_existing_account_instead_of_recreating() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/bob.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body(42, "bob", json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/admin/users/42/unsuspend"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;
    // A duplicate-create call would hit this and fail the expectation.
    Mock::given(method("POST"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (username, password) = adapter_for(&server).add_user("bob", "bob@x.com").await;
    assert_eq!(username, "bob");
    assert_eq!(password.len(), 16);
}

#[tokio::test]
async fn add_user_creates_sanitized_account_when_absent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/New_Pilot.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(body_partial_json(json!({
            "username": "New_Pilot",
            "email": "pilot@x.com",
            "active": true,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let (username, password) = adapter_for(&server).add_user("New Pilot", "pilot@x.com").await;
    assert_eq!(username, "New_Pilot");
    assert_eq!(password.len(), 16);
}

#[tokio::test]
async fn add_user_failure_returns_empty_string_sentinel() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/bob.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (username, password) = adapter_for(&server).add_user("bob", "bob@x.com").await;
    assert_eq!(username, "");
    assert_eq!(password, "");
}

#[tokio::test]
async fn delete_user_suspends_permanently_with_fixed_reason() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/mallory.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body(7, "mallory", json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/admin/users/7/suspend"))
        .and(body_partial_json(json!({
            "duration": 99999,
            "reason": "Disabled by auth.",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    adapter_for(&server).delete_user("mallory").await.unwrap();
}

#[tokio::test]
async fn names_sharing_a_truncated_prefix_collapse_to_one_add() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/groups.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 7, "name": "Pilots-Extended-Name", "automatic": false },
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/alice.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body(1, "alice", json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/admin/groups/7/members.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    adapter_for(&server)
        .update_groups(
            "alice",
            &[
                "Pilots-Extended-Name-That-Is-Too-Long".to_string(),
                "Pilots-Extended-NameAlpha".to_string(),
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_desired_set_strips_every_manual_group() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/carol.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body(
            2,
            "carol",
            json!([
                { "id": 3, "name": "Pilots", "automatic": false },
                { "id": 4, "name": "Industry", "automatic": false },
                { "id": 10, "name": "trust_level_0", "automatic": true },
            ]),
        )))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/admin/groups/3/members.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/admin/groups/4/members.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    // Automatic groups stay untouched; a removal against id 10 would find
    // no mock and fail the update.
    adapter_for(&server)
        .update_groups("carol", &[])
        .await
        .unwrap();
}

#[tokio::test]
async fn group_creation_is_visible_on_the_next_lookup() {
    let server = MockServer::start().await;

    // First catalog fetch: the group does not exist yet.
    Mock::given(method("GET"))
        .and(path("/admin/groups.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/groups"))
        .and(body_partial_json(json!({ "name": "NewCorp", "visible": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;
    // The forced refresh after creation sees the new group even though the
    // first snapshot is still well within its TTL.
    Mock::given(method("GET"))
        .and(path("/admin/groups.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 9, "name": "NewCorp", "automatic": false },
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/dave.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body(5, "dave", json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/admin/groups/9/members.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    adapter_for(&server)
        .update_groups("dave", &["NewCorp".to_string()])
        .await
        .unwrap();
}
