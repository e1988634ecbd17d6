use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vocab_sync::models::{DailyStats, Settings, VocabList};
use vocab_sync::store::{HttpRemoteFactory, RemoteStoreFactory, ReplicaStore, StoreError};

fn remote(server: &MockServer) -> std::sync::Arc<dyn ReplicaStore> {
    HttpRemoteFactory::new(server.uri(), Some("tok".into()), Duration::from_millis(300))
        .unwrap()
        .for_user("u1")
}

#[tokio::test]
async fn load_lists_decodes_and_skips_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1/lists"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a", "name": "Verbs", "createdAt": 1, "lastModified": 9, "tags": [], "flashcards": []},
            {"name": "broken"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let lists = remote(&server).load_lists().await.unwrap();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].merge_timestamp(), 9);
}

#[tokio::test]
async fn status_codes_map_to_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1/lists"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/users/u1/lists/x"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/users/u1/settings/user"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let store = remote(&server);
    assert!(store.load_lists().await.unwrap_err().is_not_found());
    assert!(matches!(store.delete_list("x").await.unwrap_err(), StoreError::Unauthorized(_)));
    match store.save_settings(&Settings::default()).await.unwrap_err() {
        StoreError::HttpStatus { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn slow_remote_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1/lists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = remote(&server).load_lists().await.unwrap_err();
    assert!(matches!(err, StoreError::Timeout(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn save_lists_sends_one_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/u1/batch"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let a = VocabList::new("A", vec![], 1);
    let b = VocabList::new("B", vec![], 2);
    let store = remote(&server);
    store.save_lists(&[a.clone(), b.clone()]).await.unwrap();
    store.save_lists(&[]).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let writes = body["writes"].as_array().unwrap();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0]["op"], "set");
    assert_eq!(writes[0]["path"], format!("lists/{}", a.id));
    assert_eq!(writes[1]["data"]["name"], "B");
}

#[tokio::test]
async fn settings_are_written_without_secret() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/users/u1/settings/user"))
        .and(body_partial_json(json!({"targetLang": "fr", "keepImages": true})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let settings = Settings {
        api_key: "abc".into(),
        target_lang: "fr".into(),
        keep_images: true,
        ..Settings::default()
    };
    remote(&server).save_settings(&settings).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.get("apiKey").is_none());
}

#[tokio::test]
async fn remote_settings_without_secret_load_blank() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1/settings/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sourceLang": "en", "targetLang": "pt", "keepImages": false
        })))
        .mount(&server)
        .await;

    let settings = remote(&server).load_settings().await.unwrap().unwrap();
    assert_eq!(settings.target_lang, "pt");
    assert_eq!(settings.api_key, "");
}

#[tokio::test]
async fn list_ids_are_encoded_in_every_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/u1/batch"))
        .and(body_partial_json(json!({"writes": [{"op": "set", "path": "lists/a%2Fb"}]})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/users/u1/lists/a%2Fb"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/users/u1/lists/a%2Fb"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut list = VocabList::new("Slashed", vec![], 1);
    list.id = "a/b".into();
    let store = remote(&server);
    store.save_lists(std::slice::from_ref(&list)).await.unwrap();
    store.save_list(&list).await.unwrap();
    store.delete_list("a/b").await.unwrap();
}

#[tokio::test]
async fn missing_settings_load_as_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1/settings/user"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(remote(&server).load_settings().await.unwrap().is_none());
}

#[tokio::test]
async fn delete_of_missing_list_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/users/u1/lists/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    remote(&server).delete_list("gone").await.unwrap();
}

#[tokio::test]
async fn daily_stats_use_date_range_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1/dailyStats"))
        .and(query_param("start", "2024-03-01"))
        .and(query_param("end", "2024-03-07"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"date": "2024-03-02", "reviews": 4, "correct": 3, "byList": {"a": {"reviews": 4, "correct": 3}}}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/users/u1/dailyStats/2024-03-02"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = remote(&server);
    let days = store
        .load_daily_stats(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].by_list["a"].correct, 3);

    store.save_daily_stats(&DailyStats::empty("2024-03-02")).await.unwrap();
}

#[tokio::test]
async fn clear_all_deletes_lists_and_settings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1/lists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a", "name": "A", "createdAt": 1, "tags": [], "flashcards": []}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/users/u1/batch"))
        .and(body_partial_json(json!({"writes": [{"op": "delete", "path": "lists/a"}]})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/users/u1/settings/user"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    remote(&server).clear_all().await.unwrap();
}
