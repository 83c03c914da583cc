mod common;

use common::test_config;
use serde_json::json;
use twin_data_core::ports::{PortError, SearchIndexClient};
use twin_data_core::search::{FilterClause, IndexAction, SearchRequest};
use twin_data_lib::adapters::search_rest::RestSearchClient;
use twin_data_lib::indexes::schema::diary_index_definition;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> RestSearchClient {
    let mut config = test_config().search;
    config.endpoint = server.uri();
    RestSearchClient::new(reqwest::Client::new(), config)
}

#[tokio::test]
async fn index_schemas_are_pushed_with_the_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/indexes/diary-test"))
        .and(header("api-key", "test-key"))
        .and(query_param("api-version", test_config().search.api_version.as_str()))
        .and(body_partial_json(json!({ "name": "diary-test" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "name": "diary-test" })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).create_or_update_index(&diary_index_definition("diary-test", 16)).await.unwrap();
}

#[tokio::test]
async fn per_item_results_are_read_from_the_batch_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/diary-test/docs/index"))
        .and(body_partial_json(json!({ "value": [{ "id": "d1", "@search.action": "mergeOrUpload" }] })))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!({
            "value": [
                { "key": "d1", "status": true, "statusCode": 200, "errorMessage": null },
                { "key": "d2", "status": false, "statusCode": 503, "errorMessage": "service busy" }
            ]
        })))
        .mount(&server)
        .await;

    let document = json!({ "id": "d1" }).as_object().cloned().unwrap();
    let results = client(&server)
        .index_documents("diary-test", vec![IndexAction::merge_or_upload(document)])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].succeeded);
    assert!(!results[1].succeeded);
    assert_eq!(results[1].status_code, 503);
    assert_eq!(results[1].error_message.as_deref(), Some("service busy"));
}

#[tokio::test]
async fn searches_send_filters_and_parse_the_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/diary-test/docs/search"))
        .and(body_partial_json(json!({ "search": "calma", "filter": "twinId eq 't1'", "count": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "@odata.count": 12,
            "value": [{ "@search.score": 0.8, "id": "d1", "twinId": "t1" }]
        })))
        .mount(&server)
        .await;

    let request = SearchRequest {
        search_text: Some("calma".into()),
        filters: vec![FilterClause::eq_text("twinId", "t1")],
        top: 1,
        include_total_count: true,
        ..Default::default()
    };
    let response = client(&server).search("diary-test", &request).await.unwrap();

    assert_eq!(response.total_count, Some(12));
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].document["id"], "d1");
    assert!(!response.hits[0].document.contains_key("@search.score"));
}

#[tokio::test]
async fn service_errors_map_to_port_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/diary-test/docs/search"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/indexes/diary-test/docs/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/indexes/diary-test"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad schema"))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.search("diary-test", &SearchRequest::default()).await.unwrap_err();
    assert!(matches!(err, PortError::Transient(_)));
    assert!(client.get_document("diary-test", "missing").await.unwrap_err().is_not_found());
    let err = client.create_or_update_index(&diary_index_definition("diary-test", 16)).await.unwrap_err();
    assert!(matches!(err, PortError::Permanent(_)));
}

#[tokio::test]
async fn documents_are_fetched_by_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/diary-test/docs/diary_analysis_e1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "diary_analysis_e1", "diaryEntryId": "e1" })))
        .mount(&server)
        .await;

    let document = client(&server).get_document("diary-test", "diary_analysis_e1").await.unwrap();
    assert_eq!(document["diaryEntryId"], "e1");
}
