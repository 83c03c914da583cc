mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::ScriptedChat;
use std::sync::Arc;
use std::time::Duration;
use twin_data_core::ports::{BlobStorage, PortError, PortResult};
use twin_data_lib::llm::ImageAnalyzer;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Hands out URLs on the mock server, as a blob service's signed URLs would.
struct MockServerBlobs {
    base: String,
}

#[async_trait]
impl BlobStorage for MockServerBlobs {
    async fn upload(&self, _container: &str, _path: &str, _data: Bytes, _content_type: &str) -> PortResult<()> {
        Err(PortError::Permanent("read-only".to_string()))
    }

    async fn download_url(&self, container: &str, path: &str, _ttl: Duration) -> PortResult<String> {
        Ok(format!("{}/{}/{}", self.base, container, path))
    }
}

fn analyzer(server: &MockServer, chat: Arc<ScriptedChat>, timeout: Duration) -> ImageAnalyzer {
    let blobs = Arc::new(MockServerBlobs { base: server.uri() });
    ImageAnalyzer::new(chat, blobs, reqwest::Client::new(), timeout)
}

#[tokio::test]
async fn stored_images_are_downloaded_and_sent_inline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photos/t1/beach.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"\x89PNG".to_vec(), "image/png"))
        .expect(1)
        .mount(&server)
        .await;
    let chat = ScriptedChat::new(&[r#"```json
{"description": "Dos personas en la playa", "peopleCount": 2, "tags": ["mar", "arena"]}
```"#]);

    let analysis = analyzer(&server, chat.clone(), Duration::from_secs(5))
        .analyze_blob("photos", "t1/beach.jpg", Some("Vacaciones 2023"))
        .await
        .unwrap();

    assert_eq!(analysis.description, "Dos personas en la playa");
    assert_eq!(analysis.people_count, 2);
    assert_eq!(analysis.tags, vec!["mar".to_string(), "arena".to_string()]);
    // The response header wins over the file extension.
    assert_eq!(chat.image_urls.lock().await[0], "data:image/png;base64,iVBORw==");
    assert!(chat.prompts.lock().await[0].contains("Vacaciones 2023"));
}

#[tokio::test]
async fn download_failures_keep_their_kind() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photos/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/photos/busy.png"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/photos/slow.png"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let chat = ScriptedChat::new(&["{}"]);
    let analyzer = analyzer(&server, chat.clone(), Duration::from_millis(200));

    assert!(analyzer.analyze_blob("photos", "missing.png", None).await.unwrap_err().is_not_found());
    assert!(analyzer.analyze_blob("photos", "busy.png", None).await.unwrap_err().is_retryable());
    assert!(analyzer.analyze_blob("photos", "slow.png", None).await.unwrap_err().is_retryable());
    assert!(chat.prompts.lock().await.is_empty());
}

#[tokio::test]
async fn the_extension_is_used_when_the_server_sends_no_image_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photos/cat.webp"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF".to_vec()))
        .mount(&server)
        .await;
    let chat = ScriptedChat::new(&[r#"{"description": "Un gato"}"#]);

    let analysis = analyzer(&server, chat.clone(), Duration::from_secs(5))
        .analyze_blob("photos", "cat.webp", None)
        .await
        .unwrap();

    assert_eq!(analysis.description, "Un gato");
    assert!(chat.image_urls.lock().await[0].starts_with("data:image/webp;base64,"));
}
