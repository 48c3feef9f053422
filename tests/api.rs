use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lettre::Message;
use mail_parser::{MessageParser, MimeHeaders};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use smtp_bridge::api::{router, AppState};
use smtp_bridge::config::Settings;
use smtp_bridge::error::MailError;
use smtp_bridge::smtp::{Dispatcher, Transport};

#[derive(Default)]
struct Outbox {
    messages: Mutex<Vec<(Vec<String>, Vec<u8>)>>,
}

#[async_trait]
impl Transport for Outbox {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        let recipients = message
            .envelope()
            .to()
            .iter()
            .map(ToString::to_string)
            .collect();
        self.messages
            .lock()
            .unwrap()
            .push((recipients, message.formatted()));
        Ok(())
    }
}

async fn spawn(api_key: Option<&str>) -> (String, Arc<Outbox>) {
    let mut vars = HashMap::new();
    vars.insert("SMTP_HOST".to_string(), "localhost".to_string());
    if let Some(key) = api_key {
        vars.insert("API_KEY".to_string(), key.to_string());
    }
    let settings =
        Settings::from_source(config::Environment::default().source(Some(vars))).unwrap();

    let outbox = Arc::new(Outbox::default());
    let app = router(AppState::new(settings, Dispatcher::new(outbox.clone())));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), outbox)
}

#[tokio::test]
async fn test_relay_with_attachment() {
    let (base, outbox) = spawn(Some("secret")).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/v1/send"))
        .header("X-API-Key", "secret")
        .json(&json!({
            "from": "a@x.com",
            "from_name": "Alice",
            "to": ["b@y.com"],
            "bcc": ["c@z.com"],
            "subject": "Report",
            "text": "see attached",
            "attachments": [{"filename": "f.txt", "content": STANDARD.encode("hi"), "content_type": "text/plain"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    let message_id = body["message_id"].as_str().unwrap().to_string();

    let messages = outbox.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    let (recipients, raw) = &messages[0];
    assert_eq!(recipients, &vec!["b@y.com".to_string(), "c@z.com".to_string()]);

    let parsed = MessageParser::default().parse(raw).unwrap();
    let from = parsed.from().unwrap().first().unwrap();
    assert_eq!(from.name(), Some("Alice"));
    assert_eq!(from.address(), Some("a@x.com"));
    assert_eq!(parsed.subject(), Some("Report"));
    assert_eq!(
        message_id.trim_matches(|c| c == '<' || c == '>'),
        parsed.message_id().unwrap()
    );

    let attachment = parsed.attachment(0).unwrap();
    assert_eq!(attachment.attachment_name(), Some("f.txt"));
    assert_eq!(attachment.contents(), b"hi");
}

#[tokio::test]
async fn test_rejections_never_reach_smtp() {
    let (base, outbox) = spawn(Some("secret")).await;
    let client = reqwest::Client::new();

    let unauthorized = client
        .post(format!("{base}/api/v1/send"))
        .json(&json!({"from": "a@x.com", "to": ["b@y.com"], "subject": "Hi", "text": "t"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), 401);
    assert_eq!(unauthorized.headers()["www-authenticate"], "ApiKey");

    let empty = client
        .post(format!("{base}/api/v1/send"))
        .header("X-API-Key", "secret")
        .json(&json!({"from": "a@x.com", "to": ["b@y.com"], "subject": "Hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);

    let broken = client
        .post(format!("{base}/api/v1/send"))
        .header("X-API-Key", "secret")
        .json(&json!({
            "from": "a@x.com",
            "to": ["b@y.com"],
            "subject": "Hi",
            "text": "t",
            "attachments": [{"filename": "f.txt", "content": "not base64 at all!"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(broken.status(), 500);
    let body: Value = broken.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("f.txt"));

    assert!(outbox.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let (base, _) = spawn(Some("secret")).await;
    let body: Value = reqwest::get(format!("{base}/api/v1/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "healthy", "service": "smtp-bridge"}));
}
