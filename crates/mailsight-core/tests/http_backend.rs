//! `HttpBackend` and a full progress round against a mock backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mailsight_core::{
    ArchiveUpload, HttpBackend, IngestBackend, IngestError, MailboxId, OverallStatus,
    ProgressAggregator, SourceKind,
};
use mailsight_core::config::UploadSettings;

fn backend(server: &MockServer) -> HttpBackend {
    let base = Url::parse(&server.uri()).unwrap();
    HttpBackend::new(&base, Duration::from_secs(5), Duration::from_secs(5))
}

#[tokio::test]
async fn mailbox_list_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mailboxes/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "email": "ada@example.com", "total_messages": 100, "processed_messages": 40},
            {"id": 2, "name": "Archive", "total_messages": 27, "processed_messages": 3},
            {"no_id": true}
        ])))
        .mount(&server)
        .await;

    let mailboxes = backend(&server).list_mailboxes().await.unwrap();
    assert_eq!(mailboxes.len(), 2);
    assert_eq!(mailboxes[0].name, "ada@example.com");
    assert_eq!(mailboxes[1].id, MailboxId::from("2".to_string()));
}

#[tokio::test]
async fn mailbox_list_error_is_source_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mailboxes/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = backend(&server).list_mailboxes().await.unwrap_err();
    assert!(matches!(err, IngestError::SourceUnavailable(_)));
}

#[tokio::test]
async fn placeholder_counts_are_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/organizations"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "Will return organizations"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{}, {}, {}])))
        .mount(&server)
        .await;

    let backend = backend(&server);
    assert_eq!(backend.count_organizations().await.unwrap(), None);
    assert_eq!(backend.count_contacts().await.unwrap(), Some(3));
}

#[tokio::test]
async fn start_ingestion_posts_to_mailbox() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mailboxes/7/ingest"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "success", "details": {}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    backend(&server)
        .start_mailbox_ingestion(&MailboxId::from("7".to_string()))
        .await
        .unwrap();
}

#[tokio::test]
async fn upload_streams_multipart_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header_regex("content-type", "^multipart/form-data; boundary="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "j-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("archive.pst");
    std::fs::write(&file, b"!BDN archive bytes").unwrap();

    let upload = ArchiveUpload::new(Arc::new(backend(&server)), UploadSettings::default());
    let job = upload.submit(&file).await.unwrap().accepted().unwrap();
    assert_eq!(job.source_kind, SourceKind::UploadedArchive);
    assert_eq!(job.reference.as_deref(), Some("j-1"));

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains(r#"name="file""#));
    assert!(body.contains(r#"filename="archive.pst""#));
    assert!(body.contains("!BDN archive bytes"));
}

#[tokio::test]
async fn upload_rejection_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(413).set_body_string("too big"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("mail.mbox");
    std::fs::write(&file, b"From a@b").unwrap();

    let err = backend(&server).upload_archive(&file).await.unwrap_err();
    match err {
        IngestError::UploadFailed {
            status,
            status_text,
            body,
        } => {
            assert_eq!(status, 413);
            assert_eq!(status_text, "Payload Too Large");
            assert_eq!(body, "too big");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn progress_round_against_mock_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mailboxes/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "email": "a@example.com", "total_messages": 100, "processed_messages": 40},
            {"id": 2, "email": "b@example.com", "total_messages": 27, "processed_messages": 3}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/organizations"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(vec![json!({}); 12])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/process-attachments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success", "processed": 9, "failed": 1, "total": 6
        })))
        .mount(&server)
        .await;

    let mut aggregator = ProgressAggregator::new(Arc::new(backend(&server)));
    let report = aggregator.fetch_round().await;
    let snapshot = aggregator.apply(report);

    assert_eq!(snapshot.total_emails, 127);
    assert_eq!(snapshot.organizations, 0);
    assert_eq!(snapshot.contacts, 12);
    assert_eq!(snapshot.total_attachments, 6);
    assert_eq!(snapshot.processed_attachments, 6);
    assert_eq!(snapshot.overall_status, OverallStatus::Processing);
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let base = Url::parse("http://127.0.0.1:9/").unwrap();
    let backend = HttpBackend::new(&base, Duration::from_secs(2), Duration::from_secs(2));
    let err = backend.health().await.unwrap_err();
    assert!(err.is_network());
}

#[tokio::test]
async fn unreachable_attachment_trigger_is_network_error() {
    let base = Url::parse("http://127.0.0.1:9/").unwrap();
    let backend = HttpBackend::new(&base, Duration::from_secs(2), Duration::from_secs(2));
    let err = backend.process_attachments().await.unwrap_err();
    assert!(err.is_network(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn attachment_timeout_in_round_stays_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mailboxes/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "email": "a@example.com", "total_messages": 5, "processed_messages": 1}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/process-attachments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"total": 1, "processed": 1}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let base = Url::parse(&server.uri()).unwrap();
    let backend = HttpBackend::new(&base, Duration::from_millis(300), Duration::from_secs(5));
    let mut aggregator = ProgressAggregator::new(Arc::new(backend));
    let report = aggregator.fetch_round().await;

    match &report.attachments {
        Some(Err(e)) => assert!(e.is_network(), "unexpected error: {e:?}"),
        other => panic!("expected an attachment failure, got {other:?}"),
    }
    let snapshot = aggregator.apply(report);
    assert_eq!(snapshot.total_emails, 5);
    assert_eq!(snapshot.overall_status, OverallStatus::Processing);
}
