use std::sync::Arc;

use bytes::Bytes;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use thingworks_blob::{Blob, BlobRegistry, Error};

#[tokio::test]
async fn test_url_blob_downloads_on_read() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/frames/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"\xff\xd8jpeg".to_vec())
                .insert_header("content-type", "image/jpeg"),
        )
        .mount(&server)
        .await;

    let url = format!("{}/frames/1", server.uri());

    let content = tokio::task::spawn_blocking(move || {
        let blob = Blob::from_url(&url, "image/jpeg").unwrap();
        blob.content().unwrap()
    })
    .await
    .unwrap();

    assert_eq!(content, Bytes::from_static(b"\xff\xd8jpeg"));
}

#[tokio::test]
async fn test_url_blob_resolves_through_registry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spectrum.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("nm,counts\n500,12\n"))
        .mount(&server)
        .await;

    let url = format!("{}/spectrum.csv", server.uri());

    let text = tokio::task::spawn_blocking(move || {
        let registry = BlobRegistry::default();
        let blob = Arc::new(Blob::from_url(&url, "text/csv").unwrap());
        let handle = registry.register(&blob);
        registry.read(handle.id).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(text, Bytes::from_static(b"nm,counts\n500,12\n"));
}

#[tokio::test]
async fn test_url_blob_reports_http_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/missing", server.uri());

    let result = tokio::task::spawn_blocking(move || {
        let blob = Blob::from_url(&url, "application/octet-stream").unwrap();
        blob.content()
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(Error::Http(_))));
}
