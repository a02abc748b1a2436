//! Exports against a local stand-in for the CMS export API and asset CDN.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::get;
use common::testing::TestConfigBuilder;
use exporter::{ASSETS_DIR, DatasetExporter, ExportError, ExportRequest, HttpExporter};

const TOKEN: &str = "test-source-token";

#[derive(Clone)]
struct FakeCms {
    export_body: Arc<String>,
    failing_assets: Arc<HashSet<String>>,
}

async fn export_handler(
    State(cms): State<FakeCms>,
    UrlPath(_dataset): UrlPath<String>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(format!("Bearer {TOKEN}").as_str());
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            r#"{"error":"Unauthorized","message":"Session not found"}"#.to_string(),
        );
    }
    (StatusCode::OK, cms.export_body.as_ref().clone())
}

async fn asset_handler(
    State(cms): State<FakeCms>,
    UrlPath((_project, _dataset, file)): UrlPath<(String, String, String)>,
) -> (StatusCode, Vec<u8>) {
    if cms.failing_assets.contains(&file) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new());
    }
    (StatusCode::OK, file.into_bytes())
}

async fn start(export_body: &str, failing_assets: &[&str]) -> Result<SocketAddr> {
    let cms = FakeCms {
        export_body: Arc::new(export_body.to_string()),
        failing_assets: Arc::new(failing_assets.iter().map(|s| s.to_string()).collect()),
    };
    let app = Router::new()
        .route("/v2021-06-07/data/export/:dataset", get(export_handler))
        .route("/images/:project/:dataset/:file", get(asset_handler))
        .route("/files/:project/:dataset/:file", get(asset_handler))
        .with_state(cms);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

fn exporter_for(addr: SocketAddr, builder: TestConfigBuilder) -> (HttpExporter, ExportRequest) {
    let config = builder
        .with_source_base_url(&format!("http://{addr}"))
        .build();
    let exporter = HttpExporter::new(&config.source).unwrap();
    (exporter, ExportRequest::from_config(&config))
}

fn image_doc(id: &str, hash: &str) -> String {
    let asset = format!(r#"{{"_type":"reference","_ref":"image-{hash}-10x10-png"}}"#);
    format!(r#"{{"_id":"{id}","_type":"post","cover":{{"_type":"image","asset":{asset}}}}}"#)
}

#[tokio::test]
async fn test_export_excludes_drafts_and_downloads_assets() -> Result<()> {
    let body = [
        image_doc("post-1", "aaa111"),
        image_doc("drafts.post-1", "bbb222"),
        r#"{"_id":"doc-1","_type":"doc","file":{"_type":"file","asset":{"_type":"reference","_ref":"file-ccc333-pdf"}}}"#.to_string(),
    ]
    .join("\n");
    let addr = start(&body, &[]).await?;
    let (exporter, request) = exporter_for(addr, TestConfigBuilder::new().with_drafts(false));
    let out = tempfile::tempdir()?;

    let summary = exporter.export(&request, out.path()).await?;

    assert_eq!(summary.documents, 2);
    assert_eq!(summary.drafts_skipped, 1);
    let records = std::fs::read_to_string(&summary.documents_path)?;
    assert!(!records.contains("drafts."));
    assert_eq!(records.lines().count(), 2);

    // Draft-only asset is never fetched.
    let assets_dir = summary.assets_dir.expect("assets requested");
    assert_eq!(summary.assets.total, 2);
    assert_eq!(summary.assets.downloaded, 2);
    assert!(assets_dir.join("aaa111-10x10.png").exists());
    assert!(assets_dir.join("ccc333.pdf").exists());
    assert!(!assets_dir.join("bbb222-10x10.png").exists());
    Ok(())
}

#[tokio::test]
async fn test_failed_assets_do_not_fail_the_export() -> Result<()> {
    let body = (1..=5)
        .map(|i| image_doc(&format!("post-{i}"), &format!("{i}{i}{i}")))
        .collect::<Vec<_>>()
        .join("\n");
    let addr = start(&body, &["222-10x10.png", "444-10x10.png"]).await?;
    let (exporter, request) =
        exporter_for(addr, TestConfigBuilder::new().with_asset_concurrency(2));
    let out = tempfile::tempdir()?;

    let summary = exporter.export(&request, out.path()).await?;

    assert_eq!(summary.documents, 5);
    assert_eq!(summary.assets.total, 5);
    assert_eq!(summary.assets.downloaded, 3);
    assert_eq!(summary.assets.failed, 2);
    assert!(
        summary
            .assets
            .failed_urls
            .iter()
            .all(|url| url.contains("/images/test-project/test-dataset/"))
    );
    Ok(())
}

#[tokio::test]
async fn test_assets_skipped_when_disabled() -> Result<()> {
    let addr = start(&image_doc("post-1", "aaa111"), &[]).await?;
    let (exporter, request) = exporter_for(addr, TestConfigBuilder::new().with_assets(false));
    let out = tempfile::tempdir()?;

    let summary = exporter.export(&request, out.path()).await?;

    assert_eq!(summary.documents, 1);
    assert!(summary.assets_dir.is_none());
    assert_eq!(summary.assets.total, 0);
    assert!(!out.path().join(ASSETS_DIR).exists());
    Ok(())
}

#[tokio::test]
async fn test_unauthorized_export_is_not_retryable() -> Result<()> {
    let addr = start("{}", &[]).await?;
    let (exporter, mut request) = exporter_for(addr, TestConfigBuilder::new());
    request.token = common::Secret::new("wrong-token");
    let out = tempfile::tempdir()?;

    let err = exporter.export(&request, out.path()).await.unwrap_err();

    match &err {
        ExportError::Status { status, body, .. } => {
            assert_eq!(*status, 401);
            assert!(body.contains("Session not found"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn test_empty_export_is_an_error() -> Result<()> {
    let addr = start("", &[]).await?;
    let (exporter, request) = exporter_for(addr, TestConfigBuilder::new());
    let out = tempfile::tempdir()?;

    let err = exporter.export(&request, out.path()).await.unwrap_err();

    assert!(matches!(err, ExportError::EmptyExport { .. }));
    assert_eq!(err.kind(), common::ErrorKind::EmptyResult);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() -> Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let (exporter, request) = exporter_for(addr, TestConfigBuilder::new());
    let out = tempfile::tempdir()?;

    let err = exporter.export(&request, out.path()).await.unwrap_err();

    assert!(matches!(err, ExportError::Transport { .. }));
    assert!(err.is_retryable());
    Ok(())
}
