use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use fileshare_client::{
    ApiClient, ClientError, FileShareClient, RecordingNotifier,
    shell::{ShellOptions, run_shell},
};
use fileshare_core::{ApiBase, DeleteRequest, UploadRequest};
use tokio::{net::TcpListener, sync::oneshot};

// Keys deliberately out of alphabetical order.
const INTERFACES_JSON: &str = r#"{
    "lo": [{"address": "127.0.0.1", "netmask": "255.0.0.0", "family": "IPv4", "mac": "00:00:00:00:00:00", "internal": true, "cidr": "127.0.0.1/8"}],
    "wlan0": [{"address": "192.168.1.20", "netmask": "255.255.255.0", "family": "IPv4", "mac": "3c:22:fb:10:20:30", "internal": false, "cidr": "192.168.1.20/24"}],
    "eth1": [{"address": "10.0.0.5", "netmask": "255.0.0.0", "family": "IPv4", "mac": "00:1a:2b:3c:4d:5e", "internal": false, "cidr": "10.0.0.5/8"}]
}"#;

const LOOPBACK_ONLY_JSON: &str = r#"{
    "lo": [{"address": "127.0.0.1", "netmask": "255.0.0.0", "family": "IPv4", "mac": "00:00:00:00:00:00", "internal": true, "cidr": "127.0.0.1/8"}]
}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    LocalIp,
    Files,
    Upload(UploadRequest),
    Download(Option<String>),
    Delete(DeleteRequest),
}

#[derive(Debug, Default)]
struct ServerInner {
    seen: Vec<Seen>,
    files: Vec<String>,
    contents: HashMap<String, Vec<u8>>,
    fail_files: bool,
    fail_upload: bool,
    loopback_only: bool,
}

#[derive(Debug, Clone, Default)]
struct FakeServer {
    inner: Arc<Mutex<ServerInner>>,
}

impl FakeServer {
    fn with_files(files: &[(&str, &[u8])]) -> Self {
        let server = Self::default();
        {
            let mut inner = server.inner.lock().expect("lock fake server");
            for (name, bytes) in files {
                inner.files.push((*name).to_owned());
                inner.contents.insert((*name).to_owned(), bytes.to_vec());
            }
        }
        server
    }

    fn seen(&self) -> Vec<Seen> {
        self.inner.lock().expect("lock fake server").seen.clone()
    }

    fn count(&self, matches: impl Fn(&Seen) -> bool) -> usize {
        self.seen().iter().filter(|seen| matches(seen)).count()
    }

    fn set_fail_files(&self, fail: bool) {
        self.inner.lock().expect("lock fake server").fail_files = fail;
    }

    fn set_loopback_only(&self, loopback_only: bool) {
        self.inner.lock().expect("lock fake server").loopback_only = loopback_only;
    }

    fn set_fail_upload(&self, fail: bool) {
        self.inner.lock().expect("lock fake server").fail_upload = fail;
    }
}

fn build_router(server: FakeServer) -> Router {
    Router::new()
        .route("/local-ip", get(local_ip_handler))
        .route("/files", get(files_handler))
        .route("/upload", post(upload_handler))
        .route("/download", get(download_handler))
        .route("/delete", delete(delete_handler))
        .with_state(server)
}

async fn local_ip_handler(State(server): State<FakeServer>) -> impl IntoResponse {
    let mut inner = server.inner.lock().expect("lock");
    inner.seen.push(Seen::LocalIp);
    let body = if inner.loopback_only {
        LOOPBACK_ONLY_JSON
    } else {
        INTERFACES_JSON
    };
    ([(header::CONTENT_TYPE, "application/json")], body)
}

async fn files_handler(State(server): State<FakeServer>) -> Response {
    let mut inner = server.inner.lock().expect("lock");
    inner.seen.push(Seen::Files);
    if inner.fail_files {
        return (StatusCode::INTERNAL_SERVER_ERROR, "disk unavailable").into_response();
    }
    Json(inner.files.clone()).into_response()
}

async fn upload_handler(
    State(server): State<FakeServer>,
    Json(request): Json<UploadRequest>,
) -> Response {
    let mut inner = server.inner.lock().expect("lock");
    inner.seen.push(Seen::Upload(request.clone()));
    if inner.fail_upload {
        return (StatusCode::CONFLICT, "file already exists").into_response();
    }
    let Ok(bytes) = STANDARD.decode(&request.file) else {
        return (StatusCode::BAD_REQUEST, "bad base64").into_response();
    };
    if !inner.files.contains(&request.name) {
        inner.files.push(request.name.clone());
    }
    inner.contents.insert(request.name, bytes);
    StatusCode::OK.into_response()
}

async fn download_handler(
    State(server): State<FakeServer>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut inner = server.inner.lock().expect("lock");
    let filename = params.get("filename").cloned();
    inner.seen.push(Seen::Download(filename.clone()));
    match filename.and_then(|name| inner.contents.get(&name).cloned()) {
        Some(bytes) => bytes.into_response(),
        None => (StatusCode::NOT_FOUND, "file not found").into_response(),
    }
}

async fn delete_handler(
    State(server): State<FakeServer>,
    Json(request): Json<DeleteRequest>,
) -> Response {
    let mut inner = server.inner.lock().expect("lock");
    inner.seen.push(Seen::Delete(request.clone()));
    if !inner.files.contains(&request.name) {
        return (StatusCode::NOT_FOUND, format!("no such file: {}", request.name)).into_response();
    }
    inner.files.retain(|file| *file != request.name);
    inner.contents.remove(&request.name);
    StatusCode::OK.into_response()
}

async fn start_server(server: FakeServer) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral file server socket");
    let address = listener.local_addr().expect("file server local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let serve = axum::serve(listener, build_router(server)).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = serve.await;
    });

    (format!("http://{address}/"), shutdown_tx)
}

fn client_for(base_url: &str, download_dir: &Path) -> FileShareClient<RecordingNotifier> {
    let base = ApiBase::from_server_url(base_url).expect("valid base url");
    let api = ApiClient::new(base, Some(Duration::from_secs(5))).expect("build api client");
    FileShareClient::new(api, RecordingNotifier::new(), download_dir)
}

#[tokio::test]
async fn startup_resolves_address_and_listing() {
    let server = FakeServer::with_files(&[("a.txt", b"alpha"), ("b.png", b"\x89PNG")]);
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let mut client = client_for(&base_url, dir.path());

    client.startup().await;

    assert_eq!(client.files(), ["a.txt", "b.png"]);
    assert_eq!(client.server_address(), Some("192.168.1.20"));
    assert_eq!(server.count(|seen| *seen == Seen::LocalIp), 1);
    assert_eq!(server.count(|seen| *seen == Seen::Files), 1);
    assert!(client.notifier().messages().is_empty());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn rediscovery_without_hardware_interface_clears_address() {
    let server = FakeServer::default();
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let mut client = client_for(&base_url, dir.path());

    let resolved = client.resolve_server_address().await.expect("discovery");
    assert_eq!(resolved, Some("192.168.1.20"));

    server.set_loopback_only(true);
    let resolved = client.resolve_server_address().await.expect("discovery");
    assert_eq!(resolved, None);
    assert_eq!(client.server_address(), None);
    assert!(client.notifier().messages().is_empty());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn api_base_derived_from_origin_reaches_server() {
    let server = FakeServer::with_files(&[("x.bin", b"x")]);
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let port = url::Url::parse(&base_url)
        .expect("parse base url")
        .port()
        .expect("ephemeral port");

    let base = ApiBase::from_origin("http://127.0.0.1:3000/index.html", port).expect("derive base");
    let api = ApiClient::new(base, Some(Duration::from_secs(5))).expect("build api client");
    let dir = tempfile::tempdir().expect("create tempdir");
    let mut client = FileShareClient::new(api, RecordingNotifier::new(), dir.path());

    let files = client.refresh_file_list().await.expect("list files");
    assert_eq!(files, ["x.bin"]);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn upload_sends_base64_payload_and_refreshes_once() {
    let server = FakeServer::default();
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let original: Vec<u8> = (0..=255_u8).cycle().take(4096).collect();
    let source = dir.path().join("photo.jpg");
    std::fs::write(&source, &original).expect("write source file");

    let mut client = client_for(&base_url, dir.path());
    client
        .encode_selected_file(Some(&source))
        .await
        .expect("encode selected file");
    client.submit_upload().await.expect("upload accepted");

    let uploads: Vec<UploadRequest> = server
        .seen()
        .into_iter()
        .filter_map(|seen| match seen {
            Seen::Upload(request) => Some(request),
            _ => None,
        })
        .collect();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].name, "photo.jpg");
    assert!(!uploads[0].file.starts_with("data:"));
    assert_eq!(STANDARD.decode(&uploads[0].file).expect("decode"), original);

    assert_eq!(server.count(|seen| *seen == Seen::Files), 1);
    assert_eq!(server.seen().last(), Some(&Seen::Files));
    assert_eq!(client.files(), ["photo.jpg"]);

    // The candidate survives a successful upload and is sent again as-is.
    assert_eq!(client.pending_upload().map(|c| c.name()), Some("photo.jpg"));
    client.submit_upload().await.expect("second upload accepted");
    assert_eq!(server.count(|seen| matches!(seen, Seen::Upload(_))), 2);
    assert_eq!(server.count(|seen| *seen == Seen::Files), 2);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn failed_upload_alerts_with_server_text_and_still_refreshes() {
    let server = FakeServer::with_files(&[("keep.txt", b"k")]);
    server.set_fail_upload(true);
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let source = dir.path().join("dup.txt");
    std::fs::write(&source, b"dup").expect("write source file");

    let mut client = client_for(&base_url, dir.path());
    client
        .encode_selected_file(Some(&source))
        .await
        .expect("encode selected file");
    let err = client.submit_upload().await.expect_err("upload rejected");

    match err {
        ClientError::Server { status, body, .. } => {
            assert_eq!(status, StatusCode::CONFLICT);
            assert_eq!(body, "file already exists");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        client.notifier().messages(),
        vec!["an error occurred: file already exists".to_owned()]
    );
    assert_eq!(server.count(|seen| *seen == Seen::Files), 1);
    assert_eq!(client.files(), ["keep.txt"]);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn submit_without_selection_sends_nothing() {
    let server = FakeServer::default();
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let mut client = client_for(&base_url, dir.path());

    let err = client
        .encode_selected_file(None)
        .await
        .expect_err("nothing selected");
    assert!(matches!(err, ClientError::NoFileSelected));

    let err = client.submit_upload().await.expect_err("no candidate");
    assert!(matches!(err, ClientError::NoUploadCandidate));

    assert!(server.seen().is_empty());
    assert_eq!(
        client.notifier().messages(),
        vec!["invalid file".to_owned(), "select a file first".to_owned()]
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn download_saves_body_under_requested_name() {
    let server = FakeServer::with_files(&[("a.txt", b"alpha"), ("b.png", b"\x89PNG\r\n\x1a\n")]);
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let mut client = client_for(&base_url, dir.path());

    client.refresh_file_list().await.expect("list files");
    assert_eq!(client.files().len(), 2);

    let saved = client.download_file("b.png").await.expect("download");
    assert_eq!(saved, dir.path().join("b.png"));
    assert_eq!(std::fs::read(&saved).expect("read saved"), b"\x89PNG\r\n\x1a\n");
    assert_eq!(server.seen().last(), Some(&Seen::Download(Some("b.png".to_owned()))));

    let again = client.download_file("b.png").await.expect("second download");
    assert_eq!(again, dir.path().join("b (1).png"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn download_encodes_filename_query() {
    let server = FakeServer::with_files(&[("my report & notes.txt", b"r")]);
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let client = client_for(&base_url, dir.path());

    let saved = client
        .download_file("my report & notes.txt")
        .await
        .expect("download");
    assert_eq!(std::fs::read(saved).expect("read saved"), b"r");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn missing_download_alerts_and_writes_nothing() {
    let server = FakeServer::default();
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let client = client_for(&base_url, dir.path());

    let err = client.download_file("ghost.bin").await.expect_err("missing file");
    assert!(matches!(err, ClientError::Server { status, .. } if status == StatusCode::NOT_FOUND));
    assert_eq!(
        client.notifier().messages(),
        vec!["an error occurred: file not found".to_owned()]
    );
    assert!(!dir.path().join("ghost.bin").exists());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn delete_sends_name_and_refreshes_even_on_failure() {
    let server = FakeServer::with_files(&[("a.txt", b"a"), ("b.png", b"b")]);
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let mut client = client_for(&base_url, dir.path());

    client.delete_file("a.txt").await.expect("delete");
    assert!(server.seen().contains(&Seen::Delete(DeleteRequest {
        name: "a.txt".to_owned()
    })));
    assert_eq!(server.count(|seen| *seen == Seen::Files), 1);
    assert_eq!(client.files(), ["b.png"]);

    let err = client.delete_file("ghost").await.expect_err("delete missing");
    assert!(matches!(err, ClientError::Server { .. }));
    assert_eq!(server.count(|seen| *seen == Seen::Files), 2);
    assert_eq!(
        client.notifier().messages(),
        vec!["an error occurred: no such file: ghost".to_owned()]
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn failed_refresh_keeps_previous_listing() {
    let server = FakeServer::with_files(&[("a.txt", b"a")]);
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let mut client = client_for(&base_url, dir.path());

    client.refresh_file_list().await.expect("first listing");
    server.set_fail_files(true);
    assert!(client.refresh_file_list().await.is_err());

    assert_eq!(client.files(), ["a.txt"]);
    assert_eq!(
        client.notifier().messages(),
        vec!["an error occurred: disk unavailable".to_owned()]
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn unreachable_server_is_reported_not_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local addr");
    drop(listener);

    let dir = tempfile::tempdir().expect("create tempdir");
    let mut client = client_for(&format!("http://{address}/"), dir.path());

    client.startup().await;
    assert!(client.files().is_empty());
    assert_eq!(client.server_address(), None);

    let messages = client.notifier().messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.starts_with("an error occurred: ")));
}

#[tokio::test]
async fn changing_api_base_reruns_startup() {
    let first = FakeServer::with_files(&[("one.txt", b"1")]);
    let second = FakeServer::with_files(&[("two.txt", b"2")]);
    let (first_url, first_shutdown) = start_server(first.clone()).await;
    let (second_url, second_shutdown) = start_server(second.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let mut client = client_for(&first_url, dir.path());

    client.startup().await;
    assert_eq!(client.files(), ["one.txt"]);

    let same = ApiBase::from_server_url(&first_url).expect("base");
    client.set_api_base(same).await;
    assert_eq!(first.count(|seen| *seen == Seen::Files), 1);

    let next = ApiBase::from_server_url(&second_url).expect("base");
    client.set_api_base(next).await;
    assert_eq!(client.files(), ["two.txt"]);
    assert_eq!(second.count(|seen| *seen == Seen::LocalIp), 1);

    let _ = first_shutdown.send(());
    let _ = second_shutdown.send(());
}

#[tokio::test]
async fn shell_session_lists_and_downloads_by_position() {
    let server = FakeServer::with_files(&[("a.txt", b"alpha"), ("b.png", b"png")]);
    let (base_url, shutdown_tx) = start_server(server.clone()).await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let mut client = client_for(&base_url, dir.path());

    let input: &[u8] = b"ls\nget 2\nbogus\nquit\nls\n";
    let mut out = Vec::new();
    run_shell(
        &mut client,
        input,
        &mut out,
        ShellOptions {
            share_banner: true,
            web_port: 3000,
        },
    )
    .await
    .expect("shell runs");

    let text = String::from_utf8(out).expect("utf8 output");
    assert!(text.contains("http://192.168.1.20:3000"));
    assert!(text.contains("2. b.png"));
    assert!(text.contains("unknown command `bogus`"));
    assert_eq!(std::fs::read(dir.path().join("b.png")).expect("saved"), b"png");
    assert!(server.seen().contains(&Seen::Download(Some("b.png".to_owned()))));
    // Start-up plus one `ls`; nothing after `quit` runs.
    assert_eq!(server.count(|seen| *seen == Seen::Files), 2);

    let _ = shutdown_tx.send(());
}
