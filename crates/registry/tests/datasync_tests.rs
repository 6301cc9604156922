use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use registry::{DataSyncClient, DataSyncConfig, DataSyncError, HttpDataSyncClient};

/// Answers one request and hands the raw request text back to the test.
fn spawn_server(status: u16, body: &'static str) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let _ = tx.send(read_request(&mut stream));
            let response = format!(
                "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    (format!("http://{}", addr), rx)
}

fn read_request(stream: &mut impl Read) -> String {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let read = stream.read(&mut buf).unwrap_or(0);
        if read == 0 {
            break;
        }
        request.extend_from_slice(&buf[..read]);
        let text = String::from_utf8_lossy(&request).to_string();
        if let Some(split) = text.find("\r\n\r\n") {
            let content_length = text[..split]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if request.len() >= split + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&request).to_string()
}

fn client(base_url: String) -> HttpDataSyncClient {
    HttpDataSyncClient::new(DataSyncConfig {
        base_url,
        timeout_ms: 2_000,
        ..DataSyncConfig::default()
    })
    .expect("client")
}

#[tokio::test]
async fn fetches_gsrns_by_tin() {
    let (url, requests) = spawn_server(200, r#"[{"gsrn":"571313000000000001"},{"gsrn":"571313000000000002"}]"#);
    let gsrns = client(url)
        .meteringpoints_by_tin("token", "12345678")
        .await
        .expect("gsrns");
    assert_eq!(gsrns, vec!["571313000000000001", "571313000000000002"]);
    let request = requests.recv().expect("request");
    assert!(request.starts_with("GET /MeteringPoint/GetByTin/12345678 "));
    assert!(request.to_lowercase().contains("authorization: bearer: token"));
}

#[tokio::test]
async fn unknown_tin_maps_to_not_found_message() {
    let (url, _requests) = spawn_server(404, "");
    let err = client(url)
        .meteringpoints_by_tin("token", "1")
        .await
        .expect_err("error");
    match err {
        DataSyncError::Http { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "User with tin not found.");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn other_status_maps_to_fetch_failure() {
    let (url, _requests) = spawn_server(500, "");
    let err = client(url)
        .meteringpoints_by_tin("token", "1")
        .await
        .expect_err("error");
    assert!(matches!(
        err,
        DataSyncError::Http { status: 500, ref message } if message == "Failed to fetch meteringpoints by tin."
    ));
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let (url, _requests) = spawn_server(200, r#"{"unexpected":true}"#);
    let err = client(url)
        .meteringpoints_by_tin("token", "1")
        .await
        .expect_err("error");
    assert!(matches!(err, DataSyncError::Decode(_)));
}

#[tokio::test]
async fn relation_results_split_by_outcome() {
    let (url, requests) = spawn_server(
        200,
        r#"[{"meteringpointId":"g1","relationshipCreated":true},{"meteringpointId":"g2","relationshipCreated":false}]"#,
    );
    let outcome = client(url)
        .create_relations("token", "12345678", &["g1".to_string(), "g2".to_string()])
        .await
        .expect("outcome");
    assert_eq!(outcome.successful, vec!["g1"]);
    assert_eq!(outcome.failed, vec!["g2"]);
    let request = requests.recv().expect("request");
    assert!(request.starts_with("POST /MeteringPoint/createRelation "));
    assert!(request.contains(r#""name_id":"12345678""#));
}

#[tokio::test]
async fn relation_failure_status_is_reported() {
    let (url, _requests) = spawn_server(400, "");
    let err = client(url)
        .create_relations("token", "1", &["g1".to_string()])
        .await
        .expect_err("error");
    assert_eq!(
        err.to_string(),
        "Failed to create meteringpoint relationship. (status 400)"
    );
}

#[tokio::test]
async fn tin_with_path_characters_is_rejected_before_sending() {
    let (url, requests) = spawn_server(200, "[]");
    let err = client(url)
        .meteringpoints_by_tin("token", "123/../../admin/delete?all=1#")
        .await
        .expect_err("error");
    assert!(matches!(err, DataSyncError::InvalidTin(_)));
    assert!(requests.recv_timeout(Duration::from_millis(200)).is_err());
}

#[tokio::test]
async fn base_url_path_prefix_is_kept() {
    let (url, requests) = spawn_server(200, "[]");
    client(format!("{url}/api/"))
        .meteringpoints_by_tin("token", "12345678")
        .await
        .expect("gsrns");
    let request = requests.recv().expect("request");
    assert!(request.starts_with("GET /api/MeteringPoint/GetByTin/12345678 "));
}

#[tokio::test]
async fn configured_timeout_bounds_a_silent_upstream() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            thread::sleep(Duration::from_secs(5));
            drop(stream);
        }
    });
    let client = HttpDataSyncClient::new(DataSyncConfig {
        base_url: format!("http://{addr}"),
        timeout_ms: 200,
        ..DataSyncConfig::default()
    })
    .expect("client");

    let started = Instant::now();
    let err = client
        .meteringpoints_by_tin("token", "12345678")
        .await
        .expect_err("timeout");
    assert!(matches!(err, DataSyncError::Transport(_)));
    assert!(started.elapsed() < Duration::from_secs(3));
}
