use ramblr_stream::{HttpBackend, HttpError, ReqwestBackend};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Answers one request with `response` written verbatim, then hangs up.
async fn one_shot_server(response: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
    });
    format!("http://{addr}/processes/p-1")
}

#[tokio::test]
async fn complete_body_is_returned_with_its_status() {
    let url = one_shot_server(
        "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nno such p",
    )
    .await;
    let backend = ReqwestBackend::new().unwrap();

    let reply = backend.get_with_bearer(&url, "tok-1").await.unwrap();
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body, "no such p");
    assert!(!reply.is_success());
}

#[tokio::test]
async fn truncated_body_is_a_transport_error() {
    let url = one_shot_server(
        "HTTP/1.1 200 OK\r\nContent-Length: 64\r\nConnection: close\r\n\r\n{\"instructions\": [",
    )
    .await;
    let backend = ReqwestBackend::new().unwrap();

    let err = backend.get_with_bearer(&url, "tok-1").await.unwrap_err();
    assert!(matches!(err, HttpError::Transport(_)), "got {err:?}");
}
