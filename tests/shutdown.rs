//! Graceful shutdown behavior.

use std::time::Duration;

use gatehouse::{App, Request, ServerConfig};
use tokio::net::TcpStream;

mod common;

#[tokio::test]
async fn in_flight_request_completes_after_the_signal() {
    let mut app = App::default();
    app.get("/slow", |_req: Request| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        "finished"
    });
    let server = common::start(app).await;
    let addr = server.addr;

    let client = tokio::spawn(async move { common::get(addr, "/slow").await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.stop().await.unwrap();

    let resp = client.await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "finished");
    assert!(TcpStream::connect(addr).await.is_err(), "listener still open");
}

#[tokio::test]
async fn stragglers_are_cut_off_after_the_grace_period() {
    let mut app = App::new(ServerConfig::new().shutdown_grace(Duration::from_millis(100)));
    app.get("/stuck", |_req: Request| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        "never"
    });
    let server = common::start(app).await;
    let addr = server.addr;

    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stream, b"GET /stuck HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf).await.map(|_| buf)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopped = tokio::time::timeout(Duration::from_secs(5), server.stop()).await;
    assert!(matches!(stopped, Ok(Ok(()))), "server did not stop within the grace period");

    let read = client.await.unwrap();
    assert!(read.map_or(true, |buf| buf.is_empty()), "straggler got a response");
}
