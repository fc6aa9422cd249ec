//! Connection establishment over real local sockets.

use std::time::Duration;

use tokio::net::TcpListener;

use radb::channel::{ServerAddrs, connect};
use radb::{Error, TimeLimit, TimeoutTracker};

/// Binds then immediately drops a listener, yielding a port that refuses.
async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn aggregates_every_failed_candidate() {
    let a = refused_port().await;
    let b = refused_port().await;
    let c = refused_port().await;
    let addrs = ServerAddrs::new([
        format!("127.0.0.1:{a}"),
        format!("127.0.0.1:{b}"),
        format!("127.0.0.1:{c}"),
    ]);

    let err = connect(&addrs, &TimeoutTracker::unbounded())
        .await
        .unwrap_err();
    match err {
        Error::Connect(aggregate) => {
            assert_eq!(aggregate.attempts.len(), 3);
            let text = aggregate.to_string();
            for port in [a, b, c] {
                assert!(text.contains(&format!("127.0.0.1:{port}")), "missing {port} in: {text}");
            }
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn later_candidate_succeeds_after_earlier_failures() {
    let dead = refused_port().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live = listener.local_addr().unwrap().port();

    let accept = tokio::spawn(async move { listener.accept().await });

    let addrs = ServerAddrs::new([format!("127.0.0.1:{dead}"), format!("127.0.0.1:{live}")]);
    let stream = connect(&addrs, &TimeoutTracker::unbounded())
        .await
        .unwrap();
    assert_eq!(stream.peer_addr().unwrap().port(), live);
    accept.await.unwrap().unwrap();
}

#[tokio::test]
async fn unresolvable_name_is_one_recorded_attempt() {
    let addrs = ServerAddrs::new(["no-such-host.invalid:5037"]);
    let err = connect(&addrs, &TimeoutTracker::unbounded())
        .await
        .unwrap_err();
    match err {
        Error::Connect(aggregate) => assert_eq!(aggregate.attempts.len(), 1),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn expired_budget_fails_without_any_attempt() {
    let tracker = TimeoutTracker::new(TimeLimit::Bounded(Duration::ZERO));
    let addrs = ServerAddrs::new(["127.0.0.1:5037"]);
    assert!(matches!(
        connect(&addrs, &tracker).await,
        Err(Error::Timeout)
    ));
}
