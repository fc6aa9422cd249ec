//! Shell-v2 orchestration against a scripted peer.

use std::io::Cursor;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use radb::{Error, ShellOutput, TimeoutTracker, run_shell_v2};

const HEADER_LEN: usize = 5;

const STDIN: u8 = 0;
const STDOUT: u8 = 1;
const STDERR: u8 = 2;
const EXIT_CODE: u8 = 3;
const CLOSE_STDIN: u8 = 4;

fn packet(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![kind];
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

async fn read_packet(peer: &mut DuplexStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; HEADER_LEN];
    peer.read_exact(&mut header).await.unwrap();
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len];
    peer.read_exact(&mut payload).await.unwrap();
    (header[0], payload)
}

#[tokio::test]
async fn demultiplexes_output_and_returns_the_exit_code() {
    let (client, mut peer) = tokio::io::duplex(64 * 1024);
    let tracker = TimeoutTracker::unbounded();

    let driver = tokio::spawn(async move {
        let mut output = ShellOutput::default();
        let exit = run_shell_v2::<_, Cursor<Vec<u8>>, _>(
            client,
            None,
            &mut output,
            None,
            &tracker,
        )
        .await?;
        Ok::<_, Error>((exit, output))
    });

    // With no stdin source the channel announces end-of-input immediately.
    let (kind, payload) = read_packet(&mut peer).await;
    assert_eq!((kind, payload.as_slice()), (CLOSE_STDIN, &[][..]));

    peer.write_all(&packet(STDOUT, b"out 1\n")).await.unwrap();
    peer.write_all(&packet(STDERR, b"err 1\n")).await.unwrap();
    peer.write_all(&packet(STDOUT, b"out 2\n")).await.unwrap();
    peer.write_all(&packet(EXIT_CODE, &[17])).await.unwrap();

    let (exit, output) = driver.await.unwrap().unwrap();
    assert_eq!(exit, 17);
    assert_eq!(output.stdout, b"out 1\nout 2\n");
    assert_eq!(output.stderr, b"err 1\n");
    assert_eq!(output.exit_code, 17);
}

#[tokio::test]
async fn forwards_stdin_then_half_closes() {
    let (client, mut peer) = tokio::io::duplex(64 * 1024);
    let tracker = TimeoutTracker::unbounded();

    let driver = tokio::spawn(async move {
        let mut stdin = Cursor::new(b"line one\nline two\n".to_vec());
        let mut output = ShellOutput::default();
        run_shell_v2(client, Some(&mut stdin), &mut output, None, &tracker).await
    });

    // Collect stdin packets until the close marker.
    let mut forwarded = Vec::new();
    loop {
        let (kind, payload) = read_packet(&mut peer).await;
        match kind {
            STDIN => forwarded.extend_from_slice(&payload),
            CLOSE_STDIN => break,
            other => panic!("unexpected packet kind {other}"),
        }
    }
    assert_eq!(forwarded, b"line one\nline two\n");

    // The write side is half-closed; reads observe EOF, but the peer can
    // still answer.
    let mut rest = Vec::new();
    peer.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    peer.write_all(&packet(EXIT_CODE, &[0])).await.unwrap();
    assert_eq!(driver.await.unwrap().unwrap(), 0);
}

#[tokio::test]
async fn unknown_packet_kinds_are_skipped() {
    let (client, mut peer) = tokio::io::duplex(4096);
    let tracker = TimeoutTracker::unbounded();

    let driver = tokio::spawn(async move {
        let mut output = ShellOutput::default();
        let exit =
            run_shell_v2::<_, Cursor<Vec<u8>>, _>(client, None, &mut output, None, &tracker)
                .await?;
        Ok::<_, Error>((exit, output))
    });

    let (kind, _) = read_packet(&mut peer).await;
    assert_eq!(kind, CLOSE_STDIN);

    peer.write_all(&packet(0x7f, b"mystery")).await.unwrap();
    peer.write_all(&packet(STDOUT, b"ok")).await.unwrap();
    peer.write_all(&packet(EXIT_CODE, &[0])).await.unwrap();

    let (exit, output) = driver.await.unwrap().unwrap();
    assert_eq!(exit, 0);
    assert_eq!(output.stdout, b"ok");
}

#[tokio::test]
async fn stream_ending_before_the_exit_code_is_a_protocol_error() {
    let (client, mut peer) = tokio::io::duplex(4096);
    let tracker = TimeoutTracker::unbounded();

    let driver = tokio::spawn(async move {
        let mut output = ShellOutput::default();
        run_shell_v2::<_, Cursor<Vec<u8>>, _>(client, None, &mut output, None, &tracker).await
    });

    let (kind, _) = read_packet(&mut peer).await;
    assert_eq!(kind, CLOSE_STDIN);

    peer.write_all(&packet(STDOUT, b"partial")).await.unwrap();
    drop(peer);

    assert!(matches!(
        driver.await.unwrap().unwrap_err(),
        Error::Protocol { .. }
    ));
}

#[tokio::test]
async fn idle_monitor_fails_a_quiet_command() {
    let (client, mut peer) = tokio::io::duplex(4096);
    let tracker = TimeoutTracker::unbounded();

    let driver = tokio::spawn(async move {
        let mut output = ShellOutput::default();
        run_shell_v2::<_, Cursor<Vec<u8>>, _>(
            client,
            None,
            &mut output,
            Some(Duration::from_millis(200)),
            &tracker,
        )
        .await
    });

    let (kind, _) = read_packet(&mut peer).await;
    assert_eq!(kind, CLOSE_STDIN);

    // One output event, then silence; the peer stays connected.
    peer.write_all(&packet(STDOUT, b"starting\n")).await.unwrap();

    assert!(matches!(
        driver.await.unwrap().unwrap_err(),
        Error::IdleTimeout
    ));
}

#[tokio::test]
async fn idle_monitor_tolerates_a_steadily_chatty_command() {
    let (client, mut peer) = tokio::io::duplex(4096);
    let tracker = TimeoutTracker::unbounded();

    let driver = tokio::spawn(async move {
        let mut output = ShellOutput::default();
        let exit = run_shell_v2::<_, Cursor<Vec<u8>>, _>(
            client,
            None,
            &mut output,
            Some(Duration::from_millis(500)),
            &tracker,
        )
        .await?;
        Ok::<_, Error>((exit, output))
    });

    let (kind, _) = read_packet(&mut peer).await;
    assert_eq!(kind, CLOSE_STDIN);

    for i in 0..5u8 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        peer.write_all(&packet(STDOUT, &[b'0' + i])).await.unwrap();
    }
    peer.write_all(&packet(EXIT_CODE, &[0])).await.unwrap();

    let (exit, output) = driver.await.unwrap().unwrap();
    assert_eq!(exit, 0);
    assert_eq!(output.stdout, b"01234");
}
