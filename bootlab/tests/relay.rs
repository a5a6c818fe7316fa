//! Console relay tests over in-memory pipes.

use bootlab::relay::EscapeDetector;
use bootlab::{ConsoleRelay, RelayExit, RelayOptions};
use proptest::prelude::*;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio::sync::mpsc;
use tokio::time::Instant;

const ESC: u8 = 0x1d;

fn relay() -> ConsoleRelay {
    ConsoleRelay::new(RelayOptions {
        tx_interval: Duration::from_millis(10),
        ..Default::default()
    })
}

#[tokio::test(start_paused = true)]
async fn test_double_escape_disconnects() {
    let (remote, _board) = duplex(64);
    let (tx, rx) = mpsc::channel(4);
    let mut out = Vec::new();

    tx.send(vec![ESC, ESC]).await.unwrap();
    let exit = relay().run(remote, rx, &mut out).await.unwrap();

    assert_eq!(exit, RelayExit::Disconnected);
    assert_eq!(out, b"\n");
}

#[tokio::test(start_paused = true)]
async fn test_escape_split_across_reads_disconnects() {
    let (remote, _board) = duplex(64);
    let (tx, rx) = mpsc::channel(4);
    let mut out = Vec::new();

    let typing = async move {
        tx.send(vec![ESC]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(vec![ESC]).await.unwrap();
        tx
    };
    let relay = relay();
    let (exit, _tx) = tokio::join!(relay.run(remote, rx, &mut out), typing);

    assert_eq!(exit.unwrap(), RelayExit::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_slow_escapes_are_forwarded() {
    let (remote, mut board) = duplex(64);
    let (tx, rx) = mpsc::channel(4);
    let mut out = Vec::new();

    let session = async move {
        tx.send(vec![ESC]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        tx.send(vec![ESC]).await.unwrap();

        let mut got = [0u8; 2];
        board.read_exact(&mut got).await.unwrap();
        drop(board);
        got
    };
    let relay = relay();
    let (exit, got) = tokio::join!(relay.run(remote, rx, &mut out), session);

    assert_eq!(exit.unwrap(), RelayExit::RemoteClosed);
    assert_eq!(got, [ESC, ESC]);
}

#[tokio::test(start_paused = true)]
async fn test_input_is_paced_one_byte_per_tick() {
    let (remote, mut board) = duplex(64);
    let (tx, rx) = mpsc::channel(4);
    let mut out = Vec::new();

    let session = async move {
        tx.send(b"help\n".to_vec()).await.unwrap();
        let begin = Instant::now();
        let mut got = [0u8; 5];
        board.read_exact(&mut got).await.unwrap();
        let elapsed = begin.elapsed();
        drop(board);
        (got, elapsed)
    };
    let relay = relay();
    let (exit, (got, elapsed)) = tokio::join!(relay.run(remote, rx, &mut out), session);

    assert_eq!(exit.unwrap(), RelayExit::RemoteClosed);
    assert_eq!(&got, b"help\n");
    assert!(elapsed >= Duration::from_millis(40), "sent too fast: {elapsed:?}");
}

#[tokio::test]
async fn test_remote_output_is_relayed() {
    let (remote, mut board) = duplex(64);
    let (_tx, rx) = mpsc::channel::<Vec<u8>>(4);
    let mut out = Vec::new();

    let board_side = async move {
        board.write_all(b"U-Boot 2024.10\r\n=> ").await.unwrap();
        board.shutdown().await.unwrap();
    };
    let relay = relay();
    let (exit, ()) = tokio::join!(relay.run(remote, rx, &mut out), board_side);

    assert_eq!(exit.unwrap(), RelayExit::RemoteClosed);
    assert_eq!(out, b"U-Boot 2024.10\r\n=> \n");
}

#[tokio::test]
async fn test_closed_input_keeps_relaying_output() {
    let (remote, mut board) = duplex(64);
    let (tx, rx) = mpsc::channel::<Vec<u8>>(4);
    drop(tx);
    let mut out = Vec::new();

    let board_side = async move {
        tokio::task::yield_now().await;
        board.write_all(b"ok").await.unwrap();
        drop(board);
    };
    let relay = relay();
    let (exit, ()) = tokio::join!(relay.run(remote, rx, &mut out), board_side);

    assert_eq!(exit.unwrap(), RelayExit::RemoteClosed);
    assert_eq!(out, b"ok\n");
}

/// Index at which `bytes` first contains two consecutive escape bytes.
fn first_double_escape(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == [ESC, ESC]).map(|i| i + 1)
}

proptest! {
    #[test]
    fn prop_detector_fires_only_on_consecutive_escapes(
        bytes in prop::collection::vec(prop_oneof![Just(ESC), any::<u8>()], 0..64)
    ) {
        let mut detector = EscapeDetector::new(ESC, Duration::from_millis(500));
        let now = Instant::now();
        let fired = bytes.iter().position(|&b| detector.feed(b, now));
        prop_assert_eq!(fired, first_double_escape(&bytes));
    }

    #[test]
    fn prop_single_escapes_never_fire(
        bytes in prop::collection::vec(any::<u8>().prop_filter("not escape", |b| *b != ESC), 1..32)
    ) {
        let mut detector = EscapeDetector::new(ESC, Duration::from_millis(500));
        let now = Instant::now();
        for b in bytes {
            prop_assert!(!detector.feed(ESC, now));
            prop_assert!(!detector.feed(b, now));
        }
    }
}
