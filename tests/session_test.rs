//! End-to-end tests of a session against a fake control board over TCP.

mod common;

use common::{commands, reply, spawn_board, standard_board};
use mux_control::{MuxError, MuxSession, SessionOptions, SessionState, Substrate};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn fast_options() -> SessionOptions {
    SessionOptions::default().with_response_timeout(Duration::from_millis(300))
}

#[tokio::test]
async fn open_discovers_substrates_and_resistors() {
    let (addr, log) = spawn_board(standard_board).await;

    let session = MuxSession::open(&addr.to_string(), fast_options())
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.identity(), "Firmware version 1.4.2");
    assert_eq!(session.substrates().bits(), 0b1000_0001);
    assert_eq!(session.resistors().get(&'H'), Some(&1000));
    assert_eq!(session.resistors().get(&'A'), Some(&220));

    let sent = commands(&log);
    assert_eq!(
        sent,
        vec!["v", "cH", "cG", "cF", "cE", "cD", "cC", "cB", "cA", "dH", "dA"]
    );

    session.close().await;
}

#[tokio::test]
async fn skip_resistors_sends_no_resistor_queries() {
    let (addr, log) = spawn_board(standard_board).await;

    let options = fast_options().with_ignore_adapter_resistors(true);
    let session = MuxSession::open(&addr.to_string(), options).await.unwrap();

    assert_eq!(session.resistors().get(&'H'), Some(&0));
    assert!(!commands(&log).iter().any(|c| c.starts_with('d')));

    session.close().await;
}

#[tokio::test]
async fn pixel_selection_and_adc_reads() {
    let (addr, log) = spawn_board(standard_board).await;
    let session = MuxSession::open(&addr.to_string(), fast_options())
        .await
        .unwrap();

    let a = Substrate::from_letter('A').unwrap();
    assert!(session.select_pixel(a, 4).await.unwrap());
    assert_eq!(session.read_adc_channel(3).await.unwrap(), 42);

    let sent = commands(&log);
    assert!(sent.contains(&"sA4".to_string()));
    assert!(sent.contains(&"ADC3".to_string()));

    session.close().await;
}

#[tokio::test]
async fn reply_split_across_writes_is_reassembled() {
    let (addr, _log) = spawn_board(|cmd| match cmd {
        "ADC1" => vec!["AIN 1".into(), "23\r\n>".into(), ">> ".into()],
        other => standard_board(other),
    })
    .await;
    let session = MuxSession::open(&addr.to_string(), fast_options())
        .await
        .unwrap();

    assert_eq!(session.read_adc_channel(1).await.unwrap(), 123);

    session.close().await;
}

#[tokio::test]
async fn close_opens_switches_then_disconnects() {
    let (addr, log) = spawn_board(standard_board).await;
    let session = MuxSession::open(&addr.to_string(), fast_options())
        .await
        .unwrap();

    session.close().await;
    session.close().await;

    assert_eq!(session.state(), SessionState::Closed);
    let sent = commands(&log);
    assert_eq!(&sent[sent.len() - 2..], &["sH0", "sA0"]);
    assert!(matches!(
        session.select_pixel(Substrate::from_letter('H').unwrap(), 1).await,
        Err(MuxError::SessionClosed)
    ));
}

#[tokio::test]
async fn close_finishes_when_board_goes_silent() {
    let (addr, _log) = spawn_board(|cmd| {
        if cmd.starts_with('s') {
            Vec::new()
        } else {
            standard_board(cmd)
        }
    })
    .await;
    let session = MuxSession::open(&addr.to_string(), fast_options())
        .await
        .unwrap();

    timeout(Duration::from_secs(5), session.close())
        .await
        .expect("close should not hang");
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn bad_version_reply_fails_open() {
    let (addr, _log) = spawn_board(|_| vec!["no prompt\r\n".to_string()]).await;

    let result = MuxSession::open(&addr.to_string(), fast_options()).await;
    assert!(matches!(result, Err(MuxError::Handshake(_))));
}

#[tokio::test]
async fn desync_during_resistor_read_fails_open() {
    let (addr, _log) = spawn_board(|cmd| match cmd {
        "dH" => vec!["\r\nBoard H x y z 1\r\nnope".to_string()],
        other => standard_board(other),
    })
    .await;

    let result = MuxSession::open(&addr.to_string(), fast_options()).await;
    assert!(matches!(result, Err(MuxError::Desync { .. })));
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = MuxSession::open(&addr.to_string(), fast_options()).await;
    assert!(matches!(result, Err(MuxError::Connect { .. })));
}

#[tokio::test]
async fn dropped_session_tears_down_in_background() {
    let (addr, log) = spawn_board(standard_board).await;
    let session = MuxSession::open(&addr.to_string(), fast_options())
        .await
        .unwrap();
    drop(session);

    let opened = timeout(Duration::from_secs(5), async {
        loop {
            let sent = commands(&log);
            if sent.contains(&"sH0".to_string()) && sent.contains(&"sA0".to_string()) {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(opened.is_ok(), "background teardown never opened the switches");
}

#[tokio::test]
async fn unrecognized_reply_keeps_session_usable() {
    let (addr, _log) = spawn_board(|cmd| match cmd {
        "ADC2" => reply("Temperature 21"),
        other => standard_board(other),
    })
    .await;
    let session = MuxSession::open(&addr.to_string(), fast_options())
        .await
        .unwrap();

    let err = session.read_adc_channel(2).await.unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(session.read_adc_channel(4).await.unwrap(), 42);

    session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_each_get_their_own_reply() {
    let (addr, _log) = spawn_board(|cmd| {
        if cmd.starts_with('Q') {
            vec!["ec".to_string(), format!("ho {cmd}\r\n>"), ">> ".to_string()]
        } else {
            standard_board(cmd)
        }
    })
    .await;
    let session = Arc::new(
        MuxSession::open(&addr.to_string(), fast_options())
            .await
            .unwrap(),
    );

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let session = session.clone();
            tokio::spawn(async move {
                let frame = session.query(&format!("Q{i}")).await.unwrap();
                (i, frame)
            })
        })
        .collect();

    for task in tasks {
        let (i, frame) = task.await.unwrap();
        assert!(frame.is_ok(), "Q{i} failed: {:?}", frame.fault());
        assert_eq!(frame.text, format!("echo Q{i}"));
    }

    session.close().await;
}
