// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session scenarios over an in-memory transport: the protocol
//! handshake messages, output forwarding, gating, pause/resume, size limit,
//! and close-code policy.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{session_start, ServerEvent, TestClient};
use webtty::{BasicAuthTokenHandler, Handler, Options, SpawnCommand};

fn handler(argv: &[&str], options: Options) -> Arc<Handler> {
    Arc::new(Handler::new(SpawnCommand::new(argv.iter().copied()), options))
}

/// Scenario: happy path without compression. The first two frames are the
/// title and the preferences (exactly `{}`), then the child's output, then
/// a normal close.
#[tokio::test]
async fn happy_path_echo() {
    let handler = handler(&["/bin/echo", "hello"], Options::new());
    let (mut client, task) = TestClient::attach(&handler, None);

    client.send_message(&session_start("", 80, 24)).await;

    let (_, title) = client.recv_message().await;
    assert_eq!(title[0], b'1');
    assert_eq!(
        String::from_utf8_lossy(&title[1..]),
        format!("/bin/echo hello ({})", common::hostname())
    );

    let (_, prefs) = client.recv_message().await;
    assert_eq!(prefs, b"2{}", "empty preferences must be the exact literal {{}}");

    let (messages, code) = client.recv_until_close().await;
    assert!(!messages.is_empty(), "expected at least one OUTPUT frame");
    let mut output = Vec::new();
    for (_, payload) in &messages {
        assert_eq!(payload[0], b'0', "only OUTPUT frames may follow the init pair");
        output.extend_from_slice(&payload[1..]);
    }
    assert!(
        output.windows(5).any(|w| w == b"hello"),
        "child output not forwarded: {:?}",
        String::from_utf8_lossy(&output)
    );
    assert_eq!(code, 1000);

    task.await.unwrap();
}

/// Scenario: the PTY is created with the size from the session-start
/// message.
#[tokio::test]
async fn spawn_uses_requested_winsize() {
    let handler = handler(&["/bin/sh", "-c", "stty size"], Options::new());
    let (mut client, task) = TestClient::attach(&handler, None);

    client.send_message(&session_start("", 80, 24)).await;

    let (messages, code) = client.recv_until_close().await;
    let output: Vec<u8> = messages
        .iter()
        .skip(2)
        .flat_map(|(_, p)| p[1..].to_vec())
        .collect();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("24 80"), "stty reported {text:?}");
    assert_eq!(code, 1000);

    task.await.unwrap();
}

/// Scenario: a RESIZE_TERMINAL message changes the PTY size, and the resize
/// message itself never appears as OUTPUT.
#[tokio::test]
async fn resize_applies_to_running_pty() {
    let handler = handler(&["/bin/sh", "-c", "sleep 1; stty size"], Options::new());
    let (mut client, task) = TestClient::attach(&handler, None);

    client.send_message(&session_start("", 80, 24)).await;
    client.send_tagged(b'1', br#"{"columns":132,"rows":50}"#).await;

    let (messages, code) = client.recv_until_close().await;
    let output: Vec<u8> = messages
        .iter()
        .skip(2)
        .flat_map(|(_, p)| p[1..].to_vec())
        .collect();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("50 132"), "stty reported {text:?}");
    assert!(!text.contains("columns"), "resize payload leaked into OUTPUT");
    assert_eq!(code, 1000);

    task.await.unwrap();
}

/// Scenario: a message over the configured limit closes the session with
/// 1009 and its bytes never reach the PTY.
#[tokio::test]
async fn oversized_message_closes_1009() {
    let handler =
        handler(&["/bin/cat"], Options::new().writable(true).message_size_limit(16));
    let (mut client, task) = TestClient::attach(&handler, None);

    // Exactly at the limit: accepted.
    client.send_message(br#"{"AuthToken":""}"#).await;
    let (_, title) = client.recv_message().await;
    assert_eq!(title[0], b'1');
    let (_, prefs) = client.recv_message().await;
    assert_eq!(prefs, b"2{}");

    // One byte over: tag + 16 payload bytes.
    let mut oversized = vec![b'0'];
    oversized.extend_from_slice(&[b'A'; 16]);
    client.send_message(&oversized).await;

    let (messages, code) = client.recv_until_close().await;
    assert_eq!(code, 1009);
    for (_, payload) in &messages {
        assert!(
            !payload.windows(4).any(|w| w == b"AAAA"),
            "rejected input must not reach the PTY"
        );
    }

    task.await.unwrap();
}

/// Scenario: PAUSE holds output back; a RESUME (and only the first of a
/// burst) releases it.
#[tokio::test]
async fn pause_holds_output_until_resume() {
    let handler = handler(
        &["/bin/sh", "-c", "sleep 0.3; printf '%2048s' x"],
        Options::new(),
    );
    let (mut client, task) = TestClient::attach(&handler, None);

    client.send_message(&session_start("", 80, 24)).await;
    let _ = client.recv_message().await; // title
    let _ = client.recv_message().await; // preferences
    client.send_tagged(b'2', b"").await; // pause

    // The child writes while paused; nothing may leave the server.
    let leaked = client.expect_silence(Duration::from_millis(800)).await;
    assert!(leaked.is_none(), "OUTPUT escaped while paused: {leaked:?}");

    client.send_tagged(b'3', b"").await; // resume
    let (messages, code) = client.recv_until_close().await;
    let total: usize = messages.iter().map(|(_, p)| p.len() - 1).sum();
    assert_eq!(total, 2048, "all held output must flow after resume");
    assert_eq!(code, 1000);

    task.await.unwrap();
}

/// A storm of RESUMEs retains at most one pending wake-up: a later PAUSE
/// still holds output back.
#[tokio::test]
async fn resume_storm_coalesces_to_one() {
    let handler = handler(
        &["/bin/sh", "-c", "sleep 0.3; printf a; sleep 0.6; printf b"],
        Options::new(),
    );
    let (mut client, task) = TestClient::attach(&handler, None);

    client.send_message(&session_start("", 80, 24)).await;
    let _ = client.recv_message().await;
    let _ = client.recv_message().await;

    client.send_tagged(b'2', b"").await; // pause before "a" appears
    assert!(client.expect_silence(Duration::from_millis(600)).await.is_none());

    for _ in 0..3 {
        client.send_tagged(b'3', b"").await; // resume storm
    }
    let (_, payload) = client.recv_message().await;
    assert_eq!(payload, b"0a");

    // If more than one wake-up survived the storm, this pause would leak
    // the next chunk immediately.
    client.send_tagged(b'2', b"").await;
    assert!(client.expect_silence(Duration::from_millis(600)).await.is_none());

    client.send_tagged(b'3', b"").await;
    let (_, payload) = client.recv_message().await;
    assert_eq!(payload, b"0b");

    let (_, code) = client.recv_until_close().await;
    assert_eq!(code, 1000);

    task.await.unwrap();
}

/// Scenario: a token the authority does not recognize closes with 1008 and
/// nothing is spawned.
#[tokio::test]
async fn unauthorized_token_closes_1008() {
    let command = SpawnCommand::new(["/bin/echo", "hello"]);
    let handler = Arc::new(Handler::with_token_handler(
        command.clone(),
        Arc::new(BasicAuthTokenHandler::new("user", "pass", command)),
        Options::new(),
    ));
    let (mut client, task) = TestClient::attach(&handler, None);

    client.send_message(&session_start("bogus", 80, 24)).await;

    let (messages, code) = client.recv_until_close().await;
    assert_eq!(messages.len(), 2, "only title and preferences may precede the close");
    assert_eq!(code, 1008);

    task.await.unwrap();
}

/// Before the token message, everything else is dropped without effect;
/// after the spawn, a second token message is dropped.
#[tokio::test]
async fn pre_spawn_messages_are_gated() {
    let handler = handler(&["/bin/cat"], Options::new().writable(true));
    let (mut client, task) = TestClient::attach(&handler, None);

    // All of these must be ignored: no PTY exists yet.
    client.send_tagged(b'0', b"nope").await;
    client.send_tagged(b'1', br#"{"columns":10,"rows":10}"#).await;
    client.send_tagged(b'2', b"").await; // a pause that stuck would wedge the echo below

    client.send_message(&session_start("", 80, 24)).await;
    let _ = client.recv_message().await;
    let _ = client.recv_message().await;

    client.send_tagged(b'0', b"ok").await;
    let (_, payload) = client.recv_message().await;
    assert_eq!(payload[0], b'0');
    assert!(payload[1..].windows(2).any(|w| w == b"ok"));
    assert!(!payload.windows(4).any(|w| w == b"nope"));

    // A second session-start is dropped; the session keeps running.
    client.send_message(&session_start("", 80, 24)).await;
    client.send_tagged(b'0', b"!").await;
    let (_, payload) = client.recv_message().await;
    assert!(payload[1..].contains(&b'!'));

    client.send_close().await;
    let (_, code) = client.recv_until_close().await;
    assert_eq!(code, 1011, "cat is torn down by SIGHUP, an unclean exit");

    task.await.unwrap();
}

/// INPUT is discarded when the handler is not writable.
#[tokio::test]
async fn read_only_sessions_discard_input() {
    let handler = handler(&["/bin/cat"], Options::new());
    let (mut client, task) = TestClient::attach(&handler, None);

    client.send_message(&session_start("", 80, 24)).await;
    let _ = client.recv_message().await;
    let _ = client.recv_message().await;

    client.send_tagged(b'0', b"discarded").await;
    assert!(client.expect_silence(Duration::from_millis(400)).await.is_none());

    client.send_close().await;
    let (_, code) = client.recv_until_close().await;
    assert_eq!(code, 1011);

    task.await.unwrap();
}

/// An unmasked client frame is a protocol violation: the session dies with
/// close code 1002.
#[tokio::test]
async fn unmasked_frame_closes_1002() {
    let handler = handler(&["/bin/echo", "hello"], Options::new());
    let (mut client, task) = TestClient::attach(&handler, None);

    let _ = client.recv_message().await; // title
    let _ = client.recv_message().await; // preferences
    client.send_raw(&[0x82, 0x01, b'0']).await;

    let (_, code) = client.recv_until_close().await;
    assert_eq!(code, 1002);

    task.await.unwrap();
}

/// Configured client options are serialized into SET_PREFERENCE.
#[tokio::test]
async fn client_options_reach_set_preference() {
    let mut map = serde_json::Map::new();
    map.insert("fontSize".to_owned(), serde_json::json!(14));
    let handler = handler(&["/bin/echo", "x"], Options::new().client_options(map));
    let (mut client, task) = TestClient::attach(&handler, None);

    client.send_message(&session_start("", 80, 24)).await;
    let _ = client.recv_message().await; // title
    let (_, prefs) = client.recv_message().await;
    assert_eq!(prefs, br#"2{"fontSize":14}"#);

    let _ = client.recv_until_close().await;
    task.await.unwrap();
}

/// A configured title replaces the default.
#[tokio::test]
async fn configured_title_is_used() {
    let handler = handler(&["/bin/echo", "x"], Options::new().title("ops console"));
    let (mut client, task) = TestClient::attach(&handler, None);

    client.send_message(&session_start("", 80, 24)).await;
    let (_, title) = client.recv_message().await;
    assert_eq!(title, b"1ops console");

    let _ = client.recv_until_close().await;
    task.await.unwrap();
}

/// The keepalive ticker emits pings before any session-start arrives, and a
/// pre-spawn peer close still ends with a normal closure.
#[tokio::test]
async fn keepalive_pings_and_clean_pre_spawn_close() {
    let handler = handler(
        &["/bin/cat"],
        Options::new().ping_interval(Duration::from_millis(50)),
    );
    let (mut client, task) = TestClient::attach(&handler, None);

    let _ = client.recv_message().await; // title
    let _ = client.recv_message().await; // preferences

    let mut saw_ping = false;
    for _ in 0..10 {
        if let ServerEvent::Ping(_) = client.recv_event().await {
            saw_ping = true;
            break;
        }
    }
    assert!(saw_ping, "no ping frame within the keepalive window");

    client.send_close().await;
    loop {
        match client.recv_event().await {
            ServerEvent::Close(code) => {
                assert_eq!(code, 1000);
                break;
            }
            _ => continue,
        }
    }

    task.await.unwrap();
}
