//! Session lifecycle flows against a mocked backend and fake transport.

mod fakes;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fakes::{FakeTransportHandle, fake_transport};
use fitvoice_client::protocol::FixedDelayGreeting;
use fitvoice_client::transport::{ChannelEvent, Transport, TransportStatus};
use fitvoice_client::{
    ClientConfig, FunctionDispatcher, SessionController, SessionError, SessionState,
    SignalingClient, SignalingError, TranscriptRole,
};

fn controller(server_uri: &str, transport: Box<dyn Transport>) -> SessionController {
    let config = ClientConfig::new(Url::parse(server_uri).expect("mock server uri"));
    let http = reqwest::Client::new();
    let signaling = SignalingClient::new(http.clone(), &config);
    let dispatcher = Arc::new(FunctionDispatcher::new(http, &config));
    SessionController::with_parts(
        config,
        signaling,
        dispatcher,
        transport,
        Arc::new(FixedDelayGreeting::new(Duration::ZERO)),
    )
}

async fn mock_grant(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/start-session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ephemeral_key": "ek_test",
            "session_id": "sess_123",
        })))
        .mount(server)
        .await;
}

async fn mock_session_config(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/get-session-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instructions": "You are an encouraging fitness coach",
            "transcription_model": "whisper-1",
            "tool_choice": "auto",
        })))
        .mount(server)
        .await;
}

async fn started_controller() -> (SessionController, FakeTransportHandle, MockServer) {
    let server = MockServer::start().await;
    mock_grant(&server).await;
    mock_session_config(&server).await;
    let (transport, handle) = fake_transport(0);
    let controller = controller(&server.uri(), transport);
    controller.start("athlete@example.com").await.expect("start");
    (controller, handle, server)
}

#[tokio::test]
async fn start_reaches_active_with_granted_session() {
    let server = MockServer::start().await;
    mock_grant(&server).await;
    mock_session_config(&server).await;
    let (transport, handle) = fake_transport(0);
    let controller = controller(&server.uri(), transport);

    assert_eq!(controller.state(), SessionState::Idle);
    controller.start("athlete@example.com").await.expect("start");

    assert_eq!(controller.state(), SessionState::Active);
    let session = controller.session().expect("live session");
    assert_eq!(session.session_id, "sess_123");
    assert_eq!(session.ephemeral_key, "ek_test");
    assert_eq!(handle.establish_count(), 1);

    // state transitions were recorded as system entries, and the
    // conversation view hides them
    let transcript = controller.transcript();
    assert!(
        transcript
            .entries()
            .iter()
            .any(|e| e.role == TranscriptRole::System && e.content.contains("idle -> connecting"))
    );
    assert!(controller.conversation().is_empty());
}

#[tokio::test]
async fn missing_session_id_fails_start_and_stays_idle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/start-session"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "ephemeral_key": "ek_test" })),
        )
        .mount(&server)
        .await;
    let (transport, handle) = fake_transport(0);
    let controller = controller(&server.uri(), transport);

    let err = controller
        .start("athlete@example.com")
        .await
        .expect_err("grant is unusable");
    assert!(matches!(err, SessionError::Start(_)));
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.session().is_none());
    assert_eq!(handle.establish_count(), 0);
}

#[tokio::test]
async fn signaling_failure_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/start-session"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend down"))
        .mount(&server)
        .await;
    let (transport, _handle) = fake_transport(0);
    let controller = controller(&server.uri(), transport);

    let err = controller
        .start("athlete@example.com")
        .await
        .expect_err("backend is down");
    match err {
        SessionError::Signaling(SignalingError::Status { status, .. }) => assert_eq!(status, 503),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn start_is_a_noop_while_active() {
    let (controller, handle, _server) = started_controller().await;

    controller.start("athlete@example.com").await.expect("noop");
    assert_eq!(handle.establish_count(), 1);
    assert_eq!(controller.state(), SessionState::Active);
}

#[tokio::test]
async fn stop_twice_performs_one_teardown() {
    let (controller, handle, _server) = started_controller().await;

    controller.stop().await;
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.session().is_none());
    assert_eq!(handle.teardown_count(), 1);

    controller.stop().await;
    assert_eq!(handle.teardown_count(), 1);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn stop_without_start_is_safe() {
    let server = MockServer::start().await;
    let (transport, handle) = fake_transport(0);
    let controller = controller(&server.uri(), transport);

    controller.stop().await;
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(handle.teardown_count(), 0);
}

#[tokio::test]
async fn transport_failure_moves_to_error_and_releases_everything() {
    let server = MockServer::start().await;
    mock_grant(&server).await;
    let (transport, handle) = fake_transport(1);
    let controller = controller(&server.uri(), transport);

    let err = controller
        .start("athlete@example.com")
        .await
        .expect_err("transport fails");
    assert!(matches!(err, SessionError::Transport(_)));
    assert_eq!(controller.state(), SessionState::Error);
    assert!(controller.session().is_none());
    assert_eq!(handle.teardown_count(), 1);
}

#[tokio::test]
async fn start_recovers_after_error() {
    let server = MockServer::start().await;
    mock_grant(&server).await;
    mock_session_config(&server).await;
    let (transport, handle) = fake_transport(1);
    let controller = controller(&server.uri(), transport);

    assert!(controller.start("athlete@example.com").await.is_err());
    assert_eq!(controller.state(), SessionState::Error);

    controller.start("athlete@example.com").await.expect("retry");
    assert_eq!(controller.state(), SessionState::Active);
    assert_eq!(handle.establish_count(), 2);
}

#[tokio::test]
async fn stop_during_establish_cancels_and_tears_down_once() {
    let server = MockServer::start().await;
    mock_grant(&server).await;
    let (transport, handle, _gate) = fakes::gated_transport();
    let controller = Arc::new(controller(&server.uri(), transport));

    let starter = Arc::clone(&controller);
    let start_task =
        tokio::spawn(async move { starter.start("athlete@example.com").await });

    // wait until start() is parked inside establish()
    let mut waited = Duration::ZERO;
    while handle.establish_count() == 0 {
        assert!(waited < Duration::from_secs(5), "start never reached establish");
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += Duration::from_millis(5);
    }

    controller.stop().await;

    let result = start_task.await.expect("start task");
    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.session().is_none());
    assert_eq!(handle.teardown_count(), 1);
}

#[tokio::test]
async fn transport_failure_after_establish_moves_active_to_error() {
    let (controller, handle, _server) = started_controller().await;

    handle
        .send_status(TransportStatus::Failed("ICE connection failed".to_string()))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(controller.state(), SessionState::Error);
    let transcript = controller.transcript();
    assert!(
        transcript
            .entries()
            .iter()
            .any(|e| e.content.contains("active -> error"))
    );
}

#[tokio::test]
async fn channel_open_pushes_configuration_then_greeting() {
    let (_controller, handle, _server) = started_controller().await;

    handle.send_channel_event(ChannelEvent::Open).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = handle.writer.sent();
    assert_eq!(sent.len(), 2, "expected session.update + response.create");
    assert_eq!(sent[0]["type"], "session.update");
    assert_eq!(
        sent[0]["session"]["instructions"],
        "You are an encouraging fitness coach"
    );
    assert_eq!(
        sent[0]["session"]["input_audio_transcription"]["model"],
        "whisper-1"
    );
    assert_eq!(sent[1]["type"], "response.create");
}

#[tokio::test]
async fn full_function_call_round_trip_over_the_channel() {
    let (controller, handle, server) = started_controller().await;
    Mock::given(method("POST"))
        .and(path("/functions/get_todays_plan"))
        .and(body_json(json!({ "day": "monday" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "plan": "intervals, 40 min" })),
        )
        .mount(&server)
        .await;

    handle
        .send_channel_event(ChannelEvent::Message(
            json!({
                "type": "response.output_item.added",
                "item": {"type": "function_call", "call_id": "call_1", "name": "get_todays_plan"},
            })
            .to_string()
            .into(),
        ))
        .await;
    handle
        .send_channel_event(ChannelEvent::Message(
            json!({
                "type": "response.function_call_arguments.done",
                "call_id": "call_1",
                "arguments": "{\"day\":\"monday\"}",
            })
            .to_string()
            .into(),
        ))
        .await;
    // transcripts arriving after the call must stay behind it in the log
    handle
        .send_channel_event(ChannelEvent::Message(
            json!({
                "type": "response.audio_transcript.done",
                "transcript": "Today is intervals, forty minutes.",
            })
            .to_string()
            .into(),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = handle.writer.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["type"], "conversation.item.create");
    assert_eq!(sent[0]["item"]["type"], "function_call_output");
    assert_eq!(sent[0]["item"]["call_id"], "call_1");
    let output = sent[0]["item"]["output"].as_str().expect("output string");
    assert!(output.contains("intervals, 40 min"));
    assert_eq!(sent[1]["type"], "response.create");

    let conversation = controller.conversation();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0].role, TranscriptRole::Bot);
    assert_eq!(conversation[0].content, "Today is intervals, forty minutes.");
}

#[tokio::test]
async fn malformed_channel_payload_does_not_disturb_the_session() {
    let (controller, handle, _server) = started_controller().await;

    handle
        .send_channel_event(ChannelEvent::Message(bytes::Bytes::from_static(
            b"\x00\x01 not json",
        )))
        .await;
    handle
        .send_channel_event(ChannelEvent::Message(
            json!({"type": "response.audio_transcript.done", "transcript": "Still here."})
                .to_string()
                .into(),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(controller.state(), SessionState::Active);
    let conversation = controller.conversation();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0].content, "Still here.");
}
