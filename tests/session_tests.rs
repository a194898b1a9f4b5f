// Integration tests for the live interview session
//
// The session is driven against in-memory collaborators: a fake capture
// device, an output whose clock the test sets, and a channel-backed remote.

mod common;

use anyhow::Result;
use common::{capture_block, model_audio, ChannelConnector, FakeCapture, FakeOutput};
use interview_coach::audio::{encode_frame, BufferId};
use interview_coach::live::{Outbound, RemoteEvent};
use interview_coach::session::{JobRole, LiveSession, SessionConfig, SessionState};
use interview_coach::SessionError;
use std::time::Duration;

const EPSILON: f64 = 1e-9;

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < EPSILON,
        "expected {}, got {}",
        expected,
        actual
    );
}

#[tokio::test]
async fn test_start_connects_and_becomes_active() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::for_role(JobRole::DataScientist),
        Box::new(capture),
        Box::new(output),
        connector.clone(),
    );
    assert_eq!(session.state(), SessionState::Idle);

    session.start().await?;

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(capture_probe.starts(), 1);
    assert_eq!(output_probe.opens(), 1);
    assert_eq!(connector.calls(), 1);

    let live = connector.last_config().expect("connect was called");
    assert!(live.system_instruction.contains("Data Scientist"));
    assert_eq!(live.input_sample_rate, 16000);

    Ok(())
}

#[tokio::test]
async fn test_start_twice_is_rejected() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, _) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector.clone(),
    );
    session.start().await?;

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState(_)));
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(connector.calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_gapless_scheduling() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    session.on_remote_event(model_audio(1.0, 24000));
    session.on_remote_event(model_audio(0.5, 24000));
    session.on_remote_event(model_audio(0.75, 24000));

    let scheduled = output_probe.scheduled();
    assert_eq!(scheduled.len(), 3);
    assert_close(scheduled[0].start, 0.0);
    assert_close(scheduled[1].start, 1.0);
    assert_close(scheduled[2].start, 1.5);
    assert_close(session.next_playback_time(), 2.25);

    // Every start is at or after the end of the previous buffer
    for pair in scheduled.windows(2) {
        assert!(pair[1].start >= pair[0].start + pair[0].duration - EPSILON);
    }

    assert_eq!(session.playback_queue().len(), 3);
    assert_eq!(session.stats().chunks_received, 3);

    Ok(())
}

#[tokio::test]
async fn test_scheduling_never_starts_in_the_past() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    session.on_remote_event(model_audio(0.5, 24000));
    output_probe.set_time(3.0);
    session.on_remote_event(model_audio(0.5, 24000));

    let scheduled = output_probe.scheduled();
    assert_close(scheduled[1].start, 3.0);
    assert_close(session.next_playback_time(), 3.5);

    Ok(())
}

#[tokio::test]
async fn test_chunk_rate_follows_mime_type() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    // 16000 frames declared at 16kHz play for one second
    session.on_remote_event(model_audio(1.0, 16000));

    assert_close(output_probe.scheduled()[0].duration, 1.0);
    assert_close(session.next_playback_time(), 1.0);

    Ok(())
}

#[tokio::test]
async fn test_playback_completion_removes_buffer() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    session.on_remote_event(model_audio(0.2, 24000));
    session.on_remote_event(model_audio(0.2, 24000));
    let first = output_probe.scheduled()[0].id;

    session.on_playback_complete(first);
    assert_eq!(session.playback_queue().len(), 1);
    assert!(session.playback_queue().get(first).is_none());

    // A late completion for an already removed buffer is harmless
    session.on_playback_complete(first);
    session.on_playback_complete(BufferId(999));
    assert_eq!(session.playback_queue().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_interruption_cuts_playback_and_resets_cursor() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    session.on_remote_event(model_audio(1.0, 24000));
    session.on_remote_event(model_audio(1.0, 24000));
    session.on_remote_event(model_audio(1.0, 24000));
    assert_close(session.next_playback_time(), 3.0);

    output_probe.set_time(0.4);
    session.on_remote_event(RemoteEvent::Interrupted);

    assert!(session.playback_queue().is_empty());
    assert_eq!(output_probe.stopped().len(), 3);
    assert_close(session.next_playback_time(), 0.4);
    assert_eq!(session.stats().interruptions, 1);
    assert_eq!(session.state(), SessionState::Active);

    // The next reply starts right away instead of after the cut audio
    session.on_remote_event(model_audio(0.5, 24000));
    let scheduled = output_probe.scheduled();
    assert_close(scheduled[3].start, 0.4);
    assert_close(session.next_playback_time(), 0.9);

    // Completions for stopped buffers are ignored
    output_probe.finish(scheduled[0].id);
    session.on_playback_complete(scheduled[0].id);
    assert_eq!(session.playback_queue().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_interruption_with_empty_queue() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    output_probe.set_time(2.0);
    session.on_remote_event(RemoteEvent::Interrupted);

    assert!(output_probe.stopped().is_empty());
    assert_close(session.next_playback_time(), 2.0);

    Ok(())
}

#[tokio::test]
async fn test_capture_frames_are_encoded_and_sent() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, _) = FakeOutput::new();
    let (connector, mut remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    let frame = capture_block(1234, 4096);
    let expected = encode_frame(&frame);
    session.on_capture_frame(frame);

    match remote.outbound.try_recv()? {
        Outbound::Audio(chunk) => {
            assert_eq!(chunk, expected);
            assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        }
        other => panic!("expected audio, got {:?}", other),
    }
    assert_eq!(session.stats().chunks_sent, 1);

    Ok(())
}

#[tokio::test]
async fn test_full_transport_drops_instead_of_blocking() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, _) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    // Nobody drains the outbound queue (capacity 32)
    for i in 0..40 {
        session.on_capture_frame(capture_block(i, 160));
    }

    assert_eq!(session.stats().chunks_sent, 32);
    assert_eq!(session.stats().chunks_dropped, 8);
    assert_eq!(session.state(), SessionState::Active);

    Ok(())
}

#[tokio::test]
async fn test_preconnect_buffer_keeps_newest_chunks() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::new();
    let (output, _) = FakeOutput::new();
    let (connector, mut remote, release) = ChannelConnector::gated();

    let config = SessionConfig {
        preconnect_buffer: 8,
        ..SessionConfig::default()
    };
    let mut session = LiveSession::new(config, Box::new(capture), Box::new(output), connector);

    let starting = tokio::spawn(async move {
        let result = session.start().await;
        (session, result)
    });

    // Wait for the microphone to be granted
    while capture_probe.starts() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mic = capture_probe.sender();
    for i in 0..12 {
        mic.send(capture_block(i, 160)).await?;
    }

    // Let the session buffer everything before the handshake completes
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = release.send(());

    let (session, result) = starting.await?;
    result?;

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.pending_len(), 0);
    assert_eq!(session.stats().frames_captured, 12);
    assert_eq!(session.stats().chunks_dropped, 4);
    assert_eq!(session.stats().chunks_sent, 8);

    // The four oldest were dropped; the rest arrive in order
    for i in 4..12 {
        match remote.outbound.try_recv()? {
            Outbound::Audio(chunk) => assert_eq!(chunk, encode_frame(&capture_block(i, 160))),
            other => panic!("expected audio, got {:?}", other),
        }
    }
    assert!(remote.outbound.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn test_events_before_active_are_ignored() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );

    session.on_remote_event(model_audio(1.0, 24000));
    session.on_remote_event(RemoteEvent::Interrupted);
    session.on_capture_frame(capture_block(1, 160));

    assert_eq!(session.state(), SessionState::Idle);
    assert!(output_probe.scheduled().is_empty());
    assert_eq!(session.stats().chunks_sent, 0);

    Ok(())
}

#[tokio::test]
async fn test_microphone_denied_fails_without_connecting() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::denied();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector.clone(),
    );

    let err = session.start().await.unwrap_err();

    assert!(matches!(err, SessionError::Device(_)));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.error(), Some(&err));
    assert_eq!(capture_probe.starts(), 1);
    assert_eq!(connector.calls(), 0);
    assert_eq!(output_probe.opens(), 0);

    // Nothing was acquired, so nothing is released
    let outcome = session.stop();
    assert_eq!(outcome.state, SessionState::Failed);
    assert_eq!(capture_probe.stops(), 0);
    assert_eq!(output_probe.closes(), 0);

    Ok(())
}

#[tokio::test]
async fn test_connection_failure_releases_devices() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let connector = ChannelConnector::failing("handshake rejected");

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector.clone(),
    );

    let err = session.start().await.unwrap_err();

    assert_eq!(err, SessionError::Connection("handshake rejected".to_string()));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(capture_probe.stops(), 1);
    assert_eq!(output_probe.closes(), 1);

    session.stop();
    assert_eq!(capture_probe.stops(), 1);
    assert_eq!(output_probe.closes(), 1);

    Ok(())
}

#[tokio::test]
async fn test_decode_error_is_not_fatal() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    session.on_remote_event(RemoteEvent::Audio {
        data: "%%% not base64 %%%".to_string(),
        mime_type: Some("audio/pcm;rate=24000".to_string()),
    });

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.stats().decode_errors, 1);
    assert!(output_probe.scheduled().is_empty());
    assert_close(session.next_playback_time(), 0.0);

    session.on_remote_event(model_audio(0.5, 24000));
    assert_eq!(output_probe.scheduled().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_remote_error_fails_and_tears_down() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, mut remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;
    session.on_remote_event(model_audio(1.0, 24000));

    session.on_remote_event(RemoteEvent::Error("socket reset".to_string()));

    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(
        session.error(),
        Some(&SessionError::Connection("socket reset".to_string()))
    );
    assert!(session.playback_queue().is_empty());
    assert_eq!(output_probe.stopped().len(), 1);
    assert_eq!(capture_probe.stops(), 1);
    assert_eq!(output_probe.closes(), 1);
    assert_eq!(remote.outbound.recv().await, Some(Outbound::Close));

    // Further events are ignored once terminal
    session.on_remote_event(model_audio(1.0, 24000));
    assert_eq!(output_probe.scheduled().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_remote_close_ends_session() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    session.on_remote_event(RemoteEvent::Closed { reason: None });

    assert_eq!(session.state(), SessionState::Ended);
    assert!(session.error().is_none());
    assert_eq!(capture_probe.stops(), 1);
    assert_eq!(output_probe.closes(), 1);

    Ok(())
}

#[tokio::test]
async fn test_stop_is_idempotent() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, mut remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;
    session.on_remote_event(model_audio(1.0, 24000));

    let first = session.stop();
    let second = session.stop();

    assert_eq!(first.state, SessionState::Ended);
    assert_eq!(second.state, SessionState::Ended);
    assert_eq!(capture_probe.stops(), 1);
    assert_eq!(output_probe.closes(), 1);
    assert_eq!(output_probe.stopped().len(), 1);

    // Exactly one close request, then the link is gone
    assert_eq!(remote.outbound.recv().await, Some(Outbound::Close));
    assert_eq!(remote.outbound.recv().await, None);

    // Capture after stop is dropped, never sent
    session.on_capture_frame(capture_block(1, 160));
    assert_eq!(session.stats().chunks_sent, 0);

    Ok(())
}

#[tokio::test]
async fn test_stop_before_start() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector.clone(),
    );

    let outcome = session.stop();

    assert_eq!(outcome.state, SessionState::Ended);
    assert_eq!(capture_probe.starts(), 0);
    assert_eq!(capture_probe.stops(), 0);
    assert_eq!(output_probe.closes(), 0);
    assert_eq!(connector.calls(), 0);

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState(_)));

    Ok(())
}

#[tokio::test]
async fn test_drop_releases_devices() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, mut remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;
    drop(session);

    assert_eq!(capture_probe.stops(), 1);
    assert_eq!(output_probe.closes(), 1);
    assert_eq!(remote.outbound.recv().await, Some(Outbound::Close));

    Ok(())
}

#[tokio::test]
async fn test_transcript_and_closing_remark() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, _) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::for_role("Product Manager"),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    session.on_remote_event(RemoteEvent::Text("Tell me about ".to_string()));
    session.on_remote_event(RemoteEvent::Text("a product you shipped.".to_string()));
    session.on_remote_event(RemoteEvent::TurnComplete);
    session.on_remote_event(RemoteEvent::Text("Thanks, that's all for today.".to_string()));
    session.on_remote_event(RemoteEvent::TurnComplete);

    let outcome = session.stop();

    assert_eq!(outcome.role, "Product Manager");
    assert_eq!(outcome.stats.turns, 2);
    assert_eq!(
        outcome.transcript,
        vec![
            "Tell me about a product you shipped.".to_string(),
            "Thanks, that's all for today.".to_string(),
        ]
    );
    assert_eq!(
        outcome.closing_remark.as_deref(),
        Some("Thanks, that's all for today.")
    );

    Ok(())
}

#[tokio::test]
async fn test_run_until_remote_close() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::new();
    let (output, output_probe) = FakeOutput::new();
    let (connector, remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    remote.events.send(model_audio(0.25, 24000)).await?;
    remote.events.send(RemoteEvent::Text("Hello there.".to_string())).await?;
    remote.events.send(RemoteEvent::TurnComplete).await?;
    remote
        .events
        .send(RemoteEvent::Closed {
            reason: Some("interview over".to_string()),
        })
        .await?;

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        session.run_until(std::future::pending()),
    )
    .await?;

    assert_eq!(outcome.state, SessionState::Ended);
    assert_eq!(outcome.stats.chunks_received, 1);
    assert_eq!(outcome.transcript, vec!["Hello there.".to_string()]);
    assert_eq!(capture_probe.stops(), 1);
    assert_eq!(output_probe.closes(), 1);

    Ok(())
}

#[tokio::test]
async fn test_run_until_shutdown_forwards_capture() -> Result<()> {
    let (capture, capture_probe) = FakeCapture::new();
    let (output, _) = FakeOutput::new();
    let (connector, mut remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    session.start().await?;

    let mic = capture_probe.sender();
    mic.send(capture_block(7, 4096)).await?;
    mic.send(capture_block(8, 4096)).await?;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(async move {
        session
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
    });

    for value in [7, 8] {
        let msg = tokio::time::timeout(Duration::from_secs(5), remote.outbound.recv()).await?;
        assert_eq!(
            msg,
            Some(Outbound::Audio(encode_frame(&capture_block(value, 4096))))
        );
    }

    let _ = stop_tx.send(());
    let outcome = running.await?;

    assert_eq!(outcome.state, SessionState::Ended);
    assert_eq!(outcome.stats.chunks_sent, 2);
    assert_eq!(capture_probe.stops(), 1);
    assert_eq!(remote.outbound.recv().await, Some(Outbound::Close));

    Ok(())
}

#[tokio::test]
async fn test_status_watch_tracks_state() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, _) = FakeOutput::new();
    let (connector, _remote) = ChannelConnector::new();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    let status = session.watch_status();
    assert_eq!(status.borrow().state, SessionState::Idle);

    session.start().await?;
    assert_eq!(status.borrow().state, SessionState::Active);

    session.on_capture_frame(capture_block(7, 4096));
    assert_eq!(status.borrow().stats.frames_captured, 1);
    assert_eq!(status.borrow().stats.chunks_sent, 1);

    session.on_remote_event(model_audio(0.5, 24000));
    assert_eq!(status.borrow().playback_queue_len, 1);

    session.on_playback_complete(BufferId(0));
    assert_eq!(status.borrow().playback_queue_len, 0);

    session.stop();
    assert_eq!(status.borrow().state, SessionState::Ended);

    Ok(())
}

#[tokio::test]
async fn test_status_watch_sees_connecting() -> Result<()> {
    let (capture, _) = FakeCapture::new();
    let (output, _) = FakeOutput::new();
    let (connector, _remote, gate) = ChannelConnector::gated();

    let mut session = LiveSession::new(
        SessionConfig::default(),
        Box::new(capture),
        Box::new(output),
        connector,
    );
    let mut status = session.watch_status();

    let observe = async {
        status.changed().await?;
        let seen = status.borrow_and_update().state;
        let _ = gate.send(());
        anyhow::Ok(seen)
    };
    let (started, seen) = tokio::join!(session.start(), observe);
    started?;

    assert_eq!(seen?, SessionState::Connecting);
    assert_eq!(status.borrow().state, SessionState::Active);

    session.stop();
    Ok(())
}
