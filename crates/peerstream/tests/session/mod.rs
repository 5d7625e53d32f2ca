use std::time::Duration;

use peerstream::{
    playback::PlaybackEvent, SessionOutcome, SessionState, StreamError, Streamer,
};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{
    mock::{
        asset_data, config, eventually, init_test_tracing, mount_asset, mount_info, origin,
        streaming_requests, MockRuntime,
    },
    AssertWrapper,
};

#[tokio::test]
async fn test_streams_asset_to_completion() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    let data = asset_data(1_000);
    mount_asset(&server, "song.mp3", &data, 4).await;

    let runtime = MockRuntime::new(true);
    let mut streamer = Streamer::new(origin(&server), config(4), runtime.clone());
    let mut state = streamer.select_asset("song.mp3").await.subscribe();
    state.wait_for(|s| *s == SessionState::Streaming).await?;

    // first segment does not wait for playback
    eventually(|| runtime.buffered() == 250).await;
    runtime.send(PlaybackEvent::CanPlay { duration: 40. });
    runtime.send(PlaybackEvent::TimeUpdate { current_time: 5. });
    runtime.send(PlaybackEvent::TimeUpdate { current_time: 8. });
    eventually(|| runtime.buffered() == 500).await;
    runtime.send(PlaybackEvent::TimeUpdate { current_time: 15. });
    eventually(|| runtime.buffered() == 750).await;
    runtime.send(PlaybackEvent::TimeUpdate { current_time: 22. });
    eventually(|| runtime.buffered() == 1_000).await;
    assert_eq!(runtime.state().ended, 0);

    runtime.send(PlaybackEvent::TimeUpdate { current_time: 25. });
    runtime.send(PlaybackEvent::TimeUpdate { current_time: 31. });
    let outcome = streamer.wait().await.assert_success()?;
    assert_eq!(
        outcome,
        SessionOutcome::Completed {
            bytes_fetched: 1_000
        }
    );
    assert_eq!(*state.borrow(), SessionState::Completed);

    {
        let runtime = runtime.state();
        assert_eq!(runtime.data, data);
        assert_eq!(runtime.appends, 4);
        assert_eq!(runtime.ended, 1);
        assert_eq!(runtime.detached, 0);
    }
    assert_eq!(streaming_requests(&server).await, 4);

    Ok(())
}

#[tokio::test]
async fn test_missing_size_never_touches_stream() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_info(&server, "song.mp3", r#"{"Name":"song.mp3"}"#.to_string()).await;

    let runtime = MockRuntime::new(true);
    let mut streamer = Streamer::new(origin(&server), config(10), runtime.clone());
    let state = streamer.select_asset("song.mp3").await.subscribe();

    let result = streamer.wait().await.assert_success();
    assert!(matches!(result, Err(StreamError::InvalidMetadata(_))));
    assert_eq!(
        *state.borrow(),
        SessionState::Error("Error, streamable file not valid.".to_string())
    );

    assert_eq!(streaming_requests(&server).await, 0);
    assert_eq!(runtime.state().appends, 0);
    assert!(runtime.state().direct.is_none());
    assert!(runtime.state().events.is_none());

    Ok(())
}

#[tokio::test]
async fn test_unknown_file_is_reported() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_info(
        &server,
        "missing.mp3",
        r#"{"Name":"missing.mp3","Size":0}"#.to_string(),
    )
    .await;

    let mut streamer = Streamer::new(origin(&server), config(10), MockRuntime::new(true));
    let state = streamer.select_asset("missing.mp3").await.subscribe();
    streamer.wait().await.assert_success().assert_error();
    assert!(matches!(*state.borrow(), SessionState::Error(_)));

    // the info endpoint itself fails
    let state = streamer.select_asset("other.mp3").await.subscribe();
    let result = streamer.wait().await.assert_success();
    assert!(matches!(result, Err(StreamError::MetadataUnavailable(_))));
    assert_eq!(
        *state.borrow(),
        SessionState::Error("Error, streamable file not found.".to_string())
    );
    assert_eq!(streaming_requests(&server).await, 0);

    Ok(())
}

#[tokio::test]
async fn test_unsupported_runtime_plays_directly() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_asset(&server, "song.mp3", &asset_data(1_000), 10).await;

    let runtime = MockRuntime::new(false);
    let mut streamer = Streamer::new(origin(&server), config(10), runtime.clone());
    let mut state = streamer.select_asset("song.mp3").await.subscribe();
    state
        .wait_for(|s| *s == SessionState::DirectPlayback)
        .await?;

    assert_eq!(
        runtime.state().direct.as_ref().map(|u| u.to_string()),
        Some(format!("{}/streaming/song.mp3", server.uri()))
    );
    // the runtime does the downloading
    assert_eq!(streaming_requests(&server).await, 0);
    assert_eq!(runtime.state().detached, 0);

    // navigating away releases the element
    let outcome = streamer.stop().await.assert_success()?;
    assert_eq!(outcome, SessionOutcome::DirectPlayback);
    assert_eq!(*state.borrow(), SessionState::Closed);
    assert_eq!(runtime.state().detached, 1);

    Ok(())
}

#[tokio::test]
async fn test_new_selection_releases_direct_playback() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_asset(&server, "a.mp3", &asset_data(1_000), 10).await;
    mount_asset(&server, "b.mp3", &asset_data(500), 10).await;

    let runtime = MockRuntime::new(false);
    let mut streamer = Streamer::new(origin(&server), config(10), runtime.clone());
    let mut first = streamer.select_asset("a.mp3").await.subscribe();
    first
        .wait_for(|s| *s == SessionState::DirectPlayback)
        .await?;

    let mut second = streamer.select_asset("b.mp3").await.subscribe();
    assert_eq!(*first.borrow(), SessionState::Closed);
    assert_eq!(runtime.state().detached, 1);

    second
        .wait_for(|s| *s == SessionState::DirectPlayback)
        .await?;
    assert!(runtime
        .state()
        .direct
        .as_ref()
        .is_some_and(|u| u.path() == "/streaming/b.mp3"));

    Ok(())
}

#[tokio::test]
async fn test_seek_drops_outstanding_fetch() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    let data = asset_data(1_000);
    Mock::given(method("GET"))
        .and(path("/streaming/song.mp3"))
        .and(header("range", "bytes=250-499"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(data[250..500].to_vec())
                .set_delay(Duration::from_millis(500)),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_asset(&server, "song.mp3", &data, 4).await;

    let runtime = MockRuntime::new(true);
    let mut streamer = Streamer::new(origin(&server), config(4), runtime.clone());
    let mut state = streamer.select_asset("song.mp3").await.subscribe();
    state.wait_for(|s| *s == SessionState::Streaming).await?;
    eventually(|| runtime.buffered() == 250).await;

    runtime.send(PlaybackEvent::CanPlay { duration: 40. });
    runtime.send(PlaybackEvent::TimeUpdate { current_time: 8. });
    tokio::time::sleep(Duration::from_millis(100)).await;
    runtime.send(PlaybackEvent::Seeking { current_time: 5. });

    eventually(|| runtime.buffered() == 500).await;
    assert_eq!(runtime.state().aborts, 1);

    // give the dropped response time to arrive
    tokio::time::sleep(Duration::from_millis(600)).await;
    {
        let runtime = runtime.state();
        assert_eq!(runtime.appends, 2);
        assert_eq!(runtime.data, data[..500]);
    }
    assert_eq!(*state.borrow(), SessionState::Streaming);

    assert_eq!(
        streamer.stop().await.assert_success()?,
        SessionOutcome::Closed
    );
    Ok(())
}

#[tokio::test]
async fn test_seek_before_buffer_is_ready_is_not_fatal() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let data = asset_data(1_000);
    mount_asset(&server, "song.mp3", &data, 4).await;

    let runtime = MockRuntime::new(true);
    let mut streamer = Streamer::new(origin(&server), config(4), runtime.clone());
    let mut state = streamer.select_asset("song.mp3").await.subscribe();
    state.wait_for(|s| *s == SessionState::Streaming).await?;
    eventually(|| runtime.buffered() == 250).await;

    runtime.state().ready = false;
    runtime.send(PlaybackEvent::Seeking { current_time: 3. });
    runtime.send(PlaybackEvent::CanPlay { duration: 40. });
    runtime.send(PlaybackEvent::TimeUpdate { current_time: 8. });
    eventually(|| runtime.buffered() == 500).await;

    assert_eq!(runtime.state().aborts, 0);
    assert_eq!(*state.borrow(), SessionState::Streaming);
    streamer.stop().await.assert_success().assert_success();

    Ok(())
}

#[tokio::test]
async fn test_failed_segment_ends_session() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    let data = asset_data(1_000);
    Mock::given(method("GET"))
        .and(path("/streaming/song.mp3"))
        .and(header("range", "bytes=250-499"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_asset(&server, "song.mp3", &data, 4).await;

    let runtime = MockRuntime::new(true);
    let mut config = config(4);
    config.retries = 1;
    let mut streamer = Streamer::new(origin(&server), config, runtime.clone());
    let mut state = streamer.select_asset("song.mp3").await.subscribe();
    state.wait_for(|s| *s == SessionState::Streaming).await?;
    eventually(|| runtime.buffered() == 250).await;

    runtime.send(PlaybackEvent::CanPlay { duration: 40. });
    runtime.send(PlaybackEvent::TimeUpdate { current_time: 8. });

    let result = streamer.wait().await.assert_success();
    assert!(matches!(result, Err(StreamError::SegmentFetch { index: 1, .. })));
    assert_eq!(
        *state.borrow(),
        SessionState::Error("Error, failed to download segment 1 of the stream.".to_string())
    );
    assert_eq!(runtime.state().detached, 1);
    assert_eq!(runtime.buffered(), 250);
    // first try plus one retry
    assert_eq!(streaming_requests(&server).await, 3);

    Ok(())
}

#[tokio::test]
async fn test_new_selection_tears_down_previous_session() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_asset(&server, "a.mp3", &asset_data(1_000), 4).await;
    mount_asset(&server, "b.mp3", &asset_data(2_000), 4).await;

    let runtime = MockRuntime::new(true);
    let mut streamer = Streamer::new(origin(&server), config(4), runtime.clone());
    let mut first = streamer.select_asset("a.mp3").await.subscribe();
    first.wait_for(|s| *s == SessionState::Streaming).await?;

    let mut second = streamer.select_asset("b.mp3").await.subscribe();
    // the first session is gone before the second one starts
    assert_eq!(*first.borrow(), SessionState::Closed);
    assert_eq!(runtime.state().detached, 1);

    second.wait_for(|s| *s == SessionState::Streaming).await?;
    assert_eq!(streamer.active().map(|s| s.asset_name()), Some("b.mp3"));

    let closed = streamer.stop().await.assert_success();
    assert_eq!(closed.assert_success(), SessionOutcome::Closed);
    assert!(streamer.active().is_none());
    assert!(streamer.stop().await.is_none());

    Ok(())
}

#[tokio::test]
async fn test_session_closes_when_element_goes_away() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_asset(&server, "song.mp3", &asset_data(1_000), 4).await;

    let runtime = MockRuntime::new(true);
    let mut streamer = Streamer::new(origin(&server), config(4), runtime.clone());
    let mut state = streamer.select_asset("song.mp3").await.subscribe();
    state.wait_for(|s| *s == SessionState::Streaming).await?;

    runtime.state().events = None;
    let outcome = streamer.wait().await.assert_success()?;
    assert_eq!(outcome, SessionOutcome::Closed);
    assert_eq!(*state.borrow(), SessionState::Closed);

    Ok(())
}
