//! Command-channel behaviour against a live server.

mod common;

use camtune_core::codec::{encode_command_request, fit_response};
use camtune_core::{AckStatus, ChannelKind, Collaborator};
use camtune_server::{DisconnectReason, TuningEvent};
use common::*;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn connect_is_acknowledged() {
    let server = start_server(test_config(), test_pipeline()).await;
    let (_client, status) = CommandClient::connect(server.command_addr()).await;
    assert_eq!(status, AckStatus::Success);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn parameter_list_is_exactly_response_len_bytes() {
    let server = start_server(test_config(), test_pipeline()).await;
    let (mut client, _) = CommandClient::connect(server.command_addr()).await;

    let mut reference = test_pipeline();
    let handle = reference.open_imaging_session().unwrap();
    let list = reference.parameter_list(&handle);

    // Padded.
    let (ack, body) = client.request(1014, &[], 256).await;
    assert_eq!(ack, AckStatus::Success);
    assert_eq!(body, fit_response(list.clone(), 256));

    // Truncated.
    let (ack, body) = client.request(1014, &[], 10).await;
    assert_eq!(ack, AckStatus::Success);
    assert_eq!(body, list[..10].to_vec());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn set_then_get_parameter() {
    let server = start_server(test_config(), test_pipeline()).await;
    let (mut client, _) = CommandClient::connect(server.command_addr()).await;

    let (ack, body) = client.request(1016, &set_request(&[(2, 400)]), 2).await;
    assert_eq!(ack, AckStatus::Success);
    assert_eq!(body, 1u16.to_le_bytes().to_vec());

    let (_, body) = client.request(1015, &get_request(&[2]), 8).await;
    assert_eq!(&body[..2], &1u16.to_le_bytes());
    assert_eq!(&body[2..4], &2u16.to_le_bytes());
    assert_eq!(&body[4..8], &400i32.to_le_bytes());

    let pipeline = server.stop().await.unwrap();
    assert_eq!(pipeline.parameter(2), Some(400));
}

#[tokio::test]
async fn byte_at_a_time_matches_one_shot() {
    let server = start_server(test_config(), test_pipeline()).await;
    let (mut client, _) = CommandClient::connect(server.command_addr()).await;

    let (_, one_shot) = client.request(1015, &get_request(&[1, 2, 3]), 20).await;

    let frame = encode_command_request(1015, &get_request(&[1, 2, 3]), 20).unwrap();
    for byte in &frame {
        client.send_raw(std::slice::from_ref(byte)).await;
        client.stream.flush().await.unwrap();
        tokio::task::yield_now().await;
    }
    let (ack, split) = client.read_response(20).await;
    assert_eq!(ack, AckStatus::Success);
    assert_eq!(split, one_shot);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_command_is_tolerated() {
    let server = start_server(test_config(), test_pipeline()).await;
    let (mut client, _) = CommandClient::connect(server.command_addr()).await;

    let (ack, body) = client.request(4242, &[1, 2, 3], 16).await;
    assert_eq!(ack, AckStatus::Failure);
    assert!(body.is_empty());

    // Same connection keeps working.
    let (ack, body) = client.request(1021, &[9], 3).await;
    assert_eq!(ack, AckStatus::Success);
    assert_eq!(body, vec![0xFD, 0x03, 9]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn handler_failure_yields_zeroed_body_and_event() {
    let server = start_server(test_config(), test_pipeline()).await;
    let mut events = server.subscribe();
    let (mut client, _) = CommandClient::connect(server.command_addr()).await;

    let (ack, body) = client.request(1016, &set_request(&[(99, 1)]), 4).await;
    assert_eq!(ack, AckStatus::Success);
    assert_eq!(body, vec![0, 0, 0, 0]);

    let event = wait_for_event(&mut events, |e| matches!(e, TuningEvent::DispatchError { .. })).await;
    assert!(matches!(
        event,
        TuningEvent::DispatchError {
            channel: ChannelKind::Command,
            command: 1016,
            ..
        }
    ));

    let (ack, _) = client.request(1014, &[], 4).await;
    assert_eq!(ack, AckStatus::Success);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn oversized_payload_closes_the_session() {
    let mut config = test_config();
    config.max_payload = 128;
    let server = start_server(config, test_pipeline()).await;
    let mut events = server.subscribe();
    let (mut client, _) = CommandClient::connect(server.command_addr()).await;

    let mut header = 1016u16.to_le_bytes().to_vec();
    header.extend_from_slice(&129u32.to_le_bytes());
    client.send_raw(&header).await;

    expect_closed(&mut client.stream).await;
    wait_for_event(&mut events, |e| {
        matches!(e, TuningEvent::ProtocolViolation { channel: ChannelKind::Command, .. })
    })
    .await;
    wait_for_event(&mut events, |e| {
        matches!(
            e,
            TuningEvent::Disconnected {
                reason: DisconnectReason::ProtocolViolation,
                ..
            }
        )
    })
    .await;

    // The listener is unaffected.
    let (_again, status) = CommandClient::connect(server.command_addr()).await;
    assert_eq!(status, AckStatus::Success);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn peer_close_mid_payload_is_orderly() {
    let server = start_server(test_config(), test_pipeline()).await;
    let mut events = server.subscribe();
    let (mut client, _) = CommandClient::connect(server.command_addr()).await;

    let mut partial = 1016u16.to_le_bytes().to_vec();
    partial.extend_from_slice(&64u32.to_le_bytes());
    partial.extend_from_slice(&[1; 10]);
    client.send_raw(&partial).await;
    drop(client);

    wait_for_event(&mut events, |e| {
        matches!(
            e,
            TuningEvent::Disconnected {
                channel: ChannelKind::Command,
                reason: DisconnectReason::OrderlyClose,
                ..
            }
        )
    })
    .await;

    let pipeline = server.stop().await.unwrap();
    assert_eq!(pipeline.open_sessions(), 0);
}

#[tokio::test]
async fn pipeline_open_failure_rejects_only_that_accept() {
    let server = start_server(test_config(), test_pipeline().with_open_failure()).await;
    let mut events = server.subscribe();

    let (mut client, status) = CommandClient::connect(server.command_addr()).await;
    assert_eq!(status, AckStatus::Failure);
    expect_closed(&mut client.stream).await;
    wait_for_event(&mut events, |e| {
        matches!(
            e,
            TuningEvent::Disconnected {
                reason: DisconnectReason::PipelineUnavailable,
                ..
            }
        )
    })
    .await;

    // Still accepting.
    let (_client, status) = CommandClient::connect(server.command_addr()).await;
    assert_eq!(status, AckStatus::Failure);

    server.stop().await.unwrap();
}
