// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn ping_serializes_with_type_tag() -> anyhow::Result<()> {
    let json = serde_json::to_string(&Frame::Ping)?;
    assert_eq!(json, r#"{"type":"ping"}"#);
    Ok(())
}

#[test]
fn chat_message_round_trips() -> anyhow::Result<()> {
    let frame = Frame::ChatMessage {
        message: serde_json::json!({"text": "hello", "sender_id": 3}),
    };
    let json = serde_json::to_string(&frame)?;
    assert!(json.contains(r#""type":"chat_message""#));
    let back: Frame = serde_json::from_str(&json)?;
    assert_eq!(back, frame);
    Ok(())
}

#[test]
fn mark_read_omits_empty_ids() -> anyhow::Result<()> {
    let json = serde_json::to_string(&Frame::MarkRead { message_ids: vec![] })?;
    assert_eq!(json, r#"{"type":"mark_read"}"#);

    let json = serde_json::to_string(&Frame::MarkRead { message_ids: vec![4, 5] })?;
    assert_eq!(json, r#"{"type":"mark_read","message_ids":[4,5]}"#);
    Ok(())
}

#[test]
fn inbound_status_frames_deserialize() -> anyhow::Result<()> {
    let frame = Frame::parse(r#"{"type":"user_status","user_id":12,"status":"online"}"#);
    assert_eq!(frame, Some(Frame::UserStatus { user_id: 12, status: "online".to_owned() }));

    let frame = Frame::parse(r#"{"type":"typing_status","user_id":12,"is_typing":true}"#);
    assert_eq!(frame, Some(Frame::TypingStatus { user_id: 12, is_typing: true }));

    let frame = Frame::parse(r#"{"type":"messages_read","message_ids":[1,2],"reader_id":9}"#);
    assert_eq!(frame, Some(Frame::MessagesRead { message_ids: vec![1, 2], reader_id: 9 }));
    Ok(())
}

#[test]
fn unknown_frame_type_is_dropped() {
    assert_eq!(Frame::parse(r#"{"type":"surprise","x":1}"#), None);
}

#[test]
fn malformed_frame_is_dropped() {
    assert_eq!(Frame::parse("not json"), None);
}

#[test]
fn dispatch_maps_inbound_frames() {
    let event = dispatch(Frame::ChatMessage { message: serde_json::json!({"text": "hi"}) });
    assert!(matches!(event, Some(ChannelEvent::Message { .. })));

    let event = dispatch(Frame::UserStatus { user_id: 1, status: "offline".to_owned() });
    assert!(matches!(event, Some(ChannelEvent::UserStatus { .. })));

    let event = dispatch(Frame::MessagesRead { message_ids: vec![3], reader_id: 2 });
    assert!(matches!(event, Some(ChannelEvent::MessagesRead { .. })));
}

#[test]
fn dispatch_swallows_heartbeat_ack() {
    assert!(dispatch(Frame::Pong).is_none());
}

#[test]
fn dispatch_ignores_client_bound_frames() {
    assert!(dispatch(Frame::TypingStart).is_none());
    assert!(dispatch(Frame::MarkRead { message_ids: vec![] }).is_none());
}
