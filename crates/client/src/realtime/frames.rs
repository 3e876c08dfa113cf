// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frames and the typed events derived from them.

use serde::{Deserialize, Serialize};

/// JSON text frames exchanged with the chat backend, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// A chat message, inbound or outbound. The payload shape belongs to the
    /// backend; the core passes it through untouched.
    ChatMessage { message: serde_json::Value },
    /// The local user began typing.
    TypingStart,
    /// The local user stopped typing.
    TypingStop,
    /// Mark the listed messages as read.
    MarkRead {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        message_ids: Vec<u64>,
    },
    /// Application-level heartbeat.
    Ping,
    /// Heartbeat acknowledgement.
    Pong,
    /// Presence change for a participant.
    UserStatus { user_id: u64, status: String },
    /// Another participant's typing indicator changed.
    TypingStatus { user_id: u64, is_typing: bool },
    /// Read receipts for previously sent messages.
    MessagesRead { message_ids: Vec<u64>, reader_id: u64 },
}

impl Frame {
    /// Parse an inbound text frame. Unrecognized or malformed frames are
    /// logged and dropped.
    pub fn parse(text: &str) -> Option<Frame> {
        match serde_json::from_str(text) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!(err = %e, "unrecognized frame dropped");
                None
            }
        }
    }
}

/// Typed events delivered to channel subscribers.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The socket is open and frames flow.
    Connected,
    /// The socket closed; a reconnect may follow unless the disconnect was
    /// manual or attempts are exhausted.
    Disconnected,
    /// An inbound chat message.
    Message { message: serde_json::Value },
    UserStatus { user_id: u64, status: String },
    TypingStatus { user_id: u64, is_typing: bool },
    MessagesRead { message_ids: Vec<u64>, reader_id: u64 },
    /// Socket-level error; does not itself terminate the channel.
    Error(String),
}

/// Map an inbound frame to its subscriber event. Heartbeat acks and frames
/// that only travel client→server produce nothing.
pub(crate) fn dispatch(frame: Frame) -> Option<ChannelEvent> {
    match frame {
        Frame::ChatMessage { message } => Some(ChannelEvent::Message { message }),
        Frame::UserStatus { user_id, status } => Some(ChannelEvent::UserStatus { user_id, status }),
        Frame::TypingStatus { user_id, is_typing } => {
            Some(ChannelEvent::TypingStatus { user_id, is_typing })
        }
        Frame::MessagesRead { message_ids, reader_id } => {
            Some(ChannelEvent::MessagesRead { message_ids, reader_id })
        }
        Frame::Pong => None,
        other => {
            tracing::debug!(frame = ?other, "client-bound frame echoed by server, dropped");
            None
        }
    }
}

#[cfg(test)]
#[path = "frames_tests.rs"]
mod tests;
