// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Encode and decode PSHELL datagram wire messages.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Wire codec for the PSHELL datagram transports.
//!
//! A wire message is a fixed 8-byte header followed by a variable ASCII
//! payload. The header is packed by byte offset rather than through a
//! serialization framework so that a server can mutate fields in place on
//! the received buffer and echo them back in its reply:
//!
//! | offset | size | field         |
//! |--------|------|---------------|
//! | 0      | 1    | msg type      |
//! | 1      | 1    | resp needed   |
//! | 2      | 1    | data needed   |
//! | 3      | 1    | pad           |
//! | 4      | 4    | seq num (BE)  |
//! | 8      | ...  | payload       |
//!
//! Replies copy `resp needed`, `data needed`, and `seq num` from the
//! request verbatim; only the msg type and the payload change.

use std::borrow::Cow;

/// Size of the fixed wire-message header.
pub const HEADER_LEN: usize = 8;

/// Default maximum payload length accepted by a datagram server.
pub const DEFAULT_PAYLOAD_LEN: usize = 2048;

const MSG_TYPE_OFFSET: usize = 0;
const RESP_NEEDED_OFFSET: usize = 1;
const DATA_NEEDED_OFFSET: usize = 2;
const SEQ_NUM_OFFSET: usize = 4;

/// Message opcodes exchanged between a PSHELL server and its clients.
///
/// Any opcode the server does not recognize as a query is treated as a
/// user command whose payload is a raw command line, so decoding a byte
/// into a `MsgType` is allowed to fail without the message being invalid.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    /// Client asks for the server version string.
    QueryVersion = 1,
    /// Client asks for the maximum payload length.
    QueryPayloadSize = 2,
    /// Client asks for the server name.
    QueryName = 3,
    /// Client asks for the formatted help listing.
    QueryCommands1 = 4,
    /// Client asks for the slash-delimited command name list.
    QueryCommands2 = 5,
    /// Reserved.
    UpdatePayloadSize = 6,
    /// Payload is a command line to dispatch.
    UserCommand = 7,
    /// Server marks the end of a user-command reply.
    CommandComplete = 8,
    /// Client asks for the welcome banner.
    QueryBanner = 9,
    /// Client asks for the window title.
    QueryTitle = 10,
    /// Client asks for the prompt string.
    QueryPrompt = 11,
    /// Reserved for programmatic-control clients.
    ControlCommand = 12,
}

impl MsgType {
    /// Decode a raw opcode byte, returning `None` for unknown values.
    #[must_use]
    pub fn from_byte(value: u8) -> Option<Self> {
        use MsgType::*;
        Some(match value {
            1 => QueryVersion,
            2 => QueryPayloadSize,
            3 => QueryName,
            4 => QueryCommands1,
            5 => QueryCommands2,
            6 => UpdatePayloadSize,
            7 => UserCommand,
            8 => CommandComplete,
            9 => QueryBanner,
            10 => QueryTitle,
            11 => QueryPrompt,
            12 => ControlCommand,
            _ => return None,
        })
    }

    /// True for the metadata query opcodes whose replies echo the request
    /// opcode rather than carrying `CommandComplete`.
    #[must_use]
    pub fn is_query(self) -> bool {
        use MsgType::*;
        matches!(
            self,
            QueryVersion
                | QueryPayloadSize
                | QueryName
                | QueryCommands1
                | QueryCommands2
                | QueryBanner
                | QueryTitle
                | QueryPrompt
        )
    }
}

/// Header fields captured from a received wire message.
///
/// A server holds one of these for the lifetime of a dispatch so the reply
/// can echo the client's sequencing fields after the receive buffer has
/// been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgHeader {
    /// Raw request opcode.
    pub msg_type: u8,
    /// Client wants a reply.
    pub resp_needed: u8,
    /// Client wants payload data.
    pub data_needed: u8,
    /// Opaque client sequence number, echoed unchanged.
    pub seq_num: u32,
}

impl MsgHeader {
    /// Capture the header fields of a received buffer.
    ///
    /// Returns `None` when fewer than [`HEADER_LEN`] bytes were received.
    #[must_use]
    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            msg_type: msg_type(buf),
            resp_needed: resp_needed(buf),
            data_needed: data_needed(buf),
            seq_num: seq_num(buf),
        })
    }

    /// Build a reply to this request carrying `reply_type` and `payload`,
    /// echoing the request's `resp_needed`, `data_needed`, and `seq_num`.
    #[must_use]
    pub fn reply(&self, reply_type: u8, payload: &str) -> Vec<u8> {
        encode_message(
            reply_type,
            self.resp_needed,
            self.data_needed,
            self.seq_num,
            payload,
        )
    }
}

/// Read the opcode byte of a wire message.
#[must_use]
pub fn msg_type(buf: &[u8]) -> u8 {
    buf[MSG_TYPE_OFFSET]
}

/// Overwrite the opcode byte of a wire message in place.
pub fn set_msg_type(buf: &mut [u8], value: u8) {
    buf[MSG_TYPE_OFFSET] = value;
}

/// Read the resp-needed flag byte.
#[must_use]
pub fn resp_needed(buf: &[u8]) -> u8 {
    buf[RESP_NEEDED_OFFSET]
}

/// Read the data-needed flag byte.
#[must_use]
pub fn data_needed(buf: &[u8]) -> u8 {
    buf[DATA_NEEDED_OFFSET]
}

/// Read the big-endian sequence number.
#[must_use]
pub fn seq_num(buf: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[SEQ_NUM_OFFSET..SEQ_NUM_OFFSET + 4]);
    u32::from_be_bytes(raw)
}

/// Overwrite the big-endian sequence number in place.
pub fn set_seq_num(buf: &mut [u8], value: u32) {
    buf[SEQ_NUM_OFFSET..SEQ_NUM_OFFSET + 4].copy_from_slice(&value.to_be_bytes());
}

/// Extract the ASCII payload of a received message of `recv_len` bytes.
///
/// Datagrams shorter than the header yield an empty payload.
#[must_use]
pub fn payload(buf: &[u8], recv_len: usize) -> Cow<'_, str> {
    if recv_len <= HEADER_LEN {
        return Cow::Borrowed("");
    }
    String::from_utf8_lossy(&buf[HEADER_LEN..recv_len])
}

/// Assemble a complete wire message from its header fields and payload.
#[must_use]
pub fn encode_message(
    msg_type: u8,
    resp_needed: u8,
    data_needed: u8,
    seq_num: u32,
    payload: &str,
) -> Vec<u8> {
    let mut message = vec![msg_type, resp_needed, data_needed, 0, 0, 0, 0, 0];
    set_seq_num(&mut message, seq_num);
    message.extend_from_slice(payload.as_bytes());
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_header_by_offset() {
        let message = encode_message(7, 1, 1, 0xDEAD_BEEF, "status");
        assert_eq!(message.len(), HEADER_LEN + 6);
        assert_eq!(msg_type(&message), 7);
        assert_eq!(resp_needed(&message), 1);
        assert_eq!(data_needed(&message), 1);
        assert_eq!(message[3], 0);
        assert_eq!(seq_num(&message), 0xDEAD_BEEF);
        assert_eq!(payload(&message, message.len()), "status");
    }

    #[test]
    fn seq_num_is_big_endian() {
        let message = encode_message(1, 0, 0, 0x0102_0304, "");
        assert_eq!(&message[4..8], &[1, 2, 3, 4]);
    }

    #[test]
    fn reply_echoes_request_fields() {
        let request = encode_message(4, 1, 1, 42, "");
        let header = MsgHeader::read(&request).unwrap();
        let reply = header.reply(4, "batch  -  run commands from a batch file\n");
        assert_eq!(msg_type(&reply), 4);
        assert_eq!(resp_needed(&reply), resp_needed(&request));
        assert_eq!(data_needed(&reply), data_needed(&request));
        assert_eq!(seq_num(&reply), 42);
    }

    #[test]
    fn in_place_header_mutation() {
        let mut message = encode_message(7, 1, 0, 9, "hi");
        set_msg_type(&mut message, 8);
        set_seq_num(&mut message, 10);
        assert_eq!(msg_type(&message), 8);
        assert_eq!(seq_num(&message), 10);
        assert_eq!(payload(&message, message.len()), "hi");
    }

    #[test]
    fn short_datagram_has_empty_payload() {
        let buf = [7u8; DEFAULT_PAYLOAD_LEN];
        assert_eq!(payload(&buf, 3), "");
        assert_eq!(payload(&buf, HEADER_LEN), "");
        assert!(MsgHeader::read(&buf[..4]).is_none());
    }

    #[test]
    fn opcode_decode_round_trip() {
        for value in 1..=12u8 {
            let decoded = MsgType::from_byte(value).unwrap();
            assert_eq!(decoded as u8, value);
        }
        assert!(MsgType::from_byte(0).is_none());
        assert!(MsgType::from_byte(13).is_none());
    }

    #[test]
    fn query_opcodes_match_protocol_table() {
        use MsgType::*;
        for query in [
            QueryVersion,
            QueryPayloadSize,
            QueryName,
            QueryCommands1,
            QueryCommands2,
            QueryBanner,
            QueryTitle,
            QueryPrompt,
        ] {
            assert!(query.is_query(), "{query:?} should be a query");
        }
        for other in [UpdatePayloadSize, UserCommand, CommandComplete, ControlCommand] {
            assert!(!other.is_query(), "{other:?} should not be a query");
        }
    }
}
