// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Per-dispatch state and the output API handed to command callbacks.
// Author: Lukas Bower

//! Callback-facing output API.
//!
//! Every dispatch runs against one [`DispatchState`]: the parsed argument
//! tokens, the resolved command, and the append-only send payload that
//! becomes the reply. Callbacks never touch a socket directly; they write
//! through a [`Context`] and the server routes the text to the right
//! place for the active transport (reply datagram, telnet stream, or
//! stdout).

use std::fmt;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use pshell_wire::MsgHeader;

use crate::config::ServerType;

/// Tokens a user may type after a command to ask for its help text.
pub(crate) const HELP_TOKENS: [&str; 5] = ["?", "-h", "--h", "-help", "--help"];

const WHEEL: [char; 4] = ['|', '/', '-', '\\'];

/// The transport endpoint a dispatch replies through.
#[derive(Debug)]
pub(crate) enum Connection {
    /// No transport bound yet.
    Idle,
    /// Local stdio server; output goes straight to stdout.
    Local,
    /// UDP datagram server with the peer of the current request.
    Udp {
        socket: UdpSocket,
        peer: Option<SocketAddr>,
    },
    /// Filesystem datagram server with the peer path of the current
    /// request.
    Unix {
        socket: UnixDatagram,
        peer: Option<PathBuf>,
    },
    /// Live telnet session.
    Tcp { stream: TcpStream },
}

/// Process-wide dispatch scratch, reset at the start of each dispatch.
///
/// Dispatch is strictly serial, so a single instance owned by the server
/// is shared by every transport without locking.
#[derive(Debug)]
pub(crate) struct DispatchState {
    pub(crate) server_type: ServerType,
    /// Argument tokens of the current line, command name excluded.
    pub(crate) args: Vec<String>,
    /// Name and usage of the command resolved for the current line.
    pub(crate) found: Option<FoundCommand>,
    /// Guards `run_command` against re-entry from a live dispatch.
    pub(crate) dispatched: bool,
    /// False while a startup/`run_command` line executes; output is
    /// suppressed instead of buffered.
    pub(crate) interactive: bool,
    /// Accumulated reply text.
    pub(crate) payload: String,
    /// Header fields of the datagram being served, echoed into replies.
    pub(crate) rcv_header: MsgHeader,
    pub(crate) conn: Connection,
    /// Set by the `quit` built-in to end the current stream session.
    pub(crate) quit: bool,
    wheel_pos: usize,
}

/// Identity of the command resolved for the current dispatch.
#[derive(Debug, Clone)]
pub(crate) struct FoundCommand {
    pub(crate) name: String,
    pub(crate) usage: String,
}

impl DispatchState {
    pub(crate) fn new(server_type: ServerType) -> Self {
        Self {
            server_type,
            args: Vec::new(),
            found: None,
            dispatched: false,
            interactive: true,
            payload: String::new(),
            rcv_header: MsgHeader::default(),
            conn: Connection::Idle,
            quit: false,
            wheel_pos: 0,
        }
    }

    /// Append formatted text to the send payload.
    ///
    /// On the local transport the text goes straight to stdout, and on the
    /// stream transport the payload is flushed immediately because the
    /// client is a live terminal.
    pub(crate) fn emit(&mut self, text: &str) {
        if !self.interactive {
            return;
        }
        match self.server_type {
            ServerType::Local => {
                let mut stdout = io::stdout().lock();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            ServerType::Tcp => {
                self.payload.push_str(text);
                self.flush();
            }
            ServerType::Udp | ServerType::Unix => self.payload.push_str(text),
        }
    }

    /// Push the accumulated payload to the client.
    ///
    /// Datagram transports reply with the inbound request's opcode; the
    /// stream transport converts `\n` to `\r\n` and writes the text to the
    /// connection.
    pub(crate) fn flush(&mut self) {
        if !self.interactive {
            return;
        }
        match self.server_type {
            ServerType::Udp | ServerType::Unix => self.reply(self.rcv_header.msg_type),
            ServerType::Tcp => {
                if let Connection::Tcp { stream } = &mut self.conn {
                    let _ = stream.write_all(to_crlf(&self.payload).as_bytes());
                }
                self.payload.clear();
            }
            ServerType::Local => {}
        }
    }

    /// Send a reply datagram carrying `msg_type` and the accumulated
    /// payload, echoing the request header fields, then clear the payload.
    pub(crate) fn reply(&mut self, msg_type: u8) {
        let message = self.rcv_header.reply(msg_type, &self.payload);
        match &self.conn {
            Connection::Udp {
                socket,
                peer: Some(peer),
            } => {
                let _ = socket.send_to(&message, peer);
            }
            Connection::Unix {
                socket,
                peer: Some(peer),
            } => {
                let _ = socket.send_to(&message, peer);
            }
            _ => {}
        }
        self.payload.clear();
    }

    /// Reset the per-dispatch scratch for a new command line.
    pub(crate) fn begin_dispatch(&mut self) {
        self.payload.clear();
        self.args.clear();
        self.found = None;
    }

    pub(crate) fn show_usage(&mut self) {
        let Some(found) = self.found.clone() else {
            return;
        };
        if found.usage.is_empty() {
            self.emit(&format!("Usage: {}\n", found.name));
        } else {
            self.emit(&format!("Usage: {} {}\n", found.name, found.usage));
        }
    }

    pub(crate) fn wheel(&mut self, prefix: &str) {
        self.wheel_pos += 1;
        let glyph = WHEEL[self.wheel_pos % WHEEL.len()];
        if prefix.is_empty() {
            self.emit(&format!("\r{glyph}"));
        } else {
            self.emit(&format!("\r{prefix}{glyph}"));
        }
        self.flush();
    }
}

/// Convert bare newlines to the CRLF pairs a telnet client expects.
pub(crate) fn to_crlf(text: &str) -> String {
    text.replace('\n', "\r\n")
}

/// True when `args` is exactly one help token.
pub(crate) fn is_help_args(args: &[String]) -> bool {
    args.len() == 1 && HELP_TOKENS.contains(&args[0].as_str())
}

/// Dispatch context handed to command callbacks.
///
/// Borrows the server's dispatch state for the duration of one callback
/// invocation.
#[derive(Debug)]
pub struct Context<'a> {
    pub(crate) state: &'a mut DispatchState,
}

impl Context<'_> {
    /// Argument tokens of the current invocation, command name excluded.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.state.args
    }

    /// Display text back to the client, without a trailing newline.
    pub fn print(&mut self, text: impl fmt::Display) {
        self.state.emit(&text.to_string());
    }

    /// Display a line of text back to the client.
    pub fn println(&mut self, text: impl fmt::Display) {
        self.state.emit(&format!("{text}\n"));
    }

    /// Flush the accumulated reply buffer back to the client.
    pub fn flush(&mut self) {
        self.state.flush();
    }

    /// Advance a spinning keep-alive wheel, overwriting the current line.
    pub fn wheel(&mut self, prefix: &str) {
        self.state.wheel(prefix);
    }

    /// March a message or character across the screen as a keep-alive.
    pub fn march(&mut self, text: &str) {
        self.state.emit(text);
        self.state.flush();
    }

    /// True when the user asked for help on this command.
    ///
    /// Only meaningful for commands registered with `show_usage = false`;
    /// the dispatcher handles help itself otherwise.
    #[must_use]
    pub fn is_help(&self) -> bool {
        is_help_args(&self.state.args)
    }

    /// Show this command's registered usage.
    pub fn show_usage(&mut self) {
        self.state.show_usage();
    }
}

/// True when `input` is a prefix of `keyword` at least `min_match_len`
/// characters long.
///
/// With a `min_match_len` of 2, `q` will not match `quit` but `qu`, `qui`,
/// and `quit` will; `quix` will not. Useful for wildcard matching inside
/// callbacks as well as for the dispatcher's own abbreviation matching.
#[must_use]
pub fn is_prefix_match(input: &str, keyword: &str, min_match_len: usize) -> bool {
    input.len() >= min_match_len && keyword.starts_with(input)
}

/// Parse a command argument of the form `-<key><value>` (single-character
/// key) or `<key>=<value>`, returning the key and value.
///
/// The `-t10` shape keeps the dash in the key; the `timeout=10` shape
/// splits on a single `=`. Anything else yields `None`.
#[must_use]
pub fn parse_option(arg: &str) -> Option<(&str, &str)> {
    if arg.len() < 3 {
        return None;
    }
    if arg.starts_with('-') {
        if !arg.is_char_boundary(2) {
            return None;
        }
        return Some((&arg[..2], &arg[2..]));
    }
    if arg.matches('=').count() != 1 {
        return None;
    }
    arg.split_once('=')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DispatchState {
        DispatchState::new(ServerType::Udp)
    }

    #[test]
    fn print_accumulates_payload_in_order() {
        let mut state = state();
        let mut ctx = Context { state: &mut state };
        ctx.print("alpha");
        ctx.println(" beta");
        assert_eq!(state.payload, "alpha beta\n");
    }

    #[test]
    fn output_is_suppressed_when_not_interactive() {
        let mut state = state();
        state.interactive = false;
        let mut ctx = Context { state: &mut state };
        ctx.println("hidden");
        assert_eq!(state.payload, "");
    }

    #[test]
    fn show_usage_renders_with_and_without_usage_text() {
        let mut state = state();
        state.found = Some(FoundCommand {
            name: "echo".to_owned(),
            usage: "<text> [count]".to_owned(),
        });
        Context { state: &mut state }.show_usage();
        assert_eq!(state.payload, "Usage: echo <text> [count]\n");

        state.payload.clear();
        state.found = Some(FoundCommand {
            name: "status".to_owned(),
            usage: String::new(),
        });
        Context { state: &mut state }.show_usage();
        assert_eq!(state.payload, "Usage: status\n");
    }

    #[test]
    fn wheel_and_march_write_through_a_live_stream() {
        use std::io::Read;
        use std::net::{TcpListener, TcpStream};

        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();

        let mut state = DispatchState::new(ServerType::Tcp);
        state.conn = Connection::Tcp { stream };
        let mut ctx = Context { state: &mut state };
        ctx.wheel("waiting ");
        ctx.wheel("waiting ");
        ctx.wheel("");
        ctx.march(".");
        drop(state);

        let mut received = String::new();
        client.read_to_string(&mut received).unwrap();
        assert_eq!(received, "\rwaiting /\rwaiting -\r\\.");
    }

    #[test]
    fn is_help_matches_every_help_token() {
        let mut state = state();
        for token in HELP_TOKENS {
            state.args = vec![token.to_owned()];
            assert!(Context { state: &mut state }.is_help(), "token {token}");
        }
        state.args = vec!["-h".to_owned(), "extra".to_owned()];
        assert!(!Context { state: &mut state }.is_help());
        state.args = vec!["-help-me".to_owned()];
        assert!(!Context { state: &mut state }.is_help());
    }

    #[test]
    fn to_crlf_converts_every_newline() {
        assert_eq!(to_crlf("a\nb\n"), "a\r\nb\r\n");
        assert_eq!(to_crlf("plain"), "plain");
    }

    #[test]
    fn prefix_match_honors_minimum_length() {
        assert!(is_prefix_match("qu", "quit", 2));
        assert!(is_prefix_match("quit", "quit", 2));
        assert!(!is_prefix_match("q", "quit", 2));
        assert!(!is_prefix_match("quix", "quit", 2));
        assert!(is_prefix_match("", "quit", 0));
    }

    #[test]
    fn parse_option_accepts_both_shapes() {
        assert_eq!(parse_option("-t10"), Some(("-t", "10")));
        assert_eq!(parse_option("timeout=10"), Some(("timeout", "10")));
        assert_eq!(parse_option("a=b"), Some(("a", "b")));
    }

    #[test]
    fn parse_option_rejects_malformed_arguments() {
        assert_eq!(parse_option(""), None);
        assert_eq!(parse_option("-t"), None);
        assert_eq!(parse_option("x="), None);
        assert_eq!(parse_option("a=b=c"), None);
        assert_eq!(parse_option("plain"), None);
    }
}
