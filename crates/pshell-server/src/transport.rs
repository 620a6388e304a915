// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Socket setup and the per-transport serve loops.
// Author: Lukas Bower

//! Transport plumbing for the four server types.
//!
//! Each loop is a strictly serial receive, dispatch, reply cycle. The
//! stream transport intentionally serves one operator console at a time:
//! the listener is closed while a session is live and re-created when the
//! session ends.

use std::fs;
use std::io::{BufRead, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pshell_wire::{MsgHeader, DEFAULT_PAYLOAD_LEN};

use crate::config::{ServerConfig, ServerType, ANYBCAST, ANYHOST, LOCALHOST};
use crate::context::Connection;
use crate::editor::LineEditor;
use crate::server::{Server, ServerError};

/// Directory holding filesystem-datagram sockets.
pub(crate) const UNIX_SOCKET_DIR: &str = "/tmp";

/// Option negotiation sent to a freshly accepted telnet client: the server
/// announces WILL SUPPRESS-GO-AHEAD and WILL ECHO, and asks the client to
/// DO the same.
const TELNET_NEGOTIATE: [u8; 12] = [
    0xFF, 0xFB, 0x03, 0xFF, 0xFB, 0x01, 0xFF, 0xFD, 0x03, 0xFF, 0xFD, 0x01,
];

/// Map the host sentinels onto concrete bind addresses.
fn resolve_host(host: &str) -> &str {
    match host {
        ANYHOST => "0.0.0.0",
        ANYBCAST => "255.255.255.255",
        LOCALHOST => "127.0.0.1",
        other => other,
    }
}

/// Filesystem path of a named server's datagram socket.
pub(crate) fn unix_socket_path(server_name: &str) -> std::path::PathBuf {
    Path::new(UNIX_SOCKET_DIR).join(server_name)
}

fn bind_error(config: &ServerConfig, address: String, source: std::io::Error) -> ServerError {
    ServerError::Bind {
        server_type: config.server_type,
        address,
        source,
    }
}

/// Create this server's socket and stash it in the dispatch state.
///
/// Runs on the caller's thread so bind failures surface before any
/// background serving starts. For the stream transport the actual bound
/// port is written back to the config so the listener can be re-created
/// on the same port after each session.
pub(crate) fn bind(server: &mut Server) -> Result<(), ServerError> {
    match server.config.server_type {
        ServerType::Udp => {
            let host = resolve_host(&server.config.host);
            let address = format!("{host}:{}", server.config.port);
            let socket = UdpSocket::bind((host, server.config.port))
                .map_err(|err| bind_error(&server.config, address, err))?;
            if server.config.host == ANYBCAST {
                let _ = socket.set_broadcast(true);
            }
            server.state.conn = Connection::Udp { socket, peer: None };
        }
        ServerType::Unix => {
            let path = unix_socket_path(&server.config.name);
            // recover from a prior crash before rebinding
            let _ = fs::remove_file(&path);
            let socket = UnixDatagram::bind(&path)
                .map_err(|err| bind_error(&server.config, path.display().to_string(), err))?;
            server.state.conn = Connection::Unix { socket, peer: None };
        }
        ServerType::Tcp => {
            let listener = create_listener(&server.config)?;
            if let Ok(addr) = listener.local_addr() {
                server.config.port = addr.port();
            }
            server.listener = Some(listener);
        }
        ServerType::Local => server.state.conn = Connection::Local,
    }
    Ok(())
}

fn create_listener(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let host = resolve_host(&config.host);
    let address = format!("{host}:{}", config.port);
    TcpListener::bind((host, config.port)).map_err(|err| bind_error(config, address, err))
}

/// One received datagram and the peer to answer.
enum Incoming {
    Inet(usize, SocketAddr),
    Fs(usize, Option<PathBuf>),
    Dropped,
}

/// Serial datagram service: one request, one dispatch, one reply.
pub(crate) fn run_datagram_loop(server: &mut Server) {
    let mut buf = vec![0u8; DEFAULT_PAYLOAD_LEN];
    loop {
        let incoming = match &server.state.conn {
            Connection::Udp { socket, .. } => socket
                .recv_from(&mut buf)
                .map_or(Incoming::Dropped, |(len, from)| Incoming::Inet(len, from)),
            Connection::Unix { socket, .. } => {
                socket.recv_from(&mut buf).map_or(Incoming::Dropped, |(len, from)| {
                    Incoming::Fs(len, from.as_pathname().map(Path::to_path_buf))
                })
            }
            _ => return,
        };
        let received = match incoming {
            Incoming::Inet(len, from) => {
                if let Connection::Udp { peer, .. } = &mut server.state.conn {
                    *peer = Some(from);
                }
                len
            }
            Incoming::Fs(len, from) => {
                if let Connection::Unix { peer, .. } = &mut server.state.conn {
                    *peer = from;
                }
                len
            }
            Incoming::Dropped => continue,
        };
        let Some(header) = MsgHeader::read(&buf[..received]) else {
            continue;
        };
        server.state.rcv_header = header;
        let command = pshell_wire::payload(&buf, received).into_owned();
        server.process_command(&command);
    }
}

/// Accept-one-connection stream service.
pub(crate) fn run_tcp_loop(server: &mut Server) -> Result<(), ServerError> {
    loop {
        let listener = match server.listener.take() {
            Some(listener) => listener,
            None => create_listener(&server.config)?,
        };
        let (stream, _) = listener.accept().map_err(ServerError::Accept)?;
        // a PSHELL session is a single operator console: shut the listener
        // so no new clients can attach until this session ends
        drop(listener);
        run_tcp_session(server, stream);
        server.state.conn = Connection::Idle;
    }
}

fn run_tcp_session(server: &mut Server, stream: TcpStream) {
    let sock_name = stream
        .local_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default();
    let prompt = format!(
        "{}[{}]:{}",
        server.config.name, sock_name, server.config.prompt
    );
    let title = format!(
        "{}: {}[{}], Mode: INTERACTIVE",
        server.config.title, server.config.name, sock_name
    );
    if server.config.timeout_minutes > 0 {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(
            server.config.timeout_minutes * 60,
        )));
    }
    let Ok(mut reader) = stream.try_clone() else {
        return;
    };
    server.state.conn = Connection::Tcp { stream };
    server.state.quit = false;

    let mut buf = vec![0u8; DEFAULT_PAYLOAD_LEN];
    if let Connection::Tcp { stream } = &mut server.state.conn {
        if stream.write_all(&TELNET_NEGOTIATE).is_err() {
            return;
        }
    }
    // consume whatever options the client negotiated back
    if reader.read(&mut buf).is_err() {
        return;
    }
    server.show_welcome(Some(&sock_name), &title);

    let mut editor = LineEditor::new();
    loop {
        if editor.line().is_empty() {
            let Connection::Tcp { stream } = &mut server.state.conn else {
                return;
            };
            if write!(stream, "\r{prompt}").is_err() {
                return;
            }
        }
        let len = match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(len) => len,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                server.state.emit("\nIdle session timeout\n");
                return;
            }
            Err(_) => return,
        };
        let completed = {
            let Connection::Tcp { stream } = &mut server.state.conn else {
                return;
            };
            match editor.feed(&buf[..len], &server.completions, &prompt, stream) {
                Ok(completed) => completed,
                Err(_) => return,
            }
        };
        if let Some(command) = completed {
            server.process_command(&command);
            if server.state.quit {
                return;
            }
        }
    }
}

/// Stdio service reusing the dispatcher with direct stdout output.
pub(crate) fn run_local_loop(server: &mut Server) {
    server.config.prompt = format!(
        "{}[{}]:{}",
        server.config.name, server.config.server_type, server.config.prompt
    );
    server.config.title = format!(
        "{}: {}[{}], Mode: INTERACTIVE",
        server.config.title, server.config.name, server.config.server_type
    );
    let title = server.config.title.clone();
    server.show_welcome(None, &title);

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "{}", server.config.prompt);
            let _ = stdout.flush();
        }
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim_end_matches(['\r', '\n']);
        if !command.is_empty() {
            let command = command.to_owned();
            server.process_command(&command);
        }
    }
}
