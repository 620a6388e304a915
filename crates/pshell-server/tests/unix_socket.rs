// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Filesystem-datagram transport and socket cleanup tests.
// Author: Lukas Bower

//! The Unix transport speaks the same wire protocol as UDP but over a
//! filesystem datagram socket under `/tmp`; these tests check the round
//! trip, stale-socket recovery, and that cleanup leaves no file behind.

use std::fs;
use std::os::unix::net::UnixDatagram;
use std::process;
use std::time::Duration;

use pshell_server::{Server, ServerType, ANYHOST};
use pshell_wire::{self as wire, MsgType};

fn status_server(name: &str) -> Server {
    let mut server = Server::new(name, ServerType::Unix, ANYHOST, 0);
    server
        .register_command(
            |ctx| ctx.print("server is running\n"),
            "status",
            "show server status",
            "",
            0,
            0,
            true,
        )
        .unwrap();
    server
}

#[test]
fn unix_round_trip_and_cleanup_leaves_no_socket_file() {
    let name = format!("pshellUnixTest{}", process::id());
    let handle = status_server(&name).spawn().unwrap();
    let server_path = handle.unix_socket_path().unwrap().to_path_buf();
    assert!(server_path.exists(), "socket file must exist while serving");

    let client_dir = tempfile::tempdir().unwrap();
    let client = UnixDatagram::bind(client_dir.path().join("client")).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let request = wire::encode_message(MsgType::UserCommand as u8, 1, 1, 3, "status");
    client.send_to(&request, &server_path).unwrap();
    let mut buf = vec![0u8; wire::DEFAULT_PAYLOAD_LEN];
    let (len, _) = client.recv_from(&mut buf).unwrap();
    assert_eq!(wire::msg_type(&buf), MsgType::CommandComplete as u8);
    assert_eq!(wire::seq_num(&buf), 3);
    assert_eq!(wire::payload(&buf, len), "server is running\n");

    handle.cleanup_resources();
    assert!(!server_path.exists(), "cleanup must unlink the socket path");
}

#[test]
fn stale_socket_path_is_unlinked_before_rebinding() {
    let name = format!("pshellUnixStale{}", process::id());
    let stale = std::path::Path::new("/tmp").join(&name);
    fs::write(&stale, b"leftover from a crashed run").unwrap();

    let handle = status_server(&name).spawn().unwrap();
    let server_path = handle.unix_socket_path().unwrap().to_path_buf();
    assert_eq!(server_path, stale);

    let client_dir = tempfile::tempdir().unwrap();
    let client = UnixDatagram::bind(client_dir.path().join("client")).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let request = wire::encode_message(MsgType::QueryName as u8, 0, 0, 0, "");
    client.send_to(&request, &server_path).unwrap();
    let mut buf = vec![0u8; wire::DEFAULT_PAYLOAD_LEN];
    let (len, _) = client.recv_from(&mut buf).unwrap();
    assert_eq!(wire::payload(&buf, len).into_owned(), name);

    handle.cleanup_resources();
}
