// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Server lifecycle, dispatch pipeline, and the built-in commands.
// Author: Lukas Bower

//! The PSHELL server: registration, startup, and the dispatch pipeline
//! shared by all four transports.

use std::fs;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use pshell_wire::{MsgType, DEFAULT_PAYLOAD_LEN};
use thiserror::Error;

use crate::command::{Builtin, CommandEntry, Handler, RegisterError, Registry};
use crate::config::{self, ServerConfig, ServerType};
use crate::context::{is_help_args, Connection, Context, DispatchState, FoundCommand};
use crate::editor::CompletionTable;
use crate::transport;
use crate::SERVER_VERSION;

/// Width floor of the boxed welcome banner.
const WELCOME_MIN_WIDTH: usize = 58;

/// Why a server failed to start or stopped serving.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The transport socket could not be created or bound.
    #[error("failed to bind {server_type} server socket at {address}: {source}")]
    Bind {
        /// Transport that was being set up.
        server_type: ServerType,
        /// Address or socket path the bind targeted.
        address: String,
        /// Underlying socket error.
        source: io::Error,
    },
    /// The stream listener failed while accepting a connection.
    #[error("failed to accept stream connection: {0}")]
    Accept(#[source] io::Error),
}

/// An embedded multi-transport command shell.
///
/// Hosts create one, register commands against it, then either [`run`]
/// (serve on the calling thread) or [`spawn`] (serve in the background)
/// it. Dispatch is strictly serial; the registry, dispatch scratch, and
/// reply buffer are owned here and shared by every transport without
/// locking.
///
/// [`run`]: Server::run
/// [`spawn`]: Server::spawn
#[derive(Debug)]
pub struct Server {
    pub(crate) config: ServerConfig,
    pub(crate) registry: Registry,
    pub(crate) state: DispatchState,
    pub(crate) completions: CompletionTable,
    pub(crate) listener: Option<TcpListener>,
    running: bool,
}

impl Server {
    /// Create a server with the given logical name, transport, and bind
    /// address.
    ///
    /// `host` may be a literal hostname or IP, or one of the sentinels
    /// [`ANYHOST`](crate::ANYHOST), [`ANYBCAST`](crate::ANYBCAST), and
    /// [`LOCALHOST`](crate::LOCALHOST). All of these settings except the
    /// startup mode can be overridden per server name in
    /// `pshell-server.conf`.
    #[must_use]
    pub fn new(name: &str, server_type: ServerType, host: &str, port: u16) -> Self {
        Self {
            config: ServerConfig::new(name, server_type, host, port),
            registry: Registry::new(),
            state: DispatchState::new(server_type),
            completions: CompletionTable::new(),
            listener: None,
            running: false,
        }
    }

    /// Register a callback command.
    ///
    /// A command that takes no arguments can leave `usage` empty and set
    /// both bounds to zero; a command taking an exact number of arguments
    /// sets `min_args == max_args`. With `show_usage` false the callback
    /// is invoked even for help requests so it can render its own help
    /// (see [`Context::is_help`]).
    ///
    /// Rejections leave the registry unchanged and are logged with a
    /// `PSHELL_ERROR:` prefix.
    pub fn register_command<F>(
        &mut self,
        callback: F,
        name: &str,
        description: &str,
        usage: &str,
        min_args: usize,
        max_args: usize,
        show_usage: bool,
    ) -> Result<(), RegisterError>
    where
        F: FnMut(&mut Context<'_>) + Send + 'static,
    {
        let entry = CommandEntry {
            name: name.to_owned(),
            description: description.to_owned(),
            usage: usage.to_owned(),
            handler: Handler::User(Box::new(callback)),
            min_args,
            max_args,
            show_usage,
        };
        match self.registry.register(entry, false) {
            Ok(()) => {
                if self.running && self.config.server_type.is_interactive() {
                    self.completions.add(name);
                }
                Ok(())
            }
            Err(err) => {
                log::error!("PSHELL_ERROR: {err}");
                Err(err)
            }
        }
    }

    /// Serve on the calling thread.
    ///
    /// Datagram servers never return; a local server returns when stdin
    /// closes.
    pub fn run(mut self) -> Result<(), ServerError> {
        self.startup()?;
        self.serve()
    }

    /// Serve on a background thread and return control to the host.
    ///
    /// The socket is bound synchronously so bind failures surface here
    /// rather than inside the background thread.
    pub fn spawn(mut self) -> Result<ServerHandle, ServerError> {
        self.startup()?;
        let local_addr = self.local_addr();
        let unix_path = self.unix_socket_path();
        let name = self.config.name.clone();
        let join = thread::spawn(move || {
            if let Err(err) = self.serve() {
                log::error!("PSHELL_ERROR: server '{name}' stopped serving: {err}");
            }
        });
        Ok(ServerHandle {
            local_addr,
            unix_path,
            join,
        })
    }

    /// Run a registered command in-process, outside any client dispatch.
    ///
    /// Resolution is by exact name, output is suppressed, and nothing is
    /// sent to any client. Used by the startup-file loader and available
    /// to the host for driving its own commands. A call made while a
    /// dispatch is already live is ignored.
    pub fn run_command(&mut self, command: &str) {
        if self.state.dispatched {
            return;
        }
        self.state.dispatched = true;
        self.state.interactive = false;
        self.state.begin_dispatch();
        let mut tokens = command.trim().split_whitespace();
        if let Some(name) = tokens.next() {
            let name = name.to_owned();
            self.state.args = tokens.map(str::to_owned).collect();
            if let Some(index) = self.registry.find_exact(&name) {
                let entry = self.registry.get(index);
                self.state.found = Some(FoundCommand {
                    name: entry.name.clone(),
                    usage: entry.usage.clone(),
                });
                let accepts = entry.accepts_arg_count(self.state.args.len());
                if accepts && !is_help_args(&self.state.args) {
                    self.invoke(index);
                }
            }
        }
        self.state.dispatched = false;
        self.state.interactive = true;
    }

    /// Release system resources claimed by this server.
    ///
    /// Unlinks the filesystem-datagram socket path so the next run can
    /// rebind. Intended for program-exit and signal-handler paths.
    pub fn cleanup_resources(&mut self) {
        if let Some(path) = self.unix_socket_path() {
            let _ = fs::remove_file(path);
        }
    }

    fn unix_socket_path(&self) -> Option<PathBuf> {
        (self.config.server_type == ServerType::Unix)
            .then(|| transport::unix_socket_path(&self.config.name))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state.conn {
            Connection::Udp { socket, .. } => socket.local_addr().ok(),
            _ => self
                .listener
                .as_ref()
                .and_then(|listener| listener.local_addr().ok()),
        }
    }

    /// Config load, built-in registration, startup commands, then bind.
    fn startup(&mut self) -> Result<(), ServerError> {
        self.config.load_config_file();
        self.state.server_type = self.config.server_type;
        self.install_native_commands();
        self.load_startup_file();
        transport::bind(self)?;
        self.running = true;
        if self.config.server_type.is_interactive() {
            let names: Vec<String> = self.registry.iter().map(|e| e.name.clone()).collect();
            for name in names {
                self.completions.add(&name);
            }
        }
        Ok(())
    }

    fn serve(&mut self) -> Result<(), ServerError> {
        match self.config.server_type {
            ServerType::Udp => {
                log::info!(
                    "PSHELL_INFO: UDP server: {} started on host: {}, port: {}",
                    self.config.name,
                    self.config.host,
                    self.config.port
                );
                transport::run_datagram_loop(self);
                Ok(())
            }
            ServerType::Unix => {
                log::info!("PSHELL_INFO: UNIX server: {} started", self.config.name);
                transport::run_datagram_loop(self);
                Ok(())
            }
            ServerType::Tcp => {
                log::info!(
                    "PSHELL_INFO: TCP server: {} started on host: {}, port: {}",
                    self.config.name,
                    self.config.host,
                    self.config.port
                );
                transport::run_tcp_loop(self)
            }
            ServerType::Local => {
                transport::run_local_loop(self);
                Ok(())
            }
        }
    }

    fn install_native_commands(&mut self) {
        let batch = CommandEntry {
            name: "batch".to_owned(),
            description: "run commands from a batch file".to_owned(),
            usage: "<filename>".to_owned(),
            handler: Handler::Builtin(Builtin::Batch),
            min_args: 1,
            max_args: 2,
            show_usage: true,
        };
        let _ = self.registry.register(batch, true);
        // the datagram transports deliberately omit help and quit: their
        // clients discover commands through the query messages and end by
        // exiting their own process
        if self.config.server_type.is_interactive() {
            let help = CommandEntry {
                name: "help".to_owned(),
                description: "show all available commands".to_owned(),
                usage: String::new(),
                handler: Handler::Builtin(Builtin::Help),
                min_args: 0,
                max_args: 0,
                show_usage: true,
            };
            let _ = self.registry.register(help, true);
            let quit = CommandEntry {
                name: "quit".to_owned(),
                description: "exit interactive mode".to_owned(),
                usage: String::new(),
                handler: Handler::Builtin(Builtin::Quit),
                min_args: 0,
                max_args: 0,
                show_usage: true,
            };
            let _ = self.registry.register(quit, true);
        }
    }

    fn load_startup_file(&mut self) {
        let Some(path) = config::find_startup_file(&self.config.name) else {
            return;
        };
        let Ok(contents) = fs::read_to_string(path) else {
            return;
        };
        for line in contents.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.run_command(line);
        }
    }

    /// Dispatch one raw command line or protocol query.
    ///
    /// This is the single pipeline every transport feeds: metadata
    /// queries are answered from config, anything else is tokenized,
    /// resolved by prefix match, checked for help and argument count,
    /// and finally replied to with `command-complete`.
    pub(crate) fn process_command(&mut self, command: &str) {
        self.state.begin_dispatch();
        let inbound = self.state.rcv_header.msg_type;
        if let Some(msg_type) = MsgType::from_byte(inbound) {
            if msg_type.is_query() {
                self.process_query(msg_type);
                self.state.reply(inbound);
                return;
            }
        }
        self.state.dispatched = true;
        let mut tokens = command.trim().split_whitespace();
        if let Some(first) = tokens.next() {
            let first = first.to_owned();
            self.state.args = tokens.map(str::to_owned).collect();
            if first == "?" || first == "help" {
                self.show_command_list();
            } else {
                self.dispatch_token(&first);
            }
        }
        self.state.dispatched = false;
        self.state.reply(MsgType::CommandComplete as u8);
    }

    fn dispatch_token(&mut self, token: &str) {
        let matches = self.registry.find_prefix(token);
        match matches.len() {
            0 => self
                .state
                .emit(&format!("PSHELL_ERROR: Command: '{token}' not found\n")),
            1 => {
                let index = matches[0];
                let (show_usage, accepts) = {
                    let entry = self.registry.get(index);
                    self.state.found = Some(FoundCommand {
                        name: entry.name.clone(),
                        usage: entry.usage.clone(),
                    });
                    (
                        entry.show_usage,
                        entry.accepts_arg_count(self.state.args.len()),
                    )
                };
                if is_help_args(&self.state.args) {
                    if show_usage {
                        self.state.show_usage();
                    } else {
                        self.invoke(index);
                    }
                } else if !accepts {
                    self.state.show_usage();
                } else {
                    self.invoke(index);
                }
            }
            _ => self.state.emit(&format!(
                "PSHELL_ERROR: Ambiguous command abbreviation: '{token}'\n"
            )),
        }
    }

    fn invoke(&mut self, index: usize) {
        let builtin = match &self.registry.get(index).handler {
            Handler::Builtin(builtin) => Some(*builtin),
            Handler::User(_) => None,
        };
        if let Some(builtin) = builtin {
            self.run_builtin(builtin);
            return;
        }
        if let Handler::User(callback) = &mut self.registry.get_mut(index).handler {
            let mut ctx = Context {
                state: &mut self.state,
            };
            callback(&mut ctx);
        }
    }

    fn run_builtin(&mut self, builtin: Builtin) {
        match builtin {
            Builtin::Help => self.show_command_list(),
            Builtin::Quit => match self.config.server_type {
                ServerType::Local => std::process::exit(0),
                ServerType::Tcp => self.state.quit = true,
                ServerType::Udp | ServerType::Unix => {}
            },
            Builtin::Batch => self.run_batch(),
        }
    }

    /// The `batch` built-in: feed every non-comment line of a batch file
    /// through the full dispatcher so its output flows back to the
    /// calling client.
    fn run_batch(&mut self) {
        let Some(file_name) = self.state.args.first().cloned() else {
            return;
        };
        let contents = config::find_batch_file(&file_name)
            .and_then(|path| fs::read_to_string(path).ok());
        let Some(contents) = contents else {
            self.state
                .emit(&format!("ERROR: Could not find batch file: '{file_name}'\n"));
            return;
        };
        for line in contents.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.process_command(line);
        }
    }

    fn process_query(&mut self, msg_type: MsgType) {
        match msg_type {
            MsgType::QueryVersion => self.state.emit(SERVER_VERSION),
            MsgType::QueryPayloadSize => {
                self.state.emit(&DEFAULT_PAYLOAD_LEN.to_string());
            }
            MsgType::QueryName => {
                let name = self.config.name.clone();
                self.state.emit(&name);
            }
            MsgType::QueryTitle => {
                let title = self.config.title.clone();
                self.state.emit(&title);
            }
            MsgType::QueryBanner => {
                let banner = self.config.banner.clone();
                self.state.emit(&banner);
            }
            MsgType::QueryPrompt => {
                let prompt = self.config.prompt.clone();
                self.state.emit(&prompt);
            }
            MsgType::QueryCommands1 => self.emit_command_listing(),
            MsgType::QueryCommands2 => {
                let names: String = self
                    .registry
                    .iter()
                    .map(|entry| format!("{}/", entry.name))
                    .collect();
                self.state.emit(&names);
            }
            _ => {}
        }
    }

    /// One aligned `<name>  -  <description>` line per command, then a
    /// trailing blank line.
    fn emit_command_listing(&mut self) {
        let width = self.registry.max_name_len();
        let mut listing = String::new();
        for entry in self.registry.iter() {
            listing.push_str(&format!(
                "{:<width$}  -  {}\n",
                entry.name, entry.description
            ));
        }
        listing.push('\n');
        self.state.emit(&listing);
    }

    /// The `help`/`?` command list rendering.
    fn show_command_list(&mut self) {
        self.state.emit(
            "\n\
             ****************************************\n\
             *             COMMAND LIST             *\n\
             ****************************************\n\
             \n",
        );
        self.emit_command_listing();
    }

    /// Boxed ASCII-art welcome screen for interactive sessions.
    pub(crate) fn show_welcome(&mut self, tcp_sock_name: Option<&str>, title: &str) {
        let banner_line = format!("#  {}", self.config.banner);
        let server_line = match tcp_sock_name {
            Some(sock_name) => format!(
                "#  Single session TCP server: {}[{}]",
                self.config.name, sock_name
            ),
            None => format!(
                "#  Single session LOCAL server: {}[{}]",
                self.config.name, self.config.server_type
            ),
        };
        let width = WELCOME_MIN_WIDTH
            .max(banner_line.len())
            .max(server_line.len())
            + 2;
        let border = "#".repeat(width);

        let mut screen = String::new();
        screen.push_str(&format!("\x1b]0;{title}\x07"));
        screen.push('\n');
        screen.push_str(&border);
        screen.push_str("\n#\n");
        screen.push_str(&banner_line);
        screen.push_str("\n#\n");
        screen.push_str(&server_line);
        screen.push_str("\n#\n");
        if self.config.server_type == ServerType::Local {
            screen.push_str("#  Idle session timeout: NONE\n");
        } else {
            screen.push_str(&format!(
                "#  Idle session timeout: {} minutes\n",
                self.config.timeout_minutes
            ));
        }
        screen.push_str("#\n");
        screen.push_str("#  Type '?' or 'help' at prompt for command summary\n");
        screen.push_str("#  Type '?' or '-h' after command for command usage\n");
        screen.push_str("#\n");
        if self.config.server_type == ServerType::Tcp {
            screen.push_str("#  Full <TAB> completion, up-arrow recall, command\n");
            screen.push_str("#  line editing and command abbreviation supported\n");
        } else {
            screen.push_str("#  Command abbreviation supported\n");
        }
        screen.push_str("#\n");
        screen.push_str(&border);
        screen.push_str("\n\n");
        self.state.emit(&screen);
    }
}

/// Handle to a server running on a background thread.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: Option<SocketAddr>,
    unix_path: Option<PathBuf>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address of a UDP or TCP server, useful when port 0 was
    /// requested.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Filesystem socket path of a Unix-datagram server.
    #[must_use]
    pub fn unix_socket_path(&self) -> Option<&Path> {
        self.unix_path.as_deref()
    }

    /// Unlink the filesystem-datagram socket path, if any.
    pub fn cleanup_resources(&self) {
        if let Some(path) = &self.unix_path {
            let _ = fs::remove_file(path);
        }
    }

    /// Block until the serving thread exits.
    pub fn join(self) {
        let _ = self.join.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn test_server() -> Server {
        Server::new("testServer", ServerType::Udp, crate::LOCALHOST, 0)
    }

    fn capture() -> (Arc<Mutex<Vec<Vec<String>>>>, impl FnMut(&mut Context<'_>)) {
        let calls: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let callback = move |ctx: &mut Context<'_>| {
            sink.lock().unwrap().push(ctx.args().to_vec());
        };
        (calls, callback)
    }

    #[test]
    fn failed_registration_returns_the_error() {
        let mut server = test_server();
        let err = server
            .register_command(|_| {}, "", "no name", "", 0, 0, true)
            .unwrap_err();
        assert_eq!(err, RegisterError::EmptyName);
    }

    #[test]
    fn run_command_resolves_exact_names_only() {
        let mut server = test_server();
        let (calls, callback) = capture();
        server
            .register_command(callback, "status", "show status", "", 0, 0, true)
            .unwrap();
        server.run_command("stat");
        assert!(calls.lock().unwrap().is_empty(), "abbreviation must not match");
        server.run_command("status");
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn run_command_enforces_arg_bounds_and_help() {
        let mut server = test_server();
        let (calls, callback) = capture();
        server
            .register_command(callback, "echo", "echo text", "<text>", 1, 2, true)
            .unwrap();
        server.run_command("echo");
        server.run_command("echo a b c");
        server.run_command("echo -h");
        assert!(calls.lock().unwrap().is_empty());
        server.run_command("echo hello");
        assert_eq!(calls.lock().unwrap().as_slice(), [vec!["hello".to_owned()]]);
    }

    #[test]
    fn run_command_suppresses_output() {
        let mut server = test_server();
        server
            .register_command(
                |ctx| ctx.println("should never be buffered"),
                "noisy",
                "prints a line",
                "",
                0,
                0,
                true,
            )
            .unwrap();
        server.run_command("noisy");
        assert_eq!(server.state.payload, "");
        assert!(server.state.interactive);
    }

    #[test]
    fn dispatch_prefers_unique_prefix_match() {
        let mut server = test_server();
        let (foo_calls, foo) = capture();
        let (foobar_calls, foobar) = capture();
        server
            .register_command(foo, "foo", "foo command", "", 0, 0, true)
            .unwrap();
        server
            .register_command(foobar, "foobar", "foobar command", "", 0, 0, true)
            .unwrap();

        server.process_command("foob");
        assert!(foo_calls.lock().unwrap().is_empty());
        assert_eq!(foobar_calls.lock().unwrap().len(), 1);

        server.process_command("fo");
        assert!(foo_calls.lock().unwrap().is_empty());
        assert_eq!(foobar_calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn native_commands_for_datagram_servers_omit_help_and_quit() {
        let mut server = test_server();
        server.install_native_commands();
        let names: Vec<&str> = server.registry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["batch"]);
    }

    #[test]
    fn native_commands_for_interactive_servers_are_prepended() {
        let mut server = Server::new("testServer", ServerType::Tcp, crate::LOCALHOST, 0);
        let (_, callback) = capture();
        server
            .register_command(callback, "status", "show status", "", 0, 0, true)
            .unwrap();
        server.install_native_commands();
        let names: Vec<&str> = server.registry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["quit", "help", "batch", "status"]);
    }

    #[test]
    fn welcome_banner_is_boxed_and_describes_the_transport() {
        let mut server = Server::new("testServer", ServerType::Tcp, crate::LOCALHOST, 0);
        server.state.server_type = ServerType::Udp; // buffer instead of flushing
        server.show_welcome(Some("127.0.0.1"), "title");
        let banner = server.state.payload.clone();
        assert!(banner.contains("Single session TCP server: testServer[127.0.0.1]"));
        assert!(banner.contains("Idle session timeout: 10 minutes"));
        assert!(banner.contains("Full <TAB> completion"));
        let border_len = banner
            .lines()
            .find(|line| line.chars().all(|c| c == '#') && line.len() > 1)
            .map(str::len)
            .unwrap();
        assert_eq!(border_len, WELCOME_MIN_WIDTH + 2);
    }
}
