// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Server settings plus the config, startup, and batch file lookups.
// Author: Lukas Bower

//! Server configuration and the line-oriented file loaders.
//!
//! Config, startup, and batch files all share one search strategy: an
//! environment-variable directory override, then the system directory
//! under `/etc/pshell`, then the current working directory. The first hit
//! wins and a missing file is not an error (only a missing batch file is
//! reported, to the calling client).

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Bind to all interfaces of a multi-homed host.
pub const ANYHOST: &str = "anyhost";
/// Bind to the limited broadcast address 255.255.255.255.
pub const ANYBCAST: &str = "anybcast";
/// Bind to the local loopback address 127.0.0.1.
pub const LOCALHOST: &str = "localhost";

const CONFIG_DIR: &str = "/etc/pshell/config";
const STARTUP_DIR: &str = "/etc/pshell/startup";
const BATCH_DIR: &str = "/etc/pshell/batch";
const CONFIG_FILE: &str = "pshell-server.conf";

/// Environment variable overriding the config file directory.
pub const CONFIG_DIR_ENV: &str = "PSHELL_CONFIG_DIR";
/// Environment variable overriding the startup file directory.
pub const STARTUP_DIR_ENV: &str = "PSHELL_STARTUP_DIR";
/// Environment variable overriding the batch file directory.
pub const BATCH_DIR_ENV: &str = "PSHELL_BATCH_DIR";

/// The transport a server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    /// Datagram over IP; driven by the thin datagram client.
    Udp,
    /// Stream over IP; driven by a plain telnet client.
    Tcp,
    /// Datagram over a filesystem socket under `/tmp`.
    Unix,
    /// The host's own stdio; no client program at all.
    Local,
}

impl ServerType {
    /// Lower-case transport name as it appears in config files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Unix => "unix",
            Self::Local => "local",
        }
    }

    /// Parse a config-file transport name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "udp" => Some(Self::Udp),
            "tcp" => Some(Self::Tcp),
            "unix" => Some(Self::Unix),
            "local" => Some(Self::Local),
            _ => None,
        }
    }

    /// Datagram transports speak the wire protocol; stream and local are
    /// character oriented.
    #[must_use]
    pub fn is_datagram(self) -> bool {
        matches!(self, Self::Udp | Self::Unix)
    }

    /// Interactive transports carry the `help`/`quit` built-ins and tab
    /// completion.
    #[must_use]
    pub fn is_interactive(self) -> bool {
        matches!(self, Self::Tcp | Self::Local)
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective settings of a running server.
///
/// Seeded from the `Server::new` arguments, then overridden by any
/// matching entries in `pshell-server.conf` before a socket is created.
#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub(crate) name: String,
    pub(crate) server_type: ServerType,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) title: String,
    pub(crate) banner: String,
    pub(crate) prompt: String,
    /// Stream-session idle limit, in minutes.
    pub(crate) timeout_minutes: u64,
}

impl ServerConfig {
    pub(crate) fn new(name: &str, server_type: ServerType, host: &str, port: u16) -> Self {
        Self {
            name: name.to_owned(),
            server_type,
            host: host.to_owned(),
            port,
            title: "PSHELL".to_owned(),
            banner: "PSHELL: Process Specific Embedded Command Line Shell".to_owned(),
            prompt: "PSHELL> ".to_owned(),
            timeout_minutes: 10,
        }
    }

    /// Apply `pshell-server.conf` entries that name this server.
    ///
    /// Lines look like `<server>.<key>=<value>`; keys are matched
    /// case-insensitively and unrecognized or malformed lines are skipped.
    pub(crate) fn load_config_file(&mut self) {
        let Some(path) = find_file(CONFIG_DIR_ENV, CONFIG_DIR, CONFIG_FILE) else {
            return;
        };
        let Ok(contents) = fs::read_to_string(&path) else {
            return;
        };
        self.apply_config_lines(&contents);
    }

    fn apply_config_lines(&mut self, contents: &str) {
        for line in contents.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = split_exactly_once(line, '=') else {
                continue;
            };
            let Some((server, option)) = split_exactly_once(key, '.') else {
                continue;
            };
            if server != self.name {
                continue;
            }
            match option.to_ascii_lowercase().as_str() {
                "title" => self.title = value.to_owned(),
                "banner" => self.banner = value.to_owned(),
                "prompt" => self.prompt = value.to_owned(),
                "host" => self.host = value.to_owned(),
                "port" => {
                    if let Ok(port) = value.parse() {
                        self.port = port;
                    }
                }
                "type" => {
                    if let Some(server_type) = ServerType::from_name(value) {
                        self.server_type = server_type;
                    }
                }
                "timeout" => {
                    if let Ok(minutes) = value.parse() {
                        self.timeout_minutes = minutes;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Split on `sep` only when it occurs exactly once.
fn split_exactly_once(text: &str, sep: char) -> Option<(&str, &str)> {
    if text.matches(sep).count() != 1 {
        return None;
    }
    text.split_once(sep)
}

/// Shared three-location file search: `$env_var/<file>`, `<system_dir>/
/// <file>`, `<cwd>/<file>`. First existing path wins.
pub(crate) fn find_file(env_var: &str, system_dir: &str, file_name: &str) -> Option<PathBuf> {
    if let Ok(dir) = env::var(env_var) {
        if !dir.is_empty() {
            let candidate = Path::new(&dir).join(file_name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    let candidate = Path::new(system_dir).join(file_name);
    if candidate.exists() {
        return Some(candidate);
    }
    if let Ok(cwd) = env::current_dir() {
        let candidate = cwd.join(file_name);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

/// Locate `<server>.startup` with the shared search strategy.
pub(crate) fn find_startup_file(server_name: &str) -> Option<PathBuf> {
    find_file(
        STARTUP_DIR_ENV,
        STARTUP_DIR,
        &format!("{server_name}.startup"),
    )
}

/// Locate a batch file; unlike the other loaders a raw path is also
/// accepted as a final fallback.
pub(crate) fn find_batch_file(file_name: &str) -> Option<PathBuf> {
    if let Some(found) = find_file(BATCH_DIR_ENV, BATCH_DIR, file_name) {
        return Some(found);
    }
    let raw = PathBuf::from(file_name);
    raw.exists().then_some(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig::new("traceServer", ServerType::Udp, ANYHOST, 9001)
    }

    #[test]
    fn server_type_names_round_trip() {
        for server_type in [
            ServerType::Udp,
            ServerType::Tcp,
            ServerType::Unix,
            ServerType::Local,
        ] {
            assert_eq!(
                ServerType::from_name(server_type.as_str()),
                Some(server_type)
            );
        }
        assert_eq!(ServerType::from_name("TCP"), Some(ServerType::Tcp));
        assert_eq!(ServerType::from_name("sctp"), None);
    }

    #[test]
    fn applies_only_matching_server_entries() {
        let mut cfg = config();
        cfg.apply_config_lines(
            "# demo config\n\
             traceServer.title=Trace Console\n\
             traceServer.prompt=trace> \n\
             otherServer.prompt=other> \n\
             traceServer.port=6002\n\
             traceServer.timeout=30\n",
        );
        assert_eq!(cfg.title, "Trace Console");
        assert_eq!(cfg.prompt, "trace> ");
        assert_eq!(cfg.port, 6002);
        assert_eq!(cfg.timeout_minutes, 30);
    }

    #[test]
    fn validates_transport_names() {
        let mut cfg = config();
        cfg.apply_config_lines("traceServer.type=tcp\n");
        assert_eq!(cfg.server_type, ServerType::Tcp);
        cfg.apply_config_lines("traceServer.type=carrier-pigeon\n");
        assert_eq!(cfg.server_type, ServerType::Tcp);
    }

    #[test]
    fn skips_comments_and_malformed_lines() {
        let mut cfg = config();
        cfg.apply_config_lines(
            "#traceServer.title=Commented Out\n\
             traceServer.banner\n\
             traceServer.banner=a=b\n\
             title=No Server Qualifier\n\
             traceServer.port=not-a-number\n",
        );
        assert_eq!(cfg.title, "PSHELL");
        assert_eq!(
            cfg.banner,
            "PSHELL: Process Specific Embedded Command Line Shell"
        );
        assert_eq!(cfg.port, 9001);
    }

    #[test]
    fn env_directory_wins_file_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "traceServer.title=From Env Dir\n").unwrap();
        env::set_var(CONFIG_DIR_ENV, dir.path());
        let found = find_file(CONFIG_DIR_ENV, CONFIG_DIR, CONFIG_FILE);
        env::remove_var(CONFIG_DIR_ENV);
        assert_eq!(found, Some(path));
    }

    #[test]
    fn batch_lookup_accepts_raw_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightly.batch");
        std::fs::write(&path, "status\n").unwrap();
        let raw = path.to_str().unwrap();
        assert_eq!(find_batch_file(raw), Some(PathBuf::from(raw)));
        assert_eq!(find_batch_file("no-such-batch-file"), None);
    }
}
