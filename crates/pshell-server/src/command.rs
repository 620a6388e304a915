// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Command descriptors and the ordered registration table.
// Author: Lukas Bower

//! Command registry for a PSHELL server.
//!
//! Commands are kept in registration order because that order governs the
//! help listing and the `query-commands` replies. Names are unique; prefix
//! (abbreviation) resolution walks the table in order.

use std::fmt;

use thiserror::Error;

use crate::context::Context;

/// Callback signature for a registered command.
///
/// The callback receives a [`Context`] scoped to the current dispatch; all
/// output goes through it so the server can route it to the right client.
pub type CommandFn = Box<dyn FnMut(&mut Context<'_>) + Send>;

/// Commands the server installs itself at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    /// `batch <filename>`: run commands from a batch file.
    Batch,
    /// `help`: show all available commands (stream/local only).
    Help,
    /// `quit`: end the session (stream/local only).
    Quit,
}

/// How a resolved command is executed.
pub(crate) enum Handler {
    /// Host-registered callback.
    User(CommandFn),
    /// Server-native command that may re-enter the dispatcher.
    Builtin(Builtin),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(_) => f.write_str("User(..)"),
            Self::Builtin(b) => write!(f, "Builtin({b:?})"),
        }
    }
}

/// A registered command descriptor.
///
/// Created only through registration; lives for the process lifetime.
#[derive(Debug)]
pub(crate) struct CommandEntry {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) usage: String,
    pub(crate) handler: Handler,
    pub(crate) min_args: usize,
    pub(crate) max_args: usize,
    /// When true the dispatcher renders usage on help requests and
    /// arg-count violations; when false the callback is invoked even for
    /// help so it can render its own.
    pub(crate) show_usage: bool,
}

impl CommandEntry {
    pub(crate) fn accepts_arg_count(&self, count: usize) -> bool {
        count >= self.min_args && count <= self.max_args
    }
}

/// Why a registration was rejected.
///
/// The registry is left untouched in every case; the server additionally
/// logs the rejection with a `PSHELL_ERROR:` prefix.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// The command name was empty.
    #[error("empty command name, command not added")]
    EmptyName,
    /// The one-line description was empty.
    #[error("empty description, command '{0}' not added")]
    EmptyDescription(String),
    /// The command takes arguments but no usage string was supplied.
    #[error("empty usage for command that takes arguments, command '{0}' not added")]
    MissingUsage(String),
    /// `min_args` exceeded `max_args`.
    #[error("min args {min} is greater than max args {max}, command '{name}' not added")]
    InvertedArgBounds {
        /// Rejected command name.
        name: String,
        /// Supplied minimum argument count.
        min: usize,
        /// Supplied maximum argument count.
        max: usize,
    },
    /// A command with the same name is already registered.
    #[error("command '{0}' already exists, command not added")]
    Duplicate(String),
}

/// Ordered command table with the cached name width used for column
/// alignment in listings.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Vec<CommandEntry>,
    max_name_len: usize,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Validate and insert a descriptor, appending by default or
    /// prepending for the built-ins.
    pub(crate) fn register(
        &mut self,
        entry: CommandEntry,
        prepend: bool,
    ) -> Result<(), RegisterError> {
        if entry.name.is_empty() {
            return Err(RegisterError::EmptyName);
        }
        if entry.description.is_empty() {
            return Err(RegisterError::EmptyDescription(entry.name));
        }
        if (entry.max_args > 0 || entry.min_args > 0) && entry.usage.is_empty() {
            return Err(RegisterError::MissingUsage(entry.name));
        }
        if entry.min_args > entry.max_args {
            return Err(RegisterError::InvertedArgBounds {
                name: entry.name,
                min: entry.min_args,
                max: entry.max_args,
            });
        }
        if self.entries.iter().any(|e| e.name == entry.name) {
            return Err(RegisterError::Duplicate(entry.name));
        }

        self.max_name_len = self.max_name_len.max(entry.name.len());
        if prepend {
            self.entries.insert(0, entry);
        } else {
            self.entries.push(entry);
        }
        Ok(())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CommandEntry> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut CommandEntry {
        &mut self.entries[index]
    }

    pub(crate) fn get(&self, index: usize) -> &CommandEntry {
        &self.entries[index]
    }

    /// Widest registered name, cached for listing alignment.
    pub(crate) fn max_name_len(&self) -> usize {
        self.max_name_len
    }

    /// Indices of every entry whose name starts with `token`.
    pub(crate) fn find_prefix(&self, token: &str) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.name.starts_with(token))
            .map(|(i, _)| i)
            .collect()
    }

    /// Index of the entry named exactly `name`.
    pub(crate) fn find_exact(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, min_args: usize, max_args: usize, usage: &str) -> CommandEntry {
        CommandEntry {
            name: name.to_owned(),
            description: format!("{name} description"),
            usage: usage.to_owned(),
            handler: Handler::User(Box::new(|_| {})),
            min_args,
            max_args,
            show_usage: true,
        }
    }

    #[test]
    fn rejects_empty_name() {
        let mut registry = Registry::new();
        let err = registry.register(entry("", 0, 0, ""), false).unwrap_err();
        assert_eq!(err, RegisterError::EmptyName);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn rejects_empty_description() {
        let mut registry = Registry::new();
        let mut bad = entry("status", 0, 0, "");
        bad.description.clear();
        let err = registry.register(bad, false).unwrap_err();
        assert_eq!(err, RegisterError::EmptyDescription("status".to_owned()));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn rejects_missing_usage_when_args_taken() {
        let mut registry = Registry::new();
        let err = registry.register(entry("echo", 1, 3, ""), false).unwrap_err();
        assert_eq!(err, RegisterError::MissingUsage("echo".to_owned()));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn rejects_inverted_arg_bounds() {
        let mut registry = Registry::new();
        let err = registry
            .register(entry("echo", 3, 1, "<text>"), false)
            .unwrap_err();
        assert_eq!(
            err,
            RegisterError::InvertedArgBounds {
                name: "echo".to_owned(),
                min: 3,
                max: 1,
            }
        );
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn rejects_duplicate_name_without_mutating_table() {
        let mut registry = Registry::new();
        registry.register(entry("status", 0, 0, ""), false).unwrap();
        let err = registry
            .register(entry("status", 0, 0, ""), false)
            .unwrap_err();
        assert_eq!(err, RegisterError::Duplicate("status".to_owned()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.max_name_len(), "status".len());
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut registry = Registry::new();
        registry.register(entry("status", 0, 0, ""), false).unwrap();
        registry.register(entry("echo", 1, 3, "<text>"), false).unwrap();
        registry.register(entry("reset", 0, 0, ""), false).unwrap();
        let names: Vec<&str> = registry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["status", "echo", "reset"]);
    }

    #[test]
    fn builtins_prepend_ahead_of_user_commands() {
        let mut registry = Registry::new();
        registry.register(entry("status", 0, 0, ""), false).unwrap();
        let batch = CommandEntry {
            name: "batch".to_owned(),
            description: "run commands from a batch file".to_owned(),
            usage: "<filename>".to_owned(),
            handler: Handler::Builtin(Builtin::Batch),
            min_args: 1,
            max_args: 2,
            show_usage: true,
        };
        registry.register(batch, true).unwrap();
        let names: Vec<&str> = registry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["batch", "status"]);
    }

    #[test]
    fn tracks_longest_name_for_alignment() {
        let mut registry = Registry::new();
        registry.register(entry("up", 0, 0, ""), false).unwrap();
        assert_eq!(registry.max_name_len(), 2);
        registry
            .register(entry("diagnostics", 0, 0, ""), false)
            .unwrap();
        assert_eq!(registry.max_name_len(), 11);
    }

    #[test]
    fn prefix_lookup_counts_abbreviation_matches() {
        let mut registry = Registry::new();
        registry.register(entry("foo", 0, 0, ""), false).unwrap();
        registry.register(entry("foobar", 0, 0, ""), false).unwrap();
        assert_eq!(registry.find_prefix("fo").len(), 2);
        assert_eq!(registry.find_prefix("foob").len(), 1);
        assert_eq!(registry.find_prefix("fox").len(), 0);
        assert_eq!(registry.find_exact("foo"), Some(0));
        assert_eq!(registry.find_exact("fo"), None);
    }
}
