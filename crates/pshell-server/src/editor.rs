// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Interactive line editor and tab-completion table for stream sessions.
// Author: Lukas Bower

//! Line editor for the stream transport.
//!
//! The editor consumes raw bytes from a telnet session and maintains the
//! current line, cursor position, tab-press counter, and history ring. It
//! is a pure state machine over an output sink, so the terminal-drawing
//! byte sequences can be verified without a socket.
//!
//! Escape sequences are tracked across reads with a four-state machine:
//! ground, after ESC, after `ESC [` (CSI), and after `ESC O` (SS3).
//! Completion is "fast tab": a single TAB press always lists every
//! candidate for a multiple match instead of bell-then-list.

use std::io::{self, Write};

use crate::context::to_crlf;

const TAB: u8 = 0x09;
const CR: u8 = 0x0D;
const ESC: u8 = 0x1B;
const CTRL_A: u8 = 0x01;
const CTRL_E: u8 = 0x05;
const CTRL_K: u8 = 0x0B;
const CTRL_U: u8 = 0x15;
const DEL: u8 = 0x7F;
const BS: u8 = 0x08;

/// Terminal width assumed when laying out completion columns.
const TERM_WIDTH: usize = 80;
/// Gap added to the widest keyword to form a completion column.
const COLUMN_GAP: usize = 5;

/// Deduplicated completion keywords with cached column geometry.
#[derive(Debug, Default)]
pub(crate) struct CompletionTable {
    keywords: Vec<String>,
    max_keyword_len: usize,
    column_width: usize,
    per_line: usize,
}

impl CompletionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a keyword, ignoring duplicates, and widen the column layout
    /// when it is the longest seen so far.
    pub(crate) fn add(&mut self, keyword: &str) {
        if self.keywords.iter().any(|k| k == keyword) {
            return;
        }
        if keyword.len() > self.max_keyword_len {
            self.max_keyword_len = keyword.len();
            self.column_width = keyword.len() + COLUMN_GAP;
            self.per_line = TERM_WIDTH / self.column_width;
        }
        self.keywords.push(keyword.to_owned());
    }

    /// Every keyword, in registration order.
    pub(crate) fn all(&self) -> Vec<&str> {
        self.keywords.iter().map(String::as_str).collect()
    }

    /// Keywords starting with `prefix`.
    pub(crate) fn matches(&self, prefix: &str) -> Vec<&str> {
        self.keywords
            .iter()
            .map(String::as_str)
            .filter(|keyword| keyword.starts_with(prefix))
            .collect()
    }

    /// Print `matches` in columns, then redraw the prompt line.
    pub(crate) fn show_matches<W: Write>(
        &self,
        matches: &[&str],
        prompt: &str,
        out: &mut W,
    ) -> io::Result<()> {
        if matches.is_empty() {
            return Ok(());
        }
        put(out, "\n")?;
        let mut on_line = 0;
        for (printed, keyword) in matches.iter().enumerate() {
            put(out, &format!("{keyword:<width$}", width = self.column_width))?;
            on_line += 1;
            if on_line == self.per_line && printed + 1 < matches.len() {
                put(out, "\n")?;
                on_line = 0;
            }
        }
        put(out, &format!("\n{prompt}"))
    }
}

/// Extend `current` with the longest prefix shared by every match.
fn longest_match(matches: &[&str], current: &str) -> String {
    let mut extended = current.to_owned();
    let first = matches[0].as_bytes();
    let mut pos = current.len();
    while pos < first.len() {
        let next = first[pos];
        if matches
            .iter()
            .any(|keyword| pos >= keyword.len() || keyword.as_bytes()[pos] != next)
        {
            return extended;
        }
        extended.push(next as char);
        pos += 1;
    }
    extended
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    Ground,
    Escape,
    Csi,
    Ss3,
}

/// Per-session line editor state.
#[derive(Debug)]
pub(crate) struct LineEditor {
    line: String,
    cursor: usize,
    tab_count: u32,
    history: Vec<String>,
    history_pos: usize,
    esc: EscapeState,
}

impl LineEditor {
    pub(crate) fn new() -> Self {
        Self {
            line: String::new(),
            cursor: 0,
            tab_count: 0,
            history: Vec::new(),
            history_pos: 0,
            esc: EscapeState::Ground,
        }
    }

    /// The line as typed so far.
    pub(crate) fn line(&self) -> &str {
        &self.line
    }

    /// Process one chunk of session input.
    ///
    /// Returns the completed command line when the chunk ended it with a
    /// carriage return; the editor is then reset for the next prompt.
    pub(crate) fn feed<W: Write>(
        &mut self,
        chunk: &[u8],
        completions: &CompletionTable,
        prompt: &str,
        out: &mut W,
    ) -> io::Result<Option<String>> {
        let Some(&first) = chunk.first() else {
            return Ok(None);
        };
        if first == CR {
            put(out, "\n")?;
            self.tab_count = 0;
            self.esc = EscapeState::Ground;
            if self.line.is_empty() {
                return Ok(None);
            }
            if self.history.last() != Some(&self.line) {
                self.history.push(self.line.clone());
                self.history_pos = self.history.len();
            }
            self.cursor = 0;
            return Ok(Some(std::mem::take(&mut self.line)));
        }
        if chunk.len() == 1 && (0x20..DEL).contains(&first) && self.esc == EscapeState::Ground {
            self.insert(first as char, out)?;
            self.tab_count = 0;
            return Ok(None);
        }
        for &byte in chunk {
            if byte != TAB {
                self.tab_count = 0;
            }
            match self.esc {
                EscapeState::Escape => {
                    self.esc = match byte {
                        b'[' => EscapeState::Csi,
                        b'O' => EscapeState::Ss3,
                        _ => EscapeState::Ground,
                    };
                }
                EscapeState::Csi => self.csi_byte(byte, out)?,
                EscapeState::Ss3 => self.ss3_byte(byte, out)?,
                EscapeState::Ground => self.ground_byte(byte, completions, prompt, out)?,
            }
        }
        Ok(None)
    }

    fn insert<W: Write>(&mut self, ch: char, out: &mut W) -> io::Result<()> {
        self.line.insert(self.cursor, ch);
        let tail = self.line[self.cursor..].to_owned();
        put(out, &tail)?;
        repeat(out, BS, tail.len() - 1)?;
        self.cursor += 1;
        Ok(())
    }

    fn csi_byte<W: Write>(&mut self, byte: u8, out: &mut W) -> io::Result<()> {
        match byte {
            b'A' => {
                // up arrow, recall the previous history entry
                if self.history_pos > 0 {
                    self.history_pos -= 1;
                    self.clear_line(out)?;
                    let entry = self.history[self.history_pos].clone();
                    self.show(&entry, out)?;
                }
                self.esc = EscapeState::Ground;
            }
            b'B' => {
                // down arrow, recall the next entry or clear at the bottom
                if self.history_pos + 1 < self.history.len() {
                    self.history_pos += 1;
                    self.clear_line(out)?;
                    let entry = self.history[self.history_pos].clone();
                    self.show(&entry, out)?;
                } else {
                    self.history_pos = self.history.len();
                    self.kill_line(out)?;
                }
                self.esc = EscapeState::Ground;
            }
            b'C' => {
                if self.cursor < self.line.len() {
                    let tail = self.line[self.cursor..].to_owned();
                    put(out, &tail)?;
                    repeat(out, BS, tail.len() - 1)?;
                    self.cursor += 1;
                }
                self.esc = EscapeState::Ground;
            }
            b'D' => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    repeat(out, BS, 1)?;
                }
                self.esc = EscapeState::Ground;
            }
            b'1' => self.begin_of_line(out)?,
            b'4' => self.end_of_line(out)?,
            b'~' => {
                // delete under cursor; reached via ESC [ 3 ~ where the
                // parameter byte falls through the arms above
                if self.cursor < self.line.len() {
                    let shifted = self.line[self.cursor + 1..].to_owned();
                    put(out, &shifted)?;
                    put(out, " ")?;
                    repeat(out, BS, self.line.len() - self.cursor)?;
                    self.line.remove(self.cursor);
                }
                self.esc = EscapeState::Ground;
            }
            _ => {}
        }
        Ok(())
    }

    fn ss3_byte<W: Write>(&mut self, byte: u8, out: &mut W) -> io::Result<()> {
        match byte {
            b'H' => self.begin_of_line(out)?,
            b'F' => self.end_of_line(out)?,
            _ => {}
        }
        self.esc = EscapeState::Ground;
        Ok(())
    }

    fn ground_byte<W: Write>(
        &mut self,
        byte: u8,
        completions: &CompletionTable,
        prompt: &str,
        out: &mut W,
    ) -> io::Result<()> {
        match byte {
            ESC => self.esc = EscapeState::Escape,
            CTRL_K => {
                let tail_len = self.line.len() - self.cursor;
                repeat(out, b' ', tail_len)?;
                repeat(out, BS, tail_len)?;
                self.line.truncate(self.cursor);
            }
            CTRL_U => self.kill_line(out)?,
            CTRL_A => self.begin_of_line(out)?,
            CTRL_E => self.end_of_line(out)?,
            TAB => {
                // completion only operates on the first keyword
                if self.line.is_empty() || self.line.split_whitespace().count() == 1 {
                    self.tab_count += 1;
                    if self.tab_count == 1 {
                        self.fast_tab(completions, prompt, out)?;
                    }
                }
            }
            DEL => {
                if !self.line.is_empty() && self.cursor > 0 {
                    repeat(out, BS, 1)?;
                    let tail = self.line[self.cursor..].to_owned();
                    put(out, &tail)?;
                    put(out, " ")?;
                    repeat(out, BS, tail.len() + 1)?;
                    self.line.remove(self.cursor - 1);
                    self.cursor -= 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Single-press completion: one match replaces the line, several
    /// matches fill out the longest common prefix and list candidates.
    fn fast_tab<W: Write>(
        &mut self,
        completions: &CompletionTable,
        prompt: &str,
        out: &mut W,
    ) -> io::Result<()> {
        if self.line.is_empty() {
            return completions.show_matches(&completions.all(), prompt, out);
        }
        let matches = completions.matches(&self.line);
        if matches.len() == 1 {
            let completed = format!("{} ", matches[0]);
            self.clear_line(out)?;
            self.show(&completed, out)?;
        } else if matches.len() > 1 {
            let extended = longest_match(&matches, &self.line);
            self.clear_line(out)?;
            self.show(&extended, out)?;
            completions.show_matches(&matches, &format!("{prompt}{}", self.line), out)?;
        }
        Ok(())
    }

    fn clear_line<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        repeat(out, BS, self.cursor)?;
        repeat(out, b' ', self.cursor)?;
        repeat(out, BS, self.line.len())
    }

    fn show<W: Write>(&mut self, text: &str, out: &mut W) -> io::Result<()> {
        put(out, text)?;
        self.line = text.to_owned();
        self.cursor = text.len();
        Ok(())
    }

    fn kill_line<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.clear_line(out)?;
        self.line.clear();
        self.cursor = 0;
        Ok(())
    }

    fn begin_of_line<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.cursor > 0 {
            repeat(out, BS, self.line.len())?;
            self.cursor = 0;
        }
        Ok(())
    }

    fn end_of_line<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.cursor < self.line.len() {
            let tail = self.line[self.cursor..].to_owned();
            put(out, &tail)?;
            self.cursor = self.line.len();
        }
        Ok(())
    }
}

/// Write editor output with telnet line endings.
fn put<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    out.write_all(to_crlf(text).as_bytes())
}

fn repeat<W: Write>(out: &mut W, byte: u8, count: usize) -> io::Result<()> {
    out.write_all(&vec![byte; count])
}
