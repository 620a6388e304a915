// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Demo host embedding a PSHELL server.
//!
//! Registers a handful of commands that exercise the callback output API,
//! then serves on the selected transport. The udp and unix variants are
//! driven by the thin datagram client, the tcp variant by any telnet
//! client, and the local variant directly from this terminal.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use pshell_server::{is_prefix_match, parse_option, Context, Server, ServerType, ANYHOST};

/// Clap-compatible transport selector.
#[derive(Copy, Clone, Debug, ValueEnum)]
enum TransportKind {
    Udp,
    Unix,
    Tcp,
    Local,
}

impl From<TransportKind> for ServerType {
    fn from(value: TransportKind) -> Self {
        match value {
            TransportKind::Udp => ServerType::Udp,
            TransportKind::Unix => ServerType::Unix,
            TransportKind::Tcp => ServerType::Tcp,
            TransportKind::Local => ServerType::Local,
        }
    }
}

/// PSHELL demo server command-line arguments.
#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "PSHELL demo server", long_about = None)]
struct Cli {
    /// Transport the demo server should speak.
    #[arg(long, value_enum, default_value_t = TransportKind::Local)]
    server_type: TransportKind,

    /// Logical server name; also selects pshell-server.conf overrides.
    #[arg(long, default_value = "pshellServerDemo")]
    name: String,

    /// Hostname, IP address, or one of anyhost/anybcast/localhost.
    #[arg(long, default_value = ANYHOST)]
    host: String,

    /// Port for the udp and tcp transports.
    #[arg(long, default_value_t = 9001)]
    port: u16,
}

fn hello(ctx: &mut Context<'_>) {
    ctx.print("hello command dispatched:\n");
    let args = ctx.args().to_vec();
    for (index, arg) in args.iter().enumerate() {
        ctx.print(format!("  argv[{index}]: '{arg}'\n"));
    }
}

fn keep_alive(ctx: &mut Context<'_>) {
    let style = ctx.args().first().cloned().unwrap_or_default();
    match style.as_str() {
        "wheel" => {
            for _ in 0..20 {
                ctx.wheel("keep alive: ");
                thread::sleep(Duration::from_millis(100));
            }
        }
        "march" => {
            for _ in 0..20 {
                ctx.march(".");
                thread::sleep(Duration::from_millis(100));
            }
        }
        _ => {
            ctx.show_usage();
            return;
        }
    }
    ctx.print("\n");
}

fn get_options(ctx: &mut Context<'_>) {
    let args = ctx.args().to_vec();
    for (index, arg) in args.iter().enumerate() {
        match parse_option(arg) {
            Some((key, value)) => ctx.print(format!(
                "  arg[{index}]: '{arg}', key: '{key}', value: '{value}'\n"
            )),
            None => ctx.print(format!("  arg[{index}]: '{arg}' not parsed\n")),
        }
    }
}

/// Registered with `show_usage = false` so it renders its own help.
fn enhanced_usage(ctx: &mut Context<'_>) {
    if ctx.is_help() {
        ctx.print("\nUsage: enhancedUsage <arg1>\n\n");
        ctx.print("  where <arg1> is some special argument\n\n");
        return;
    }
    let arg = ctx.args().first().cloned().unwrap_or_default();
    ctx.print(format!("enhancedUsage command dispatched with arg: '{arg}'\n"));
}

fn wildcard_match(ctx: &mut Context<'_>) {
    let needle = ctx.args().first().cloned().unwrap_or_default();
    for keyword in ["on", "off", "default", "all", "masters", "slaves"] {
        if is_prefix_match(&needle, keyword, 2) {
            ctx.print(format!("  matched keyword: '{keyword}'\n"));
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut server = Server::new(&cli.name, cli.server_type.into(), &cli.host, cli.port);
    server.register_command(
        hello,
        "hello",
        "hello command description",
        "[<arg1> ... <arg20>]",
        0,
        20,
        true,
    )?;
    server.register_command(
        keep_alive,
        "keepAlive",
        "demonstrate the keep-alive functions",
        "{wheel | march}",
        1,
        1,
        true,
    )?;
    server.register_command(
        get_options,
        "getOptions",
        "example of parsing command line options",
        "{<arg1> ... <arg20>}",
        1,
        20,
        true,
    )?;
    server.register_command(
        enhanced_usage,
        "enhancedUsage",
        "example of enhanced usage",
        "<arg1>",
        1,
        1,
        false,
    )?;
    server.register_command(
        wildcard_match,
        "wildcardMatch",
        "example of a wildcard keyword match",
        "<keyword>",
        1,
        1,
        true,
    )?;

    server.run()?;
    Ok(())
}
