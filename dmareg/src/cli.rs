//! dmaregctl - Buffer range registry CLI tool

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use nyx_dmareg::client::{RegistryClient, DEFAULT_SOCKET};
use nyx_dmareg::ipc::{IpcRequest, IpcResponse};
use nyx_dmareg::HandleId;

#[derive(Parser)]
#[command(name = "dmaregctl")]
#[command(about = "Nyx buffer range registry control")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Socket path
    #[arg(long, default_value = DEFAULT_SOCKET)]
    socket: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a buffer range
    Add {
        /// Buffer handle (fd)
        handle: u32,

        /// Base address
        #[arg(value_parser = parse_u64)]
        base: u64,

        /// Size in bytes
        #[arg(value_parser = parse_u64)]
        size: u64,
    },

    /// Drop one registration of the range containing an address
    RemoveAddr {
        #[arg(value_parser = parse_u64)]
        addr: u64,
    },

    /// Drop one registration of a handle
    RemoveFd {
        handle: u32,
    },

    /// Resolve an address range to its buffer
    Query {
        #[arg(value_parser = parse_u64)]
        addr: u64,

        #[arg(value_parser = parse_u64)]
        len: u64,
    },

    /// List ranges registered by this session's process
    List,

    /// Show registry status
    Status,

    /// Read commands from stdin over a single session
    Shell,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut client = RegistryClient::connect(&cli.socket).await?;

    let request = match cli.command {
        Commands::Shell => return run_shell(&mut client).await,
        command => to_request(command)?,
    };

    let response = client.request(&request).await?;
    print_response(&response);

    if matches!(response, IpcResponse::Error { .. }) {
        std::process::exit(1);
    }
    Ok(())
}

fn to_request(command: Commands) -> Result<IpcRequest> {
    Ok(match command {
        Commands::Add { handle, base, size } => IpcRequest::Add {
            handle: HandleId(handle),
            base,
            size,
        },
        Commands::RemoveAddr { addr } => IpcRequest::RemoveByAddr { addr },
        Commands::RemoveFd { handle } => IpcRequest::RemoveByFd {
            handle: HandleId(handle),
        },
        Commands::Query { addr, len } => IpcRequest::Query { addr, len },
        Commands::List => IpcRequest::List,
        Commands::Status => IpcRequest::Status,
        Commands::Shell => return Err(anyhow!("shell cannot be nested")),
    })
}

/// Run one command per stdin line, keeping registrations alive between them
async fn run_shell(client: &mut RegistryClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        let words = std::iter::once("dmaregctl").chain(line.split_whitespace());
        let command = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match to_request(command) {
            Ok(request) => print_response(&client.request(&request).await?),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

/// One shell line, parsed with the same subcommands
#[derive(Parser)]
struct ShellLine {
    #[command(subcommand)]
    command: Commands,
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn print_response(response: &IpcResponse) {
    match response {
        IpcResponse::Success { message } => {
            println!("{}", message);
        }

        IpcResponse::Range { base, size, handle } => {
            println!("{:<8} {:<18} {:<18}", "FD", "BASE", "SIZE");
            println!("{:<8} {:<#18x} {:<#18x}", handle.0, base, size);
        }

        IpcResponse::Ranges { ranges } => {
            if ranges.is_empty() {
                println!("No registered ranges");
            } else {
                println!("{:<8} {:<18} {:<18} {:<6}", "FD", "BASE", "SIZE", "REFS");
                for r in ranges {
                    println!(
                        "{:<8} {:<#18x} {:<#18x} {:<6}",
                        r.handle.0, r.base, r.size, r.refcount
                    );
                }
            }
        }

        IpcResponse::Status { version, contexts, ranges, context_refs } => {
            println!("Registry Status:");
            println!("  Version:        {}", version);
            println!("  Address spaces: {}", contexts);
            println!("  Open sessions:  {}", context_refs);
            println!("  Ranges:         {}", ranges);
        }

        IpcResponse::Error { message, errno, range, .. } => {
            eprintln!("Error: {} (errno {})", message, errno);
            if let Some(r) = range {
                eprintln!("  Conflicting range: {}", r);
            }
        }
    }
}
