//! # Purpose
//! Drive a civet engine interactively from a terminal.
//!
//! The demo opens one session for this process and exposes the byte
//! protocol as a menu: size the queue once, then enqueue items as a
//! value write followed by a priority write, and extract minima with
//! four-byte reads. Engine errors are printed per command; the loop
//! keeps running so rejected inputs can be corrected and retried.
use anyhow::{Context, Result};
use civet_common::ClientId;
use civet_engine::Engine;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

struct DemoConfig {
    client: ClientId,
}

impl DemoConfig {
    // The session identity defaults to this process's pid, the same
    // handle a kernel-side channel would key on.
    fn from_env() -> Result<Self> {
        let client = match std::env::var("CIVET_CLIENT_ID") {
            Ok(value) => value.parse().with_context(|| "parse CIVET_CLIENT_ID")?,
            Err(_) => ClientId::new(u64::from(std::process::id())),
        };
        Ok(Self { client })
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = DemoConfig::from_env()?;
    let engine = Engine::new();
    engine.open(config.client).context("open session")?;
    println!("[+] Session opened for client {}.", config.client);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let result = run_menu(&engine, config.client, &mut lines);

    engine.close(config.client);
    println!("[+] Session closed.");
    result
}

fn run_menu(
    engine: &Engine,
    client: ClientId,
    lines: &mut impl Iterator<Item = io::Result<String>>,
) -> Result<()> {
    loop {
        println!();
        println!("--------------------");
        println!("[1] Set queue capacity");
        println!("[2] Enqueue item value");
        println!("[3] Enqueue item priority");
        println!("[4] Show queue info");
        println!("[5] Extract minimum");
        println!("[6] Show open clients");
        println!("[7] Exit");
        let Some(choice) = prompt(lines, "Enter your choice [1..7]")? else {
            return Ok(());
        };

        match choice.trim() {
            "1" => {
                let Some(input) = prompt(lines, "Enter queue capacity [1..100]")? else {
                    return Ok(());
                };
                match input.trim().parse::<u8>() {
                    Ok(capacity) => match engine.write(client, &[capacity]) {
                        Ok(_) => println!("[+] Queue sized to {capacity}."),
                        Err(err) => println!("[-] {err}"),
                    },
                    Err(_) => println!("[-] Not a byte-sized integer."),
                }
            }
            "2" => {
                let Some(input) = prompt(lines, "Enter item value")? else {
                    return Ok(());
                };
                match input.trim().parse::<i32>() {
                    Ok(value) => match engine.write(client, &value.to_ne_bytes()) {
                        Ok(_) => println!("[+] Value {value} cached, awaiting priority."),
                        Err(err) => println!("[-] {err}"),
                    },
                    Err(_) => println!("[-] Not a 32-bit integer."),
                }
            }
            "3" => {
                let Some(input) = prompt(lines, "Enter item priority (> 0)")? else {
                    return Ok(());
                };
                match input.trim().parse::<i32>() {
                    Ok(priority) => match engine.write(client, &priority.to_ne_bytes()) {
                        Ok(_) => println!("[+] Item pushed at priority {priority}."),
                        Err(err) => println!("[-] {err}"),
                    },
                    Err(_) => println!("[-] Not a 32-bit integer."),
                }
            }
            "4" => match engine.queue_info(client) {
                Ok(info) => {
                    println!("[+] Queue holds {} of {} item(s).", info.count, info.capacity)
                }
                Err(err) => println!("[-] {err}"),
            },
            "5" => {
                let mut buf = [0u8; 4];
                match engine.read(client, &mut buf) {
                    Ok(_) => println!("[+] Minimum-priority value: {}", i32::from_ne_bytes(buf)),
                    Err(err) => println!("[-] {err}"),
                }
            }
            "6" => {
                let clients = engine.clients();
                println!("[+] Open clients: {clients:?}");
            }
            "7" => return Ok(()),
            other => println!("[-] Invalid choice: {other:?}"),
        }
    }
}

fn prompt(
    lines: &mut impl Iterator<Item = io::Result<String>>,
    label: &str,
) -> Result<Option<String>> {
    print!("[*] {label}: ");
    io::stdout().flush().context("flush stdout")?;
    match lines.next() {
        Some(line) => Ok(Some(line.context("read stdin")?)),
        None => Ok(None),
    }
}
