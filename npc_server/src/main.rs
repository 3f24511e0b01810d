//! Development backend binary.
//!
//! Usage:
//!   cargo run -p npc_server --bin server -- [--addr 127.0.0.1:40100]
//!       [--config server.json] [--seed 7]
//!
//! Console commands:
//!   status  - Show NPC positions, targets and animations
//!   quit    - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use npc_server::server::{BackendServer, SharedWorld};
use npc_shared::config::ServerConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {path}"))?;
            ServerConfig::from_json_str(&text).with_context(|| format!("parse config {path}"))?
        }
        _ => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.listen_addr = args[i + 1].clone();
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                cfg.seed = args[i + 1].parse().unwrap_or(cfg.seed);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

async fn status(world: &SharedWorld) -> Vec<String> {
    let world = world.lock().await;
    let mut out = vec![format!(
        "NPCs: {}  updates served: {}",
        world.npcs().len(),
        world.updates_served()
    )];
    for npc in world.npcs() {
        let target = match npc.target {
            Some(t) => format!("({:.1}, {:.1}, {:.1})", t.x, t.y, t.z),
            None => "-".to_string(),
        };
        out.push(format!(
            "  {} pos=({:.1}, {:.1}, {:.1}) target={} anim={}",
            npc.id, npc.position.x, npc.position.y, npc.position.z, target, npc.animation
        ));
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.listen_addr, npcs = cfg.npcs.len(), seed = cfg.seed, "Starting NPC backend");

    let server = BackendServer::bind(cfg).await.context("bind server")?;
    let local = server.local_addr()?;
    let world = server.world();
    info!(%local, "Backend listening");

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Backend ready. Type 'status' for info, 'quit' to exit.");

    let serving = tokio::spawn(server.serve());

    let mut quit = false;
    while let Some(line) = console_rx.recv().await {
        match line.as_str() {
            "status" => {
                for out in status(&world).await {
                    println!("{out}");
                }
            }
            "quit" | "exit" => {
                quit = true;
                break;
            }
            other => println!("unknown command: {other}"),
        }
    }

    if !quit {
        // Console closed; keep serving until the process is killed.
        serving.await.context("server task")??;
    }

    info!("Backend shutting down");
    Ok(())
}
