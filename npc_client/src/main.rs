//! Headless NPC sync client.
//!
//! Usage:
//!   cargo run -p npc_client --bin client -- [--url http://localhost:8000]
//!       [--addr 127.0.0.1:40100] [--config client.json] [--update-ms 100]
//!
//! `--addr` switches to the framed TCP backend. Without a render engine the
//! client walks each NPC toward its latest goal itself and reports the
//! resulting positions on the next sync.
//!
//! Console commands:
//!   status                  - Show sync counters and NPC positions
//!   interact <id> <action>  - Send a player interaction
//!   quit                    - Exit client

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use npc_client::{
    bootstrap::LogProgress, controller::HeadlessHost, NpcSession, SharedRegistry, SyncLoop,
};
use npc_shared::{
    config::{ClientConfig, TransportKind},
    protocol::ActorId,
};
use serde_json::Value;
use tokio::{sync::mpsc, time::Instant};
use tracing::{info, warn};

/// Walking speed used for headless movement, in units per second.
const WALK_SPEED: f32 = 3.5;

fn parse_args() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {path}"))?;
            ClientConfig::from_json_str(&text).with_context(|| format!("parse config {path}"))?
        }
        _ => ClientConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--url" if i + 1 < args.len() => {
                cfg.api_url = args[i + 1].clone();
                cfg.transport = TransportKind::Http;
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                cfg.backend_addr = args[i + 1].clone();
                cfg.transport = TransportKind::Framed;
                i += 2;
            }
            "--update-ms" if i + 1 < args.len() => {
                cfg.update_interval_ms = args[i + 1]
                    .parse()
                    .with_context(|| format!("bad --update-ms {:?}", args[i + 1]))?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// Moves every NPC toward its goal by one frame's worth of walking.
async fn walk_npcs(registry: &SharedRegistry, dt: f32) {
    let mut reg = registry.lock().await;
    let moves: Vec<_> = reg
        .iter()
        .filter_map(|c| {
            let goal = c.goal()?;
            let next = c.position().move_towards(goal, WALK_SPEED * dt);
            (next != c.position()).then(|| (c.id().clone(), next))
        })
        .collect();
    for (id, position) in moves {
        reg.report_position(&id, position);
    }
}

async fn exec_console(session: &NpcSession, sync: &SyncLoop, line: &str) -> Vec<String> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("status") => {
            let stats = sync.stats();
            let mut out = vec![format!(
                "sync: started={} ok={} failed={} applied={} unknown={} in_flight={}",
                stats.started,
                stats.succeeded,
                stats.failed,
                stats.updates_applied,
                stats.unknown_ignored,
                sync.is_in_flight()
            )];
            let registry = session.registry();
            let reg = registry.lock().await;
            for c in reg.iter() {
                out.push(format!(
                    "  {} pos=({:.1}, {:.1}, {:.1}) anim={}",
                    c.id(),
                    c.position().x,
                    c.position().y,
                    c.position().z,
                    c.animation().unwrap_or("-")
                ));
            }
            out
        }
        Some("interact") => {
            let (Some(id), Some(action)) = (parts.next(), parts.next()) else {
                return vec!["usage: interact <id> <action>".to_string()];
            };
            match session
                .interact(&ActorId::from(id), action, Value::Null)
                .await
            {
                Ok(data) => vec![format!("{id}: {data}")],
                Err(e) => vec![format!("Error: {e}")],
            }
        }
        Some(other) => vec![format!("unknown command: {other}")],
        None => Vec::new(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(transport = ?cfg.transport, update_ms = cfg.update_interval_ms, "Starting NPC client");

    let mut session = NpcSession::connect(cfg.clone()).await.context("connect")?;
    let ready = session
        .bootstrap(&mut HeadlessHost, &mut LogProgress)
        .await
        .context("bootstrap")?;
    let mut sync = session.start_sync(ready);

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

    println!("NPC client ready. Type 'status' for info, 'quit' to exit.");

    let frame = cfg.frame_interval();
    let registry = session.registry();
    let mut last = Instant::now();

    'frames: loop {
        while let Ok(line) = console_rx.try_recv() {
            if line == "quit" {
                break 'frames;
            }
            for out in exec_console(&session, &sync, &line).await {
                println!("{out}");
            }
        }

        let now = Instant::now();
        sync.tick(now).await;
        walk_npcs(&registry, now.duration_since(last).as_secs_f32()).await;
        last = now;

        tokio::time::sleep(frame).await;
    }

    sync.shutdown().await;
    sync.wait_in_flight().await;
    let stats = sync.stats();
    if stats.failed > 0 {
        warn!(failed = stats.failed, "Some sync cycles failed during the session");
    }
    info!(started = stats.started, succeeded = stats.succeeded, "NPC client stopped");
    Ok(())
}
