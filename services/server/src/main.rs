// chat-server: owns the authoritative chat model, serves the binary wire
// protocol, and pumps the federation relay.
//
// Startup: load config, replay the transaction log into a fresh model, then
// run everything on one cooperative worker (current-thread runtime + a
// LocalSet) so the model never needs a lock.

use server::config::{self, ServerConfig};
use server::dispatcher::handle_connection;
use server::relay::{RelayPump, RemoteRelay, start_outbound};
use server::timeline::Timeline;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};

fn main() {
    // Initialize tracing subscriber for structured logging to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "chat server starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_owned());
    let cfg = match config::load_config_from(Path::new(&config_path)) {
        Ok(cfg) => {
            info!(
                server_id = cfg.server.id,
                bind = %cfg.server.bind,
                relay = cfg.relay.is_some(),
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&cfg.server.data_dir) {
        eprintln!(
            "FATAL: failed to create data dir {}: {}",
            cfg.server.data_dir.display(),
            e
        );
        std::process::exit(1);
    }
    let log_path = cfg.server.data_dir.join("transaction_log.txt");

    // Recover the model from the transaction log, then open the writer for
    // live appends.  The replay entrypoints never journal, so opening the
    // writer first is safe.
    let writer = match chat_core::JournalWriter::open(&log_path) {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("FATAL: failed to open {}: {}", log_path.display(), e);
            std::process::exit(1);
        }
    };
    let mut controller = chat_core::Controller::new(cfg.server.id, writer);
    match chat_core::replay_file(&log_path, &mut controller) {
        Ok(stats) => info!(
            applied = stats.applied,
            skipped = stats.skipped,
            "transaction log replayed"
        ),
        Err(e) => {
            eprintln!("FATAL: failed to read {}: {}", log_path.display(), e);
            std::process::exit(1);
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("FATAL: failed to build runtime: {}", e);
            std::process::exit(1);
        }
    };
    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(run(cfg, controller)));
}

async fn run(cfg: ServerConfig, controller: chat_core::Controller) {
    let server_uuid = chat_protocol::Uuid::new(controller.generator(), 0);
    let controller = Rc::new(RefCell::new(controller));
    let (timeline, worker) = Timeline::new();

    let listener = match tokio::net::TcpListener::bind(&cfg.server.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: failed to bind {}: {}", cfg.server.bind, e);
            std::process::exit(1);
        }
    };
    info!(bind = %cfg.server.bind, "listening");

    let outbound = cfg.relay.as_ref().map(|relay_cfg| {
        let relay = Rc::new(RemoteRelay::new(relay_cfg.addr.clone()));
        let pump = Rc::new(RelayPump::new(
            Rc::clone(&controller),
            Rc::clone(&relay),
            server_uuid,
            relay_cfg.secret.clone(),
            Duration::from_millis(relay_cfg.poll_ms),
            relay_cfg.batch_limit,
        ));
        pump.start(&timeline);
        start_outbound(relay, server_uuid, relay_cfg.secret.clone())
    });

    let accept_timeline = timeline.clone();
    let hub = Rc::clone(&controller);
    tokio::task::spawn_local(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    accept_timeline.schedule_now(handle_connection(
                        Rc::clone(&hub),
                        outbound.clone(),
                        stream,
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    });

    drop(timeline);
    worker.run().await;
}
