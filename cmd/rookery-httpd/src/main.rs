//! # rookery-httpd
//!
//! Fixed-response HTTP/1.1 server on the rookery reactor: one canned
//! `200 OK` per request header block, connections kept open.
//!
//! ## Usage
//!
//!     cargo run -p rookery-httpd --release -- [--port 8080] [--data-workers 20]
//!
//! Every flag falls back to its `ROOK_*` environment variable, then to the
//! library default. `ROOK_LOG` sets the log filter (default `info`).
//!
//! ## Benchmark
//!
//!     wrk -t4 -c100 -d10s http://127.0.0.1:8080/

use rookery_core::{AcceptPolicy, ServerConfig, StatsSnapshot};
use rookery_runtime::{CannedHttp, Server};

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rookery-httpd")]
#[command(version, about = "Canned-response HTTP server on the rookery reactor", long_about = None)]
struct Cli {
    /// Listen address (overrides ROOK_LISTEN_ADDR's ip)
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Listen port (overrides ROOK_LISTEN_ADDR's port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen backlog
    #[arg(long)]
    backlog: Option<u32>,

    /// Reactor cores, 0 = one per CPU
    #[arg(short, long)]
    cores: Option<usize>,

    /// Acceptor threads per reactor core
    #[arg(long)]
    acceptors_per_core: Option<usize>,

    /// Data worker pool size
    #[arg(short = 'w', long)]
    data_workers: Option<usize>,

    /// Events handled per readiness wait
    #[arg(long)]
    events_per_wait: Option<usize>,

    /// Bytes read per drain round
    #[arg(long)]
    round_bytes: Option<usize>,

    /// Disable Nagle on accepted sockets
    #[arg(long)]
    nodelay: bool,

    /// `round-robin` or `pinned`
    #[arg(long)]
    accept_policy: Option<AcceptPolicy>,

    /// Leave reactor workers unpinned
    #[arg(long)]
    no_pin: bool,

    /// Close connections sending this many header bytes without a terminator
    #[arg(long, default_value_t = rookery_runtime::handler::DEFAULT_MAX_HEADER_BYTES)]
    max_header_bytes: usize,

    /// File holding the full canned response (status line, headers, body)
    #[arg(long)]
    response_file: Option<PathBuf>,

    /// Seconds between stats lines, 0 disables
    #[arg(long, default_value_t = 10)]
    stats_secs: u64,

    /// Log filter
    #[arg(long, env = "ROOK_LOG", default_value = "info")]
    log: String,
}

impl Cli {
    /// Layer flags over the env-derived config
    fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        let mut addr = config.listen_addr;
        if let Some(ip) = self.bind {
            addr.set_ip(ip);
        }
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        config = config.listen_addr(addr);

        if let Some(n) = self.backlog {
            config = config.listen_backlog(n);
        }
        if let Some(n) = self.cores {
            config = config.reactor_cores(n);
        }
        if let Some(n) = self.acceptors_per_core {
            config = config.acceptors_per_core(n);
        }
        if let Some(n) = self.data_workers {
            config = config.data_workers(n);
        }
        if let Some(n) = self.events_per_wait {
            config = config.events_per_wait(n);
        }
        if let Some(n) = self.round_bytes {
            config = config.round_bytes(n);
        }
        if self.nodelay {
            config = config.tcp_nodelay(true);
        }
        if let Some(policy) = self.accept_policy {
            config = config.accept_policy(policy);
        }
        if self.no_pin {
            config = config.pin_reactors(false);
        }
        config
    }
}

// ── Stats printer ──

fn stats_loop(server: Arc<rookery_runtime::ServerContext>, every: Duration) {
    let start = Instant::now();
    let mut last = StatsSnapshot::default();

    loop {
        std::thread::sleep(every);
        if server.is_shutting_down() {
            break;
        }
        let snap = server.snapshot();
        let calls = snap.handler_calls - last.handler_calls;
        info!(
            uptime = format_args!("{:.1}s", start.elapsed().as_secs_f64()),
            open = snap.open(),
            accepted = snap.accepted,
            closed = snap.closed,
            admit_failures = snap.admit_failures,
            calls_per_sec = format_args!("{:.0}", calls as f64 / every.as_secs_f64()),
            bytes_read = snap.bytes_read,
            handler_panics = snap.handler_panics,
            queue_high_water = snap.queue_high_water,
            registered = ?snap.registered,
            fatal_worker_exits = snap.fatal_worker_exits,
            "stats"
        );
        last = snap;
    }
}

// ── Main ──

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let config = cli.apply(ServerConfig::from_env());
    let handler = match &cli.response_file {
        None => CannedHttp::new(),
        Some(path) => match std::fs::read(path) {
            Ok(bytes) => CannedHttp::with_response(bytes),
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot read response file");
                eprintln!("rookery-httpd: {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
    };
    let handler = handler.max_header_bytes(cli.max_header_bytes);

    let server = match Server::start(config, handler) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "startup failed");
            eprintln!("rookery-httpd: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("listening on http://{}/", server.local_addr());

    if cli.stats_secs > 0 {
        let ctx = Arc::clone(server.context());
        let every = Duration::from_secs(cli.stats_secs);
        if let Err(e) = std::thread::Builder::new()
            .name("rook-stats".into())
            .spawn(move || stats_loop(ctx, every))
        {
            error!(error = %e, "stats thread not started");
        }
    }

    // Runs until SIGINT
    server.wait();
    ExitCode::SUCCESS
}

/// Immediate exit, no draining
extern "C" fn handle_sigint(_sig: libc::c_int) {
    unsafe { libc::_exit(0) };
}
