use clap::Parser;
use client::game::ClientGame;
use client::input::InputManager;
use client::network::{ClientConfig, ClientSession};
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address as host:port; play offline when omitted
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Number of ticks to run before exiting (0 runs until Ctrl+C)
    #[arg(short = 'n', long, default_value = "0")]
    ticks: u32,

    /// Simulation ticks per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Seed for the input script
    #[arg(long, default_value = "1")]
    seed: u64,
}

const MAX_DELTA_TIME: f32 = 1.0 / 20.0;

fn connect(server: Option<&str>) -> ClientSession {
    let Some(server) = server else {
        info!("No server given, playing offline");
        return ClientSession::offline();
    };

    let Some(config) = ClientConfig::parse(server) else {
        warn!("Invalid server address '{}', playing offline", server);
        return ClientSession::offline();
    };

    match ClientSession::connect(config) {
        Ok(session) => session,
        Err(e) => {
            warn!("{}, playing offline", e);
            ClientSession::offline()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let session = connect(args.server.as_deref());
    let running = shared::signal::running_until_ctrl_c();

    let tick_duration = Duration::from_secs_f32(1.0 / args.tick_rate.max(1) as f32);
    // Never cap below two tick periods.
    let max_delta = MAX_DELTA_TIME.max(2.0 * tick_duration.as_secs_f32());
    let mut game = ClientGame::new(session.is_online());
    let mut input = InputManager::new(args.seed);
    let mut last_tick = Instant::now();

    info!(
        "Client started at {}Hz ({})",
        args.tick_rate,
        if session.is_online() { "online" } else { "offline" }
    );

    while running.load(Ordering::Relaxed) && (args.ticks == 0 || game.tick < args.ticks) {
        let now = Instant::now();
        let dt = now.duration_since(last_tick).as_secs_f32().min(max_delta);
        last_tick = now;

        game.tick(&session, input.update(), dt);

        if game.tick % 60 == 0 {
            debug!(
                "Tick {}: avatar {:?}, {} entities",
                game.tick,
                game.avatar(),
                game.world.len()
            );
        }

        if let Some(remaining) = tick_duration.checked_sub(now.elapsed()) {
            thread::sleep(remaining);
        }
    }

    session.shutdown();
    info!("Client shut down");
    Ok(())
}
