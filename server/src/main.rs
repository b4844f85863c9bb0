use clap::Parser;
use log::{debug, info, warn};
use server::game::ServerGame;
use server::network::{NetworkServer, ServerConfig};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of registered clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Simulation ticks per second
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Seconds of silence before a client is evicted (0 disables eviction)
    #[arg(long, default_value = "5")]
    client_timeout_secs: u64,
}

// Cap the simulated step so a stalled tick does not teleport entities.
const MAX_DELTA_TIME: f32 = 1.0 / 20.0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let bind_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let config = ServerConfig {
        bind_addr,
        max_clients: args.max_clients,
        client_timeout: (args.client_timeout_secs > 0)
            .then(|| Duration::from_secs(args.client_timeout_secs)),
        ..ServerConfig::default()
    };

    let server = NetworkServer::start(config)?;
    let running = shared::signal::running_until_ctrl_c();

    let tick_duration = Duration::from_secs_f32(1.0 / args.tick_rate.max(1) as f32);
    let mut game = ServerGame::new();
    let mut last_tick = Instant::now();

    info!("Server started at {}Hz", args.tick_rate);

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        let mut dt = now.duration_since(last_tick).as_secs_f32();
        last_tick = now;

        if dt > MAX_DELTA_TIME {
            warn!(
                "Large delta time detected ({:.3}s), capping to {:.3}s",
                dt, MAX_DELTA_TIME
            );
            dt = MAX_DELTA_TIME;
        }

        game.tick(server.incoming(), server.outgoing(), dt);

        if game.tick % 60 == 0 {
            debug!(
                "Tick {}: {} clients, {} entities",
                game.tick,
                server.connected_clients().len(),
                game.world.len()
            );
        }

        if let Some(remaining) = tick_duration.checked_sub(now.elapsed()) {
            thread::sleep(remaining);
        }
    }

    server.shutdown();
    info!("Server shut down");
    Ok(())
}
