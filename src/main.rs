//! voxlink host/client binary
//!
//! Usage:
//!   cargo run --release -- host [OPTIONS]
//!   cargo run --release -- connect <ADDR> [OPTIONS]
//!
//! Options:
//!   --config <PATH>   World config JSON (default: built-in defaults)
//!   --world <NAME>    World name (default: from config)
//!   --root <DIR>      Save root containing Worlds/ (default: from config)
//!   --seed <SEED>     Seed for a new world (default: from config)
//!   --port <PORT>     Host listen port (default: 7777)
//!   --radius <N>      Render radius in chunks (default: from config)
//!   --size <TIER>     World size: small, medium or large (default: from config)
//!   --player <ID>     Player id; on a host this attaches a local player
//!   --ticks <N>       Stop after N ticks, 0 runs forever (default: 0)
//!   --rate <TPS>      Ticks per second (default: 20)

use std::path::PathBuf;

use voxlink::core::error::Error;
use voxlink::core::time::TickTimer;
use voxlink::core::types::Result;
use voxlink::session::{ClientSession, HostSession};
use voxlink::streaming::WorldSizeTier;
use voxlink::world::{NullSink, WorldConfig};

/// Ticks between status lines
const STATUS_INTERVAL: u64 = 100;

fn main() {
    voxlink::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        Some("host") => run_host(&args),
        Some("connect") => match args.get(2) {
            Some(addr) => run_client(addr, &args),
            None => Err(Error::Config("connect needs an address".into())),
        },
        _ => {
            eprintln!("Usage: voxlink host [OPTIONS] | voxlink connect <ADDR> [OPTIONS]");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

/// Defaults, then the config file, then command-line overrides
fn build_config(args: &[String]) -> Result<WorldConfig> {
    let mut config = match parse_str_arg(args, "--config") {
        Some(path) => WorldConfig::load(&PathBuf::from(path))?,
        None => WorldConfig::default(),
    };

    if let Some(name) = parse_str_arg(args, "--world") {
        config.world_name = name;
    }
    if let Some(root) = parse_str_arg(args, "--root") {
        config.save_root = PathBuf::from(root);
    }
    if let Some(seed) = parse_u32_arg(args, "--seed") {
        config.seed = seed;
    }
    if let Some(radius) = parse_i32_arg(args, "--radius") {
        config.streaming.render_radius = radius;
    }
    if let Some(size) = parse_str_arg(args, "--size") {
        config.streaming.world_size = WorldSizeTier::from_name(&size)
            .ok_or_else(|| Error::Config(format!("Unknown world size '{}'", size)))?;
    }

    config.validate();
    config.check()?;
    Ok(config)
}

fn run_host(args: &[String]) -> Result<()> {
    let config = build_config(args)?;
    let port = parse_u16_arg(args, "--port").unwrap_or(voxlink_net::DEFAULT_PORT);
    let max_ticks = parse_u64_arg(args, "--ticks").unwrap_or(0);
    let rate = parse_u32_arg(args, "--rate").unwrap_or(20);

    let runtime = tokio::runtime::Runtime::new()?;
    let mut host = HostSession::open(config)?;
    host.listen(("0.0.0.0", port), runtime.handle())?;

    if let Some(player_id) = parse_str_arg(args, "--player") {
        host.attach_local_player(&player_id, Box::new(NullSink::new()))?;
    }

    let mut timer = TickTimer::new(rate);
    loop {
        timer.tick();
        host.tick(timer.delta_secs());

        if timer.tick_count() % STATUS_INTERVAL == 0 {
            let world = host.world();
            log::info!(
                "tick {} | {:.1} tps | {} observers | {} resident | {} building",
                timer.tick_count(),
                timer.rate_stats().avg,
                host.endpoint().observer_count(),
                world.resident_count(),
                world.pipeline().in_flight()
            );
        }

        if max_ticks > 0 && timer.tick_count() >= max_ticks {
            break;
        }
        timer.sleep_remaining();
    }

    host.shutdown()
}

fn run_client(addr: &str, args: &[String]) -> Result<()> {
    let config = build_config(args)?;
    let player_id = parse_str_arg(args, "--player").unwrap_or_else(|| "player".to_string());
    let max_ticks = parse_u64_arg(args, "--ticks").unwrap_or(0);
    let rate = parse_u32_arg(args, "--rate").unwrap_or(20);

    let runtime = tokio::runtime::Runtime::new()?;
    let mut client = ClientSession::connect(addr, runtime.handle(), config, &player_id, Box::new(NullSink::new()))?;

    let mut timer = TickTimer::new(rate);
    loop {
        timer.tick();
        client.tick(timer.delta_secs())?;

        if !client.is_connected() {
            log::warn!("Connection to {} lost", addr);
            break;
        }

        if timer.tick_count() % STATUS_INTERVAL == 0 {
            if let (Some(world), Some(position)) = (client.world(), client.endpoint().position()) {
                let readiness = world.readiness_around(position, world.config().streaming.render_radius);
                log::info!(
                    "tick {} | {:.1} tps | {}/{} chunks ready | {} resident",
                    timer.tick_count(),
                    timer.rate_stats().avg,
                    readiness.ready,
                    readiness.needed,
                    world.resident_count()
                );
            }
        }

        if max_ticks > 0 && timer.tick_count() >= max_ticks {
            break;
        }
        timer.sleep_remaining();
    }

    Ok(())
}

fn parse_i32_arg(args: &[String], flag: &str) -> Option<i32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u16_arg(args: &[String], flag: &str) -> Option<u16> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u64_arg(args: &[String], flag: &str) -> Option<u64> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
