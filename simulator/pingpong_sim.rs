//! Ping-Pong Simulation Example
//!
//! Two nodes bounce one message back and forth over a lossy pair of links.
//!
//! Run with: cargo run --bin pingpong_sim [seed]

use log::info;
use simple_logger::SimpleLogger;

use txc_relay::{SimConfig, Simulation};

fn main() {
    SimpleLogger::new().init().unwrap();

    println!("╔════════════════════════════════════════════════════════╗");
    println!("║        Ping-Pong Simulator                             ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    let mut config = SimConfig::ping_pong();
    config.seed = std::env::args().nth(1).and_then(|s| s.parse().ok());
    config.sim_time_limit = 1000.0;
    config.output.log_events = true;

    info!("Setting up ping-pong simulation...");

    let result = match Simulation::new(config).and_then(Simulation::run) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            std::process::exit(1);
        }
    };

    result.print_summary();
}
