use std::env;

use log::{error, info};
use simple_logger::SimpleLogger;

use txc_relay::{SimConfig, Simulation};

fn main() {
    SimpleLogger::new().init().unwrap();

    // optional node count, defaults to a six node ring
    let count = env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<usize>().ok())
        .unwrap_or(6);

    let mut config = SimConfig::ring(count);
    config.sim_time_limit = 1000.0;

    info!("starting ring of {} nodes", count);

    match Simulation::new(config).and_then(Simulation::run) {
        Ok(result) => result.print_summary(),
        Err(e) => {
            error!("simulation failed: {}", e);
            std::process::exit(1);
        }
    }
}
