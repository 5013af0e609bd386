mod tld_cache;
mod tld_controllers;
mod tld_models;
mod tld_partitions;

use anyhow::Context;
use tld_controllers::TriMetData;
use tld_models::{arrival_delay_seconds, format_delay};

// Powell Blvd and the stop batch this collector has always tracked.
const ROUTE_ID: i64 = 9;
const STOP_IDS: [i64; 10] = [
    13791, 4539, 13778, 13825, 13772, 13773, 14244, 6545, 6578, 1375,
];

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ RUN FAILED");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\n{:#}", e);
        eprintln!("\n💡 Troubleshooting:");
        eprintln!("  • Check that .env contains TRIMET_APP_ID");
        eprintln!("  • Check your internet connection");
        eprintln!("\n{}", "═".repeat(70));
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let tmd = TriMetData::new(ROUTE_ID).context("Failed to initialize collector")?;
    let rows = tmd
        .fetch_arrival_data_by_stop(&STOP_IDS, None)
        .context("Failed to fetch arrival data")?;

    let route = tmd.route();
    println!(
        "\n✓ {} arrivals on route {} ({})",
        rows.len(),
        route.route,
        route.desc
    );
    println!("{}", "─".repeat(70));

    for row in &rows {
        println!(
            "  🚌 vehicle {:>6}  trip {:>9}  stop {:>6}  {}",
            row.vehicle_id, row.trip_id, row.locid, row.status
        );
        let delay = match arrival_delay_seconds(row) {
            Some(seconds) => format_delay(seconds),
            None => "no estimate".to_string(),
        };
        println!(
            "     scheduled {}  estimated {}  ({})",
            row.scheduled,
            row.estimated.as_deref().unwrap_or("n/a"),
            delay
        );
    }

    Ok(())
}
