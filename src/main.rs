mod arg;

use clap::Parser;
use netutils::{generate_default_gateway, Error, SubnetAllocator};
use std::process::ExitCode;

// Stdout carries the allocated subnets, so every log record goes to stderr
fn setup_logger(level: log::LevelFilter) {
    let config = simplelog::ConfigBuilder::new()
        .set_time_format_rfc3339()
        .build();
    simplelog::TermLogger::init(
        level,
        config,
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )
    .expect("Failed to initialize logger");
}

/// Allocate the requested subnets and render the lines printed on stdout
fn run(args: &arg::SubnetAllocatorArgs) -> Result<Vec<String>, Error> {
    let sna = SubnetAllocator::from_parts(args.parent, args.host_bits, &args.exclude)?;
    for subnet in &args.reserve {
        sna.mark_allocated(subnet)?;
    }
    log::debug!(
        "{}: {} free /{} subnets",
        sna.parent(),
        sna.free_count(),
        sna.subnet_prefix_len()
    );
    let mut lines = Vec::with_capacity(args.count + 1);
    for _ in 0..args.count {
        let subnet = sna.get_network()?;
        match generate_default_gateway(&subnet) {
            Ok(gateway) => lines.push(format!("{subnet} gateway {gateway}")),
            Err(_) => lines.push(format!("{subnet} gateway -")),
        }
    }
    if args.state {
        match serde_json::to_string_pretty(&sna.snapshot()) {
            Ok(json) => lines.push(json),
            Err(e) => log::error!("Failed to serialize state: {e}"),
        }
    }
    Ok(lines)
}

fn main() -> ExitCode {
    let args = arg::SubnetAllocatorArgs::parse();
    setup_logger(if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
    match run(&args) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
