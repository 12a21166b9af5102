//! List loaded kernel modules, like `lsmod`.
//!
//! ```bash
//! cargo run --example lsmod
//! KMOD_LOG=trace cargo run --example lsmod
//! ```

use kmod::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("KMOD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let ctx = match Context::new() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to create kmod context: {}", e);
            std::process::exit(1);
        }
    };

    let modules = match ctx.list() {
        Ok(modules) => modules,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    println!("{:<24} {:>10}  {:>4} Used by", "Module", "Size", "Used");
    for module in &modules {
        let holders: Vec<String> = module.holders().iter().map(Module::name).collect();
        println!(
            "{:<24} {:>10}  {:>4} {}",
            module.name(),
            module.size(),
            module.refcount().unwrap_or(0),
            holders.join(",")
        );
    }
}
