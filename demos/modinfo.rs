//! Show module metadata, like `modinfo`.
//!
//! ```bash
//! cargo run --example modinfo -- pcspkr
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

    let Some(name) = std::env::args().nth(1) else {
        eprintln!("usage: modinfo <module>");
        std::process::exit(2);
    };

    if let Err(e) = show(&name) {
        eprintln!("modinfo: {}", e);
        std::process::exit(1);
    }
}

fn show(name: &str) -> kmod::Result<()> {
    let ctx = Context::new()?;
    let module = ctx.module_from_name(name)?;

    if let Some(path) = module.path() {
        println!("{:<16}{}", "filename:", path.display());
    }
    if let Some(state) = module.state() {
        println!("{:<16}{}", "state:", state);
    }
    for (key, value) in module.info()?.iter() {
        println!("{:<16}{}", format!("{}:", key), value);
    }
    Ok(())
}
