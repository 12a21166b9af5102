//! Insert or remove a module, like `modprobe` / `modprobe -r`.
//! Requires root privileges.
//!
//! ```bash
//! sudo cargo run --example modprobe -- pcspkr
//! sudo cargo run --example modprobe -- --dry-run pcspkr
//! sudo cargo run --example modprobe -- -r pcspkr
//! ```

use kmod::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("KMOD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut remove = false;
    let mut flags = ProbeFlags::NONE;
    let mut name = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-r" | "--remove" => remove = true,
            "-n" | "--dry-run" => flags = flags | ProbeFlags::DRY_RUN,
            _ => name = Some(arg),
        }
    }
    let Some(name) = name else {
        eprintln!("usage: modprobe [-r] [--dry-run] <module>");
        std::process::exit(2);
    };

    let result = Context::new().and_then(|ctx| {
        if remove {
            ctx.remove(&name)
        } else {
            ctx.insert_with(&name, flags)
        }
    });

    // Insert and remove stop at the first failing module without rolling back.
    if let Err(e) = result {
        eprintln!("modprobe: {}", e);
        std::process::exit(1);
    }
}
