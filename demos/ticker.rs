use service_forge::{load_config, ForgeService, ServiceConfig};
use std::env;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Options come from an optional TOML file, e.g. `ticker.toml`:
    //      uid = "65534"
    //      fork = true
    //      pidfile = "/run/ticker.pid"
    //      stdout = { file = "/var/log/ticker.log" }
    let config = match env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => ServiceConfig::default(),
    };

    // 2. Validate before touching the process.
    let service = ForgeService::with_config(config)
        .name("ticker")
        .build()?;

    // 3. Run
    service.start(|ctx| {
        // Anything privileged (binding port 80, opening keys) goes here.
        ctx.drop_privileges()?;
        ctx.ready().ignore("ready");

        let mut i = 0u64;
        while !ctx.should_stop() {
            ctx.update_status(&format!("tick #{}", i)).ignore("status");
            tracing::info!(tick = i, "ping");
            i += 1;
            thread::sleep(Duration::from_secs(3));
        }

        tracing::info!("stop signal received");
        Ok(())
    })?;

    Ok(())
}
