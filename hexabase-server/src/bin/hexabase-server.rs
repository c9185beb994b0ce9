//! Binary entrypoint, mirroring `cloud-debugging-service`'s `server.rs`:
//! load-or-dump config, init tracing, build a Tokio runtime, and block on
//! the async body.

use hexabase_common::metrics::register_task_metrics;
use hexabase_common::tracing_setup::init_tracing;
use hexabase_server::config::make_config_loader;
use hexabase_server::{shutdown_signal, HexabaseServer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match make_config_loader().load_or_dump_config() {
        Some(config) => {
            let _tracing_guard = init_tracing(&config.tracing);

            let registry = prometheus::Registry::new();
            register_task_metrics(&registry);

            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(async move {
                let server = HexabaseServer::new(config, registry).await?;
                let shutdown = shutdown_signal();
                server.run(shutdown).await
            })?;

            Ok(())
        }
        None => Ok(()),
    }
}
