//! redirect-helper: token-gated short-name (`/go/<name>`) and whole-domain
//! HTTP redirects backed by a single JSON document.

mod api;
mod auth;
mod batch;
mod cli;
mod config;
mod error;
mod redirect;
mod server;
mod store;
mod target;

use clap::Parser;

use cli::Cli;
use config::{AppConfig, CliOverrides};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides::new(cli.store.clone(), cli.command.port_override());
    let config = AppConfig::load(&cli.config, &overrides)?;

    // Build the tokio runtime first; the gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        // OTLP export is optional and falls back to fmt-only
        let tracing_guard = redirect_tracing::init_tracing(&config.tracing);

        tracing::debug!(
            config_path = %cli.config,
            store = %config.store.path.display(),
            command = ?cli.command,
            otlp_export = tracing_guard.exporting(),
            "Configuration loaded"
        );

        cli::run(cli.command, config).await
    })
}
