mod backend;
mod config;
mod fallback;
mod output;
mod script_dir;
mod serve;
mod supervisor;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use config::ConciergeConfig;

/// Web front-end for the email-processing service: proxies configuration,
/// processor control and work orders to the backend, and supervises the
/// companion email parser script for local development.
#[derive(Parser, Debug)]
#[command(name = "concierge", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "concierge.toml")]
    config: PathBuf,

    /// Address to bind (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Email processor base URL (overrides config and PYTHON_SERVICE_URL)
    #[arg(long)]
    backend_url: Option<String>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut ConciergeConfig) {
        if let Some(bind) = &self.bind {
            config.serve.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.serve.port = port;
        }
        if let Some(url) = &self.backend_url {
            config.backend.base_url = url.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "concierge=debug"
    } else {
        "concierge=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match ConciergeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    config.apply_env(std::env::var(config::BACKEND_URL_ENV).ok());
    cli.apply_overrides(&mut config);

    if cli.dry_run {
        return match toml::to_string_pretty(&config) {
            Ok(rendered) => {
                print!("{rendered}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!("failed to render configuration: {e}");
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = serve::run(&config).await {
        tracing::error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_precedence() {
        let cli = Cli::parse_from([
            "concierge",
            "--port",
            "8088",
            "--bind",
            "0.0.0.0",
            "--backend-url",
            "http://backend:5000",
        ]);
        let mut config = ConciergeConfig::default();
        config.apply_env(Some("http://from-env:5000".to_string()));
        cli.apply_overrides(&mut config);

        assert_eq!(config.serve.port, 8088);
        assert_eq!(config.serve.bind, "0.0.0.0");
        assert_eq!(config.backend.base_url, "http://backend:5000");
    }

    #[test]
    fn cli_defaults_leave_config_alone() {
        let cli = Cli::parse_from(["concierge"]);
        assert_eq!(cli.config, PathBuf::from("concierge.toml"));
        let mut config = ConciergeConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.serve.port, 3000);
        assert_eq!(config.backend.base_url, "http://localhost:5000");
    }

    #[test]
    fn resolved_config_renders_as_toml() {
        let rendered = toml::to_string_pretty(&ConciergeConfig::default()).unwrap();
        assert!(rendered.contains("[backend]"));
        assert!(rendered.contains("timeout_ms = 3000"));
    }
}
