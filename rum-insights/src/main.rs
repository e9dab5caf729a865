use clap::Parser;
use rum_bundler::types::LAST_MONTH_DAYS;
use rum_bundler::{
    BundleFetcher, DomainKey, FetchError, Granularity, InsightAggregator, InsightRequest,
    TimeWindow, checkpoint, collect_insights,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

use config::{Config, ConfigError, MetricsConfig};

/// Aggregates the experiment checkpoints of a domain's RUM bundles and
/// prints the report as JSON.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Domain whose bundles are fetched
    #[arg(long)]
    domain: String,

    /// Only report on this page URL
    #[arg(long)]
    url: Option<String>,

    /// Number of trailing days, today included
    #[arg(long, default_value_t = LAST_MONTH_DAYS)]
    days: u32,

    /// Domain key for the bundle API. Looked up with RUM_ADMIN_KEY when unset.
    #[arg(long, env = "RUM_DOMAIN_KEY", hide_env_values = true)]
    domain_key: Option<String>,

    /// One request per hour or per day
    #[arg(long, default_value_t = Granularity::Hourly)]
    granularity: Granularity,

    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides rum.batch_size from the config file
    #[arg(long)]
    batch_size: Option<usize>,

    /// Checkpoint counted as a conversion
    #[arg(long, default_value = checkpoint::CONVERT)]
    conversion_checkpoint: String,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not build statsd exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "rum-insights failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(metrics) = &config.metrics {
        install_statsd(metrics)?;
    }

    let mut rum = config.rum;
    if let Some(batch_size) = cli.batch_size {
        rum.batch_size = batch_size;
    }
    rum.validate().map_err(ConfigError::from)?;

    let aggregator =
        InsightAggregator::with_checkpoints(checkpoint::CLICK, cli.conversion_checkpoint);
    let request = InsightRequest {
        domain_key: cli
            .domain_key
            .filter(|key| !key.is_empty())
            .map(DomainKey::Resolved),
        page_url: cli.url,
        ..InsightRequest::new(
            cli.domain,
            TimeWindow::days(cli.days).with_granularity(cli.granularity),
        )
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = rt.block_on(async {
        let fetcher = BundleFetcher::from_config(&rum)?;
        collect_insights(&fetcher, &aggregator, request).await
    })?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn install_statsd(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = metrics_exporter_statsd::StatsdBuilder::from(
        config.statsd_host.as_str(),
        config.statsd_port,
    )
    .build(Some(config.prefix.as_str()))?;
    metrics::set_global_recorder(recorder).map_err(|_| CliError::RecorderInstalled)?;
    shared::metrics_defs::describe_all(rum_bundler::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Exporting metrics to statsd"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["rum-insights", "--domain", "www.example.com"]).unwrap();

        assert_eq!(cli.domain, "www.example.com");
        assert_eq!(cli.days, 31);
        assert_eq!(cli.granularity, Granularity::Hourly);
        assert_eq!(cli.conversion_checkpoint, "convert");
        assert!(cli.url.is_none());
        assert!(cli.batch_size.is_none());
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::try_parse_from([
            "rum-insights",
            "--domain",
            "www.example.com",
            "--url",
            "https://www.example.com/pricing",
            "--days",
            "7",
            "--granularity",
            "daily",
            "--domain-key",
            "abc",
            "--batch-size",
            "3",
            "--conversion-checkpoint",
            "formsubmit",
        ])
        .unwrap();

        assert_eq!(cli.url.as_deref(), Some("https://www.example.com/pricing"));
        assert_eq!(cli.days, 7);
        assert_eq!(cli.granularity, Granularity::Daily);
        assert_eq!(cli.domain_key.as_deref(), Some("abc"));
        assert_eq!(cli.batch_size, Some(3));
        assert_eq!(cli.conversion_checkpoint, "formsubmit");
    }

    #[test]
    fn cli_requires_domain() {
        assert!(Cli::try_parse_from(["rum-insights"]).is_err());
    }

    #[test]
    fn cli_rejects_unknown_granularity() {
        assert!(
            Cli::try_parse_from(["rum-insights", "--domain", "d", "--granularity", "weekly"])
                .is_err()
        );
    }
}
