mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intake_core::ingest::OCTET_STREAM;
use intake_core::{
    load_config, validate_config, Config, ConfigError, IngestPipeline, IngestRequest,
    PrefixValidator, TaskFailure,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Ingest files into a content-addressed store")]
struct Args {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, env = "INTAKE_CONFIG", default_value = "intake.toml")]
    config: PathBuf,

    /// Print Prometheus metrics to stderr when done
    #[arg(long)]
    metrics: bool,

    /// Files to ingest, reported in this order
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

/// Recognises common document and image signatures; anything else is stored
/// as octet-stream.
fn default_validator() -> PrefixValidator {
    PrefixValidator::new()
        .with_type(b"%PDF-".to_vec(), "application/pdf")
        .with_type(b"\x89PNG\r\n\x1a\n".to_vec(), "image/png")
        .with_type(b"\xff\xd8\xff".to_vec(), "image/jpeg")
        .with_type(b"GIF8".to_vec(), "image/gif")
        .with_type(b"II*\0".to_vec(), "image/tiff")
        .with_type(b"MM\0*".to_vec(), "image/tiff")
        .with_type(b"PK\x03\x04".to_vec(), "application/zip")
        .with_fallback(OCTET_STREAM)
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config_path = args.config.clone();

    // Load configuration
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!("Loaded configuration from {:?}", config_path);
            config
        }
        Err(ConfigError::FileNotFound(_)) => {
            info!("No configuration at {:?}, using defaults", config_path);
            Config::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to load config from {:?}", config_path))
        }
    };

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;
    info!("Storage root: {:?}", config.ingest.storage_root);

    let pipeline = Arc::new(
        IngestPipeline::new(
            config.ingest.clone(),
            config.tee.clone(),
            Arc::new(default_validator()),
        )
        .context("Failed to create ingest pipeline")?,
    );

    let mut requests = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {:?}", path))?;
        let len = file
            .metadata()
            .await
            .with_context(|| format!("Failed to stat {:?}", path))?
            .len();
        requests.push(IngestRequest::new(path.display().to_string(), file, len));
    }
    metrics::UPLOADS_REQUESTED.set(requests.len() as i64);

    let results = tokio::select! {
        results = pipeline.ingest_all(requests, config.work.ordered_limit) => {
            results.context("Failed to start batch ingest")?
        }
        _ = shutdown_signal() => {
            warn!("Interrupted, abandoning remaining uploads");
            bail!("interrupted");
        }
    };

    let mut failures = 0;
    for (path, result) in args.files.iter().zip(results) {
        match result {
            Ok(stored) => println!("{}", serde_json::to_string(&stored)?),
            Err(TaskFailure::Failed(e)) => {
                failures += 1;
                error!(file = %path.display(), error = %e, "Ingest failed");
            }
            Err(TaskFailure::Panicked(message)) => {
                failures += 1;
                error!(file = %path.display(), panic = %message, "Ingest panicked");
            }
        }
    }

    if let Some(manifest) = pipeline.manifest() {
        manifest.flush().await;
    }

    let status = pipeline.status();
    info!(
        completed = status.completed,
        failed = status.failed,
        deduplicated = status.deduplicated,
        bytes = status.bytes_stored,
        "Ingest finished"
    );

    if args.metrics {
        eprint!("{}", metrics::encode_metrics());
    }

    if failures > 0 {
        bail!("{} of {} uploads failed", failures, args.files.len());
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_files_and_flag() {
        let args =
            Args::try_parse_from(["intake", "a.pdf", "--metrics", "b.png"]).unwrap();
        assert_eq!(args.files, vec![PathBuf::from("a.pdf"), PathBuf::from("b.png")]);
        assert!(args.metrics);
    }

    #[test]
    fn test_args_require_files() {
        assert!(Args::try_parse_from(["intake"]).is_err());
        assert!(Args::try_parse_from(["intake", "--metrics"]).is_err());
    }

    #[test]
    fn test_args_reject_unknown_flag() {
        let err = Args::try_parse_from(["intake", "--force", "a"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_args_config_path() {
        let args = Args::try_parse_from(["intake", "--config", "/etc/intake.toml", "a"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/intake.toml"));
    }

    #[test]
    fn test_clap_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[tokio::test]
    async fn test_default_validator_detects_types() {
        use intake_core::HeaderValidator;

        let validator = default_validator();
        assert_eq!(
            validator.validate(b"%PDF-1.4").await.unwrap(),
            "application/pdf"
        );
        assert_eq!(validator.validate(b"plain").await.unwrap(), OCTET_STREAM);
    }
}
