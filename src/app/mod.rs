pub mod config;
pub mod logging_system;
pub mod shutdown;
pub mod source;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingError, LoggingSystem, setup_logging};
pub use source::{EventSource, SourceError};

use crate::sender::{Session, StreamStats};
use crate::transport::Dialer;
use crate::transport::memory::MemoryDialer;
use anyhow::Context;
use serde::Serialize;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[cfg(feature = "grpc")]
use crate::transport::grpc::GrpcDialer;
#[cfg(feature = "metrics")]
use crate::sender::StreamMetrics;

/// What a finished run prints to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub stats: StreamStats,
    pub skipped_lines: u64,
    pub cancelled: bool,
    #[serde(skip)]
    pub metrics_text: Option<String>,
}

#[derive(Debug)]
pub struct App {
    config: Config,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_and_env(args)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        // Command-line flags that only exist on the CLI survive a config file
        let config = if let Some(config_file) = &config.config_file {
            let mut from_file = Config::from_file(config_file)?;
            from_file.input = config.input.clone().or(from_file.input);
            from_file.dry_run |= config.dry_run;
            from_file.non_blocking |= config.non_blocking;
            from_file.print_metrics |= config.print_metrics;
            if from_file.api_key.is_none() {
                from_file.api_key = config.api_key.clone();
            }
            from_file
        } else {
            config
        };
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Streams every input event through one session and reports the result.
    pub async fn run(self) -> anyhow::Result<RunReport> {
        let cancel = CancellationToken::new();
        let signals = shutdown::spawn_signal_listener(cancel.clone());

        let result = if self.config.dry_run {
            info!("Dry run: streaming into the in-process loopback transport");
            self.stream_with(MemoryDialer::new(), &cancel).await
        } else {
            self.stream_over_network(&cancel).await
        };

        signals.abort();
        result
    }

    #[cfg(feature = "grpc")]
    async fn stream_over_network(&self, cancel: &CancellationToken) -> anyhow::Result<RunReport> {
        self.stream_with(GrpcDialer::default(), cancel).await
    }

    #[cfg(not(feature = "grpc"))]
    async fn stream_over_network(&self, _cancel: &CancellationToken) -> anyhow::Result<RunReport> {
        anyhow::bail!("built without the grpc feature; only --dry-run is available")
    }

    async fn stream_with<D: Dialer>(
        &self,
        dialer: D,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RunReport> {
        let credential = self.config.credential()?;
        let session = Session::connect(credential, self.config.to_client_config(), dialer)
            .await
            .with_context(|| format!("Failed to connect to {}", self.config.endpoint))?;

        #[cfg(feature = "metrics")]
        let metrics = if self.config.print_metrics {
            Some(StreamMetrics::new().context("Failed to register metrics")?)
        } else {
            None
        };
        #[cfg(feature = "metrics")]
        let session = match &metrics {
            Some(metrics) => session.with_metrics(metrics.clone()),
            None => session,
        };

        session.start_with_cancellation(cancel);
        info!(session = %session.id(), endpoint = %self.config.endpoint, "Streaming events");

        let input = self.open_input().await?;
        let mut source = EventSource::new(input);
        let pumped = self.pump(&session, &mut source, cancel).await;

        // Finalize and close even when reading the input failed
        let finalized = session.finalize().await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close connections cleanly");
        }
        pumped?;
        let stats = finalized?;

        #[cfg(feature = "metrics")]
        let metrics_text = metrics
            .map(|metrics| metrics.export_metrics())
            .transpose()
            .context("Failed to export metrics")?;
        #[cfg(not(feature = "metrics"))]
        let metrics_text = None;

        Ok(RunReport {
            stats,
            skipped_lines: source.skipped(),
            cancelled: cancel.is_cancelled(),
            metrics_text,
        })
    }

    async fn pump<D: Dialer, R: AsyncBufRead + Unpin>(
        &self,
        session: &Session<D>,
        source: &mut EventSource<R>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("Cancelled before the input was exhausted");
                    return Ok(());
                }
                next = source.next_event() => next?,
            };
            let Some(event) = next else {
                return Ok(());
            };

            if self.config.non_blocking {
                // Rejections are counted by the session and reported at finalize
                session.try_submit(event);
            } else {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(()),
                    submitted = session.submit(event) => submitted?,
                }
            }
        }
    }

    async fn open_input(&self) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
        Ok(match &self.config.input {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                Box::new(BufReader::new(file))
            }
            None => Box::new(BufReader::new(tokio::io::stdin())),
        })
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Entry point of the `rask-event-streamer` binary.
pub async fn main() -> anyhow::Result<()> {
    let app = App::from_args(std::env::args_os()).context("Configuration error")?;

    if let Err(e) = setup_logging(app.config().log_level, app.config().log_format) {
        eprintln!("Warning: {e}");
    }
    info!("Starting rask-event-streamer v{}", get_version());

    let report = match app.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("Run failed: {:#}", e);
            return Err(e);
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(metrics_text) = &report.metrics_text {
        print!("{metrics_text}");
    }
    Ok(())
}
