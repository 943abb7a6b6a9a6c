use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use log::{error, info};
use vitalwatch_core::{
    ClassifierPolicy, EntityId, Fleet, HttpUpstream, SystemClock, VitalwatchConfig, connect_store,
};

use super::parse_duration;

#[derive(Args)]
pub struct RunArgs {
    /// Delay between polls of one entity (e.g. 500ms, 1s)
    #[arg(long, env = "VITALWATCH_POLL_INTERVAL", default_value = "1s", value_parser = parse_duration)]
    poll_interval: Duration,

    /// Delay between eviction passes of one entity
    #[arg(long, env = "VITALWATCH_CLEANUP_INTERVAL", default_value = "5s", value_parser = parse_duration)]
    cleanup_interval: Duration,

    /// Retention window in seconds; older readings are evicted
    #[arg(long, env = "VITALWATCH_WINDOW", default_value_t = 300)]
    window: u64,

    /// Probability that the simulated classifier flags a snapshot
    #[arg(long, env = "VITALWATCH_ANOMALY_RATE", default_value_t = 0.05)]
    anomaly_rate: f64,

    /// Classifier: simulated (random stand-in) or upstream (keep upstream flags)
    #[arg(long, env = "VITALWATCH_CLASSIFIER", default_value = "simulated")]
    classifier: ClassifierPolicy,

    /// Sensor channels expected per snapshot
    #[arg(long, env = "VITALWATCH_CHANNELS", default_value_t = 6)]
    channels: usize,

    /// Comma-separated entity ids to track
    #[arg(long, env = "VITALWATCH_IDS", value_delimiter = ',', default_value = "1,2,3,4,5,6")]
    ids: Vec<EntityId>,

    /// Upstream base URL; the entity id is appended
    #[arg(long, env = "VITALWATCH_UPSTREAM", default_value = "http://localhost:5000/patient/")]
    upstream: String,

    /// Per-request upstream timeout
    #[arg(long, env = "VITALWATCH_UPSTREAM_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    upstream_timeout: Duration,

    /// Store URL (redis://, rediss://, redis+unix://, memory://)
    #[arg(long, env = "VITALWATCH_STORE", default_value = "redis://127.0.0.1:6379/")]
    store: String,

    /// Consecutive "store unreachable" errors before a collector gives up
    #[arg(long, env = "VITALWATCH_STORE_FAILURE_LIMIT", default_value_t = 30)]
    store_failure_limit: u64,

    /// How often to log a fleet summary (0 disables)
    #[arg(long, env = "VITALWATCH_REPORT_INTERVAL", default_value = "30s", value_parser = parse_duration)]
    report_interval: Duration,
}

impl RunArgs {
    /// Split into the library configuration and the CLI-only report interval.
    pub fn into_config(self) -> (VitalwatchConfig, Duration) {
        let config = VitalwatchConfig {
            poll_interval: self.poll_interval,
            cleanup_interval: self.cleanup_interval,
            max_window_secs: self.window,
            anomaly_rate: self.anomaly_rate,
            classifier: self.classifier,
            channels: self.channels,
            entity_ids: self.ids,
            upstream_base_url: self.upstream,
            upstream_timeout: self.upstream_timeout,
            store_url: self.store,
            store_failure_limit: self.store_failure_limit,
        };
        (config, self.report_interval)
    }
}

pub fn run(args: RunArgs) {
    let (config, report_interval) = args.into_config();
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    println!("vitalwatch v{}", vitalwatch_core::VERSION);
    println!(
        "  Entities:   {}",
        config
            .entity_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Upstream:   {}{{id}}", config.upstream_base_url);
    println!("  Store:      {}", config.store_url);
    println!(
        "  Window:     {}s (poll {:?}, cleanup {:?})",
        config.max_window_secs, config.poll_interval, config.cleanup_interval
    );
    println!("  Classifier: {} (rate {})", config.classifier, config.anomaly_rate);
    println!("  Press Ctrl+C to stop.");
    println!();

    let rt = super::runtime();
    if let Err(e) = rt.block_on(supervise(config, report_interval)) {
        error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn supervise(
    config: VitalwatchConfig,
    report_interval: Duration,
) -> Result<(), Box<dyn Error>> {
    let store = connect_store(&config.store_url).await?;
    let upstream = HttpUpstream::new(
        config.upstream_base_url.clone(),
        config.upstream_timeout,
        config.channels,
    )?;
    let fleet = Arc::new(Fleet::from_config(
        &config,
        store,
        Arc::new(upstream),
        Arc::new(SystemClock),
    )?);

    let cancel = fleet.cancel_token();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("interrupt received, stopping collectors");
            cancel.cancel();
        })?;
    }

    let reporter = (!report_interval.is_zero()).then(|| {
        let fleet = Arc::clone(&fleet);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(report_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => info!("{}", fleet.report().summary()),
                }
            }
        })
    });

    let result = fleet.run().await;
    cancel.cancel();
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }

    match result {
        Ok(report) => {
            println!("\n{report}");
            Ok(())
        }
        Err(e) => {
            println!("\n{}", fleet.report());
            Err(e.into())
        }
    }
}
