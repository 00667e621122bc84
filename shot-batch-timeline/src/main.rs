use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::ValueEnum;
use hdrhistogram::Histogram;
use rand::Rng;
use shot_batch::BatcherConfig;
use shot_batch::CallbackBatcher;
use shot_batch::DEFAULT_KEY;
use shot_batch::make_batcher;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio::time::sleep;
use tokio::time::sleep_until;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod timeline;

use timeline::Invocation;
use timeline::Timeline;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Strategy {
    LeakyBucket,
    Windowed,
}

/// Fire randomized requests at a batcher and print when its callbacks actually ran.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, value_enum, default_value_t = Strategy::LeakyBucket)]
    strategy: Strategy,

    /// Burst size per key (leaky bucket)
    #[arg(long, default_value_t = 5)]
    max_tokens: usize,

    /// Interval between token refills (leaky bucket)
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    token_rate: Duration,

    /// Length of the trailing window (windowed)
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    window_size: Duration,

    /// Invocations allowed per key inside one window (windowed)
    #[arg(long, default_value_t = 5)]
    calls_per_window: usize,

    /// JSON batcher configuration, used instead of the strategy flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of independent keys; 0 schedules everything without a key
    #[arg(long, default_value_t = 3)]
    keys: usize,

    /// Total number of requests to schedule
    #[arg(long, default_value_t = 200)]
    requests: usize,

    /// Requests are spread randomly over this duration
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    spread: Duration,

    /// Width of one timeline cell
    #[arg(long, default_value = "100ms", value_parser = humantime::parse_duration)]
    resolution: Duration,
}

impl Args {
    fn batcher_config(&self) -> Result<BatcherConfig, BoxError> {
        if let Some(path) = &self.config {
            let text = std::fs::read_to_string(path)?;
            return Ok(serde_json::from_str(&text)?);
        }
        let config = match self.strategy {
            Strategy::LeakyBucket => BatcherConfig::leaky_bucket(self.max_tokens, self.token_rate)?,
            Strategy::Windowed => {
                BatcherConfig::windowed(self.window_size, self.calls_per_window)?
            }
        };
        Ok(config)
    }

    fn key_names(&self) -> Vec<String> {
        if self.keys == 0 {
            vec![DEFAULT_KEY.to_string()]
        } else {
            (0..self.keys).map(|key| format!("key-{key}")).collect()
        }
    }
}

fn tick_period(config: &BatcherConfig) -> Duration {
    match config {
        BatcherConfig::LeakyBucket(leaky) => leaky.token_rate(),
        BatcherConfig::Windowed(windowed) => windowed.window_size(),
    }
}

async fn run_load(
    batcher: &CallbackBatcher,
    names: &[String],
    keyed: bool,
    requests: usize,
    spread: Duration,
) -> mpsc::UnboundedReceiver<Invocation> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut rng = rand::rng();

    let spread_ms = spread.as_millis() as u64;
    let mut offsets: Vec<u64> = (0..requests)
        .map(|_| rng.random_range(0..=spread_ms))
        .collect();
    offsets.sort_unstable();

    let start = Instant::now();
    for offset in offsets {
        sleep_until(start + Duration::from_millis(offset)).await;

        let key = rng.random_range(0..names.len());
        let tx = tx.clone();
        let callback = move |count: usize| {
            // The receiver outlives the batcher, so a send cannot fail.
            let _ = tx.send(Invocation {
                key,
                at: start.elapsed(),
                count,
            });
        };
        batcher.schedule(callback, keyed.then(|| names[key].as_str()));
    }
    rx
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = args.batcher_config()?;
    let names = args.key_names();
    let batcher = make_batcher(config)?;

    info!(
        strategy = %batcher.strategy(),
        keys = names.len(),
        requests = args.requests,
        "starting run"
    );

    let mut rx = run_load(&batcher, &names, args.keys > 0, args.requests, args.spread).await;

    // Let one more tick deliver what the burst left behind, then flush the rest.
    sleep(tick_period(&config)).await;
    batcher.dispose();

    let mut timeline = Timeline::new(names, args.resolution);
    while let Some(invocation) = rx.recv().await {
        timeline.record(invocation);
    }

    let mut batch_sizes = Histogram::<u64>::new_with_bounds(1, 1_000_000, 3)?;
    for invocation in timeline.invocations() {
        batch_sizes.record(invocation.count as u64)?;
    }

    println!("--- {:?} ---", config);
    print!("{}", timeline.render());
    println!();
    println!("Requests:        {}", args.requests);
    println!("Invocations:     {}", timeline.invocations().len());
    if !batch_sizes.is_empty() {
        println!("P50 (Batch):     {}", batch_sizes.value_at_quantile(0.5));
        println!("P99 (Batch):     {}", batch_sizes.value_at_quantile(0.99));
        println!("Max (Batch):     {}", batch_sizes.max());
    }

    let delivered: usize = (0..args.keys.max(1)).map(|key| timeline.delivered(key)).sum();
    if delivered != args.requests {
        return Err(format!(
            "{} requests were scheduled but {} were delivered",
            args.requests, delivered
        )
        .into());
    }
    println!("Delivered:       {delivered}/{} ✅", args.requests);
    Ok(())
}
