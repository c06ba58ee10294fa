// src/bin/ratelimit_cli.rs

use chrono::Utc;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::Barrier;
use tokio::time;
use tracing::{error, info, warn};

use keyed_ratelimit::config::{
    DistributedBucketConfig, LeakyBucketConfig, LimiterConfig, RedisConfig, SlidingWindowConfig,
    TokenBucketConfig,
};
use keyed_ratelimit::storage::RedisStorage;
use keyed_ratelimit::{RateLimitStatus, RateLimiter};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "ratelimit_cli",
    about = "Drive a keyed rate limiter with simulated traffic"
)]
struct Opt {
    /// Rate limiting algorithm to use
    #[structopt(short, long, possible_values = &["token_bucket", "leaky_bucket", "sliding_window", "redis_token_bucket", "redis_leaky_bucket"], default_value = "token_bucket")]
    algorithm: String,

    /// Key to rate limit on; a fresh random key when omitted
    #[structopt(short, long)]
    key: Option<String>,

    /// Limiter id used to namespace Redis keys
    #[structopt(long, default_value = "cli")]
    limiter_id: String,

    /// Tokens (or drained entries) per second; admissions per window for sliding_window
    #[structopt(short, long, default_value = "5")]
    rate: f64,

    /// Burst capacity for the bucket algorithms
    #[structopt(short, long, default_value = "10")]
    capacity: f64,

    /// Sliding window length in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Sliding window sub-window length in seconds
    #[structopt(long, default_value = "10")]
    sub_window_seconds: u64,

    /// TTL of Redis records in seconds
    #[structopt(long, default_value = "60")]
    key_ttl_seconds: u64,

    /// Redis URL; falls back to REDIS_URL / RD_* from the environment or .env
    #[structopt(long)]
    redis_url: Option<String>,

    /// Simulation mode
    #[structopt(long, possible_values = &["burst", "steady", "concurrent"], default_value = "burst")]
    simulation: String,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    num_requests: usize,

    /// Time between requests in milliseconds (steady mode)
    #[structopt(short = "t", long, default_value = "100")]
    request_interval_ms: u64,

    /// Randomize steady spacing by up to this fraction of the interval
    #[structopt(long, default_value = "0.0")]
    jitter: f64,

    /// Print one table row per request instead of only the summary
    #[structopt(long)]
    per_request: bool,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

/// One simulated request, as shown in the results table
struct Outcome {
    index: usize,
    at: chrono::DateTime<Utc>,
    status: Option<RateLimitStatus>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let opt = Opt::from_args();

    let directive = if opt.disable_logs {
        "ratelimit_cli=error,keyed_ratelimit=error".to_string()
    } else {
        let level = match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        format!("ratelimit_cli={},keyed_ratelimit={}", level, level)
    };
    keyed_ratelimit::logging::init_with_default(&directive);

    let config = limiter_config(&opt);
    let redis = if config.is_distributed() {
        let redis_config = match &opt.redis_url {
            Some(url) => RedisConfig::new(url.clone()),
            None => RedisConfig::from_env()?,
        };
        Some(RedisStorage::connect(redis_config).await?)
    } else {
        None
    };

    let limiter = RateLimiter::from_config(opt.limiter_id.clone(), &config, redis.as_ref())?;
    let key = opt
        .key
        .clone()
        .unwrap_or_else(|| format!("sim-{}", uuid::Uuid::new_v4()));

    info!(
        algorithm = limiter.algorithm_name(),
        key = %key,
        simulation = %opt.simulation,
        "Starting simulation"
    );

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    let started = Instant::now();
    let outcomes = match opt.simulation.as_str() {
        "burst" => simulate_burst(&opt, &limiter, &key, &stop).await,
        "steady" => simulate_steady(&opt, &limiter, &key, &stop).await?,
        "concurrent" => simulate_concurrent(&opt, &limiter, &key).await,
        other => {
            error!("Unknown simulation mode: {}", other);
            return Err("Unknown simulation mode".into());
        }
    };

    if stop.load(Ordering::SeqCst) {
        warn!(completed = outcomes.len(), "Interrupted, reporting partial run");
    }

    if opt.per_request {
        print_requests(&outcomes);
    }
    print_summary(&opt, &limiter, &key, &outcomes, started.elapsed());

    Ok(())
}

fn limiter_config(opt: &Opt) -> LimiterConfig {
    let cleanup_interval = Duration::from_secs(60);
    let distributed = || {
        DistributedBucketConfig::new(
            opt.limiter_id.clone(),
            opt.rate,
            opt.capacity,
            Duration::from_secs(opt.key_ttl_seconds),
        )
    };

    match opt.algorithm.as_str() {
        "leaky_bucket" => LimiterConfig::LeakyBucket(LeakyBucketConfig {
            rate: opt.rate,
            capacity: opt.capacity as usize,
            cleanup_interval,
        }),
        "sliding_window" => LimiterConfig::SlidingWindow(SlidingWindowConfig {
            rate: opt.rate as u64,
            window: Duration::from_secs(opt.window_seconds),
            sub_window: Duration::from_secs(opt.sub_window_seconds),
            cleanup_interval,
        }),
        "redis_token_bucket" => LimiterConfig::RedisTokenBucket(distributed()),
        "redis_leaky_bucket" => LimiterConfig::RedisLeakyBucket(distributed()),
        _ => LimiterConfig::TokenBucket(TokenBucketConfig {
            rate: opt.rate,
            capacity: opt.capacity,
            cleanup_interval,
        }),
    }
}

async fn request(limiter: &RateLimiter, key: &str, index: usize) -> Outcome {
    let status = match limiter.allow(key).await {
        Ok(status) => Some(status),
        Err(e) => {
            // a broken backend shows up as an error row rather than ending the run
            error!(request = index, error = %e, "Request failed");
            None
        }
    };
    Outcome {
        index,
        at: Utc::now(),
        status,
    }
}

// Every request back to back
async fn simulate_burst(
    opt: &Opt,
    limiter: &RateLimiter,
    key: &str,
    stop: &AtomicBool,
) -> Vec<Outcome> {
    let mut outcomes = Vec::with_capacity(opt.num_requests);
    for i in 0..opt.num_requests {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        outcomes.push(request(limiter, key, i + 1).await);
    }
    outcomes
}

// Fixed spacing between requests, optionally jittered
async fn simulate_steady(
    opt: &Opt,
    limiter: &RateLimiter,
    key: &str,
    stop: &AtomicBool,
) -> Result<Vec<Outcome>, Box<dyn std::error::Error>> {
    let interval = Duration::from_millis(opt.request_interval_ms);
    let jitter = opt.jitter.clamp(0.0, 1.0);

    let pb = ProgressBar::new(opt.num_requests as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut outcomes = Vec::with_capacity(opt.num_requests);
    let mut allowed = 0;
    for i in 0..opt.num_requests {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let request_time = Instant::now();

        let outcome = request(limiter, key, i + 1).await;
        if matches!(outcome.status, Some(s) if s.allowed) {
            allowed += 1;
        }
        outcomes.push(outcome);
        pb.set_message(format!("allowed {}", allowed));
        pb.inc(1);

        let spacing = if jitter > 0.0 {
            interval.mul_f64(rand::rng().random_range(1.0 - jitter..=1.0 + jitter))
        } else {
            interval
        };
        let elapsed = request_time.elapsed();
        if elapsed < spacing {
            time::sleep(spacing - elapsed).await;
        }
    }

    pb.finish_with_message(format!("allowed {} of {}", allowed, outcomes.len()));
    Ok(outcomes)
}

// All requests released at once from separate tasks
async fn simulate_concurrent(opt: &Opt, limiter: &RateLimiter, key: &str) -> Vec<Outcome> {
    let barrier = Arc::new(Barrier::new(opt.num_requests.max(1)));

    let tasks = (0..opt.num_requests).map(|i| {
        let limiter = limiter.clone();
        let barrier = Arc::clone(&barrier);
        let key = key.to_string();
        tokio::spawn(async move {
            barrier.wait().await;
            request(&limiter, &key, i + 1).await
        })
    });

    let mut outcomes: Vec<Outcome> = join_all(tasks)
        .await
        .into_iter()
        .filter_map(|joined| joined.ok())
        .collect();
    outcomes.sort_by_key(|o| o.index);
    outcomes
}

fn print_requests(outcomes: &[Outcome]) {
    let mut table = Table::new();
    table.add_row(row!["#", "Time", "Verdict", "Retry-After (s)"]);
    for outcome in outcomes {
        let at = outcome.at.format("%H:%M:%S%.3f").to_string();
        match outcome.status {
            Some(status) if status.allowed => {
                table.add_row(row![outcome.index, at, "ALLOWED", "-"]);
            }
            Some(status) => {
                table.add_row(row![outcome.index, at, "DENIED", status.retry_after_secs()]);
            }
            None => {
                table.add_row(row![outcome.index, at, "ERROR", "-"]);
            }
        }
    }
    table.printstd();
}

fn print_summary(
    opt: &Opt,
    limiter: &RateLimiter,
    key: &str,
    outcomes: &[Outcome],
    elapsed: Duration,
) {
    let allowed = outcomes
        .iter()
        .filter(|o| matches!(o.status, Some(s) if s.allowed))
        .count();
    let errors = outcomes.iter().filter(|o| o.status.is_none()).count();
    let denied = outcomes.len() - allowed - errors;
    let longest_wait = outcomes
        .iter()
        .filter_map(|o| o.status)
        .map(|s| s.retry_after_secs())
        .max()
        .unwrap_or(0);

    let mut table = Table::new();
    table.add_row(row!["Algorithm", limiter.algorithm_name()]);
    table.add_row(row!["Key", key]);
    table.add_row(row!["Simulation", opt.simulation]);
    table.add_row(row!["Requests", outcomes.len()]);
    table.add_row(row!["Allowed", allowed]);
    table.add_row(row!["Denied", denied]);
    table.add_row(row!["Errors", errors]);
    table.add_row(row!["Longest Retry-After (s)", longest_wait]);
    table.add_row(row!["Elapsed", format!("{:?}", elapsed)]);

    println!("\nSimulation Results:");
    table.printstd();
}
