use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use std::time::Instant;

use domain::{EngineConfig, RecommendationSet};
use fixtures::{DemoWorld, build_demo_world};

mod fixtures;

/// cue-recs - Customer recommendation engine harness
#[derive(Parser)]
#[command(name = "cue-recs")]
#[command(about = "Generate adoption and upsell recommendations for a customer", long_about = None)]
struct Cli {
    /// Overall pipeline deadline in milliseconds
    #[arg(long, default_value = "2000")]
    deadline_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate recommendations for a customer
    Recommend {
        /// Customer to target: a demo name (acme, globex) or a UUID
        #[arg(long)]
        customer: String,

        /// Show the full reasoning chain for each recommendation
        #[arg(long)]
        explain: bool,
    },

    /// Show a customer's persisted recommendation history
    History {
        /// Customer to inspect: a demo name (acme, globex) or a UUID
        #[arg(long)]
        customer: String,
    },

    /// Run repeated generations to measure pipeline latency
    Benchmark {
        /// Number of requests to make
        #[arg(long, default_value = "100")]
        requests: usize,

        /// Number of concurrent requests
        #[arg(long, default_value = "10")]
        concurrent: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::default().with_deadline_ms(cli.deadline_ms);
    let world = build_demo_world(config).await;

    match cli.command {
        Commands::Recommend { customer, explain } => recommend(&world, &customer, explain).await,
        Commands::History { customer } => history(&world, &customer).await,
        Commands::Benchmark {
            requests,
            concurrent,
        } => benchmark(world, requests, concurrent).await,
    }
}

fn resolve(world: &DemoWorld, customer: &str) -> Result<domain::CustomerId> {
    world.resolve(customer).ok_or_else(|| {
        anyhow!(
            "unknown customer '{}' (try one of: {})",
            customer,
            world
                .customers
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })
}

async fn recommend(world: &DemoWorld, customer: &str, explain: bool) -> Result<()> {
    let customer_id = resolve(world, customer)?;

    let set = world.orchestrator.generate(customer_id).await?;
    print_set(&set, explain);
    Ok(())
}

fn print_set(set: &RecommendationSet, explain: bool) {
    let header = format!(
        "Generated {} adoption / {} upsell in {}ms{}",
        set.adoption.len(),
        set.upsell.len(),
        set.generation_time_ms,
        if set.degraded { " (degraded)" } else { "" }
    );
    if set.degraded {
        println!("{}", header.yellow().bold());
    } else {
        println!("{}", header.green().bold());
    }

    for (label, recs) in [("Adoption", &set.adoption), ("Upsell", &set.upsell)] {
        if recs.is_empty() {
            println!("\n{}: {}", label.bold(), "none".dimmed());
            continue;
        }
        println!("\n{}:", label.bold());
        for (i, rec) in recs.iter().enumerate() {
            println!(
                "{}. {} {}",
                i + 1,
                rec.target.as_str().cyan(),
                format!("(confidence {:.2})", rec.confidence).dimmed()
            );
            println!("   {}", rec.description);
            if explain {
                match serde_json::to_string_pretty(&rec.reasoning_chain) {
                    Ok(chain) => println!("   {}", chain.dimmed()),
                    Err(e) => println!("   {}", format!("reasoning chain unavailable: {e}").red()),
                }
            }
        }
    }

    println!(
        "\n{} parallel {}ms, reasoning {}ms, validation {}ms, target met: {}",
        "timings:".dimmed(),
        set.metadata.parallel_phase_ms,
        set.metadata.reasoning_ms,
        set.metadata.validation_ms,
        set.metadata.latency_target_met
    );
    let summary = &set.metadata.validation_summary;
    if summary.suppressed + summary.safety_blocked + summary.low_confidence > 0 {
        println!(
            "{} {} suppressed, {} safety-blocked, {} below confidence floor",
            "filtered:".dimmed(),
            summary.suppressed,
            summary.safety_blocked,
            summary.low_confidence
        );
    }
}

async fn history(world: &DemoWorld, customer: &str) -> Result<()> {
    let customer_id = resolve(world, customer)?;

    let mut recs = world.store.recommendations().await;
    recs.retain(|r| r.customer_id == customer_id);
    recs.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));

    if recs.is_empty() {
        println!("No recommendations on record for {customer}");
        return Ok(());
    }

    println!("{}", format!("{} recommendations for {customer}:", recs.len()).bold());
    for rec in recs {
        println!(
            "{} {:?} {} {} {}",
            rec.generated_at.format("%Y-%m-%d").to_string().dimmed(),
            rec.category,
            rec.target.as_str().cyan(),
            format!("{:?}", rec.outcome).yellow(),
            format!("({:.2})", rec.confidence).dimmed()
        );
    }
    Ok(())
}

async fn benchmark(world: DemoWorld, requests: usize, concurrent: usize) -> Result<()> {
    use rand::Rng;

    println!(
        "Running {requests} requests with concurrency {concurrent} over {} demo customers...",
        world.customers.len()
    );

    let world = Arc::new(world);
    let per_worker = requests.div_ceil(concurrent.max(1));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..concurrent.max(1) {
        let world = world.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(per_worker);
            let mut failures = 0usize;
            for _ in 0..per_worker {
                let idx = rand::rng().random_range(0..world.customers.len());
                let (_, customer_id) = world.customers[idx];
                let t0 = Instant::now();
                match world.orchestrator.generate(customer_id).await {
                    Ok(_) => latencies.push(t0.elapsed().as_millis() as u64),
                    Err(_) => failures += 1,
                }
            }
            (latencies, failures)
        }));
    }

    let mut latencies: Vec<u64> = Vec::with_capacity(requests);
    let mut failures = 0usize;
    for handle in handles {
        let (worker_latencies, worker_failures) = handle.await?;
        latencies.extend(worker_latencies);
        failures += worker_failures;
    }
    let elapsed = start.elapsed();

    latencies.sort_unstable();
    let p50 = latencies.get(latencies.len() / 2).copied().unwrap_or(0);
    let p95 = latencies
        .get(latencies.len().saturating_mul(95) / 100)
        .copied()
        .unwrap_or(0);

    println!(
        "{}",
        format!(
            "Completed {} ok / {} failed in {:.2?} (p50 {}ms, p95 {}ms)",
            latencies.len(),
            failures,
            elapsed,
            p50,
            p95
        )
        .green()
        .bold()
    );
    Ok(())
}
