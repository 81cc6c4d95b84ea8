//! Demo workload: a grid of simulated fit-and-evaluate trials.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;

use trialpool::config::PoolConfig;
use trialpool::exec::{EvalFn, Evaluation, TrialContext, TrialExecutor};
use trialpool::manager::Manager;
use trialpool::task::TrialError;

/// A train/test split as the store payload.
struct Split {
    actual: Vec<f64>,
}

/// Simulated trial: sleeps a category-dependent time, "predicts" the
/// actuals with noise, and evaluates.
struct SimulatedTrial;

#[async_trait]
impl TrialExecutor for SimulatedTrial {
    async fn execute(&self, ctx: TrialContext<'_>) -> Result<Evaluation, TrialError> {
        let split = ctx
            .store
            .get::<Split>(&ctx.id.data_key)
            .await
            .map_err(|e| TrialError::new("data", e.to_string()))?;

        // rng handles are not held across awaits
        let (fit_ms, noise) = {
            let mut rng = rand::thread_rng();
            let base: u64 = match ctx.id.category.as_str() {
                "ridge" => 40,
                "lasso" => 80,
                _ => 150,
            };
            let noise_scale = ctx.params["noise"].as_f64().unwrap_or(0.1);
            let noise: Vec<f64> = (0..split.actual.len())
                .map(|_| rng.gen_range(-noise_scale..noise_scale))
                .collect();
            (rng.gen_range(base..base * 2), noise)
        };
        tokio::time::sleep(Duration::from_millis(fit_ms)).await;

        let predicted: Vec<f64> = split
            .actual
            .iter()
            .zip(&noise)
            .map(|(y, n)| y + n)
            .collect();
        Ok((ctx.evaluate)(&split.actual, &predicted))
    }
}

fn evaluation_function() -> EvalFn {
    Arc::new(|actual, predicted| {
        let n = actual.len().max(1) as f64;
        let (mut sq, mut abs) = (0.0, 0.0);
        for (y, p) in actual.iter().zip(predicted) {
            sq += (y - p).powi(2);
            abs += (y - p).abs();
        }
        let mut evaluation = Evaluation::new();
        evaluation.insert("rmse".to_string(), (sq / n).sqrt());
        evaluation.insert("mae".to_string(), abs / n);
        evaluation
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let num_workers: usize = std::env::var("TRIALPOOL_WORKERS")
        .unwrap_or_else(|_| "4".to_string())
        .parse()
        .unwrap_or(4);

    let trials_per_category: usize = std::env::var("TRIALPOOL_TRIALS")
        .unwrap_or_else(|_| "8".to_string())
        .parse()
        .unwrap_or(8);

    eprintln!("trialpool demo v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {num_workers}");
    eprintln!("   Trials:  {trials_per_category} per category\n");

    let mut manager = Manager::new(
        Arc::new(SimulatedTrial),
        evaluation_function(),
        PoolConfig::default(),
    );

    // Shared inputs: one split per dataset
    for key in ["sales", "churn"] {
        let actual: Vec<f64> = (0..512).map(|i| (i as f64).sin() * 10.0).collect();
        manager
            .add_data(key, Split { actual }, false)
            .await
            .context("seeding the shared store")?;
    }

    // The trial grid
    for category in ["ridge", "lasso", "tree"] {
        for i in 0..trials_per_category {
            for key in ["sales", "churn"] {
                manager
                    .add_task(
                        category,
                        format!("{category}-{i}"),
                        key,
                        "units",
                        json!({"noise": 0.05 * (i + 1) as f64}),
                    )
                    .await
                    .context("submitting the trial grid")?;
            }
        }
    }

    manager.start_workers(num_workers).await;
    manager.show_progress(None).await;

    manager.stop(None)?;
    manager.join_stopped().await;

    // Final report
    let records = manager.task_records().await;
    println!("\n{}", serde_json::to_string_pretty(&records)?);
    eprintln!(
        "\n{} trials processed | workers: {}",
        manager.processed().len(),
        manager.worker_summary().await,
    );

    Ok(())
}
