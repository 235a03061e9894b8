//! Route warming against the configured API.

use std::time::Instant;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use turbo_query::QueryStats;
use turbo_storefront::{Route, Storefront};

use super::WarmArgs;
use crate::context::Context;
use crate::output::format_duration;

#[derive(Serialize)]
struct WarmReport {
    routes: Vec<String>,
    elapsed_ms: u64,
    stats: QueryStats,
}

/// Run the warm command.
pub async fn run(args: WarmArgs, ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    ctx.output.debug(&format!("API: {}", config.api.base_url));

    let routes = args
        .hrefs
        .iter()
        .map(|href| Route::parse(href))
        .collect::<Result<Vec<_>, _>>()?;

    let storefront = Storefront::from_config(config)?;
    let targets = if args.follow {
        with_predictions(&storefront, routes)
    } else {
        routes
    };

    tracing::info!(routes = targets.len(), concurrency = args.concurrency, "warming routes");
    let started = Instant::now();
    let pb = ctx.output.progress(targets.len() as u64, "Warming routes");
    stream::iter(&targets)
        .map(|route| {
            let pb = pb.clone();
            let api = storefront.api();
            async move {
                pb.set_message(route.href());
                api.prefetch_route(route).await;
                pb.inc(1);
            }
        })
        .buffer_unordered(args.concurrency.max(1))
        .collect::<Vec<()>>()
        .await;
    pb.finish_and_clear();

    let report = WarmReport {
        routes: targets.iter().map(Route::href).collect(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        stats: storefront.client().stats(),
    };

    if ctx.output.is_json() {
        ctx.output.json(&report);
        return Ok(());
    }

    for route in &report.routes {
        ctx.output.list_item(route);
    }
    ctx.output.header("Cache");
    ctx.output.kv("entries", &report.stats.entries.to_string());
    ctx.output.kv("fetches", &report.stats.fetches.to_string());
    ctx.output.kv("failures", &report.stats.failures.to_string());

    let elapsed = format_duration(started.elapsed());
    if report.stats.failures > 0 {
        ctx.output.warn(&format!(
            "{} fetch(es) failed. Run with --verbose for details.",
            report.stats.failures
        ));
    }
    ctx.output
        .success(&format!("Warmed {} route(s) in {}", report.routes.len(), elapsed));

    Ok(())
}

/// `routes` followed by each route's predicted successors, without
/// duplicates.
fn with_predictions(storefront: &Storefront, routes: Vec<Route>) -> Vec<Route> {
    let mut targets = routes.clone();
    for route in &routes {
        for prediction in storefront.engine().predict(&route.href()) {
            if let Ok(next) = Route::parse(&prediction.route) {
                if !targets.contains(&next) {
                    targets.push(next);
                }
            }
        }
    }
    targets
}
