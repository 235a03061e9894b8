//! Next-route prediction from recorded analytics.

use anyhow::{bail, Context as _, Result};
use turbo_prefetch::{AnalyticsLedger, AnalyticsSnapshot, RoutePredictor};

use super::PredictArgs;
use crate::context::Context;
use crate::output::{format_duration, source_badge};

/// Run the predict command.
pub async fn run(args: PredictArgs, ctx: &Context) -> Result<()> {
    let config = ctx.config()?;

    let snapshot = match &args.analytics {
        Some(path) => Some(load_snapshot(&ctx.resolve_path(path).to_string_lossy())?),
        None => None,
    };

    let from = match (args.from, snapshot.as_ref().and_then(|s| s.current_route.clone())) {
        (Some(from), _) => from,
        (None, Some(current)) => current,
        (None, None) => bail!("No route to predict from. Pass --from or a snapshot with a current route."),
    };

    if let Some(snapshot) = &snapshot {
        ctx.output.debug(&format!(
            "Ledger captured {} with {} visited route(s)",
            snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
            snapshot.visited_routes.len()
        ));
    }
    let ledger = snapshot.map(AnalyticsLedger::restore).unwrap_or_default();

    let mut predictor_config = config.prefetch.predictor.clone();
    if let Some(limit) = args.limit {
        predictor_config.max_prefetch_distance = limit;
    }
    let predictor = RoutePredictor::new(predictor_config)?;
    let predictions = predictor.predict(&from, &ledger);

    if ctx.output.is_json() {
        ctx.output.json(&predictions);
        return Ok(());
    }

    ctx.output.header(&format!("Predicted routes after {}", from));
    if predictions.is_empty() {
        ctx.output.info("No candidates. Record more navigation or check the route rules.");
        return Ok(());
    }

    let widths = [4, 32, 8, 10, 8, 6];
    ctx.output
        .table_row(&["#", "ROUTE", "SCORE", "SOURCE", "TIME", "CLICKS"], &widths);
    for (rank, prediction) in predictions.iter().enumerate() {
        let rank = (rank + 1).to_string();
        let score = format!("{:.2}", prediction.score);
        let source = source_badge(prediction.source);
        let time = format_duration(ledger.time_spent(&prediction.route));
        let clicks = ledger.clicks(&prediction.route).to_string();
        ctx.output.table_row(
            &[&rank, &prediction.route, &score, &source, &time, &clicks],
            &widths,
        );
    }

    Ok(())
}

fn load_snapshot(path: &str) -> Result<AnalyticsSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read analytics file: {}", path))?;
    AnalyticsSnapshot::from_json(&content)
        .with_context(|| format!("Failed to parse analytics file: {}", path))
}
