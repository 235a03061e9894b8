//! Canonical cache key inspection.

use anyhow::Result;
use serde::Serialize;
use turbo_query::{keys, QueryKey, SearchFilters};

use super::{KeysArgs, KeysCommand, UserKeysCommand};
use crate::context::Context;

#[derive(Serialize)]
struct KeyReport {
    key: QueryKey,
    canonical: String,
    /// Shorter keys whose invalidation covers this one.
    invalidated_by: Vec<String>,
}

/// Run the keys command.
pub async fn run(args: KeysArgs, ctx: &Context) -> Result<()> {
    let (key, ancestors) = resolve(args.command);

    let report = KeyReport {
        canonical: key.canonical(),
        invalidated_by: ancestors
            .iter()
            .filter(|a| a.is_prefix_of(&key) && **a != key)
            .map(QueryKey::canonical)
            .collect(),
        key,
    };

    if ctx.output.is_json() {
        ctx.output.json(&report);
        return Ok(());
    }

    println!("{}", report.canonical);
    if !report.invalidated_by.is_empty() {
        ctx.output.header("Invalidated by");
        for prefix in &report.invalidated_by {
            ctx.output.list_item(prefix);
        }
    }

    Ok(())
}

/// The key for a command plus the broader keys of its domain.
fn resolve(command: KeysCommand) -> (QueryKey, Vec<QueryKey>) {
    match command {
        KeysCommand::Products { filters } => (
            keys::products::list(&filters.to_filters()),
            vec![keys::products::all(), keys::products::lists()],
        ),
        KeysCommand::Product { handle } => (
            keys::products::detail(&handle),
            vec![keys::products::all(), keys::products::details()],
        ),
        KeysCommand::Collections { page, limit } => (
            keys::collections::list(page, limit),
            vec![keys::collections::all(), keys::collections::lists()],
        ),
        KeysCommand::Collection {
            handle,
            products,
            filters,
        } => {
            let key = if products {
                keys::collections::products(&handle, &filters.to_filters())
            } else {
                keys::collections::detail(&handle)
            };
            let detail = keys::collections::detail(&handle);
            (
                key,
                vec![keys::collections::all(), keys::collections::details(), detail],
            )
        }
        KeysCommand::Cart => (keys::cart::current(), vec![keys::cart::all()]),
        KeysCommand::User { command } => {
            let key = match command {
                UserKeysCommand::Profile => keys::user::profile(),
                UserKeysCommand::Orders { page } => keys::user::orders(page),
                UserKeysCommand::Order { id } => keys::user::order(&id),
                UserKeysCommand::Wishlist => keys::user::wishlist(),
            };
            (key, vec![keys::user::all(), keys::user::orders(None)])
        }
        KeysCommand::Search {
            query,
            category,
            page,
            sort,
        } => {
            let filters = SearchFilters {
                category,
                page,
                sort,
            };
            (keys::search::results(&query, &filters), vec![keys::search::all()])
        }
        KeysCommand::Suggestions { query } => {
            (keys::search::suggestions(&query), vec![keys::search::all()])
        }
    }
}
