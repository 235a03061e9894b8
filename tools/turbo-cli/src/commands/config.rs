//! Configuration management commands.

use anyhow::{bail, Result};
use console::Term;
use dialoguer::Confirm;
use turbo_storefront::StorefrontConfig;

use super::{ConfigArgs, ConfigCommand};
use crate::context::Context;

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => show_config(ctx).await,
        ConfigCommand::Init { force } => init_config(force, ctx).await,
        ConfigCommand::Validate => validate_config(ctx).await,
    }
}

async fn show_config(ctx: &Context) -> Result<()> {
    let config = ctx.config()?;

    if ctx.output.is_json() {
        ctx.output.json(&config);
        return Ok(());
    }

    match ctx.config_path() {
        Some(path) => ctx.output.header(&format!("Configuration ({})", path.display())),
        None => ctx.output.header("Configuration (defaults)"),
    }
    println!("{}", config.to_toml()?);

    Ok(())
}

async fn init_config(force: bool, ctx: &Context) -> Result<()> {
    let config_path = ctx.init_path();

    if config_path.exists() && !force {
        if !Term::stdout().is_term() {
            bail!(
                "Config file already exists: {}. Use --force to overwrite.",
                config_path.display()
            );
        }
        let confirmed = Confirm::new()
            .with_prompt(format!("Overwrite {}?", config_path.display()))
            .default(false)
            .interact()?;

        if !confirmed {
            ctx.output.warn("Config init cancelled");
            return Ok(());
        }
    }

    StorefrontConfig::default().save(&config_path)?;
    ctx.output.success(&format!("Created: {}", config_path.display()));

    Ok(())
}

async fn validate_config(ctx: &Context) -> Result<()> {
    ctx.output.header("Validating configuration");

    let config = ctx.config()?;
    let warnings = lint(&config);

    if warnings.is_empty() {
        ctx.output.success("Configuration is valid");
        return Ok(());
    }

    for warning in &warnings {
        ctx.output.warn(&format!("Warning: {}", warning));
    }
    ctx.output.success("Configuration is valid (with warnings)");

    Ok(())
}

/// Settings that load fine but are probably not what was meant.
fn lint(config: &StorefrontConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    let base = config.api.base_url.trim_start_matches("http://");
    let local = base.starts_with("localhost") || base.starts_with("127.0.0.1");
    if config.api.base_url.starts_with("http://") && !local {
        warnings.push(format!(
            "api.base_url '{}' is plain http on a non-local host",
            config.api.base_url
        ));
    }

    if config.query.stale_time_ms == 0 {
        warnings.push("query.stale_time_ms is 0, so every read refetches".to_string());
    }

    if config.query.retry_count > 5 {
        warnings.push(format!(
            "query.retry_count {} delays error pages considerably",
            config.query.retry_count
        ));
    }

    if !config.prefetch.predict_on_navigate {
        warnings.push("prefetch.predict_on_navigate is off; only triggers prefetch".to_string());
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_no_warnings() {
        assert!(lint(&StorefrontConfig::default()).is_empty());
    }

    #[test]
    fn test_lint_flags_remote_plain_http() {
        let mut config = StorefrontConfig::default();
        config.api.base_url = "http://shop.example.com".into();
        config.query.stale_time_ms = 0;
        assert_eq!(lint(&config).len(), 2);

        config.api.base_url = "https://shop.example.com".into();
        assert_eq!(lint(&config).len(), 1);
    }
}
