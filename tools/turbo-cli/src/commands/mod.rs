//! CLI command implementations.

pub mod config;
pub mod keys;
pub mod predict;
pub mod warm;

use clap::{Args, Subcommand};
use turbo_query::ProductFilters;

/// Product listing filters shared by `keys products` and
/// `keys collection`.
#[derive(Args)]
pub struct FilterArgs {
    /// Category handle (`all` means no filter).
    #[arg(long)]
    pub category: Option<String>,

    /// Page number.
    #[arg(long)]
    pub page: Option<u32>,

    /// Page size.
    #[arg(long)]
    pub limit: Option<u32>,

    /// Free-text filter.
    #[arg(long)]
    pub search: Option<String>,

    /// Sort order.
    #[arg(long)]
    pub sort: Option<String>,
}

impl FilterArgs {
    pub fn to_filters(&self) -> ProductFilters {
        ProductFilters {
            category: self.category.clone(),
            page: self.page,
            limit: self.limit,
            search: self.search.clone(),
            sort: self.sort.clone(),
        }
    }
}

/// Arguments for the keys command.
#[derive(Args)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub command: KeysCommand,
}

#[derive(Subcommand)]
pub enum KeysCommand {
    /// Product listing.
    Products {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Product detail.
    Product {
        /// Product handle.
        handle: String,
    },
    /// Collection listing.
    Collections {
        /// Page number.
        #[arg(long)]
        page: Option<u32>,
        /// Page size.
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Collection detail, or its products with `--products`.
    Collection {
        /// Collection handle.
        handle: String,
        /// Key the collection's product listing instead.
        #[arg(long)]
        products: bool,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// The current cart.
    Cart,
    /// Signed-in user data.
    User {
        #[command(subcommand)]
        command: UserKeysCommand,
    },
    /// Search results.
    Search {
        /// Search text.
        query: String,
        /// Category handle.
        #[arg(long)]
        category: Option<String>,
        /// Page number.
        #[arg(long)]
        page: Option<u32>,
        /// Sort order.
        #[arg(long)]
        sort: Option<String>,
    },
    /// Search-as-you-type suggestions.
    Suggestions {
        /// Partial search text.
        query: String,
    },
}

#[derive(Subcommand)]
pub enum UserKeysCommand {
    /// Profile.
    Profile,
    /// Order history.
    Orders {
        /// Page number.
        #[arg(long)]
        page: Option<u32>,
    },
    /// One order.
    Order {
        /// Order ID.
        id: String,
    },
    /// Wishlist.
    Wishlist,
}

/// Arguments for the predict command.
#[derive(Args)]
pub struct PredictArgs {
    /// Analytics snapshot (JSON) to score against.
    #[arg(short, long)]
    pub analytics: Option<String>,

    /// Route to predict from (default: the snapshot's current route).
    #[arg(short, long)]
    pub from: Option<String>,

    /// Maximum number of predictions (default: from config).
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for the warm command.
#[derive(Args)]
pub struct WarmArgs {
    /// Storefront hrefs to warm, e.g. `/products/linen-shirt`.
    #[arg(required = true)]
    pub hrefs: Vec<String>,

    /// Routes warmed at once.
    #[arg(short, long, default_value = "4")]
    pub concurrency: usize,

    /// Also warm the routes predicted to follow each href.
    #[arg(long)]
    pub follow: bool,
}

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration.
    Show,
    /// Write a config file with default values.
    Init {
        /// Overwrite an existing config without asking.
        #[arg(short, long)]
        force: bool,
    },
    /// Validate the config file.
    Validate,
}
