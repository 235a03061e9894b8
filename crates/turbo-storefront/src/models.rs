//! Payloads returned by the storefront API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turbo_query::Paginated;

use crate::ids::{CollectionId, OrderId, ProductId, UserId};

/// A monetary amount in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Money {
    pub fn new(amount_cents: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_cents,
            currency: currency.into(),
        }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(0, currency)
    }

    /// Amount times `quantity`, saturating.
    pub fn times(&self, quantity: u32) -> Self {
        Self::new(
            self.amount_cents.saturating_mul(i64::from(quantity)),
            self.currency.clone(),
        )
    }

    /// Formatted as `USD 12.50`.
    pub fn display(&self) -> String {
        let sign = if self.amount_cents < 0 { "-" } else { "" };
        let abs = self.amount_cents.unsigned_abs();
        format!("{} {}{}.{:02}", self.currency, sign, abs / 100, abs % 100)
    }
}

/// Product card data embedded in listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: ProductId,
    pub handle: String,
    pub title: String,
    pub price: Money,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Full product detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Money,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub sizes: Vec<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl Product {
    pub fn summary(&self) -> ProductSummary {
        ProductSummary {
            id: self.id.clone(),
            handle: self.handle.clone(),
            title: self.title.clone(),
            price: self.price.clone(),
            image_url: self.images.first().cloned(),
        }
    }
}

/// One page of a product listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPage {
    pub items: Vec<ProductSummary>,
    pub page: u32,
    pub total_pages: u32,
    #[serde(default)]
    pub total: u64,
}

impl Paginated for ProductPage {
    fn item_count(&self) -> usize {
        self.items.len()
    }

    fn has_more(&self) -> bool {
        self.page < self.total_pages
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub product_count: u32,
}

/// Identity of a cart line: the same product in another size or color is
/// a separate line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartItemKey {
    pub product_id: ProductId,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
}

impl CartItem {
    pub fn key(&self) -> CartItemKey {
        CartItemKey {
            product_id: self.product_id.clone(),
            size: self.size.clone(),
            color: self.color.clone(),
        }
    }

    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// The shopper's cart as the server last reported it, or as patched by an
/// optimistic update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for Cart {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            currency: default_currency(),
        }
    }
}

impl Cart {
    /// Add an item, merging quantity into an existing line with the same key.
    pub fn add(&mut self, item: CartItem) {
        let key = item.key();
        match self.items.iter_mut().find(|i| i.key() == key) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
            None => self.items.push(item),
        }
    }

    /// Set a line's quantity. Zero removes the line.
    pub fn set_quantity(&mut self, key: &CartItemKey, quantity: u32) {
        if quantity == 0 {
            self.remove(key);
        } else if let Some(item) = self.items.iter_mut().find(|i| &i.key() == key) {
            item.quantity = quantity;
        }
    }

    pub fn remove(&mut self, key: &CartItemKey) -> bool {
        let before = self.items.len();
        self.items.retain(|i| &i.key() != key);
        before != self.items.len()
    }

    /// Total units across lines.
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn subtotal(&self) -> Money {
        let cents = self
            .items
            .iter()
            .map(|i| i.line_total().amount_cents)
            .fold(0i64, i64::saturating_add);
        Money::new(cents, self.currency.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub number: String,
    #[serde(default)]
    pub status: OrderStatus,
    pub total: Money,
    pub placed_at: DateTime<Utc>,
}

/// One page of order history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPage {
    pub items: Vec<Order>,
    pub page: u32,
    pub total_pages: u32,
}

impl Paginated for OrderPage {
    fn item_count(&self) -> usize {
        self.items.len()
    }

    fn has_more(&self) -> bool {
        self.page < self.total_pages
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub items: Vec<ProductSummary>,
    #[serde(default)]
    pub total: u64,
}

/// Page metadata for the document head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoMetadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub canonical_url: Option<String>,
    #[serde(default)]
    pub og_image: Option<String>,
    /// JSON-LD structured data.
    #[serde(default)]
    pub structured_data: Option<serde_json::Value>,
}
