//! Cart writes with optimistic updates.
//!
//! Each write patches `cart::current` immediately, sends the request, and
//! rolls back on failure. Afterwards everything under `cart::all` is
//! invalidated so the count badge and cart page reconcile with the server.

use std::sync::Arc;

use http::Method;
use serde::{Deserialize, Serialize};
use turbo_query::{keys, Mutation, QueryClient, QueryError};

use crate::models::{Cart, CartItem, CartItemKey};
use crate::transport::Transport;

/// New quantity for one cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityUpdate {
    #[serde(flatten)]
    pub key: CartItemKey,
    pub quantity: u32,
}

/// Send a cart write and store the server's cart on success.
async fn send_cart<B: Serialize>(
    transport: Arc<dyn Transport>,
    client: QueryClient,
    method: Method,
    path: &'static str,
    body: B,
) -> Result<Cart, QueryError> {
    let body = serde_json::to_value(&body)?;
    let value = transport.send_json(method, path, body).await?;
    let cart: Cart = serde_json::from_value(value)?;
    client.set_query_data(&keys::cart::current(), cart.clone());
    Ok(cart)
}

/// The cart writes a storefront needs.
#[derive(Debug, Clone)]
pub struct CartMutations {
    add: Mutation<CartItem, Cart>,
    update: Mutation<QuantityUpdate, Cart>,
    remove: Mutation<CartItemKey, Cart>,
    clear: Mutation<(), Cart>,
}

impl CartMutations {
    pub fn new(client: &QueryClient, transport: Arc<dyn Transport>) -> Self {
        let add = {
            let (transport, writer) = (Arc::clone(&transport), client.clone());
            Mutation::new(client, move |item: CartItem| {
                send_cart(Arc::clone(&transport), writer.clone(), Method::POST, "/cart/items", item)
            })
            .with_optimistic_update(
                |_: &CartItem| keys::cart::current(),
                |cart: Option<&Cart>, item: &CartItem| {
                    let mut cart = cart.cloned().unwrap_or_default();
                    cart.add(item.clone());
                    cart
                },
            )
            .invalidates(keys::cart::all())
        };

        let update = {
            let (transport, writer) = (Arc::clone(&transport), client.clone());
            Mutation::new(client, move |update: QuantityUpdate| {
                send_cart(Arc::clone(&transport), writer.clone(), Method::PATCH, "/cart/items", update)
            })
            .with_optimistic_update(
                |_: &QuantityUpdate| keys::cart::current(),
                |cart: Option<&Cart>, update: &QuantityUpdate| {
                    let mut cart = cart.cloned().unwrap_or_default();
                    cart.set_quantity(&update.key, update.quantity);
                    cart
                },
            )
            .invalidates(keys::cart::all())
        };

        let remove = {
            let (transport, writer) = (Arc::clone(&transport), client.clone());
            Mutation::new(client, move |key: CartItemKey| {
                send_cart(Arc::clone(&transport), writer.clone(), Method::DELETE, "/cart/items", key)
            })
            .with_optimistic_update(
                |_: &CartItemKey| keys::cart::current(),
                |cart: Option<&Cart>, key: &CartItemKey| {
                    let mut cart = cart.cloned().unwrap_or_default();
                    cart.remove(key);
                    cart
                },
            )
            .invalidates(keys::cart::all())
        };

        let clear = {
            let (transport, writer) = (Arc::clone(&transport), client.clone());
            Mutation::new(client, move |_: ()| {
                send_cart(
                    Arc::clone(&transport),
                    writer.clone(),
                    Method::DELETE,
                    "/cart",
                    serde_json::Value::Null,
                )
            })
            .with_optimistic_update(
                |_: &()| keys::cart::current(),
                |cart: Option<&Cart>, _: &()| {
                    let mut cart = cart.cloned().unwrap_or_default();
                    cart.items.clear();
                    cart
                },
            )
            .invalidates(keys::cart::all())
        };

        Self {
            add,
            update,
            remove,
            clear,
        }
    }

    pub async fn add_item(&self, item: CartItem) -> Result<Cart, QueryError> {
        self.add.mutate_async(item).await
    }

    /// Set a line's quantity. Zero removes the line.
    pub async fn update_quantity(&self, key: CartItemKey, quantity: u32) -> Result<Cart, QueryError> {
        self.update.mutate_async(QuantityUpdate { key, quantity }).await
    }

    pub async fn remove_item(&self, key: CartItemKey) -> Result<Cart, QueryError> {
        self.remove.mutate_async(key).await
    }

    pub async fn clear(&self) -> Result<Cart, QueryError> {
        self.clear.mutate_async(()).await
    }

    /// Whether any cart write is in flight.
    pub fn is_pending(&self) -> bool {
        self.add.is_pending()
            || self.update.is_pending()
            || self.remove.is_pending()
            || self.clear.is_pending()
    }
}
