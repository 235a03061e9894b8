//! Storefront routes.

use std::fmt;
use std::str::FromStr;

use url::form_urlencoded;

use crate::error::StorefrontError;

/// A page of the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Collections,
    Collection { handle: String },
    Product { handle: String },
    Cart,
    Search { query: String },
    Account,
    Orders,
}

impl Route {
    /// Parse an href such as `/products/tee?ref=home`.
    ///
    /// Trailing slashes and fragments are ignored. Query strings are ignored
    /// except `q` on `/search`, which is form-decoded.
    pub fn parse(href: &str) -> Result<Self, StorefrontError> {
        let unknown = || StorefrontError::UnknownRoute(href.to_string());

        let without_fragment = href.split('#').next().unwrap_or_default().trim();
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (without_fragment, None),
        };
        if !path.starts_with('/') {
            return Err(unknown());
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let route = match segments.as_slice() {
            [] => Route::Home,
            ["collections"] => Route::Collections,
            ["collections", handle] => Route::Collection {
                handle: handle.to_string(),
            },
            ["products", handle] => Route::Product {
                handle: handle.to_string(),
            },
            ["cart"] => Route::Cart,
            ["search"] => Route::Search {
                query: query.and_then(search_term).unwrap_or_default(),
            },
            ["account"] => Route::Account,
            ["account", "orders"] => Route::Orders,
            _ => return Err(unknown()),
        };
        Ok(route)
    }

    /// Canonical href for the route.
    pub fn href(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Collections => "/collections".to_string(),
            Route::Collection { handle } => format!("/collections/{}", handle),
            Route::Product { handle } => format!("/products/{}", handle),
            Route::Cart => "/cart".to_string(),
            Route::Search { query } if query.is_empty() => "/search".to_string(),
            Route::Search { query } => {
                let encoded = form_urlencoded::Serializer::new(String::new())
                    .append_pair("q", query)
                    .finish();
                format!("/search?{}", encoded)
            }
            Route::Account => "/account".to_string(),
            Route::Orders => "/account/orders".to_string(),
        }
    }

    /// Whether the route shows data private to the signed-in shopper.
    pub fn is_private(&self) -> bool {
        matches!(self, Route::Cart | Route::Account | Route::Orders)
    }
}

fn search_term(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == "q")
        .map(|(_, value)| value.trim().to_string())
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href())
    }
}

impl FromStr for Route {
    type Err = StorefrontError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Route::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_routes() {
        assert_eq!(Route::parse("/").unwrap(), Route::Home);
        assert_eq!(Route::parse("/collections/").unwrap(), Route::Collections);
        assert_eq!(
            Route::parse("/products/linen-shirt?ref=home#reviews").unwrap(),
            Route::Product {
                handle: "linen-shirt".into()
            }
        );
        assert_eq!(Route::parse("/account/orders").unwrap(), Route::Orders);
    }

    #[test]
    fn test_search_query() {
        let route: Route = "/search?page=2&q=summer+dress".parse().unwrap();
        assert_eq!(
            route,
            Route::Search {
                query: "summer dress".into()
            }
        );
        assert_eq!(route.href(), "/search?q=summer+dress");
        assert_eq!(Route::parse("/search").unwrap().href(), "/search");
    }

    #[test]
    fn test_search_query_is_percent_decoded() {
        let spaced = Route::parse("/search?q=summer%20dress").unwrap();
        assert_eq!(spaced, Route::parse("/search?q=summer+dress").unwrap());
        assert_eq!(spaced.href(), "/search?q=summer+dress");
    }

    #[test]
    fn test_search_href_escapes_separators() {
        let route = Route::Search {
            query: "socks & shoes #1".into(),
        };
        assert_eq!(route.href(), "/search?q=socks+%26+shoes+%231");
        assert_eq!(Route::parse(&route.href()).unwrap(), route);
    }

    #[test]
    fn test_unknown_routes() {
        assert!(Route::parse("/products").is_err());
        assert!(Route::parse("/products/a/b").is_err());
        assert!(Route::parse("products/tee").is_err());
        assert!(matches!(
            Route::parse("/legal/terms"),
            Err(StorefrontError::UnknownRoute(_))
        ));
    }

    #[test]
    fn test_href_round_trips_through_parse() {
        for href in ["/", "/collections/summer", "/products/tee", "/cart", "/account"] {
            assert_eq!(Route::parse(href).unwrap().href(), href);
        }
    }

    #[test]
    fn test_private_routes() {
        assert!(Route::Cart.is_private());
        assert!(!Route::Home.is_private());
    }
}
