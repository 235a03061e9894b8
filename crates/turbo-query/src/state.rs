//! Observable query state.

use serde::Serialize;
use turbo_cache::Timestamp;

use crate::error::QueryError;

/// Coarse status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// No data and no error yet.
    Pending,
    /// Data is available. It may be stale.
    Success,
    /// The last fetch failed and there is no data to show.
    Error,
}

/// Snapshot of one query as a view would render it.
///
/// `data` and `error` can both be set: a failed background refetch keeps
/// the last good data alongside the error.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub error: Option<QueryError>,
    /// No data yet and a fetch is in flight.
    pub is_loading: bool,
    /// Any fetch is in flight, including background revalidation.
    pub is_fetching: bool,
    /// Data is older than its stale time or was invalidated.
    pub is_stale: bool,
    pub data_updated_at: Option<Timestamp>,
}

impl<T> QueryState<T> {
    /// State of a key the cache has never seen.
    pub fn idle() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
            is_fetching: false,
            is_stale: true,
            data_updated_at: None,
        }
    }

    pub fn status(&self) -> QueryStatus {
        match (&self.data, &self.error) {
            (Some(_), _) => QueryStatus::Success,
            (None, Some(_)) => QueryStatus::Error,
            (None, None) => QueryStatus::Pending,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Map the data, keeping flags and error.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryState<U> {
        QueryState {
            data: self.data.map(f),
            error: self.error,
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            data_updated_at: self.data_updated_at,
        }
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self::idle()
    }
}
