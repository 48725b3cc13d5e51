//! Postgres catalog store: the system of record.
//!
//! One [`CatalogStore`] wraps the pool; repository methods are grouped by
//! aggregate across the submodules (`impl CatalogStore` blocks). All list
//! operations use offset pagination behind opaque page tokens.

mod actions;
mod deployments;
mod games;
mod logs;
mod params;
mod servers;
mod sessions;
mod strategies;
mod workshop;

pub use deployments::PortConflict;
pub use sessions::SessionFilter;

use std::time::Duration;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::retry::{with_backoff, RetryPolicy};

/// Handle to the relational catalog.
#[derive(Clone)]
pub struct CatalogStore {
    pool: PgPool,
}

impl CatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connect with the standard retry envelope.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let policy = RetryPolicy::new(5, Duration::from_secs(2));
        let pool = with_backoff("database connect", policy, || async {
            PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
                .map_err(|e| Error::transient(format!("database connect: {e}")))
        })
        .await?;
        tracing::info!(target: "manman::catalog", max_connections, "database pool created");
        Ok(Self::new(pool))
    }

    /// Apply the numbered migrations shipped with this crate.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::internal(format!("migration failed: {e}")))?;
        tracing::info!(target: "manman::catalog", "migrations applied");
        Ok(())
    }
}

/// Offset pagination resolved from a request's `page_size` / `page_token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub const MAX_PAGE_SIZE: i64 = 100;
    pub const DEFAULT_PAGE_SIZE: i64 = 50;

    /// Decode request pagination. `page_size <= 0` selects the default;
    /// sizes above the cap are clamped, not rejected.
    pub fn from_request(page_size: i32, page_token: &str) -> Result<Self> {
        let limit = match i64::from(page_size) {
            n if n <= 0 => Self::DEFAULT_PAGE_SIZE,
            n => n.min(Self::MAX_PAGE_SIZE),
        };
        let offset = decode_page_token(page_token)?;
        Ok(Self { offset, limit })
    }

    /// The token for the next page, or empty when this page was short.
    pub fn next_token(&self, returned: usize) -> String {
        if (returned as i64) < self.limit {
            String::new()
        } else {
            encode_page_token(self.offset + self.limit)
        }
    }
}

/// Tokens are versioned so the encoding can change without breaking
/// clients that treat them as opaque.
fn encode_page_token(offset: i64) -> String {
    STANDARD_NO_PAD.encode(format!("v1:{offset}"))
}

fn decode_page_token(token: &str) -> Result<i64> {
    if token.is_empty() {
        return Ok(0);
    }
    let bytes = STANDARD_NO_PAD
        .decode(token.trim_end_matches('='))
        .map_err(|_| Error::validation("malformed page token"))?;
    let text = String::from_utf8(bytes).map_err(|_| Error::validation("malformed page token"))?;
    let offset = text
        .strip_prefix("v1:")
        .and_then(|rest| rest.parse::<i64>().ok())
        .ok_or_else(|| Error::validation("malformed page token"))?;
    if offset < 0 {
        return Err(Error::validation("malformed page token"));
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_defaults_and_caps() {
        assert_eq!(Page::from_request(0, "").unwrap().limit, 50);
        assert_eq!(Page::from_request(-3, "").unwrap().limit, 50);
        assert_eq!(Page::from_request(20, "").unwrap().limit, 20);
        assert_eq!(Page::from_request(500, "").unwrap().limit, 100);
    }

    #[test]
    fn tokens_round_trip() {
        let page = Page::from_request(25, "").unwrap();
        let token = page.next_token(25);
        assert!(!token.is_empty());
        let next = Page::from_request(25, &token).unwrap();
        assert_eq!(next.offset, 25);
        assert_eq!(next.next_token(25), encode_page_token(50));
    }

    #[test]
    fn short_page_ends_iteration() {
        let page = Page::from_request(25, "").unwrap();
        assert_eq!(page.next_token(10), "");
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(Page::from_request(10, "not-a-token!!!").is_err());
        let negative = STANDARD_NO_PAD.encode("v1:-5");
        assert!(Page::from_request(10, &negative).is_err());
        let wrong_version = STANDARD_NO_PAD.encode("v2:10");
        assert!(Page::from_request(10, &wrong_version).is_err());
    }
}
