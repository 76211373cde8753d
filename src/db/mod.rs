//! Typed interface over the durable store.
//!
//! All SQL lives in this module's operation groups; the rest of the crate
//! only sees [`DbContext`] and the row structs in [`models`].

pub mod jobs;
pub mod models;
pub mod places;
pub mod queries;
pub mod reference;

use crate::config::Config;
use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use self::jobs::JobOps;
use self::places::PlaceOps;
use self::queries::QueryOps;
use self::reference::ReferenceOps;

/// Database context wrapping the connection pool.
///
/// Constructed once in the entrypoint and passed by clone; operation groups
/// borrow it so no component holds SQL of its own.
#[derive(Clone)]
pub struct DbContext {
    pool: PgPool,
}

impl DbContext {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and apply pending migrations.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|e| crate::error::Error::StorageInvariant(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Get the underlying database pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Job record operations.
    pub fn jobs(&self) -> JobOps<'_> {
        JobOps::new(self)
    }

    /// Queue protocol operations over query rows.
    pub fn queries(&self) -> QueryOps<'_> {
        QueryOps::new(self)
    }

    /// Place row operations.
    pub fn places(&self) -> PlaceOps<'_> {
        PlaceOps::new(self)
    }

    /// Read-only reference data.
    pub fn reference(&self) -> ReferenceOps<'_> {
        ReferenceOps::new(self)
    }
}
