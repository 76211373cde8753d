//! Read-only reference data.
//!
//! The `state_zips` table maps a U.S. state code to its zip codes. It is
//! owned and seeded externally; this module only reads it.

use crate::db::DbContext;
use crate::error::Result;

pub struct ReferenceOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> ReferenceOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Zip codes for a state, in ascending order.
    ///
    /// The ordering matters: expansion emits queries in (zip, page) order
    /// and the claim protocol selects the lowest rows first.
    pub async fn zips_for_state(&self, state: &str) -> Result<Vec<String>> {
        let zips = sqlx::query_scalar::<_, String>(
            "SELECT zip FROM state_zips WHERE state = $1 ORDER BY zip ASC",
        )
        .bind(state)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(zips)
    }
}
