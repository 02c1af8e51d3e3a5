//! Database helpers: tenant-scoped transactions.

use diesel::prelude::*;
use diesel::sql_types::Text;
use uuid::Uuid;

use crate::error::{ApiResult, AppError};

/// Runs `f` inside a transaction with the Postgres transaction-local
/// variable `app.current_org_id` set, so row-level policies can act as a
/// safety net. Explicit `org_id` predicates in every query remain mandatory;
/// this is defense in depth, not the primary isolation mechanism.
pub fn org_transaction<T, F>(conn: &mut PgConnection, org_id: Uuid, f: F) -> ApiResult<T>
where
    F: FnOnce(&mut PgConnection) -> ApiResult<T>,
{
    conn.transaction(|conn| {
        diesel::sql_query("SELECT set_config('app.current_org_id', $1, true)")
            .bind::<Text, _>(org_id.to_string())
            .execute(conn)
            .map_err(AppError::from_diesel)?;
        f(conn)
    })
}

/// Same shape without the org variable, for global tables (organizations,
/// job heartbeats) and the webhook path where the org is derived mid-flight.
pub fn transaction<T, F>(conn: &mut PgConnection, f: F) -> ApiResult<T>
where
    F: FnOnce(&mut PgConnection) -> ApiResult<T>,
{
    conn.transaction(f)
}
