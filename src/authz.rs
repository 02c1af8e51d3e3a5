//! Role-based authorization and plan entitlements.
//!
//! The role → action table is static; there is no per-org permission storage.
//! Entitlements translate an org's billing plan into hard quotas checked
//! before state-changing operations.

use chrono::Datelike;
use diesel::dsl::count_star;
use diesel::prelude::*;
use uuid::Uuid;

use crate::error::{ApiResult, AppError};
use crate::schema::{bookings, photos, users};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Admin,
    Dispatcher,
    Finance,
    Viewer,
    Worker,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "OWNER",
            Role::Admin => "ADMIN",
            Role::Dispatcher => "DISPATCHER",
            Role::Finance => "FINANCE",
            Role::Viewer => "VIEWER",
            Role::Worker => "WORKER",
            Role::Client => "CLIENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OWNER" => Some(Role::Owner),
            "ADMIN" => Some(Role::Admin),
            "DISPATCHER" => Some(Role::Dispatcher),
            "FINANCE" => Some(Role::Finance),
            "VIEWER" => Some(Role::Viewer),
            "WORKER" => Some(Role::Worker),
            "CLIENT" => Some(Role::Client),
            _ => None,
        }
    }

    /// Deterministic ordering for "highest privilege wins" when a request
    /// presents multiple credentials.
    pub fn rank(&self) -> u8 {
        match self {
            Role::Owner => 6,
            Role::Admin => 5,
            Role::Dispatcher => 4,
            Role::Finance => 3,
            Role::Viewer => 2,
            Role::Worker => 1,
            Role::Client => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    BookingRead,
    BookingWrite,
    InvoiceRead,
    InvoiceWrite,
    LeadRead,
    LeadWrite,
    PhotoRead,
    PhotoWrite,
    TimeTrack,
    IamManage,
    OutboxManage,
    ConfigRead,
    FlagsWrite,
    BreakGlass,
    JobsRead,
    PricingReload,
    RetentionRun,
}

/// The static permission table.
pub fn allows(role: Role, action: Action) -> bool {
    use Action::*;
    use Role::*;

    match role {
        Owner | Admin => true,
        Dispatcher => matches!(
            action,
            BookingRead | BookingWrite | LeadRead | LeadWrite | PhotoRead | PhotoWrite | JobsRead
        ),
        Finance => matches!(action, BookingRead | InvoiceRead | InvoiceWrite | LeadRead),
        Viewer => matches!(action, BookingRead | InvoiceRead | LeadRead | PhotoRead),
        Worker => matches!(action, BookingRead | PhotoRead | PhotoWrite | TimeTrack),
        Client => matches!(action, BookingRead | PhotoRead | InvoiceRead),
    }
}

pub fn require(role: Role, action: Action) -> ApiResult<()> {
    if allows(role, action) {
        Ok(())
    } else {
        Err(AppError::forbidden("Role is not permitted to do this"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Free,
    Standard,
    Pro,
}

impl Plan {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Plan::Standard,
            "pro" => Plan::Pro,
            _ => Plan::Free,
        }
    }

    pub fn entitlements(&self) -> Entitlements {
        match self {
            Plan::Free => Entitlements {
                max_users: 3,
                max_bookings_per_month: 50,
                max_storage_bytes: 512 * 1024 * 1024,
            },
            Plan::Standard => Entitlements {
                max_users: 15,
                max_bookings_per_month: 1000,
                max_storage_bytes: 10 * 1024 * 1024 * 1024,
            },
            Plan::Pro => Entitlements {
                max_users: 100,
                max_bookings_per_month: 20_000,
                max_storage_bytes: 100 * 1024 * 1024 * 1024,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Entitlements {
    pub max_users: i64,
    pub max_bookings_per_month: i64,
    pub max_storage_bytes: i64,
}

/// Quota gates. Each runs inside the caller's transaction so the count and
/// the insert it guards see the same snapshot.
pub fn check_user_quota(conn: &mut PgConnection, org_id: Uuid, plan: Plan) -> ApiResult<()> {
    let current: i64 = users::table
        .filter(users::org_id.eq(org_id))
        .filter(users::is_active.eq(true))
        .select(count_star())
        .first(conn)
        .map_err(AppError::from_diesel)?;

    if current >= plan.entitlements().max_users {
        return Err(AppError::plan_limit("User limit reached for this plan"));
    }
    Ok(())
}

pub fn check_booking_quota(conn: &mut PgConnection, org_id: Uuid, plan: Plan) -> ApiResult<()> {
    let month_start = {
        let now = chrono::Utc::now().naive_utc();
        now.date()
            .with_day(1)
            .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or(now))
            .unwrap_or(now)
    };

    let current: i64 = bookings::table
        .filter(bookings::org_id.eq(org_id))
        .filter(bookings::created_at.ge(month_start))
        .select(count_star())
        .first(conn)
        .map_err(AppError::from_diesel)?;

    if current >= plan.entitlements().max_bookings_per_month {
        return Err(AppError::plan_limit(
            "Monthly booking limit reached for this plan",
        ));
    }
    Ok(())
}

pub fn check_storage_quota(
    conn: &mut PgConnection,
    org_id: Uuid,
    plan: Plan,
    incoming_bytes: i64,
) -> ApiResult<()> {
    use diesel::dsl::sql;
    use diesel::sql_types::{BigInt, Nullable};

    let used: Option<i64> = photos::table
        .filter(photos::org_id.eq(org_id))
        .select(sql::<Nullable<BigInt>>("CAST(SUM(size_bytes) AS BIGINT)"))
        .first(conn)
        .map_err(AppError::from_diesel)?;

    if used.unwrap_or(0) + incoming_bytes > plan.entitlements().max_storage_bytes {
        return Err(AppError::plan_limit("Storage limit reached for this plan"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_round_trip() {
        for role in [
            Role::Owner,
            Role::Admin,
            Role::Dispatcher,
            Role::Finance,
            Role::Viewer,
            Role::Worker,
            Role::Client,
        ] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("janitor"), None);
    }

    #[test]
    fn test_privilege_ordering() {
        assert!(Role::Owner.rank() > Role::Admin.rank());
        assert!(Role::Admin.rank() > Role::Dispatcher.rank());
        assert!(Role::Worker.rank() > Role::Client.rank());
    }

    #[test]
    fn test_owner_and_admin_allow_everything() {
        assert!(allows(Role::Owner, Action::IamManage));
        assert!(allows(Role::Admin, Action::BreakGlass));
        assert!(allows(Role::Admin, Action::OutboxManage));
    }

    #[test]
    fn test_dispatcher_cannot_touch_invoices_or_iam() {
        assert!(allows(Role::Dispatcher, Action::BookingWrite));
        assert!(!allows(Role::Dispatcher, Action::InvoiceWrite));
        assert!(!allows(Role::Dispatcher, Action::IamManage));
    }

    #[test]
    fn test_finance_is_invoice_scoped() {
        assert!(allows(Role::Finance, Action::InvoiceWrite));
        assert!(!allows(Role::Finance, Action::BookingWrite));
        assert!(!allows(Role::Finance, Action::PhotoWrite));
    }

    #[test]
    fn test_viewer_is_read_only() {
        assert!(allows(Role::Viewer, Action::BookingRead));
        assert!(!allows(Role::Viewer, Action::BookingWrite));
        assert!(!allows(Role::Viewer, Action::FlagsWrite));
    }

    #[test]
    fn test_worker_time_tracking() {
        assert!(allows(Role::Worker, Action::TimeTrack));
        assert!(allows(Role::Worker, Action::PhotoWrite));
        assert!(!allows(Role::Worker, Action::InvoiceRead));
    }

    #[test]
    fn test_plan_quotas_scale() {
        assert!(Plan::Free.entitlements().max_users < Plan::Standard.entitlements().max_users);
        assert!(
            Plan::Standard.entitlements().max_bookings_per_month
                < Plan::Pro.entitlements().max_bookings_per_month
        );
    }

    #[test]
    fn test_unknown_plan_defaults_to_free() {
        assert_eq!(Plan::parse("enterprise-gold"), Plan::Free);
        assert_eq!(Plan::parse("PRO"), Plan::Pro);
    }
}
