//! Lead intake, referral codes, and the credit pipeline.

use diesel::prelude::*;
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiResult, AppError};
use crate::models::{Lead, NewLead, NewReferralCredit, ReferralCredit};
use crate::outbox::{self, KIND_EXPORT_WEBHOOK};
use crate::schema::{leads, referral_credits};

pub const STATUS_NEW: &str = "NEW";
pub const STATUS_CONTACTED: &str = "CONTACTED";
pub const STATUS_BOOKED: &str = "BOOKED";
pub const STATUS_DONE: &str = "DONE";
pub const STATUS_CANCELLED: &str = "CANCELLED";

pub const REFERRAL_CODE_LEN: usize = 8;
pub const DEFAULT_REFERRAL_CREDIT_CENTS: i64 = 2_500;

/// Characters that survive phone readouts: no 0/O, no 1/I/L.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub fn generate_referral_code() -> String {
    let mut rng = rand::thread_rng();
    (0..REFERRAL_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Case-normalizes a user-supplied referral code.
pub fn normalize_referral_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Structural validation of the opaque estimate snapshot: it must be an
/// object carrying a non-negative total and a positive time on site.
pub fn validate_estimate_snapshot(snapshot: &serde_json::Value) -> ApiResult<()> {
    let obj = snapshot
        .as_object()
        .ok_or_else(|| AppError::validation("estimate_snapshot must be an object"))?;

    let total = obj
        .get("total_before_tax_cents")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| AppError::validation("estimate_snapshot.total_before_tax_cents is required"))?;
    if total < 0 {
        return Err(AppError::validation("estimate_snapshot total cannot be negative"));
    }

    let hours = obj
        .get("time_on_site_hours")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| AppError::validation("estimate_snapshot.time_on_site_hours is required"))?;
    if !(0.0..=24.0).contains(&hours) {
        return Err(AppError::validation("estimate_snapshot.time_on_site_hours is out of range"));
    }

    Ok(())
}

pub struct LeadIntake {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub structured_inputs: serde_json::Value,
    pub estimate_snapshot: serde_json::Value,
    pub referred_by_code: Option<String>,
}

/// Creates a lead: validates the snapshot, resolves the referring lead,
/// issues a fresh unique referral code, opens a PENDING credit for the
/// referrer, and enqueues the export event — all in the caller's
/// transaction.
pub fn create_lead(conn: &mut PgConnection, org_id: Uuid, intake: LeadIntake) -> ApiResult<Lead> {
    validate_estimate_snapshot(&intake.estimate_snapshot)?;

    let referred_by = match &intake.referred_by_code {
        Some(code) => {
            let normalized = normalize_referral_code(code);
            let referrer: Option<Uuid> = leads::table
                .filter(leads::org_id.eq(org_id))
                .filter(leads::referral_code.eq(&normalized))
                .select(leads::id)
                .first(conn)
                .optional()?;
            Some(referrer.ok_or_else(|| AppError::validation("Unknown referral code"))?)
        }
        None => None,
    };

    // Codes are unique per org; retry on the rare collision.
    let mut lead: Option<Lead> = None;
    for _ in 0..5 {
        let code = generate_referral_code();
        let inserted: Result<Lead, diesel::result::Error> = diesel::insert_into(leads::table)
            .values(&NewLead {
                org_id,
                name: intake.name.clone(),
                phone: intake.phone.clone(),
                email: intake.email.clone(),
                address: intake.address.clone(),
                structured_inputs: intake.structured_inputs.clone(),
                estimate_snapshot: intake.estimate_snapshot.clone(),
                referral_code: code,
                referred_by,
                status: STATUS_NEW.to_string(),
            })
            .returning(Lead::as_returning())
            .get_result(conn);

        match inserted {
            Ok(row) => {
                lead = Some(row);
                break;
            }
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => continue,
            Err(e) => return Err(AppError::from_diesel(e)),
        }
    }

    let lead = lead.ok_or_else(|| AppError::internal("Could not allocate a referral code"))?;

    if let Some(referrer_id) = referred_by {
        diesel::insert_into(referral_credits::table)
            .values(&NewReferralCredit {
                org_id,
                beneficiary_lead_id: referrer_id,
                source_lead_id: lead.id,
                amount_cents: DEFAULT_REFERRAL_CREDIT_CENTS,
                state: "PENDING".to_string(),
            })
            .execute(conn)?;
    }

    outbox::enqueue(
        conn,
        org_id,
        KIND_EXPORT_WEBHOOK,
        &format!("lead_export:{}", lead.id),
        serde_json::json!({
            "payload": {
                "lead_id": lead.id.to_string(),
                "status": lead.status,
                "created_at": lead.created_at.to_string(),
            }
        }),
    )?;

    info!(lead_id = %lead.id, "Lead created");
    Ok(lead)
}

pub fn get(conn: &mut PgConnection, org_id: Uuid, lead_id: Uuid) -> ApiResult<Lead> {
    leads::table
        .filter(leads::id.eq(lead_id))
        .filter(leads::org_id.eq(org_id))
        .select(Lead::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Lead not found"))
}

pub fn list(
    conn: &mut PgConnection,
    org_id: Uuid,
    limit: i64,
    offset: i64,
) -> ApiResult<(Vec<Lead>, i64)> {
    let rows = leads::table
        .filter(leads::org_id.eq(org_id))
        .order(leads::created_at.desc())
        .limit(limit)
        .offset(offset)
        .select(Lead::as_select())
        .load(conn)?;

    let total: i64 = leads::table
        .filter(leads::org_id.eq(org_id))
        .count()
        .get_result(conn)?;

    Ok((rows, total))
}

const LEAD_TRANSITIONS: &[(&str, &str)] = &[
    (STATUS_NEW, STATUS_CONTACTED),
    (STATUS_NEW, STATUS_BOOKED),
    (STATUS_NEW, STATUS_CANCELLED),
    (STATUS_CONTACTED, STATUS_BOOKED),
    (STATUS_CONTACTED, STATUS_CANCELLED),
    (STATUS_BOOKED, STATUS_DONE),
    (STATUS_BOOKED, STATUS_CANCELLED),
];

pub fn set_status(
    conn: &mut PgConnection,
    org_id: Uuid,
    lead_id: Uuid,
    new_status: &str,
) -> ApiResult<Lead> {
    let lead = get(conn, org_id, lead_id)?;

    let allowed = LEAD_TRANSITIONS
        .iter()
        .any(|(from, to)| *from == lead.status && *to == new_status);
    if !allowed {
        return Err(AppError::conflict(format!(
            "Lead cannot move from {} to {}",
            lead.status, new_status
        ))
        .with_subtype("status-transition"));
    }

    diesel::update(leads::table.find(lead.id))
        .set((
            leads::status.eq(new_status),
            leads::updated_at.eq(chrono::Utc::now().naive_utc()),
        ))
        .returning(Lead::as_returning())
        .get_result(conn)
        .map_err(AppError::from_diesel)
}

pub fn credits_for_lead(
    conn: &mut PgConnection,
    org_id: Uuid,
    lead_id: Uuid,
) -> ApiResult<Vec<ReferralCredit>> {
    referral_credits::table
        .filter(referral_credits::org_id.eq(org_id))
        .filter(referral_credits::beneficiary_lead_id.eq(lead_id))
        .select(ReferralCredit::as_select())
        .load(conn)
        .map_err(AppError::from_diesel)
}
