use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::organizations)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub billing_plan: String,
    pub is_default: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::organizations)]
pub struct NewOrganization {
    pub id: Uuid,
    pub name: String,
    pub billing_plan: String,
    pub is_default: bool,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::users)]
pub struct User {
    pub id: Uuid,
    pub org_id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub must_change_password: bool,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUser {
    pub org_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub must_change_password: bool,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::memberships)]
pub struct Membership {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::memberships)]
pub struct NewMembership {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
}

#[derive(Debug, Queryable, Selectable, Clone)]
#[diesel(table_name = crate::schema::sessions)]
pub struct Session {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub access_jti: Uuid,
    pub refresh_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub refresh_expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub revoked_reason: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::sessions)]
pub struct NewSession {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub access_jti: Uuid,
    pub refresh_hash: String,
    pub expires_at: NaiveDateTime,
    pub refresh_expires_at: NaiveDateTime,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, ToSchema)]
#[diesel(table_name = crate::schema::leads)]
pub struct Lead {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub org_id: Uuid,
    #[schema(example = "Dana Miles")]
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub structured_inputs: serde_json::Value,
    pub estimate_snapshot: serde_json::Value,
    #[schema(example = "Q7MKP2RD")]
    pub referral_code: String,
    pub referred_by: Option<Uuid>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::leads)]
pub struct NewLead {
    pub org_id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub structured_inputs: serde_json::Value,
    pub estimate_snapshot: serde_json::Value,
    pub referral_code: String,
    pub referred_by: Option<Uuid>,
    pub status: String,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, ToSchema)]
#[diesel(table_name = crate::schema::teams)]
pub struct Team {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub org_id: Uuid,
    #[schema(example = "Crew A")]
    pub name: String,
    pub work_start_hour: i32,
    pub work_end_hour: i32,
    pub blackout_dates: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::teams)]
pub struct NewTeam {
    pub org_id: Uuid,
    pub name: String,
    pub work_start_hour: i32,
    pub work_end_hour: i32,
    pub blackout_dates: serde_json::Value,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, ToSchema)]
#[diesel(table_name = crate::schema::bookings)]
pub struct Booking {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub org_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub team_id: Uuid,
    pub starts_at: NaiveDateTime,
    pub duration_minutes: i32,
    #[schema(example = "CONFIRMED")]
    pub status: String,
    pub deposit_required: bool,
    pub deposit_cents: Option<i64>,
    pub deposit_reasons: serde_json::Value,
    #[serde(skip_serializing)]
    pub checkout_session_id: Option<String>,
    pub deposit_paid_at: Option<NaiveDateTime>,
    pub actual_duration_minutes: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct NewBooking {
    pub org_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub team_id: Uuid,
    pub starts_at: NaiveDateTime,
    pub duration_minutes: i32,
    pub status: String,
    pub deposit_required: bool,
    pub deposit_cents: Option<i64>,
    pub deposit_reasons: serde_json::Value,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, ToSchema)]
#[diesel(table_name = crate::schema::invoices)]
pub struct Invoice {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub org_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    #[schema(example = "INV-2025-000042")]
    pub number: String,
    pub status: String,
    pub currency: String,
    pub issued_at: Option<NaiveDateTime>,
    pub due_at: Option<NaiveDateTime>,
    #[serde(skip_serializing)]
    pub public_token_hash: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::invoices)]
pub struct NewInvoice {
    pub org_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub number: String,
    pub status: String,
    pub currency: String,
    pub due_at: Option<NaiveDateTime>,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, ToSchema)]
#[diesel(table_name = crate::schema::invoice_items)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    #[serde(skip_serializing)]
    pub org_id: Uuid,
    pub description: String,
    pub qty: i32,
    pub unit_price_cents: i64,
    pub tax_rate_bp: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::invoice_items)]
pub struct NewInvoiceItem {
    pub invoice_id: Uuid,
    pub org_id: Uuid,
    pub description: String,
    pub qty: i32,
    pub unit_price_cents: i64,
    pub tax_rate_bp: i32,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, ToSchema)]
#[diesel(table_name = crate::schema::invoice_payments)]
pub struct InvoicePayment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    #[serde(skip_serializing)]
    pub org_id: Uuid,
    pub amount_cents: i64,
    pub method: String,
    pub received_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::invoice_payments)]
pub struct NewInvoicePayment {
    pub invoice_id: Uuid,
    pub org_id: Uuid,
    pub amount_cents: i64,
    pub method: String,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub kind: String,
    pub dedupe_key: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub next_attempt_at: Option<NaiveDateTime>,
    pub lease_worker: Option<String>,
    pub lease_expires_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub delivered_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub org_id: Uuid,
    pub kind: String,
    pub dedupe_key: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub next_attempt_at: Option<NaiveDateTime>,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, ToSchema)]
#[diesel(table_name = crate::schema::photos)]
pub struct Photo {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub org_id: Uuid,
    pub booking_id: Uuid,
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub mime: String,
    pub size_bytes: i64,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::photos)]
pub struct NewPhoto {
    pub org_id: Uuid,
    pub booking_id: Uuid,
    pub storage_key: String,
    pub mime: String,
    pub size_bytes: i64,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::referral_credits)]
pub struct ReferralCredit {
    pub id: Uuid,
    pub org_id: Uuid,
    pub beneficiary_lead_id: Uuid,
    pub source_lead_id: Uuid,
    pub amount_cents: i64,
    pub state: String,
    pub created_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::referral_credits)]
pub struct NewReferralCredit {
    pub org_id: Uuid,
    pub beneficiary_lead_id: Uuid,
    pub source_lead_id: Uuid,
    pub amount_cents: i64,
    pub state: String,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::job_heartbeats)]
pub struct JobHeartbeat {
    pub job_name: String,
    pub last_beat_at: NaiveDateTime,
    pub last_success_at: Option<NaiveDateTime>,
    pub consecutive_failures: i32,
}

#[derive(Debug, Queryable, Selectable, Clone)]
#[diesel(table_name = crate::schema::admin_idempotency)]
pub struct AdminIdempotency {
    pub id: Uuid,
    pub org_id: Uuid,
    pub idem_key: String,
    pub method: String,
    pub path: String,
    pub body_hash: String,
    pub response_status: i32,
    pub response_body: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::admin_idempotency)]
pub struct NewAdminIdempotency {
    pub org_id: Uuid,
    pub idem_key: String,
    pub method: String,
    pub path: String,
    pub body_hash: String,
    pub response_status: i32,
    pub response_body: serde_json::Value,
}

#[derive(Debug, Queryable, Selectable, Clone)]
#[diesel(table_name = crate::schema::payment_events)]
pub struct PaymentEvent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub provider_event_id: String,
    pub kind: String,
    pub booking_id: Option<Uuid>,
    pub result: String,
    pub received_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::payment_events)]
pub struct NewPaymentEvent {
    pub org_id: Uuid,
    pub provider_event_id: String,
    pub kind: String,
    pub booking_id: Option<Uuid>,
    pub result: String,
}

#[derive(Debug, Queryable, Selectable, Clone)]
#[diesel(table_name = crate::schema::break_glass_tokens)]
pub struct BreakGlassToken {
    pub id: Uuid,
    pub org_id: Uuid,
    pub token_hash: String,
    pub reason: String,
    pub issued_by: Uuid,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::break_glass_tokens)]
pub struct NewBreakGlassToken {
    pub org_id: Uuid,
    pub token_hash: String,
    pub reason: String,
    pub issued_by: Uuid,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = crate::schema::feature_flags)]
pub struct FeatureFlag {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub org_id: Uuid,
    pub flag: String,
    pub enabled: bool,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::feature_flags)]
pub struct NewFeatureFlag {
    pub org_id: Uuid,
    pub flag: String,
    pub enabled: bool,
}

#[derive(Debug, Queryable, Selectable, Clone)]
#[diesel(table_name = crate::schema::email_log)]
pub struct EmailLogEntry {
    pub id: Uuid,
    pub org_id: Uuid,
    pub dedupe_key: String,
    pub booking_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub email_type: String,
    pub sent_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::email_log)]
pub struct NewEmailLogEntry {
    pub org_id: Uuid,
    pub dedupe_key: String,
    pub booking_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub email_type: String,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, ToSchema)]
#[diesel(table_name = crate::schema::time_entries)]
pub struct TimeEntry {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub org_id: Uuid,
    pub booking_id: Uuid,
    pub worker_id: Uuid,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::time_entries)]
pub struct NewTimeEntry {
    pub org_id: Uuid,
    pub booking_id: Uuid,
    pub worker_id: Uuid,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::audit_events)]
pub struct NewAuditEvent {
    pub org_id: Option<Uuid>,
    pub actor: String,
    pub event: String,
    pub request_id: Option<String>,
    pub detail: serde_json::Value,
}
