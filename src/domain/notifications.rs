//! Customer email composition and deduplication.
//!
//! Emails are never sent inline; they become outbox rows. Deduplication is a
//! synthetic key over `(booking, invoice, email_type)` with `-` standing in
//! for NULL, so the same logical email cannot be enqueued twice regardless
//! of the store's NULL semantics.

use diesel::prelude::*;
use uuid::Uuid;

use crate::email::EmailMessage;
use crate::error::ApiResult;
use crate::models::NewEmailLogEntry;
use crate::outbox::{self, KIND_EMAIL};
use crate::schema::email_log;

pub const EMAIL_BOOKING_PENDING: &str = "booking_pending";
pub const EMAIL_BOOKING_CONFIRMED: &str = "booking_confirmed";
pub const EMAIL_BOOKING_REMINDER: &str = "booking_reminder";
pub const EMAIL_BOOKING_CANCELLED: &str = "booking_cancelled";
pub const EMAIL_INVOICE_SENT: &str = "invoice_sent";
pub const EMAIL_INVOICE_OVERDUE: &str = "invoice_overdue";

/// `b:<id|->|i:<id|->|t:<type>`; doubles as the outbox dedupe key.
pub fn dedupe_key(booking_id: Option<Uuid>, invoice_id: Option<Uuid>, email_type: &str) -> String {
    format!(
        "b:{}|i:{}|t:{}",
        booking_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
        invoice_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
        email_type
    )
}

/// Enqueues one logical email exactly once. A duplicate call within the
/// retention window is a no-op thanks to the unique `(org, dedupe_key)`
/// constraints on both tables.
#[allow(clippy::too_many_arguments)]
pub fn enqueue_email(
    conn: &mut PgConnection,
    org_id: Uuid,
    booking_id: Option<Uuid>,
    invoice_id: Option<Uuid>,
    email_type: &str,
    recipient: &str,
    subject: &str,
    body: &str,
) -> ApiResult<()> {
    let key = dedupe_key(booking_id, invoice_id, email_type);

    let logged = diesel::insert_into(email_log::table)
        .values(&NewEmailLogEntry {
            org_id,
            dedupe_key: key.clone(),
            booking_id,
            invoice_id,
            email_type: email_type.to_string(),
        })
        .on_conflict((email_log::org_id, email_log::dedupe_key))
        .do_nothing()
        .execute(conn)?;

    if logged == 0 {
        // Already enqueued once; the outbox dedupe would also catch this.
        return Ok(());
    }

    let message = EmailMessage {
        recipient: recipient.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        template: email_type.to_string(),
    };

    outbox::enqueue(
        conn,
        org_id,
        KIND_EMAIL,
        &format!("email:{}", key),
        serde_json::to_value(&message).expect("EmailMessage serializes"),
    )?;

    Ok(())
}

pub fn booking_subject(email_type: &str) -> &'static str {
    match email_type {
        EMAIL_BOOKING_PENDING => "We received your booking",
        EMAIL_BOOKING_CONFIRMED => "Your cleaning is confirmed",
        EMAIL_BOOKING_REMINDER => "Reminder: your cleaning is coming up",
        EMAIL_BOOKING_CANCELLED => "Your booking was cancelled",
        EMAIL_INVOICE_SENT => "Your invoice",
        EMAIL_INVOICE_OVERDUE => "Your invoice is overdue",
        _ => "Update from your cleaning service",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_key_uses_dash_for_null() {
        let booking = Uuid::new_v4();
        let key = dedupe_key(Some(booking), None, EMAIL_BOOKING_CONFIRMED);
        assert_eq!(key, format!("b:{}|i:-|t:booking_confirmed", booking));
    }

    #[test]
    fn test_dedupe_key_distinguishes_null_from_value() {
        let booking = Uuid::new_v4();
        let invoice = Uuid::new_v4();
        let with_invoice = dedupe_key(Some(booking), Some(invoice), EMAIL_INVOICE_SENT);
        let without_invoice = dedupe_key(Some(booking), None, EMAIL_INVOICE_SENT);
        assert_ne!(with_invoice, without_invoice);
    }

    #[test]
    fn test_subjects_cover_known_templates() {
        assert!(booking_subject(EMAIL_BOOKING_CONFIRMED).contains("confirmed"));
        assert!(booking_subject("something_else").contains("Update"));
    }
}
