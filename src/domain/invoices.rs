//! Invoice ledger: atomic numbering, items, payments, public links.
//!
//! Numbers come from a per-(org, year) sequence row bumped with an atomic
//! UPSERT, so concurrent creation cannot collide or leave gaps. Public
//! links are opaque 48-byte tokens; only their hash is stored and resending
//! rotates the token.

use chrono::{Datelike, Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::domain::notifications::{self, EMAIL_INVOICE_OVERDUE, EMAIL_INVOICE_SENT};
use crate::error::{ApiResult, AppError};
use crate::models::{
    Invoice, InvoiceItem, InvoicePayment, NewInvoice, NewInvoiceItem, NewInvoicePayment,
};
use crate::schema::{invoice_items, invoice_payments, invoice_sequences, invoices, leads};

pub const STATUS_DRAFT: &str = "DRAFT";
pub const STATUS_SENT: &str = "SENT";
pub const STATUS_PARTIAL: &str = "PARTIAL";
pub const STATUS_PAID: &str = "PAID";
pub const STATUS_OVERDUE: &str = "OVERDUE";
pub const STATUS_VOID: &str = "VOID";

pub const PUBLIC_TOKEN_BYTES: usize = 48;

#[derive(Debug, Clone)]
pub struct ItemInput {
    pub description: String,
    pub qty: i32,
    pub unit_price_cents: i64,
    pub tax_rate_bp: i32,
}

/// `INV-YYYY-NNNNNN`.
pub fn format_number(year: i32, value: i64) -> String {
    format!("INV-{}-{:06}", year, value)
}

/// Bumps the per-(org, year) sequence atomically and returns the new value.
fn next_number(conn: &mut PgConnection, org_id: Uuid, year: i32) -> ApiResult<i64> {
    let value: i64 = diesel::insert_into(invoice_sequences::table)
        .values((
            invoice_sequences::org_id.eq(org_id),
            invoice_sequences::year.eq(year),
            invoice_sequences::last_value.eq(1i64),
        ))
        .on_conflict((invoice_sequences::org_id, invoice_sequences::year))
        .do_update()
        .set(invoice_sequences::last_value.eq(invoice_sequences::last_value + 1))
        .returning(invoice_sequences::last_value)
        .get_result(conn)?;

    Ok(value)
}

pub fn create_invoice(
    conn: &mut PgConnection,
    org_id: Uuid,
    booking_id: Option<Uuid>,
    lead_id: Option<Uuid>,
    currency: &str,
    due_in_days: i64,
    items: &[ItemInput],
) -> ApiResult<(Invoice, Vec<InvoiceItem>)> {
    if items.is_empty() {
        return Err(AppError::validation("An invoice needs at least one item"));
    }
    for item in items {
        if item.qty <= 0 {
            return Err(AppError::validation("Item quantity must be positive"));
        }
        if item.unit_price_cents < 0 {
            return Err(AppError::validation("Item price cannot be negative"));
        }
        if item.tax_rate_bp < 0 || item.tax_rate_bp > 10_000 {
            return Err(AppError::validation("Tax rate must be 0..=10000 basis points"));
        }
    }

    let year = Utc::now().year();
    let value = next_number(conn, org_id, year)?;
    let number = format_number(year, value);

    let invoice: Invoice = diesel::insert_into(invoices::table)
        .values(&NewInvoice {
            org_id,
            booking_id,
            lead_id,
            number: number.clone(),
            status: STATUS_DRAFT.to_string(),
            currency: currency.to_string(),
            due_at: Some(Utc::now().naive_utc() + Duration::days(due_in_days)),
        })
        .returning(Invoice::as_returning())
        .get_result(conn)?;

    let rows: Vec<NewInvoiceItem> = items
        .iter()
        .map(|item| NewInvoiceItem {
            invoice_id: invoice.id,
            org_id,
            description: item.description.clone(),
            qty: item.qty,
            unit_price_cents: item.unit_price_cents,
            tax_rate_bp: item.tax_rate_bp,
        })
        .collect();

    let stored: Vec<InvoiceItem> = diesel::insert_into(invoice_items::table)
        .values(&rows)
        .returning(InvoiceItem::as_returning())
        .get_results(conn)?;

    info!(invoice_id = %invoice.id, number = %number, "Invoice created");
    Ok((invoice, stored))
}

/// Server-side total: qty × unit price plus per-line tax.
pub fn total_cents(items: &[InvoiceItem]) -> i64 {
    items
        .iter()
        .map(|item| {
            let line = item.unit_price_cents * item.qty as i64;
            let tax = line * item.tax_rate_bp as i64 / 10_000;
            line + tax
        })
        .sum()
}

pub fn paid_cents(payments: &[InvoicePayment]) -> i64 {
    payments.iter().map(|p| p.amount_cents).sum()
}

pub fn load(conn: &mut PgConnection, org_id: Uuid, invoice_id: Uuid) -> ApiResult<Invoice> {
    invoices::table
        .filter(invoices::id.eq(invoice_id))
        .filter(invoices::org_id.eq(org_id))
        .select(Invoice::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Invoice not found"))
}

pub fn load_items(conn: &mut PgConnection, org_id: Uuid, invoice_id: Uuid) -> ApiResult<Vec<InvoiceItem>> {
    invoice_items::table
        .filter(invoice_items::invoice_id.eq(invoice_id))
        .filter(invoice_items::org_id.eq(org_id))
        .select(InvoiceItem::as_select())
        .load(conn)
        .map_err(AppError::from_diesel)
}

pub fn load_payments(
    conn: &mut PgConnection,
    org_id: Uuid,
    invoice_id: Uuid,
) -> ApiResult<Vec<InvoicePayment>> {
    invoice_payments::table
        .filter(invoice_payments::invoice_id.eq(invoice_id))
        .filter(invoice_payments::org_id.eq(org_id))
        .select(InvoicePayment::as_select())
        .load(conn)
        .map_err(AppError::from_diesel)
}

fn generate_public_token() -> String {
    use base64::Engine;

    let mut bytes = [0u8; PUBLIC_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_public_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Marks the invoice SENT, rotates its public token, and enqueues the email
/// with the fresh link. The previous link stops resolving immediately.
pub fn send(
    conn: &mut PgConnection,
    org_id: Uuid,
    invoice_id: Uuid,
    public_base_url: &str,
) -> ApiResult<(Invoice, String)> {
    let invoice = load(conn, org_id, invoice_id)?;

    if invoice.status == STATUS_VOID {
        return Err(AppError::conflict("A void invoice cannot be sent"));
    }

    let token = generate_public_token();
    let token_hash = hash_public_token(&token);

    let status = if invoice.status == STATUS_DRAFT {
        STATUS_SENT
    } else {
        invoice.status.as_str()
    };

    let updated: Invoice = diesel::update(invoices::table.find(invoice.id))
        .set((
            invoices::public_token_hash.eq(&token_hash),
            invoices::status.eq(status),
            invoices::issued_at.eq(Utc::now().naive_utc()),
            invoices::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(Invoice::as_returning())
        .get_result(conn)?;

    let url = format!("{}/i/{}", public_base_url.trim_end_matches('/'), token);

    if let Some(lead_id) = updated.lead_id {
        let recipient: Option<Option<String>> = leads::table
            .filter(leads::id.eq(lead_id))
            .filter(leads::org_id.eq(org_id))
            .select(leads::email)
            .first(conn)
            .optional()?;
        if let Some(Some(recipient)) = recipient {
            notifications::enqueue_email(
                conn,
                org_id,
                updated.booking_id,
                Some(updated.id),
                EMAIL_INVOICE_SENT,
                &recipient,
                notifications::booking_subject(EMAIL_INVOICE_SENT),
                &format!("Your invoice {} is ready: {}", updated.number, url),
            )?;
        }
    }

    Ok((updated, token))
}

/// Public lookup by link token. Only the hash ever touches the database.
pub fn find_by_public_token(conn: &mut PgConnection, token: &str) -> ApiResult<Invoice> {
    let token_hash = hash_public_token(token);
    invoices::table
        .filter(invoices::public_token_hash.eq(&token_hash))
        .select(Invoice::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Invoice not found"))
}

/// Records a payment and rolls the status forward: partial < total →
/// PARTIAL, ≥ total → PAID.
pub fn record_payment(
    conn: &mut PgConnection,
    org_id: Uuid,
    invoice_id: Uuid,
    amount_cents: i64,
    method: &str,
) -> ApiResult<Invoice> {
    if amount_cents <= 0 {
        return Err(AppError::validation("Payment amount must be positive"));
    }

    let invoice: Invoice = invoices::table
        .filter(invoices::id.eq(invoice_id))
        .filter(invoices::org_id.eq(org_id))
        .for_update()
        .select(Invoice::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Invoice not found"))?;

    if invoice.status == STATUS_VOID {
        return Err(AppError::conflict("A void invoice cannot take payments"));
    }
    if invoice.status == STATUS_PAID {
        return Err(AppError::conflict("Invoice is already paid"));
    }

    diesel::insert_into(invoice_payments::table)
        .values(&NewInvoicePayment {
            invoice_id: invoice.id,
            org_id,
            amount_cents,
            method: method.to_string(),
        })
        .execute(conn)?;

    let items = load_items(conn, org_id, invoice.id)?;
    let payments = load_payments(conn, org_id, invoice.id)?;
    let total = total_cents(&items);
    let paid = paid_cents(&payments);

    let status = if paid >= total { STATUS_PAID } else { STATUS_PARTIAL };

    let updated: Invoice = diesel::update(invoices::table.find(invoice.id))
        .set((
            invoices::status.eq(status),
            invoices::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(Invoice::as_returning())
        .get_result(conn)?;

    info!(invoice_id = %updated.id, status = %updated.status, "Payment recorded");
    Ok(updated)
}

/// VOID is terminal.
pub fn void(conn: &mut PgConnection, org_id: Uuid, invoice_id: Uuid) -> ApiResult<Invoice> {
    let invoice = load(conn, org_id, invoice_id)?;
    if invoice.status == STATUS_PAID {
        return Err(AppError::conflict("A paid invoice cannot be voided"));
    }

    diesel::update(invoices::table.find(invoice.id))
        .set((
            invoices::status.eq(STATUS_VOID),
            invoices::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(Invoice::as_returning())
        .get_result(conn)
        .map_err(AppError::from_diesel)
}

/// Reminder sweep: SENT/PARTIAL invoices past due become OVERDUE and get a
/// dunning email enqueued. Returns how many invoices were flagged.
pub fn mark_overdue(conn: &mut PgConnection, now: NaiveDateTime) -> ApiResult<usize> {
    let due: Vec<Invoice> = invoices::table
        .filter(invoices::status.eq_any([STATUS_SENT, STATUS_PARTIAL]))
        .filter(invoices::due_at.lt(now))
        .select(Invoice::as_select())
        .load(conn)?;

    let mut flagged = 0;
    for invoice in due {
        diesel::update(invoices::table.find(invoice.id))
            .set((
                invoices::status.eq(STATUS_OVERDUE),
                invoices::updated_at.eq(now),
            ))
            .execute(conn)?;
        flagged += 1;

        if let Some(lead_id) = invoice.lead_id {
            let recipient: Option<Option<String>> = leads::table
                .filter(leads::id.eq(lead_id))
                .filter(leads::org_id.eq(invoice.org_id))
                .select(leads::email)
                .first(conn)
                .optional()?;
            if let Some(Some(recipient)) = recipient {
                notifications::enqueue_email(
                    conn,
                    invoice.org_id,
                    invoice.booking_id,
                    Some(invoice.id),
                    EMAIL_INVOICE_OVERDUE,
                    &recipient,
                    notifications::booking_subject(EMAIL_INVOICE_OVERDUE),
                    &format!("Invoice {} is past due.", invoice.number),
                )?;
            }
        }
    }

    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_format() {
        assert_eq!(format_number(2025, 42), "INV-2025-000042");
        assert_eq!(format_number(2025, 1_000_000), "INV-2025-1000000");
    }

    #[test]
    fn test_public_token_shape() {
        let token = generate_public_token();
        // 48 bytes → 64 base64url chars, no padding.
        assert_eq!(token.len(), 64);
        assert!(!token.contains('='));
        assert_ne!(token, generate_public_token());
    }

    #[test]
    fn test_token_hash_is_stable() {
        let token = generate_public_token();
        assert_eq!(hash_public_token(&token), hash_public_token(&token));
        assert_eq!(hash_public_token(&token).len(), 64);
    }

    fn item(qty: i32, unit: i64, tax_bp: i32) -> InvoiceItem {
        InvoiceItem {
            id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            description: "Deep clean".to_string(),
            qty,
            unit_price_cents: unit,
            tax_rate_bp: tax_bp,
        }
    }

    #[test]
    fn test_total_with_tax() {
        let items = vec![item(2, 10_000, 0), item(1, 5_000, 825)];
        // 20000 + (5000 + 412) = 25412; integer tax truncates.
        assert_eq!(total_cents(&items), 25_412);
    }

    #[test]
    fn test_total_without_items() {
        assert_eq!(total_cents(&[]), 0);
    }
}
