//! Domain services: bookings, invoices, leads, photos, notifications.
//!
//! Each service is a set of functions taking an explicit connection; no
//! hidden I/O. State changes and their outbox side effects share one
//! transaction.

pub mod bookings;
pub mod invoices;
pub mod leads;
pub mod notifications;
pub mod photos;
