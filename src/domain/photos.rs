//! Photo evidence: validated uploads, org-scoped keys, token-vended
//! downloads, janitor-backed deletes.

use diesel::prelude::*;
use tracing::info;
use uuid::Uuid;

use crate::authz::Role;
use crate::error::{ApiResult, AppError};
use crate::models::{Booking, NewPhoto, Photo};
use crate::outbox::{self, KIND_STORAGE_DELETE};
use crate::schema::{bookings, photos, time_entries};
use crate::storage::{self, StorageGateway};

pub struct UploadRequest {
    pub booking_id: Uuid,
    pub mime: String,
    pub bytes: Vec<u8>,
    pub created_by: Option<Uuid>,
}

/// Validates MIME and size, persists the row, then stores the bytes. The
/// storage write happens after the row insert so a failed write leaves a
/// row the janitor can reconcile, never an orphaned object.
pub async fn upload(
    conn: &mut PgConnection,
    storage: &StorageGateway,
    org_id: Uuid,
    allowed_mime: &[String],
    max_bytes: i64,
    request: UploadRequest,
) -> ApiResult<Photo> {
    if !allowed_mime.iter().any(|m| m == &request.mime) {
        return Err(AppError::validation("Unsupported photo type"));
    }
    if request.bytes.is_empty() {
        return Err(AppError::validation("Photo is empty"));
    }
    if request.bytes.len() as i64 > max_bytes {
        return Err(AppError::validation("Photo exceeds the size limit"));
    }

    let booking: Booking = bookings::table
        .filter(bookings::id.eq(request.booking_id))
        .filter(bookings::org_id.eq(org_id))
        .select(Booking::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Booking not found"))?;

    let photo_id = Uuid::new_v4();
    let ext = storage::extension_for_mime(&request.mime);
    let key = storage::photo_key(org_id, booking.id, photo_id, ext);

    let photo: Photo = diesel::insert_into(photos::table)
        .values(&NewPhoto {
            org_id,
            booking_id: booking.id,
            storage_key: key.clone(),
            mime: request.mime.clone(),
            size_bytes: request.bytes.len() as i64,
            created_by: request.created_by,
        })
        .returning(Photo::as_returning())
        .get_result(conn)?;

    storage.put(&key, request.bytes, &request.mime).await?;

    info!(photo_id = %photo.id, booking_id = %booking.id, "Photo stored");
    Ok(photo)
}

pub fn get(conn: &mut PgConnection, org_id: Uuid, photo_id: Uuid) -> ApiResult<Photo> {
    photos::table
        .filter(photos::id.eq(photo_id))
        .filter(photos::org_id.eq(org_id))
        .select(Photo::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Photo not found"))
}

pub fn list_for_booking(
    conn: &mut PgConnection,
    org_id: Uuid,
    booking_id: Uuid,
) -> ApiResult<Vec<Photo>> {
    photos::table
        .filter(photos::org_id.eq(org_id))
        .filter(photos::booking_id.eq(booking_id))
        .order(photos::created_at.asc())
        .select(Photo::as_select())
        .load(conn)
        .map_err(AppError::from_diesel)
}

/// Role gate for viewing: admins and back-office roles see everything in
/// their org; a worker must have tracked time on the booking; a client must
/// own the booking's lead.
pub fn authorize_view(
    conn: &mut PgConnection,
    photo: &Photo,
    role: Role,
    principal_user: Option<Uuid>,
    principal_lead: Option<Uuid>,
) -> ApiResult<()> {
    match role {
        Role::Owner | Role::Admin | Role::Dispatcher | Role::Finance | Role::Viewer => Ok(()),
        Role::Worker => {
            let user_id =
                principal_user.ok_or_else(|| AppError::forbidden("Not allowed to view this photo"))?;
            let worked: i64 = time_entries::table
                .filter(time_entries::org_id.eq(photo.org_id))
                .filter(time_entries::booking_id.eq(photo.booking_id))
                .filter(time_entries::worker_id.eq(user_id))
                .count()
                .get_result(conn)?;
            let uploaded = photo.created_by == Some(user_id);
            if worked > 0 || uploaded {
                Ok(())
            } else {
                Err(AppError::forbidden("Not allowed to view this photo"))
            }
        }
        Role::Client => {
            let lead_id =
                principal_lead.ok_or_else(|| AppError::forbidden("Not allowed to view this photo"))?;
            let owns: i64 = bookings::table
                .filter(bookings::id.eq(photo.booking_id))
                .filter(bookings::org_id.eq(photo.org_id))
                .filter(bookings::lead_id.eq(lead_id))
                .count()
                .get_result(conn)?;
            if owns > 0 {
                Ok(())
            } else {
                Err(AppError::forbidden("Not allowed to view this photo"))
            }
        }
    }
}

/// Delete order matters: the row goes first, then the janitor erases the
/// object via the outbox with retries. A crash between the two leaves only
/// an unreferenced object the janitor event will still clean up.
pub fn delete(conn: &mut PgConnection, org_id: Uuid, photo_id: Uuid) -> ApiResult<()> {
    let photo = get(conn, org_id, photo_id)?;

    diesel::delete(photos::table.find(photo.id)).execute(conn)?;

    outbox::enqueue(
        conn,
        org_id,
        KIND_STORAGE_DELETE,
        &format!("photo_delete:{}", photo.id),
        serde_json::json!({ "key": photo.storage_key }),
    )?;

    info!(photo_id = %photo.id, "Photo deleted, storage cleanup enqueued");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_request_shape() {
        // MIME/size validation happens before any I/O; exercised through the
        // integration suite. Here: guard rails on the request type itself.
        let request = UploadRequest {
            booking_id: Uuid::new_v4(),
            mime: "image/jpeg".to_string(),
            bytes: vec![0xFF, 0xD8],
            created_by: None,
        };
        assert_eq!(request.mime, "image/jpeg");
        assert_eq!(request.bytes.len(), 2);
    }
}
