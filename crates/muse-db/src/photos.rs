use crate::Database;
use crate::models::{NewPhoto, PhotoRow};
use crate::queries::OptionalExt;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row};

const PHOTO_SELECT: &str = "SELECT p.id, p.model_id, p.title, p.description, p.original_key, p.blurred_key,
        p.price, p.is_active,
        (SELECT COUNT(*) FROM unlock_grants g WHERE g.kind = 'photo' AND g.target_id = p.id),
        p.created_at
     FROM photos p";

/// Grant visibility filter shared by the unlock checks: a photo grant on the
/// photo itself, or a model grant on its owner, backed by a succeeded donation.
const UNLOCKED_BY: &str = "EXISTS (
        SELECT 1 FROM unlock_grants g JOIN donations d ON d.id = g.donation_id
        WHERE g.donor_email = ?1 AND d.status = 'succeeded'
          AND (g.expires_at IS NULL OR g.expires_at > ?2)
          AND ((g.kind = 'photo' AND g.target_id = p.id) OR (g.kind = 'model' AND g.target_id = p.model_id))
     )";

/// Partial update for a photo; `None` leaves the column untouched.
#[derive(Debug, Default)]
pub struct PhotoChanges<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub price: Option<u32>,
    pub is_active: Option<bool>,
}

/// What was removed along with a model account, for asset cleanup.
#[derive(Debug)]
pub struct ModelRemoval {
    pub profile_photo: Option<String>,
    pub photos: Vec<PhotoRow>,
}

impl Database {
    // -- Photos --

    pub fn insert_photo(&self, photo: &NewPhoto<'_>, now: &str) -> Result<PhotoRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO photos (id, model_id, title, description, original_key, blurred_key, price, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
                rusqlite::params![
                    photo.id,
                    photo.model_id,
                    photo.title,
                    photo.description,
                    photo.original_key,
                    photo.blurred_key,
                    photo.price,
                    now,
                ],
            )?;
            query_photo(conn, photo.id)?.ok_or_else(|| anyhow!("photo vanished after insert"))
        })
    }

    pub fn get_photo(&self, id: &str) -> Result<Option<PhotoRow>> {
        self.with_conn(|conn| query_photo(conn, id))
    }

    pub fn update_photo(&self, id: &str, changes: &PhotoChanges<'_>) -> Result<Option<PhotoRow>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE photos SET
                    title = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    price = COALESCE(?4, price),
                    is_active = COALESCE(?5, is_active)
                 WHERE id = ?1",
                rusqlite::params![id, changes.title, changes.description, changes.price, changes.is_active],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_photo(conn, id)
        })
    }

    /// One page of a model's photos, newest first, plus the total count.
    pub fn list_photos_by_model(
        &self,
        model_id: &str,
        active_only: bool,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<PhotoRow>, u64)> {
        self.with_conn(|conn| {
            let filter = "p.model_id = ?1 AND (?2 = 0 OR p.is_active = 1)";

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM photos p WHERE {filter}"),
                rusqlite::params![model_id, active_only],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "{PHOTO_SELECT} WHERE {filter} ORDER BY p.created_at DESC, p.rowid DESC LIMIT ?3 OFFSET ?4"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![model_id, active_only, limit, offset], map_photo)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((rows, total as u64))
        })
    }

    /// Delete a photo and its grants. Returns the removed row so the caller
    /// can delete the stored assets.
    pub fn delete_photo(&self, id: &str) -> Result<Option<PhotoRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(photo) = query_photo(&tx, id)? else {
                return Ok(None);
            };
            tx.execute(
                "DELETE FROM unlock_grants WHERE kind = 'photo' AND target_id = ?1",
                [id],
            )?;
            tx.execute("DELETE FROM photos WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(Some(photo))
        })
    }

    /// Delete a model account together with its photos and every grant on
    /// them. Returns `None` if no model has this id.
    pub fn delete_model(&self, model_id: &str) -> Result<Option<ModelRemoval>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let profile_photo: Option<Option<String>> = tx
                .query_row(
                    "SELECT profile_photo FROM users WHERE id = ?1 AND role = 'model'",
                    [model_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(profile_photo) = profile_photo else {
                return Ok(None);
            };

            let photos = {
                let mut stmt = tx.prepare(&format!("{PHOTO_SELECT} WHERE p.model_id = ?1"))?;
                stmt.query_map([model_id], map_photo)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            tx.execute(
                "DELETE FROM unlock_grants
                 WHERE (kind = 'model' AND target_id = ?1)
                    OR (kind = 'photo' AND target_id IN (SELECT id FROM photos WHERE model_id = ?1))",
                [model_id],
            )?;
            // photos, conversations, messages and sent invitations cascade
            tx.execute("DELETE FROM users WHERE id = ?1", [model_id])?;
            tx.commit()?;

            Ok(Some(ModelRemoval { profile_photo, photos }))
        })
    }

    /// Whether `donor_email` may view the original of `photo_id`.
    pub fn photo_unlocked_for(&self, donor_email: &str, photo_id: &str, now: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    &format!("SELECT 1 FROM photos p WHERE p.id = ?3 AND {UNLOCKED_BY}"),
                    (donor_email, now, photo_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Active photos `donor_email` has unlocked, directly or through a
    /// model-level grant.
    pub fn list_unlocked_photos(&self, donor_email: &str, now: &str) -> Result<Vec<PhotoRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{PHOTO_SELECT} WHERE p.is_active = 1 AND {UNLOCKED_BY}
                 ORDER BY p.created_at DESC, p.rowid DESC"
            ))?;
            let rows = stmt
                .query_map((donor_email, now), map_photo)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_photo(conn: &Connection, id: &str) -> Result<Option<PhotoRow>> {
    let mut stmt = conn.prepare(&format!("{PHOTO_SELECT} WHERE p.id = ?1"))?;
    let row = stmt.query_row([id], map_photo).optional()?;
    Ok(row)
}

fn map_photo(row: &Row<'_>) -> rusqlite::Result<PhotoRow> {
    Ok(PhotoRow {
        id: row.get(0)?,
        model_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        original_key: row.get(4)?,
        blurred_key: row.get(5)?,
        price: row.get(6)?,
        is_active: row.get(7)?,
        unlock_count: row.get::<_, i64>(8)? as u64,
        created_at: row.get(9)?,
    })
}
