use crate::models::{InvitationRow, NewInvitation};
use crate::queries::{OptionalExt, exists};
use crate::{Database, is_unique_violation};
use anyhow::Result;
use rusqlite::{Connection, Row};

const INVITATION_COLUMNS: &str = "id, code, email, sender_id, status, expires_at, created_at";

/// Maximum live-or-used invitations a non-privileged sender may hold.
pub const INVITATION_QUOTA: u32 = 3;

#[derive(Debug)]
pub enum IssueOutcome {
    Issued(InvitationRow),
    /// An account already exists for the invitee's email.
    EmailRegistered,
    /// The email already holds an unexpired pending invitation.
    AlreadyInvited,
    QuotaExceeded,
    /// The generated code collided with an existing one; retry with a fresh code.
    CodeTaken,
}

/// Invitation counts by effective status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvitationCounts {
    pub pending: u64,
    pub accepted: u64,
    pub expired: u64,
}

impl Database {
    // -- Invitations --

    /// Issue an invitation. Stale pending rows for the email are expired
    /// first, and all checks run in the same transaction as the insert.
    pub fn create_invitation(
        &self,
        invitation: &NewInvitation<'_>,
        enforce_quota: bool,
        now: &str,
    ) -> Result<IssueOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "UPDATE invitations SET status = 'expired'
                 WHERE email = ?1 AND status = 'pending' AND expires_at <= ?2",
                (invitation.email, now),
            )?;

            if exists(&tx, "SELECT 1 FROM users WHERE email = ?1", invitation.email)? {
                return Ok(IssueOutcome::EmailRegistered);
            }
            if exists(
                &tx,
                "SELECT 1 FROM invitations WHERE email = ?1 AND status = 'pending'",
                invitation.email,
            )? {
                return Ok(IssueOutcome::AlreadyInvited);
            }

            if enforce_quota {
                let used: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM invitations
                     WHERE sender_id = ?1
                       AND (status = 'accepted' OR (status = 'pending' AND expires_at > ?2))",
                    (invitation.sender_id, now),
                    |row| row.get(0),
                )?;
                if used >= i64::from(INVITATION_QUOTA) {
                    return Ok(IssueOutcome::QuotaExceeded);
                }
            }

            let inserted = tx.execute(
                "INSERT INTO invitations (id, code, email, sender_id, status, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6)",
                (
                    invitation.id,
                    invitation.code,
                    invitation.email,
                    invitation.sender_id,
                    invitation.expires_at,
                    now,
                ),
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Ok(IssueOutcome::CodeTaken),
                Err(e) => return Err(e.into()),
            }

            let row = query_one(&tx, "id = ?1", invitation.id)?
                .ok_or_else(|| anyhow::anyhow!("invitation vanished after insert"))?;
            tx.commit()?;
            Ok(IssueOutcome::Issued(row))
        })
    }

    pub fn get_invitation(&self, id: &str) -> Result<Option<InvitationRow>> {
        self.with_conn(|conn| query_one(conn, "id = ?1", id))
    }

    pub fn get_invitation_by_code_and_email(&self, code: &str, email: &str) -> Result<Option<InvitationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INVITATION_COLUMNS} FROM invitations WHERE code = ?1 AND email = ?2"
            ))?;
            let row = stmt.query_row((code, email), map_invitation).optional()?;
            Ok(row)
        })
    }

    pub fn list_invitations_by_sender(&self, sender_id: &str) -> Result<Vec<InvitationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INVITATION_COLUMNS} FROM invitations WHERE sender_id = ?1
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([sender_id], map_invitation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_all_invitations(&self) -> Result<Vec<InvitationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INVITATION_COLUMNS} FROM invitations ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([], map_invitation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_invitation(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM invitations WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    /// Flip every pending invitation whose expiry has passed. Returns the
    /// number of rows changed.
    pub fn expire_stale_invitations(&self, now: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE invitations SET status = 'expired'
                 WHERE status = 'pending' AND expires_at <= ?1",
                [now],
            )?;
            Ok(changed)
        })
    }

    pub fn count_invitations(&self, now: &str) -> Result<InvitationCounts> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT
                    COALESCE(SUM(status = 'pending' AND expires_at > ?1), 0),
                    COALESCE(SUM(status = 'accepted'), 0),
                    COALESCE(SUM(status = 'expired' OR (status = 'pending' AND expires_at <= ?1)), 0)
                 FROM invitations",
                [now],
                |row| {
                    Ok(InvitationCounts {
                        pending: row.get::<_, i64>(0)? as u64,
                        accepted: row.get::<_, i64>(1)? as u64,
                        expired: row.get::<_, i64>(2)? as u64,
                    })
                },
            )?;
            Ok(counts)
        })
    }
}

fn query_one(conn: &Connection, filter: &str, value: &str) -> Result<Option<InvitationRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE {filter}"))?;
    let row = stmt.query_row([value], map_invitation).optional()?;
    Ok(row)
}

fn map_invitation(row: &Row<'_>) -> rusqlite::Result<InvitationRow> {
    Ok(InvitationRow {
        id: row.get(0)?,
        code: row.get(1)?,
        email: row.get(2)?,
        sender_id: row.get(3)?,
        status: row.get(4)?,
        expires_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}
