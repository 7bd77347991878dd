use crate::models::{DonationRow, GrantRow, NewDonation};
use crate::queries::OptionalExt;
use crate::{Database, is_unique_violation};
use anyhow::{Result, anyhow};
use muse_types::models::{DonationKind, DonationStatus};
use rusqlite::{Connection, Row};
use tracing::{debug, warn};
use uuid::Uuid;

const DONATION_COLUMNS: &str = "id, donor_email, donor_type, amount, kind, target_id, model_id, \
     stripe_payment_id, stripe_session_id, status, created_at, updated_at";

const GRANT_COLUMNS: &str = "id, kind, target_id, donor_email, donation_id, expires_at, created_at";

/// Result of moving a donation towards a terminal state.
#[derive(Debug)]
pub enum SettleOutcome {
    NotFound,
    /// The donation transitioned to `succeeded` on this call.
    Settled {
        donation: DonationRow,
        grant: Option<GrantRow>,
    },
    /// The donation was already `succeeded`; nothing changed apart from
    /// restoring a missing grant.
    AlreadySucceeded {
        donation: DonationRow,
        grant: Option<GrantRow>,
    },
    /// Another donation already succeeded for the same donor and target, so
    /// this one was marked `failed` and needs a manual refund.
    Duplicate {
        donation: DonationRow,
        existing: Option<DonationRow>,
    },
    /// A non-success status was recorded.
    Recorded { donation: DonationRow },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DonationTotals {
    pub succeeded: u64,
    pub total_amount: u64,
    pub grants: u64,
}

impl Database {
    // -- Donations --

    pub fn insert_donation(&self, donation: &NewDonation<'_>, now: &str) -> Result<DonationRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO donations (id, donor_email, donor_type, amount, kind, target_id, model_id,
                    stripe_payment_id, stripe_session_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?10)",
                rusqlite::params![
                    donation.id,
                    donation.donor_email,
                    donation.donor_type,
                    donation.amount,
                    donation.kind,
                    donation.target_id,
                    donation.model_id,
                    donation.stripe_payment_id,
                    donation.stripe_session_id,
                    now,
                ],
            )?;
            query_donation(conn, donation.id)?.ok_or_else(|| anyhow!("donation vanished after insert"))
        })
    }

    pub fn get_donation(&self, id: &str) -> Result<Option<DonationRow>> {
        self.with_conn(|conn| query_donation(conn, id))
    }

    pub fn find_succeeded_donation(
        &self,
        donor_email: &str,
        kind: &str,
        target_id: Option<&str>,
    ) -> Result<Option<DonationRow>> {
        self.with_conn(|conn| find_by_pair(conn, donor_email, kind, target_id, "succeeded"))
    }

    /// Latest pending donation for the pair, used to match webhook events
    /// that carry metadata but no known gateway id.
    pub fn find_pending_donation(
        &self,
        donor_email: &str,
        kind: &str,
        target_id: Option<&str>,
    ) -> Result<Option<DonationRow>> {
        self.with_conn(|conn| find_by_pair(conn, donor_email, kind, target_id, "pending"))
    }

    pub fn find_donation_by_payment_id(&self, payment_id: &str) -> Result<Option<DonationRow>> {
        self.with_conn(|conn| query_donation_where(conn, "stripe_payment_id = ?1", payment_id))
    }

    pub fn find_donation_by_session_id(&self, session_id: &str) -> Result<Option<DonationRow>> {
        self.with_conn(|conn| query_donation_where(conn, "stripe_session_id = ?1", session_id))
    }

    pub fn list_donations(&self) -> Result<Vec<DonationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DONATION_COLUMNS} FROM donations ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([], map_donation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Record gateway identifiers on a pending donation.
    pub fn set_donation_gateway_ids(
        &self,
        id: &str,
        payment_id: Option<&str>,
        session_id: Option<&str>,
        now: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE donations SET
                    stripe_payment_id = COALESCE(?2, stripe_payment_id),
                    stripe_session_id = COALESCE(?3, stripe_session_id),
                    updated_at = ?4
                 WHERE id = ?1",
                (id, payment_id, session_id, now),
            )?;
            Ok(changed > 0)
        })
    }

    /// Attach the registered model's id to their signup donation.
    pub fn link_donation_model(&self, id: &str, model_id: &str, now: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE donations SET model_id = ?2, updated_at = ?3 WHERE id = ?1",
                (id, model_id, now),
            )?;
            Ok(changed > 0)
        })
    }

    /// Move a donation to `status`, granting the unlock on success.
    ///
    /// Safe to call any number of times and from any path (client completion
    /// or webhook): the partial unique index on succeeded donations and the
    /// unique grant key keep at most one success and one grant per
    /// (donor, target).
    pub fn settle_donation(
        &self,
        id: &str,
        payment_id: Option<&str>,
        status: DonationStatus,
        now: &str,
    ) -> Result<SettleOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let Some(current) = query_donation(&tx, id)? else {
                return Ok(SettleOutcome::NotFound);
            };

            if current.status == DonationStatus::Succeeded.as_str() {
                let grant = ensure_grant(&tx, &current, now)?;
                tx.commit()?;
                return Ok(SettleOutcome::AlreadySucceeded { donation: current, grant });
            }

            if status != DonationStatus::Succeeded {
                tx.execute(
                    "UPDATE donations SET status = ?2,
                        stripe_payment_id = COALESCE(?3, stripe_payment_id), updated_at = ?4
                     WHERE id = ?1",
                    (id, status.as_str(), payment_id, now),
                )?;
                let donation = query_donation(&tx, id)?.ok_or_else(|| anyhow!("donation {} vanished", id))?;
                tx.commit()?;
                return Ok(SettleOutcome::Recorded { donation });
            }

            let updated = tx.execute(
                "UPDATE donations SET status = 'succeeded',
                    stripe_payment_id = COALESCE(?2, stripe_payment_id), updated_at = ?3
                 WHERE id = ?1",
                (id, payment_id, now),
            );
            match updated {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    warn!(
                        "Donation {} duplicates a succeeded donation for {} ({}); marking failed for refund",
                        id, current.donor_email, current.kind
                    );
                    tx.execute(
                        "UPDATE donations SET status = 'failed',
                            stripe_payment_id = COALESCE(?2, stripe_payment_id), updated_at = ?3
                         WHERE id = ?1",
                        (id, payment_id, now),
                    )?;
                    let existing = find_by_pair(
                        &tx,
                        &current.donor_email,
                        &current.kind,
                        current.target_id.as_deref(),
                        "succeeded",
                    )?;
                    let donation = query_donation(&tx, id)?.ok_or_else(|| anyhow!("donation {} vanished", id))?;
                    tx.commit()?;
                    return Ok(SettleOutcome::Duplicate { donation, existing });
                }
                Err(e) => return Err(e.into()),
            }

            let donation = query_donation(&tx, id)?.ok_or_else(|| anyhow!("donation {} vanished", id))?;
            let grant = ensure_grant(&tx, &donation, now)?;
            tx.commit()?;
            debug!("Donation {} settled", id);
            Ok(SettleOutcome::Settled { donation, grant })
        })
    }

    // -- Unlock grants --

    /// True iff a live grant exists for the pair and its donation succeeded.
    pub fn has_unlock(&self, donor_email: &str, grant_kind: &str, target_id: &str, now: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM unlock_grants g
                     JOIN donations d ON d.id = g.donation_id
                     WHERE g.kind = ?1 AND g.target_id = ?2 AND g.donor_email = ?3
                       AND d.status = 'succeeded'
                       AND (g.expires_at IS NULL OR g.expires_at > ?4)",
                    (grant_kind, target_id, donor_email, now),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_grant_for_donation(&self, donation_id: &str) -> Result<Option<GrantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GRANT_COLUMNS} FROM unlock_grants WHERE donation_id = ?1"
            ))?;
            let row = stmt.query_row([donation_id], map_grant).optional()?;
            Ok(row)
        })
    }

    pub fn list_grants_for_email(&self, donor_email: &str) -> Result<Vec<GrantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GRANT_COLUMNS} FROM unlock_grants WHERE donor_email = ?1
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([donor_email], map_grant)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn donation_totals(&self) -> Result<DonationTotals> {
        self.with_conn(|conn| {
            let (succeeded, total_amount): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(amount), 0) FROM donations WHERE status = 'succeeded'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let grants: i64 = conn.query_row("SELECT COUNT(*) FROM unlock_grants", [], |row| row.get(0))?;
            Ok(DonationTotals {
                succeeded: succeeded as u64,
                total_amount: total_amount as u64,
                grants: grants as u64,
            })
        })
    }
}

/// Insert the grant for a succeeded donation unless one already exists for
/// (kind, target, donor), then return whichever row is stored.
fn ensure_grant(conn: &Connection, donation: &DonationRow, now: &str) -> Result<Option<GrantRow>> {
    let kind: DonationKind = donation.kind.parse()?;
    let Some(grant_kind) = kind.grant_kind() else {
        return Ok(None);
    };
    let Some(target_id) = donation.target_id.as_deref() else {
        warn!("Donation {} grants an unlock but has no target", donation.id);
        return Ok(None);
    };

    let inserted = conn.execute(
        "INSERT INTO unlock_grants (id, kind, target_id, donor_email, donation_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(kind, target_id, donor_email) DO NOTHING",
        (
            Uuid::new_v4().to_string(),
            grant_kind,
            target_id,
            &donation.donor_email,
            &donation.id,
            now,
        ),
    )?;
    if inserted > 0 {
        debug!("Unlock grant created for {} on {} {}", donation.donor_email, grant_kind, target_id);
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {GRANT_COLUMNS} FROM unlock_grants WHERE kind = ?1 AND target_id = ?2 AND donor_email = ?3"
    ))?;
    let grant = stmt
        .query_row((grant_kind, target_id, &donation.donor_email), map_grant)
        .optional()?;
    Ok(grant)
}

fn find_by_pair(
    conn: &Connection,
    donor_email: &str,
    kind: &str,
    target_id: Option<&str>,
    status: &str,
) -> Result<Option<DonationRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DONATION_COLUMNS} FROM donations
         WHERE donor_email = ?1 AND kind = ?2 AND COALESCE(target_id, '') = COALESCE(?3, '')
           AND status = ?4
         ORDER BY created_at DESC, rowid DESC LIMIT 1"
    ))?;
    let row = stmt
        .query_row((donor_email, kind, target_id, status), map_donation)
        .optional()?;
    Ok(row)
}

fn query_donation(conn: &Connection, id: &str) -> Result<Option<DonationRow>> {
    query_donation_where(conn, "id = ?1", id)
}

fn query_donation_where(conn: &Connection, filter: &str, value: &str) -> Result<Option<DonationRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DONATION_COLUMNS} FROM donations WHERE {filter} ORDER BY created_at DESC, rowid DESC LIMIT 1"
    ))?;
    let row = stmt.query_row([value], map_donation).optional()?;
    Ok(row)
}

fn map_donation(row: &Row<'_>) -> rusqlite::Result<DonationRow> {
    Ok(DonationRow {
        id: row.get(0)?,
        donor_email: row.get(1)?,
        donor_type: row.get(2)?,
        amount: row.get(3)?,
        kind: row.get(4)?,
        target_id: row.get(5)?,
        model_id: row.get(6)?,
        stripe_payment_id: row.get(7)?,
        stripe_session_id: row.get(8)?,
        status: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn map_grant(row: &Row<'_>) -> rusqlite::Result<GrantRow> {
    Ok(GrantRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        target_id: row.get(2)?,
        donor_email: row.get(3)?,
        donation_id: row.get(4)?,
        expires_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}
