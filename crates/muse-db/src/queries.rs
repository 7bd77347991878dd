use crate::models::{NewUser, ProfileFields, UserRow};
use crate::{Database, is_unique_violation};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, name, username, email, password, role, profile_photo, bio, quote, \
     site_address, age, zodiac, height, weight, eyes, hair, favorite_book, future_goals, \
     invited_by, created_at";

/// Result of an attempt to create an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserInsert {
    Created,
    EmailTaken,
    UsernameTaken,
    /// The invitation was not pending, had expired, or belongs to another email.
    InvitationUnavailable,
}

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<UserInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let outcome = insert_user(&tx, user)?;
            if outcome == UserInsert::Created {
                tx.commit()?;
            }
            Ok(outcome)
        })
    }

    /// Create a user and accept their invitation in one transaction. Either
    /// both writes land or neither does.
    pub fn create_user_accepting_invitation(
        &self,
        user: &NewUser<'_>,
        invitation_id: &str,
        now: &str,
    ) -> Result<UserInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let accepted = tx.execute(
                "UPDATE invitations SET status = 'accepted'
                 WHERE id = ?1 AND email = ?2 AND status = 'pending' AND expires_at > ?3",
                (invitation_id, user.email, now),
            )?;
            if accepted == 0 {
                return Ok(UserInsert::InvitationUnavailable);
            }

            let outcome = insert_user(&tx, user)?;
            if outcome == UserInsert::Created {
                tx.commit()?;
            }
            Ok(outcome)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn update_profile(&self, id: &str, fields: &ProfileFields<'_>) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET name = ?2, bio = ?3, quote = ?4, site_address = ?5, age = ?6,
                    zodiac = ?7, height = ?8, weight = ?9, eyes = ?10, hair = ?11,
                    favorite_book = ?12, future_goals = ?13
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    fields.name,
                    fields.bio,
                    fields.quote,
                    fields.site_address,
                    fields.age,
                    fields.zodiac,
                    fields.height,
                    fields.weight,
                    fields.eyes,
                    fields.hair,
                    fields.favorite_book,
                    fields.future_goals,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user(conn, "id", id)
        })
    }

    /// Replace the profile photo key. Returns the previous key so the caller
    /// can remove the old asset.
    pub fn set_profile_photo(&self, id: &str, key: Option<&str>) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let previous: Option<String> = tx
                .query_row("SELECT profile_photo FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()?
                .flatten();
            tx.execute("UPDATE users SET profile_photo = ?2 WHERE id = ?1", (id, key))?;
            tx.commit()?;
            Ok(previous)
        })
    }

    pub fn set_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password = ?2 WHERE id = ?1",
                (id, password_hash),
            )?;
            Ok(changed > 0)
        })
    }

    /// Models with a profile photo, optionally filtered by a name fragment.
    pub fn list_models_page(&self, search: &str, offset: u32, limit: u32) -> Result<(Vec<UserRow>, u64)> {
        self.with_conn(|conn| {
            let filter = "role = 'model' AND profile_photo IS NOT NULL
                 AND (?1 = '' OR name LIKE '%' || ?1 || '%')";

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM users WHERE {filter}"),
                [search],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE {filter}
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![search, limit, offset], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((rows, total as u64))
        })
    }

    pub fn list_users_by_role(&self, role: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE role = ?1 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([role], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_users_by_role(&self, role: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM users WHERE role = ?1", [role], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }
}

fn insert_user(conn: &Connection, user: &NewUser<'_>) -> Result<UserInsert> {
    if exists(conn, "SELECT 1 FROM users WHERE email = ?1", user.email)? {
        return Ok(UserInsert::EmailTaken);
    }
    if exists(conn, "SELECT 1 FROM users WHERE username = ?1", user.username)? {
        return Ok(UserInsert::UsernameTaken);
    }

    let inserted = conn.execute(
        "INSERT INTO users (id, name, username, email, password, role, invited_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            user.id,
            user.name,
            user.username,
            user.email,
            user.password_hash,
            user.role,
            user.invited_by,
        ],
    );

    match inserted {
        Ok(_) => Ok(UserInsert::Created),
        Err(e) if is_unique_violation(&e) => {
            if exists(conn, "SELECT 1 FROM users WHERE email = ?1", user.email)? {
                Ok(UserInsert::EmailTaken)
            } else {
                Ok(UserInsert::UsernameTaken)
            }
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn exists(conn: &Connection, sql: &str, param: &str) -> Result<bool> {
    let found: Option<i64> = conn.query_row(sql, [param], |row| row.get(0)).optional()?;
    Ok(found.is_some())
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;
    let row = stmt.query_row([value], map_user).optional()?;
    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        password: row.get(4)?,
        role: row.get(5)?,
        profile_photo: row.get(6)?,
        bio: row.get(7)?,
        quote: row.get(8)?,
        site_address: row.get(9)?,
        age: row.get(10)?,
        zodiac: row.get(11)?,
        height: row.get(12)?,
        weight: row.get(13)?,
        eyes: row.get(14)?,
        hair: row.get(15)?,
        favorite_book: row.get(16)?,
        future_goals: row.get(17)?,
        invited_by: row.get(18)?,
        created_at: row.get(19)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
