use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                username        TEXT NOT NULL UNIQUE,
                email           TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                role            TEXT NOT NULL,
                profile_photo   TEXT,
                bio             TEXT NOT NULL DEFAULT '',
                quote           TEXT NOT NULL DEFAULT '',
                site_address    TEXT,
                age             INTEGER NOT NULL DEFAULT 0,
                zodiac          TEXT NOT NULL DEFAULT '',
                height          INTEGER NOT NULL DEFAULT 0,
                weight          INTEGER NOT NULL DEFAULT 0,
                eyes            TEXT NOT NULL DEFAULT '',
                hair            TEXT NOT NULL DEFAULT '',
                favorite_book   TEXT NOT NULL DEFAULT '',
                future_goals    TEXT NOT NULL DEFAULT '',
                invited_by      TEXT REFERENCES users(id) ON DELETE SET NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_users_role ON users(role);

            CREATE TABLE invitations (
                id          TEXT PRIMARY KEY,
                code        TEXT NOT NULL UNIQUE,
                email       TEXT NOT NULL,
                sender_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                status      TEXT NOT NULL DEFAULT 'pending',
                expires_at  TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- One live invitation per email
            CREATE UNIQUE INDEX idx_invitations_one_pending
                ON invitations(email) WHERE status = 'pending';

            CREATE INDEX idx_invitations_sender ON invitations(sender_id, status);

            CREATE TABLE donations (
                id                  TEXT PRIMARY KEY,
                donor_email         TEXT NOT NULL,
                donor_type          TEXT NOT NULL,
                amount              INTEGER NOT NULL,
                kind                TEXT NOT NULL,
                target_id           TEXT,
                model_id            TEXT,
                stripe_payment_id   TEXT,
                stripe_session_id   TEXT,
                status              TEXT NOT NULL DEFAULT 'pending',
                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- At most one succeeded donation per (donor, target)
            CREATE UNIQUE INDEX idx_donations_one_success
                ON donations(donor_email, kind, COALESCE(target_id, ''))
                WHERE status = 'succeeded';

            CREATE INDEX idx_donations_payment ON donations(stripe_payment_id);
            CREATE INDEX idx_donations_session ON donations(stripe_session_id);

            CREATE TABLE unlock_grants (
                id          TEXT PRIMARY KEY,
                kind        TEXT NOT NULL,
                target_id   TEXT NOT NULL,
                donor_email TEXT NOT NULL,
                donation_id TEXT NOT NULL REFERENCES donations(id) ON DELETE CASCADE,
                expires_at  TEXT,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(kind, target_id, donor_email)
            );

            CREATE INDEX idx_unlock_grants_donor ON unlock_grants(donor_email);

            CREATE TABLE photos (
                id              TEXT PRIMARY KEY,
                model_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title           TEXT NOT NULL DEFAULT '',
                description     TEXT NOT NULL DEFAULT '',
                original_key    TEXT NOT NULL,
                blurred_key     TEXT NOT NULL,
                price           INTEGER NOT NULL DEFAULT 25,
                is_active       INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_photos_model ON photos(model_id, created_at);

            CREATE TABLE conversations (
                id              TEXT PRIMARY KEY,
                participant_a   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                participant_b   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                last_message_id TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
                CHECK (participant_a < participant_b),
                UNIQUE(participant_a, participant_b)
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                sender_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                recipient_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content         TEXT NOT NULL DEFAULT '',
                attachments     TEXT NOT NULL DEFAULT '[]',
                is_read         INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);
            CREATE INDEX idx_messages_unread ON messages(recipient_id, is_read);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
