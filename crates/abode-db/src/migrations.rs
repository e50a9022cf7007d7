use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id            TEXT PRIMARY KEY,
                username      TEXT NOT NULL UNIQUE,
                password      TEXT NOT NULL,
                display_name  TEXT NOT NULL,
                contact       TEXT,
                created_at    TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE housings (
                id            TEXT PRIMARY KEY,
                owner_id      TEXT NOT NULL,
                title         TEXT NOT NULL,
                address       TEXT NOT NULL,
                external_key  TEXT UNIQUE,
                created_at    TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- housing_id / requester_id are weak references: no cascade.
            CREATE TABLE visits (
                id                      TEXT PRIMARY KEY,
                housing_id              TEXT NOT NULL,
                requester_id            TEXT NOT NULL,
                scheduled_at            TEXT NOT NULL,
                status                  TEXT NOT NULL,
                validated_by_requester  INTEGER NOT NULL DEFAULT 0,
                notes                   TEXT,
                contact_phone           TEXT,
                attached_documents      TEXT NOT NULL DEFAULT '[]',
                linked_review_id        TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE INDEX idx_visits_requester ON visits(requester_id);

            CREATE TABLE messages (
                id           TEXT PRIMARY KEY,
                visit_id     TEXT NOT NULL,
                sender_id    TEXT NOT NULL,
                receiver_id  TEXT,
                content      TEXT,
                attachments  TEXT NOT NULL DEFAULT '[]',
                read         INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL
            );

            CREATE INDEX idx_messages_visit ON messages(visit_id, created_at);

            CREATE TABLE reminders (
                id              TEXT PRIMARY KEY,
                visit_id        TEXT NOT NULL,
                recipient_id    TEXT NOT NULL,
                recipient_role  TEXT NOT NULL,
                fire_at         TEXT NOT NULL,
                title           TEXT NOT NULL,
                body            TEXT NOT NULL,
                delivered       INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_reminders_due ON reminders(delivered, fire_at);
            CREATE INDEX idx_reminders_visit ON reminders(visit_id);

            CREATE TABLE push_tokens (
                user_id     TEXT NOT NULL,
                token       TEXT NOT NULL,
                platform    TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (user_id, token)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
