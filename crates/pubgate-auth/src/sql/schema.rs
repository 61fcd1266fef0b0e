//! Schema creation and in-place migration.
//!
//! The store keeps a single-row `schema_version` table. A store without that table is
//! new and gets the current schema. A store at an older known version is migrated
//! forward inside one transaction, so a failing step leaves it at its prior version.
//! Anything else is treated as corrupt.

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::error::AuthError;

/// Version written by this release.
pub const CURRENT_VERSION: i64 = 3;

/// One forward step of the migration chain.
struct Migration {
    from: i64,
    to: i64,
    statements: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        from: 1,
        to: 2,
        statements: MIGRATE_1_TO_2,
    },
    Migration {
        from: 2,
        to: 3,
        statements: MIGRATE_2_TO_3,
    },
];

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS plan (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    messages_limit INT NOT NULL,
    messages_expiry_secs INT NOT NULL,
    emails_limit INT NOT NULL,
    calls_limit INT NOT NULL DEFAULT 0,
    topics_limit INT NOT NULL,
    attachment_file_size_limit INT NOT NULL,
    attachment_total_size_limit INT NOT NULL,
    attachment_expiry_secs INT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_plan_code ON plan (code);
CREATE TABLE IF NOT EXISTS user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plan_id INT,
    name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT CHECK (role IN ('anonymous', 'admin', 'user')) NOT NULL,
    messages INT NOT NULL DEFAULT 0,
    emails INT NOT NULL DEFAULT 0,
    calls INT NOT NULL DEFAULT 0,
    settings TEXT NOT NULL DEFAULT '{}',
    created INT NOT NULL,
    FOREIGN KEY (plan_id) REFERENCES plan (id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_name ON user (name);
CREATE TABLE IF NOT EXISTS user_access (
    user_id INT NOT NULL,
    topic_pattern TEXT NOT NULL,
    read INT NOT NULL,
    write INT NOT NULL,
    owner_user_id INT,
    PRIMARY KEY (user_id, topic_pattern),
    FOREIGN KEY (user_id) REFERENCES user (id) ON DELETE CASCADE,
    FOREIGN KEY (owner_user_id) REFERENCES user (id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS user_token (
    user_id INT NOT NULL,
    token TEXT NOT NULL,
    expires INT NOT NULL,
    PRIMARY KEY (user_id, token),
    FOREIGN KEY (user_id) REFERENCES user (id) ON DELETE CASCADE
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_token ON user_token (token);
CREATE TABLE IF NOT EXISTS schema_version (
    id INT PRIMARY KEY,
    version INT NOT NULL
);
INSERT INTO user (id, name, password_hash, role, created)
VALUES (1, '*', '', 'anonymous', CAST(strftime('%s', 'now') AS INTEGER))
ON CONFLICT (id) DO NOTHING
"#;

// v1 kept usernames as primary key and used SQL LIKE wildcards in `access.topic`.
const MIGRATE_1_TO_2: &str = r#"
ALTER TABLE user RENAME TO user_old;
CREATE TABLE IF NOT EXISTS plan (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    messages_limit INT NOT NULL,
    messages_expiry_secs INT NOT NULL,
    emails_limit INT NOT NULL,
    topics_limit INT NOT NULL,
    attachment_file_size_limit INT NOT NULL,
    attachment_total_size_limit INT NOT NULL,
    attachment_expiry_secs INT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_plan_code ON plan (code);
CREATE TABLE IF NOT EXISTS user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plan_id INT,
    name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT CHECK (role IN ('anonymous', 'admin', 'user')) NOT NULL,
    messages INT NOT NULL DEFAULT 0,
    emails INT NOT NULL DEFAULT 0,
    created INT NOT NULL,
    FOREIGN KEY (plan_id) REFERENCES plan (id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_name ON user (name);
CREATE TABLE IF NOT EXISTS user_access (
    user_id INT NOT NULL,
    topic_pattern TEXT NOT NULL,
    read INT NOT NULL,
    write INT NOT NULL,
    owner_user_id INT,
    PRIMARY KEY (user_id, topic_pattern),
    FOREIGN KEY (user_id) REFERENCES user (id) ON DELETE CASCADE,
    FOREIGN KEY (owner_user_id) REFERENCES user (id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS user_token (
    user_id INT NOT NULL,
    token TEXT NOT NULL,
    expires INT NOT NULL,
    PRIMARY KEY (user_id, token),
    FOREIGN KEY (user_id) REFERENCES user (id) ON DELETE CASCADE
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_token ON user_token (token);
INSERT INTO user (id, name, password_hash, role, created)
VALUES (1, '*', '', 'anonymous', CAST(strftime('%s', 'now') AS INTEGER))
ON CONFLICT (id) DO NOTHING;
INSERT INTO user (name, password_hash, role, created)
SELECT user, pass, role, CAST(strftime('%s', 'now') AS INTEGER)
FROM user_old
WHERE user != '*'
ORDER BY user;
INSERT INTO user_access (user_id, topic_pattern, read, write)
SELECT u.id, REPLACE(a.topic, '%', '*'), a.read, a.write
FROM user u
JOIN access a ON u.name = a.user;
DROP TABLE access;
DROP TABLE user_old
"#;

const MIGRATE_2_TO_3: &str = r#"
ALTER TABLE user ADD COLUMN calls INT NOT NULL DEFAULT 0;
ALTER TABLE user ADD COLUMN settings TEXT NOT NULL DEFAULT '{}';
ALTER TABLE plan ADD COLUMN calls_limit INT NOT NULL DEFAULT 0
"#;

const SELECT_VERSION_TABLE: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'";
const SELECT_VERSION: &str = "SELECT version FROM schema_version WHERE id = 1";
const INSERT_VERSION: &str = "INSERT INTO schema_version (id, version) VALUES (1, ?)";
const UPDATE_VERSION: &str = "UPDATE schema_version SET version = ? WHERE id = 1";

/// Create or upgrade the schema. Must run before any other query.
pub(crate) async fn setup(pool: &SqlitePool) -> Result<(), AuthError> {
    let (tables,): (i64,) = sqlx::query_as(SELECT_VERSION_TABLE).fetch_one(pool).await?;
    if tables == 0 {
        return create(pool).await;
    }

    let version: Option<(i64,)> = sqlx::query_as(SELECT_VERSION).fetch_optional(pool).await?;
    let Some((version,)) = version else {
        return Err(AuthError::Schema(
            "cannot determine schema version: database may be corrupt".into(),
        ));
    };

    if version == CURRENT_VERSION {
        return Ok(());
    }
    if version > CURRENT_VERSION {
        return Err(AuthError::Schema(format!(
            "unexpected schema version {version}, newer than {CURRENT_VERSION}"
        )));
    }
    migrate(pool, version).await
}

async fn create(pool: &SqlitePool) -> Result<(), AuthError> {
    info!(version = CURRENT_VERSION, "creating user database schema");
    let mut tx = pool.begin().await?;
    execute_batch(&mut tx, CREATE_TABLES).await?;
    sqlx::query(INSERT_VERSION)
        .bind(CURRENT_VERSION)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn migrate(pool: &SqlitePool, from: i64) -> Result<(), AuthError> {
    let mut tx = pool.begin().await?;
    let mut version = from;
    while version < CURRENT_VERSION {
        let step = MIGRATIONS
            .iter()
            .find(|m| m.from == version)
            .ok_or_else(|| {
                AuthError::Schema(format!("no migration from schema version {version}"))
            })?;
        info!(from = step.from, to = step.to, "migrating user database schema");
        execute_batch(&mut tx, step.statements).await?;
        version = step.to;
    }
    sqlx::query(UPDATE_VERSION)
        .bind(version)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Execute `;`-separated statements one by one. Statements must not contain `;` literals.
async fn execute_batch(tx: &mut Transaction<'_, Sqlite>, sql: &str) -> Result<(), AuthError> {
    for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(&mut **tx).await?;
    }
    Ok(())
}
