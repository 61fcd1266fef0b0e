//! SQL statements (SQLite dialect).

macro_rules! select_user {
    ($($tail:literal)*) => {
        concat!(
            "SELECT u.id, u.name, u.password_hash, u.role, u.messages, u.emails, u.calls, ",
            "u.settings, u.created, p.code AS plan_code, p.name AS plan_name, ",
            "p.messages_limit, p.messages_expiry_secs, p.emails_limit, p.calls_limit, ",
            "p.topics_limit, p.attachment_file_size_limit, p.attachment_total_size_limit, ",
            "p.attachment_expiry_secs ",
            "FROM user u LEFT JOIN plan p ON p.id = u.plan_id ",
            $($tail),*
        )
    };
}

macro_rules! select_plan {
    ($($tail:literal)*) => {
        concat!(
            "SELECT code AS plan_code, name AS plan_name, messages_limit, messages_expiry_secs, ",
            "emails_limit, calls_limit, topics_limit, attachment_file_size_limit, ",
            "attachment_total_size_limit, attachment_expiry_secs FROM plan ",
            $($tail),*
        )
    };
}

// Users

pub const SELECT_USER_BY_NAME: &str = select_user!("WHERE u.name = ?");

pub const SELECT_USER_BY_TOKEN: &str = select_user!(
    "JOIN user_token tk ON tk.user_id = u.id "
    "WHERE tk.token = ? AND tk.expires > ?"
);

pub const SELECT_USERS: &str = select_user!(
    "ORDER BY CASE u.role WHEN 'admin' THEN 0 WHEN 'user' THEN 1 ELSE 2 END, u.name"
);

pub const SELECT_USER_ID: &str = "SELECT id FROM user WHERE name = ?";

pub const SELECT_USER_COUNT: &str = "SELECT COUNT(*) FROM user";

pub const INSERT_USER: &str = r#"
INSERT INTO user (name, password_hash, role, created)
VALUES (?, ?, ?, ?)
"#;

pub const UPDATE_USER_PASS: &str = "UPDATE user SET password_hash = ? WHERE name = ?";

pub const UPDATE_USER_ROLE: &str = "UPDATE user SET role = ? WHERE name = ?";

pub const UPDATE_USER_SETTINGS: &str = "UPDATE user SET settings = ? WHERE name = ?";

pub const UPDATE_USER_STATS: &str = r#"
UPDATE user
SET messages = ?, emails = ?, calls = ?
WHERE name = ?
"#;

pub const RESET_USER_STATS: &str = "UPDATE user SET messages = 0, emails = 0, calls = 0";

pub const UPDATE_USER_PLAN: &str = r#"
UPDATE user
SET plan_id = (SELECT id FROM plan WHERE code = ?)
WHERE name = ?
"#;

pub const RESET_USER_PLAN: &str = "UPDATE user SET plan_id = NULL WHERE name = ?";

pub const DELETE_USER: &str = "DELETE FROM user WHERE id = ?";

// Access control

/// Grants of the given principal and of Everyone. Pattern matching happens in Rust.
pub const SELECT_AUTHORIZE_GRANTS: &str = r#"
SELECT u.name, a.topic_pattern, a.read, a.write
FROM user_access a
JOIN user u ON u.id = a.user_id
WHERE u.name IN (?, '*')
ORDER BY a.topic_pattern
"#;

pub const SELECT_USER_GRANTS: &str = r#"
SELECT topic_pattern, read, write
FROM user_access
WHERE user_id = ?
ORDER BY write DESC, read DESC, topic_pattern
"#;

/// Grants whose effective owner is not the given user id.
pub const SELECT_FOREIGN_PATTERNS: &str = r#"
SELECT topic_pattern
FROM user_access
WHERE COALESCE(owner_user_id, user_id) != ?
"#;

pub const UPSERT_ACCESS: &str = r#"
INSERT INTO user_access (user_id, topic_pattern, read, write, owner_user_id)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT (user_id, topic_pattern)
DO UPDATE SET read = excluded.read, write = excluded.write, owner_user_id = excluded.owner_user_id
"#;

pub const DELETE_ALL_ACCESS: &str = "DELETE FROM user_access";

pub const DELETE_USER_ACCESS: &str = r#"
DELETE FROM user_access
WHERE user_id = ? OR owner_user_id = ?
"#;

pub const DELETE_TOPIC_ACCESS: &str = r#"
DELETE FROM user_access
WHERE (user_id = ? OR owner_user_id = ?) AND topic_pattern = ?
"#;

// Reservations

pub const SELECT_USER_RESERVATIONS: &str = r#"
SELECT a_user.topic_pattern, a_user.read, a_user.write,
       a_everyone.read AS everyone_read, a_everyone.write AS everyone_write
FROM user_access a_user
LEFT JOIN user_access a_everyone
       ON a_user.topic_pattern = a_everyone.topic_pattern AND a_everyone.user_id = 1
WHERE a_user.user_id = a_user.owner_user_id
  AND a_user.owner_user_id = ?
ORDER BY a_user.topic_pattern
"#;

pub const SELECT_USER_RESERVATIONS_COUNT: &str = r#"
SELECT COUNT(*)
FROM user_access
WHERE user_id = owner_user_id AND owner_user_id = ?
"#;

pub const SELECT_USER_HAS_RESERVATION: &str = r#"
SELECT COUNT(*)
FROM user_access
WHERE user_id = owner_user_id AND owner_user_id = ? AND topic_pattern = ?
"#;

pub const SELECT_RESERVATION_OWNER: &str = r#"
SELECT u.name
FROM user_access a
JOIN user u ON u.id = a.owner_user_id
WHERE a.topic_pattern = ? AND a.user_id = a.owner_user_id
"#;

// Tokens

pub const INSERT_TOKEN: &str = "INSERT INTO user_token (user_id, token, expires) VALUES (?, ?, ?)";

pub const SELECT_TOKENS: &str = r#"
SELECT token, expires
FROM user_token
WHERE user_id = ?
ORDER BY expires, token
"#;

pub const UPDATE_TOKEN_EXPIRY: &str = r#"
UPDATE user_token
SET expires = ?
WHERE user_id = ? AND token = ?
"#;

pub const DELETE_TOKEN: &str = "DELETE FROM user_token WHERE user_id = ? AND token = ?";

pub const DELETE_USER_TOKENS: &str = "DELETE FROM user_token WHERE user_id = ?";

pub const DELETE_EXPIRED_TOKENS: &str = "DELETE FROM user_token WHERE expires < ?";

/// Keep only the `?` tokens of a user that expire last.
pub const DELETE_EXCESS_TOKENS: &str = r#"
DELETE FROM user_token
WHERE user_id = ?
  AND token NOT IN (
    SELECT token
    FROM user_token
    WHERE user_id = ?
    ORDER BY expires DESC, token DESC
    LIMIT ?
  )
"#;

// Tiers

pub const SELECT_TIERS: &str = select_plan!("ORDER BY code");

pub const SELECT_TIER_BY_CODE: &str = select_plan!("WHERE code = ?");

pub const INSERT_TIER: &str = r#"
INSERT INTO plan (code, name, messages_limit, messages_expiry_secs, emails_limit, calls_limit,
                  topics_limit, attachment_file_size_limit, attachment_total_size_limit,
                  attachment_expiry_secs)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

pub const UPDATE_TIER: &str = r#"
UPDATE plan
SET name = ?, messages_limit = ?, messages_expiry_secs = ?, emails_limit = ?, calls_limit = ?,
    topics_limit = ?, attachment_file_size_limit = ?, attachment_total_size_limit = ?,
    attachment_expiry_secs = ?
WHERE code = ?
"#;

pub const DELETE_TIER: &str = "DELETE FROM plan WHERE code = ?";

pub const SELECT_TIER_USERS_COUNT: &str = r#"
SELECT COUNT(*)
FROM user u
JOIN plan p ON p.id = u.plan_id
WHERE p.code = ?
"#;
