//! Tests for the SQLite user manager.

use std::path::Path;
use std::time::{Duration, Instant};

use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;

use crate::sql::{Manager, ManagerConfig, SCHEMA_VERSION};
use crate::{
    AuthError, Auther, HashCost, Permission, Role, Settings, Tier, hash_password, verify_password,
};

/// Create a test manager with in-memory SQLite.
async fn setup_test_db(default_access: Permission) -> Manager {
    let config = ManagerConfig::new("sqlite::memory:")
        .max_connections(1)
        .default_access(default_access)
        .hash_cost(HashCost::MIN);

    Manager::connect(config).await.expect("Failed to connect")
}

async fn file_manager(path: &Path) -> Result<Manager, AuthError> {
    let config = ManagerConfig::new(format!("sqlite:{}", path.display()))
        .default_access(Permission::DenyAll)
        .hash_cost(HashCost::MIN);
    Manager::connect(config).await
}

/// Run raw statements against a database file, outside of any manager.
async fn exec_raw(path: &Path, statements: &[&str]) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options)
        .await
        .expect("Failed to open database");
    for statement in statements {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .expect("Failed to execute statement");
    }
    pool.close().await;
}

async fn token_rows(manager: &Manager) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_token")
        .fetch_one(manager.pool())
        .await
        .unwrap();
    count
}

async fn schema_version(manager: &Manager) -> i64 {
    let (version,): (i64,) = sqlx::query_as("SELECT version FROM schema_version WHERE id = 1")
        .fetch_one(manager.pool())
        .await
        .unwrap();
    version
}

// Schema

#[tokio::test]
async fn test_fresh_store_has_everyone() {
    let manager = setup_test_db(Permission::ReadWrite).await;
    assert_eq!(schema_version(&manager).await, SCHEMA_VERSION);

    let users = manager.users().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, 1);
    assert_eq!(users[0].name, "*");
    assert_eq!(users[0].role, Role::Anonymous);
    assert!(users[0].hash.is_empty());
    assert_eq!(manager.users_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_reopen_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("user.db");

    let manager = file_manager(&path).await.unwrap();
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager.close().await;

    let manager = file_manager(&path).await.unwrap();
    assert_eq!(manager.users_count().await.unwrap(), 2);
    assert_eq!(schema_version(&manager).await, SCHEMA_VERSION);
}

#[tokio::test]
async fn test_migration_from_v1() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("user.db");
    let phil_hash = hash_password("phil", HashCost::MIN).unwrap();
    let ben_hash = hash_password("ben", HashCost::MIN).unwrap();
    let insert_phil =
        format!("INSERT INTO user (user, pass, role) VALUES ('phil', '{phil_hash}', 'admin')");
    let insert_ben =
        format!("INSERT INTO user (user, pass, role) VALUES ('ben', '{ben_hash}', 'user')");

    exec_raw(
        &path,
        &[
            "CREATE TABLE user (user TEXT NOT NULL PRIMARY KEY, pass TEXT NOT NULL, role TEXT NOT NULL)",
            "CREATE TABLE access (user TEXT NOT NULL, topic TEXT NOT NULL, read INT NOT NULL, write INT NOT NULL, PRIMARY KEY (topic, user))",
            "CREATE TABLE schema_version (id INT PRIMARY KEY, version INT NOT NULL)",
            "INSERT INTO schema_version (id, version) VALUES (1, 1)",
            &insert_phil,
            &insert_ben,
            "INSERT INTO access (user, topic, read, write) VALUES ('ben', 'stats', 1, 1)",
            "INSERT INTO access (user, topic, read, write) VALUES ('ben', 'secret', 1, 0)",
            "INSERT INTO access (user, topic, read, write) VALUES ('ben', 'up%', 0, 1)",
            "INSERT INTO access (user, topic, read, write) VALUES ('*', 'stats', 1, 0)",
        ],
    )
    .await;

    let manager = file_manager(&path).await.unwrap();
    assert_eq!(schema_version(&manager).await, SCHEMA_VERSION);

    let users = manager.users().await.unwrap();
    assert_eq!(users.len(), 3);
    let (phil, ben, everyone) = (&users[0], &users[1], &users[2]);
    assert_eq!(phil.name, "phil");
    assert_eq!(phil.role, Role::Admin);
    assert_eq!(ben.name, "ben");
    assert_eq!(ben.role, Role::User);
    assert_eq!(everyone.name, "*");
    assert_eq!(everyone.id, 1);
    assert_eq!(ben.stats.calls, 0);
    assert_eq!(ben.settings, Settings::default());

    // Old hashes still work
    manager.authenticate("ben", "ben").await.unwrap();

    let ben_grants = manager.grants("ben").await.unwrap();
    assert_eq!(ben_grants.len(), 3);
    assert_eq!(ben_grants[0].topic_pattern, "stats");
    assert_eq!(ben_grants[0].permission, Permission::ReadWrite);
    assert_eq!(ben_grants[1].topic_pattern, "up*");
    assert_eq!(ben_grants[1].permission, Permission::Write);
    assert_eq!(ben_grants[2].topic_pattern, "secret");
    assert_eq!(ben_grants[2].permission, Permission::Read);

    let everyone_grants = manager.grants("*").await.unwrap();
    assert_eq!(everyone_grants.len(), 1);
    assert_eq!(everyone_grants[0].topic_pattern, "stats");
    assert_eq!(everyone_grants[0].permission, Permission::Read);
    assert!(manager.grants("phil").await.unwrap().is_empty());

    manager
        .authorize(Some(ben), "uptime", Permission::Write)
        .await
        .unwrap();
    assert!(manager.authorize(None, "stats", Permission::Write).await.is_err());
}

#[tokio::test]
async fn test_failed_migration_keeps_prior_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("user.db");
    exec_raw(
        &path,
        &[
            "CREATE TABLE user (user TEXT NOT NULL PRIMARY KEY, pass TEXT NOT NULL, role TEXT NOT NULL)",
            "CREATE TABLE access (user TEXT NOT NULL, topic TEXT NOT NULL, read INT NOT NULL, write INT NOT NULL, PRIMARY KEY (topic, user))",
            "CREATE TABLE schema_version (id INT PRIMARY KEY, version INT NOT NULL)",
            "INSERT INTO schema_version (id, version) VALUES (1, 1)",
            "INSERT INTO user (user, pass, role) VALUES ('ben', 'x', 'user')",
            // Rejected by the role check of the rebuilt user table
            "INSERT INTO user (user, pass, role) VALUES ('eve', 'x', 'guest')",
            "INSERT INTO access (user, topic, read, write) VALUES ('ben', 'stats', 1, 1)",
        ],
    )
    .await;

    let err = file_manager(&path).await.unwrap_err();
    assert!(matches!(err, AuthError::Backend(_)), "{err}");

    let pool = SqlitePool::connect_with(SqliteConnectOptions::new().filename(&path))
        .await
        .unwrap();
    let (version,): (i64,) = sqlx::query_as("SELECT version FROM schema_version WHERE id = 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(version, 1);

    let tables: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
    let tables: Vec<_> = tables.into_iter().map(|(name,)| name).collect();
    assert_eq!(tables, ["access", "schema_version", "user"]);

    let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(users, 2);
    pool.close().await;
}

#[tokio::test]
async fn test_unknown_schema_version_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("user.db");
    exec_raw(
        &path,
        &[
            "CREATE TABLE schema_version (id INT PRIMARY KEY, version INT NOT NULL)",
            "INSERT INTO schema_version (id, version) VALUES (1, 99)",
        ],
    )
    .await;

    let err = file_manager(&path).await.unwrap_err();
    assert!(matches!(err, AuthError::Schema(_)), "{err}");
    assert_eq!(err.kind(), crate::ErrorKind::Fatal);
}

#[tokio::test]
async fn test_empty_schema_version_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("user.db");
    exec_raw(
        &path,
        &["CREATE TABLE schema_version (id INT PRIMARY KEY, version INT NOT NULL)"],
    )
    .await;

    assert!(matches!(
        file_manager(&path).await,
        Err(AuthError::Schema(_))
    ));
}

#[tokio::test]
async fn test_startup_queries() {
    let config = ManagerConfig::new("sqlite::memory:")
        .hash_cost(HashCost::MIN)
        .startup_query("PRAGMA busy_timeout = 1000; PRAGMA temp_store = memory");
    let manager = Manager::connect(config).await.unwrap();

    let (timeout,): (i64,) = sqlx::query_as("PRAGMA busy_timeout")
        .fetch_one(manager.pool())
        .await
        .unwrap();
    assert_eq!(timeout, 1000);
}

// Authentication

#[tokio::test]
async fn test_authenticate() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben-pass", Role::User).await.unwrap();

    let ben = manager.authenticate("ben", "ben-pass").await.unwrap();
    assert_eq!(ben.name, "ben");
    assert_eq!(ben.role, Role::User);
    assert!(ben.token.is_none());
    assert!(ben.hash.starts_with("$argon2id$"));

    assert!(matches!(
        manager.authenticate("ben", "wrong").await,
        Err(AuthError::Unauthenticated)
    ));
    assert!(matches!(
        manager.authenticate("nobody", "ben-pass").await,
        Err(AuthError::Unauthenticated)
    ));
    assert!(matches!(
        manager.authenticate("*", "").await,
        Err(AuthError::Unauthenticated)
    ));
}

#[tokio::test]
async fn test_authenticate_timing() {
    let cost = HashCost {
        memory_kib: 4096,
        iterations: 2,
        parallelism: 1,
    };
    let config = ManagerConfig::new("sqlite::memory:").hash_cost(cost);
    let manager = Manager::connect(config).await.unwrap();
    manager.add_user("ben", "ben-pass", Role::User).await.unwrap();

    let hash = hash_password("reference", cost).unwrap();
    let start = Instant::now();
    for _ in 0..3 {
        verify_password("other", &hash);
    }
    let baseline = start.elapsed() / 3;

    for (username, password) in [
        ("ben", "ben-pass"),
        ("ben", "wrong"),
        ("nobody", "ben-pass"),
    ] {
        let start = Instant::now();
        let _ = manager.authenticate(username, password).await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= baseline / 2,
            "{username}/{password}: {elapsed:?} < half of {baseline:?}"
        );
    }
}

#[tokio::test]
async fn test_auther_trait_object() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();

    let auther: std::sync::Arc<dyn Auther> = std::sync::Arc::new(manager);
    let ben = auther.authenticate("ben", "ben").await.unwrap();
    assert!(auther
        .authorize(Some(&ben), "mytopic", Permission::Read)
        .await
        .is_err());
}

// Authorization

#[tokio::test]
async fn test_deny_all_scenario() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager
        .allow_access(None, "ben", "readme", Permission::Read)
        .await
        .unwrap();
    manager
        .allow_access(None, "*", "announcements", Permission::Read)
        .await
        .unwrap();
    let ben = manager.authenticate("ben", "ben").await.unwrap();

    manager
        .authorize(Some(&ben), "readme", Permission::Read)
        .await
        .unwrap();
    assert!(matches!(
        manager.authorize(Some(&ben), "readme", Permission::Write).await,
        Err(AuthError::Unauthorized)
    ));
    manager
        .authorize(None, "announcements", Permission::Read)
        .await
        .unwrap();
    assert!(matches!(
        manager.authorize(None, "announcements", Permission::Write).await,
        Err(AuthError::Unauthorized)
    ));
    assert!(matches!(
        manager.authorize(None, "readme", Permission::Read).await,
        Err(AuthError::Unauthorized)
    ));
    // Everyone grants apply to users too
    manager
        .authorize(Some(&ben), "announcements", Permission::Read)
        .await
        .unwrap();
    assert!(manager
        .authorize(Some(&ben), "other", Permission::Read)
        .await
        .is_err());
}

#[tokio::test]
async fn test_authorize_ignores_topic_case() {
    let manager = setup_test_db(Permission::ReadWrite).await;
    manager
        .allow_access(None, "*", "secret", Permission::DenyAll)
        .await
        .unwrap();
    manager
        .allow_access(None, "*", "Up*", Permission::Read)
        .await
        .unwrap();

    for topic in ["secret", "SECRET", "SeCrEt"] {
        assert!(matches!(
            manager.authorize(None, topic, Permission::Read).await,
            Err(AuthError::Unauthorized)
        ));
    }
    manager
        .authorize(None, "UPTIME", Permission::Read)
        .await
        .unwrap();
    assert!(manager
        .authorize(None, "uptime", Permission::Write)
        .await
        .is_err());
    // No grant matches, default applies
    manager
        .authorize(None, "secrets", Permission::Write)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_user_grant_beats_everyone() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager
        .allow_access(None, "*", "mytopic*", Permission::ReadWrite)
        .await
        .unwrap();
    manager
        .allow_access(None, "ben", "mytopic", Permission::DenyAll)
        .await
        .unwrap();
    let ben = manager.user("ben").await.unwrap();

    assert!(manager
        .authorize(Some(&ben), "mytopic", Permission::Read)
        .await
        .is_err());
    manager
        .authorize(Some(&ben), "mytopic2", Permission::Write)
        .await
        .unwrap();
    manager
        .authorize(None, "mytopic", Permission::Write)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_default_access_fallback() {
    for default in [
        Permission::ReadWrite,
        Permission::Read,
        Permission::Write,
        Permission::DenyAll,
    ] {
        let manager = setup_test_db(default).await;
        assert_eq!(manager.default_access(), default);
        assert_eq!(
            manager.authorize(None, "any", Permission::Read).await.is_ok(),
            default.is_read()
        );
        assert_eq!(
            manager.authorize(None, "any", Permission::Write).await.is_ok(),
            default.is_write()
        );
    }
}

#[tokio::test]
async fn test_admin_bypass() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("phil", "phil", Role::Admin).await.unwrap();
    manager
        .allow_access(None, "*", "*", Permission::DenyAll)
        .await
        .unwrap();
    let phil = manager.authenticate("phil", "phil").await.unwrap();

    for topic in ["mytopic", "announcements", "x"] {
        for permission in [Permission::Read, Permission::Write] {
            manager
                .authorize(Some(&phil), topic, permission)
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn test_authorize_invalid_topic() {
    let manager = setup_test_db(Permission::ReadWrite).await;
    assert!(matches!(
        manager.authorize(None, "a/b", Permission::Read).await,
        Err(AuthError::InvalidArgument(_))
    ));
}

// Users

#[tokio::test]
async fn test_add_user_validation() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();

    assert!(matches!(
        manager.add_user("ben", "other", Role::Admin).await,
        Err(AuthError::UserExists)
    ));
    assert!(matches!(
        manager.add_user("ben heckel", "x", Role::User).await,
        Err(AuthError::InvalidArgument(_))
    ));
    assert!(matches!(
        manager.add_user("*", "x", Role::User).await,
        Err(AuthError::InvalidArgument(_))
    ));
    assert!(matches!(
        manager.add_user("anon", "x", Role::Anonymous).await,
        Err(AuthError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_users_order() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("zoe", "x", Role::User).await.unwrap();
    manager.add_user("ben", "x", Role::User).await.unwrap();
    manager.add_user("phil", "x", Role::Admin).await.unwrap();

    let names: Vec<_> = manager
        .users()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.name)
        .collect();
    assert_eq!(names, ["phil", "ben", "zoe", "*"]);
}

#[tokio::test]
async fn test_remove_user_cascades() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager.add_user("phil", "phil", Role::User).await.unwrap();
    manager
        .allow_access(None, "ben", "mytopic", Permission::ReadWrite)
        .await
        .unwrap();
    manager
        .add_reservation("ben", "bentopic", Permission::Read)
        .await
        .unwrap();
    manager
        .allow_access(Some("ben"), "phil", "bentopic", Permission::Read)
        .await
        .unwrap();
    let ben = manager.user("ben").await.unwrap();
    let token = manager.create_token(&ben).await.unwrap();

    manager.remove_user("ben").await.unwrap();

    assert!(matches!(
        manager.user("ben").await,
        Err(AuthError::UserNotFound)
    ));
    assert!(matches!(
        manager.grants("ben").await,
        Err(AuthError::UserNotFound)
    ));
    assert!(manager.grants("*").await.unwrap().is_empty());
    assert!(manager.grants("phil").await.unwrap().is_empty());
    assert_eq!(token_rows(&manager).await, 0);
    assert!(manager.authenticate_token(&token.value).await.is_err());

    // Idempotent
    manager.remove_user("ben").await.unwrap();
    assert!(matches!(
        manager.remove_user("*").await,
        Err(AuthError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_change_password() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "old", Role::User).await.unwrap();
    manager.change_password("ben", "new").await.unwrap();

    assert!(manager.authenticate("ben", "old").await.is_err());
    manager.authenticate("ben", "new").await.unwrap();
    assert!(matches!(
        manager.change_password("nobody", "x").await,
        Err(AuthError::UserNotFound)
    ));
}

#[tokio::test]
async fn test_change_role_to_admin_clears_grants() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager
        .allow_access(None, "ben", "mytopic", Permission::ReadWrite)
        .await
        .unwrap();
    manager
        .allow_access(None, "ben", "readme", Permission::Read)
        .await
        .unwrap();
    assert_eq!(manager.grants("ben").await.unwrap().len(), 2);

    manager.change_role("ben", Role::Admin).await.unwrap();
    assert_eq!(manager.user("ben").await.unwrap().role, Role::Admin);
    assert!(manager.grants("ben").await.unwrap().is_empty());

    // Demotion keeps whatever grants exist
    manager
        .allow_access(None, "ben", "readme", Permission::Read)
        .await
        .unwrap();
    manager.change_role("ben", Role::User).await.unwrap();
    assert_eq!(manager.grants("ben").await.unwrap().len(), 1);

    assert!(matches!(
        manager.change_role("nobody", Role::Admin).await,
        Err(AuthError::UserNotFound)
    ));
}

#[tokio::test]
async fn test_change_settings() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();

    let settings = Settings {
        language: Some("de".to_string()),
        ..Default::default()
    };
    manager.change_settings("ben", &settings).await.unwrap();
    assert_eq!(manager.user("ben").await.unwrap().settings, settings);

    assert!(matches!(
        manager.change_settings("nobody", &settings).await,
        Err(AuthError::UserNotFound)
    ));
}

// Tokens

#[tokio::test]
async fn test_token_lifecycle() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    let ben = manager.authenticate("ben", "ben").await.unwrap();

    let token = manager.create_token(&ben).await.unwrap();
    assert_eq!(token.value.len(), 32);
    assert!(token.value.starts_with("tk_"));

    let by_token = manager.authenticate_token(&token.value).await.unwrap();
    assert_eq!(by_token.name, "ben");
    assert_eq!(by_token.token.as_deref(), Some(token.value.as_str()));

    // Force expiry
    sqlx::query("UPDATE user_token SET expires = 1 WHERE token = ?")
        .bind(&token.value)
        .execute(manager.pool())
        .await
        .unwrap();
    assert!(matches!(
        manager.authenticate_token(&token.value).await,
        Err(AuthError::Unauthenticated)
    ));

    assert_eq!(manager.remove_expired_tokens().await.unwrap(), 1);
    assert_eq!(manager.remove_expired_tokens().await.unwrap(), 0);
    assert_eq!(token_rows(&manager).await, 0);
}

#[tokio::test]
async fn test_authenticate_token_length() {
    let manager = setup_test_db(Permission::DenyAll).await;
    assert!(matches!(
        manager.authenticate_token("tk_short").await,
        Err(AuthError::Unauthenticated)
    ));
    assert!(matches!(
        manager
            .authenticate_token("tk_AAAAAAAAAAAAAAAAAAAAAAAAAAAAA")
            .await,
        Err(AuthError::Unauthenticated)
    ));
}

#[tokio::test]
async fn test_extend_token() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    let ben = manager.user("ben").await.unwrap();

    assert!(matches!(
        manager.extend_token(&ben).await,
        Err(AuthError::NoTokenProvided)
    ));

    let token = manager.create_token(&ben).await.unwrap();
    sqlx::query("UPDATE user_token SET expires = expires - 3600 WHERE token = ?")
        .bind(&token.value)
        .execute(manager.pool())
        .await
        .unwrap();

    let ben = manager.authenticate_token(&token.value).await.unwrap();
    let extended = manager.extend_token(&ben).await.unwrap();
    assert_eq!(extended.value, token.value);
    assert!(extended.expires >= token.expires);

    let tokens = manager.tokens("ben").await.unwrap();
    assert_eq!(tokens, vec![extended]);

    manager.remove_token(&ben).await.unwrap();
    assert!(matches!(
        manager.extend_token(&ben).await,
        Err(AuthError::TokenNotFound)
    ));
}

#[tokio::test]
async fn test_remove_token() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    let ben = manager.user("ben").await.unwrap();

    assert!(matches!(
        manager.remove_token(&ben).await,
        Err(AuthError::Unauthorized)
    ));

    let first = manager.create_token(&ben).await.unwrap();
    let second = manager.create_token(&ben).await.unwrap();
    let ben = manager.authenticate_token(&first.value).await.unwrap();
    manager.remove_token(&ben).await.unwrap();

    assert!(manager.authenticate_token(&first.value).await.is_err());
    manager.authenticate_token(&second.value).await.unwrap();
}

#[tokio::test]
async fn test_token_max_count() {
    let config = ManagerConfig::new("sqlite::memory:")
        .hash_cost(HashCost::MIN)
        .token_max_count(3);
    let manager = Manager::connect(config).await.unwrap();
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager.add_user("phil", "phil", Role::User).await.unwrap();
    let ben = manager.user("ben").await.unwrap();
    let phil = manager.user("phil").await.unwrap();

    let phil_token = manager.create_token(&phil).await.unwrap();
    let keeper = manager.create_token(&ben).await.unwrap();
    sqlx::query("UPDATE user_token SET expires = expires + 86400 WHERE token = ?")
        .bind(&keeper.value)
        .execute(manager.pool())
        .await
        .unwrap();

    for _ in 0..5 {
        manager.create_token(&ben).await.unwrap();
    }

    let tokens = manager.tokens("ben").await.unwrap();
    assert_eq!(tokens.len(), 3);
    assert!(tokens.iter().any(|t| t.value == keeper.value));
    manager.authenticate_token(&keeper.value).await.unwrap();

    // Pruning is per user
    manager.authenticate_token(&phil_token.value).await.unwrap();
    assert_eq!(manager.tokens("phil").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_no_tokens_for_everyone() {
    let manager = setup_test_db(Permission::DenyAll).await;
    let everyone = manager.user("*").await.unwrap();
    assert!(matches!(
        manager.create_token(&everyone).await,
        Err(AuthError::InvalidArgument(_))
    ));
}

// Grants and reservations

#[tokio::test]
async fn test_check_allow_access() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager.add_user("alice", "alice", Role::User).await.unwrap();
    manager
        .allow_access(None, "ben", "mytopic", Permission::ReadWrite)
        .await
        .unwrap();

    assert!(matches!(
        manager.check_allow_access("alice", "mytopic").await,
        Err(AuthError::TopicOwnedByOthers)
    ));
    manager.check_allow_access("ben", "mytopic").await.unwrap();
    manager.check_allow_access("alice", "othertopic").await.unwrap();

    // Wildcards block every topic they match
    manager
        .allow_access(Some("ben"), "ben", "ben*", Permission::ReadWrite)
        .await
        .unwrap();
    assert!(manager.check_allow_access("alice", "ben-stuff").await.is_err());
    manager.check_allow_access("ben", "ben-stuff").await.unwrap();

    assert!(matches!(
        manager.check_allow_access("nobody", "mytopic").await,
        Err(AuthError::UserNotFound)
    ));
    assert!(matches!(
        manager.check_allow_access("alice", "my*").await,
        Err(AuthError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_allow_access_upserts() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager
        .allow_access(None, "ben", "mytopic", Permission::Read)
        .await
        .unwrap();
    manager
        .allow_access(None, "ben", "mytopic", Permission::Write)
        .await
        .unwrap();

    let grants = manager.grants("ben").await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].permission, Permission::Write);

    assert!(matches!(
        manager
            .allow_access(None, "nobody", "mytopic", Permission::Read)
            .await,
        Err(AuthError::UserNotFound)
    ));
    assert!(matches!(
        manager
            .allow_access(None, "ben", "my topic", Permission::Read)
            .await,
        Err(AuthError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_reset_access() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager.add_user("phil", "phil", Role::User).await.unwrap();
    for topic in ["a", "b", "c"] {
        manager
            .allow_access(None, "ben", topic, Permission::Read)
            .await
            .unwrap();
    }
    manager
        .allow_access(None, "phil", "a", Permission::Read)
        .await
        .unwrap();

    manager.reset_access(Some("ben"), Some("a")).await.unwrap();
    assert_eq!(manager.grants("ben").await.unwrap().len(), 2);
    assert_eq!(manager.grants("phil").await.unwrap().len(), 1);

    manager.reset_access(Some("ben"), None).await.unwrap();
    assert!(manager.grants("ben").await.unwrap().is_empty());
    assert_eq!(manager.grants("phil").await.unwrap().len(), 1);

    assert!(matches!(
        manager.reset_access(None, Some("a")).await,
        Err(AuthError::InvalidArgument(_))
    ));

    manager.reset_access(None, None).await.unwrap();
    assert!(manager.grants("phil").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reservations() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager.add_user("phil", "phil", Role::User).await.unwrap();

    manager
        .add_reservation("ben", "mytopic", Permission::Read)
        .await
        .unwrap();
    manager
        .add_reservation("ben", "private", Permission::DenyAll)
        .await
        .unwrap();

    let reservations = manager.reservations("ben").await.unwrap();
    assert_eq!(reservations.len(), 2);
    assert_eq!(reservations[0].topic, "mytopic");
    assert_eq!(reservations[0].owner, Permission::ReadWrite);
    assert_eq!(reservations[0].everyone, Permission::Read);
    assert_eq!(reservations[1].topic, "private");
    assert_eq!(reservations[1].everyone, Permission::DenyAll);

    assert!(manager.has_reservation("ben", "mytopic").await.unwrap());
    assert!(!manager.has_reservation("phil", "mytopic").await.unwrap());
    assert_eq!(manager.reservations_count("ben").await.unwrap(), 2);
    assert_eq!(
        manager.reservation_owner("mytopic").await.unwrap().as_deref(),
        Some("ben")
    );
    assert_eq!(manager.reservation_owner("free").await.unwrap(), None);

    assert!(matches!(
        manager
            .add_reservation("phil", "mytopic", Permission::ReadWrite)
            .await,
        Err(AuthError::TopicOwnedByOthers)
    ));

    manager
        .authorize(None, "mytopic", Permission::Read)
        .await
        .unwrap();
    assert!(manager
        .authorize(None, "mytopic", Permission::Write)
        .await
        .is_err());

    manager
        .remove_reservations("ben", &["mytopic"])
        .await
        .unwrap();
    assert_eq!(manager.reservations_count("ben").await.unwrap(), 1);
    assert!(manager.grants("*").await.unwrap().iter().all(|g| g.topic_pattern != "mytopic"));
    manager.check_allow_access("phil", "mytopic").await.unwrap();
}

// Tiers

fn tier(code: &str, reservations_limit: i64) -> Tier {
    Tier {
        messages_limit: 1000,
        messages_expiry_duration: Duration::from_secs(3600),
        emails_limit: 10,
        calls_limit: 2,
        reservations_limit,
        attachment_file_size_limit: 1 << 20,
        attachment_total_size_limit: 10 << 20,
        attachment_expiry_duration: Duration::from_secs(7200),
        ..Tier::new(code, code.to_uppercase())
    }
}

#[tokio::test]
async fn test_tiers() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_tier(&tier("pro", 5)).await.unwrap();
    manager.add_tier(&tier("basic", 1)).await.unwrap();
    assert!(matches!(
        manager.add_tier(&tier("pro", 1)).await,
        Err(AuthError::TierExists)
    ));

    let codes: Vec<_> = manager
        .tiers()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.code)
        .collect();
    assert_eq!(codes, ["basic", "pro"]);
    assert_eq!(manager.tier("pro").await.unwrap(), tier("pro", 5));
    assert!(matches!(
        manager.tier("gold").await,
        Err(AuthError::TierNotFound)
    ));

    let mut updated = tier("pro", 7);
    updated.name = "Professional".to_string();
    manager.update_tier(&updated).await.unwrap();
    assert_eq!(manager.tier("pro").await.unwrap(), updated);
    assert!(matches!(
        manager.update_tier(&tier("gold", 1)).await,
        Err(AuthError::TierNotFound)
    ));

    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager.change_tier("ben", "pro").await.unwrap();
    let ben = manager.user("ben").await.unwrap();
    assert_eq!(ben.tier, Some(updated));

    // Still referenced
    let err = manager.remove_tier("pro").await.unwrap_err();
    assert!(matches!(err, AuthError::TierInUse), "{err}");
    assert_eq!(err.kind(), crate::ErrorKind::Conflict);
    manager.reset_tier("ben").await.unwrap();
    assert!(manager.user("ben").await.unwrap().tier.is_none());
    manager.remove_tier("pro").await.unwrap();
    assert!(matches!(
        manager.remove_tier("pro").await,
        Err(AuthError::TierNotFound)
    ));
}

#[tokio::test]
async fn test_tier_downgrade_with_too_many_reservations() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_tier(&tier("pro", 5)).await.unwrap();
    manager.add_tier(&tier("basic", 1)).await.unwrap();
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    manager.change_tier("ben", "pro").await.unwrap();
    manager
        .add_reservation("ben", "one", Permission::DenyAll)
        .await
        .unwrap();
    manager
        .add_reservation("ben", "two", Permission::DenyAll)
        .await
        .unwrap();

    assert!(matches!(
        manager.change_tier("ben", "basic").await,
        Err(AuthError::TooManyReservations)
    ));
    assert!(matches!(
        manager.reset_tier("ben").await,
        Err(AuthError::TooManyReservations)
    ));
    assert_eq!(
        manager.user("ben").await.unwrap().tier.map(|t| t.code).as_deref(),
        Some("pro")
    );

    manager.remove_reservations("ben", &["two"]).await.unwrap();
    manager.change_tier("ben", "basic").await.unwrap();
}

// Stats

#[tokio::test]
async fn test_enqueue_stats_writes_last_value() {
    let config = ManagerConfig::new("sqlite::memory:")
        .hash_cost(HashCost::MIN)
        .stats_flush_interval(Duration::from_millis(100));
    let manager = Manager::connect(config).await.unwrap();
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    let mut ben = manager.user("ben").await.unwrap();

    for i in 1..=5 {
        ben.stats.messages = i;
        ben.stats.emails = i * 10;
        ben.stats.calls = i * 100;
        manager.enqueue_stats(&ben);
    }
    assert_eq!(manager.user("ben").await.unwrap().stats.messages, 0);

    let deadline = Instant::now() + Duration::from_secs(10);
    let stats = loop {
        let stats = manager.user("ben").await.unwrap().stats;
        if stats.messages != 0 || Instant::now() > deadline {
            break stats;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    assert_eq!(stats.messages, 5);
    assert_eq!(stats.emails, 50);
    assert_eq!(stats.calls, 500);

    // The batch was drained, so later ticks must not write it again
    sqlx::query("UPDATE user SET messages = 42 WHERE name = 'ben'")
        .execute(manager.pool())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(manager.user("ben").await.unwrap().stats.messages, 42);
}

#[tokio::test]
async fn test_close_flushes_pending_stats() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("user.db");
    let manager = file_manager(&path).await.unwrap();
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    let mut ben = manager.user("ben").await.unwrap();
    ben.stats.messages = 1;
    manager.enqueue_stats(&ben);
    ben.stats.messages = 2;
    ben.stats.calls = 7;
    manager.enqueue_stats(&ben);
    manager.close().await;

    let manager = file_manager(&path).await.unwrap();
    let stats = manager.user("ben").await.unwrap().stats;
    assert_eq!((stats.messages, stats.emails, stats.calls), (2, 0, 7));
}

#[tokio::test]
async fn test_reset_stats() {
    let manager = setup_test_db(Permission::DenyAll).await;
    manager.add_user("ben", "ben", Role::User).await.unwrap();
    sqlx::query("UPDATE user SET messages = 3, emails = 2, calls = 1 WHERE name = 'ben'")
        .execute(manager.pool())
        .await
        .unwrap();

    let mut ben = manager.user("ben").await.unwrap();
    assert_eq!(ben.stats.messages, 3);
    ben.stats.messages = 4;
    manager.enqueue_stats(&ben);

    manager.reset_stats().await.unwrap();
    let stats = manager.user("ben").await.unwrap().stats;
    assert_eq!((stats.messages, stats.emails, stats.calls), (0, 0, 0));
}
