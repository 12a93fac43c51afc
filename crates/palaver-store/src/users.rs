use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::password;

/// A user account row, without the password hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Clone)]
pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user account. Validation messages are wire-facing and
    /// surfaced verbatim.
    #[instrument(skip(self, password))]
    pub fn create(
        &self,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<i64, StoreError> {
        let username = username.trim();
        let len = username.chars().count();
        if !(3..=32).contains(&len) || username.chars().any(char::is_whitespace) {
            return Err(StoreError::validation("Username must be 3..32 chars, no spaces"));
        }
        if password.chars().count() < 4 {
            return Err(StoreError::validation("Password must be at least 4 chars"));
        }

        let hash = password::hash_password(password);
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO users (username, password_hash, is_admin, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![username, hash, is_admin, true, now],
            );
            match result {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(e) if is_unique_violation(&e) => {
                    Err(StoreError::validation("Username already exists"))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Check credentials. Unknown usernames, inactive accounts, and wrong
    /// passwords are indistinguishable to the caller.
    #[instrument(skip(self, password))]
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, StoreError> {
        let username = username.trim();
        let row = self.lookup(username)?;
        let Some((user, stored_hash)) = row else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }
        if !password::verify_password(password, &stored_hash) {
            return Ok(None);
        }
        Ok(Some(user))
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.lookup(username.trim())?.map(|(user, _)| user))
    }

    fn lookup(&self, username: &str) -> Result<Option<(User, String)>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password_hash, is_admin, is_active, created_at
                 FROM users WHERE username = ?1",
            )?;
            let mut rows = stmt.query([username])?;
            match rows.next()? {
                Some(row) => Ok(Some((
                    User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        is_admin: row.get(3)?,
                        is_active: row.get(4)?,
                        created_at: row.get(5)?,
                    },
                    row.get(2)?,
                ))),
                None => Ok(None),
            }
        })
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> UserRepo {
        UserRepo::new(Database::in_memory().unwrap())
    }

    fn validation_message(err: StoreError) -> String {
        match err {
            StoreError::Validation(msg) => msg,
            other => panic!("expected validation error, got: {other}"),
        }
    }

    #[test]
    fn create_and_authenticate() {
        let repo = repo();
        let id = repo.create("alice", "pw1234", false).unwrap();
        assert!(id > 0);

        let user = repo.authenticate("alice", "pw1234").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.username, "alice");
        assert!(!user.is_admin);
        assert!(user.is_active);
    }

    #[test]
    fn authenticate_trims_username() {
        let repo = repo();
        repo.create("  alice  ", "pw1234", false).unwrap();
        assert!(repo.authenticate(" alice ", "pw1234").unwrap().is_some());
    }

    #[test]
    fn wrong_password_rejected() {
        let repo = repo();
        repo.create("alice", "pw1234", false).unwrap();
        assert!(repo.authenticate("alice", "wrong").unwrap().is_none());
        assert!(repo.authenticate("nobody", "pw1234").unwrap().is_none());
    }

    #[test]
    fn inactive_account_rejected() {
        let repo = repo();
        repo.create("alice", "pw1234", false).unwrap();
        repo.db
            .with_conn(|conn| {
                conn.execute("UPDATE users SET is_active = 0 WHERE username = 'alice'", [])?;
                Ok(())
            })
            .unwrap();
        assert!(repo.authenticate("alice", "pw1234").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_validation_error() {
        let repo = repo();
        repo.create("alice", "pw1234", false).unwrap();
        let err = repo.create("alice", "other1", true).unwrap_err();
        assert_eq!(validation_message(err), "Username already exists");
    }

    #[test]
    fn username_bounds_enforced() {
        let repo = repo();
        let err = repo.create("ab", "pw1234", false).unwrap_err();
        assert_eq!(
            validation_message(err),
            "Username must be 3..32 chars, no spaces"
        );
        let long = "x".repeat(33);
        assert!(repo.create(&long, "pw1234", false).is_err());
        assert!(repo.create("has space", "pw1234", false).is_err());
    }

    #[test]
    fn short_password_rejected() {
        let repo = repo();
        let err = repo.create("alice", "abc", false).unwrap_err();
        assert_eq!(validation_message(err), "Password must be at least 4 chars");
    }

    #[test]
    fn get_by_username_without_credentials() {
        let repo = repo();
        repo.create("admin", "root1", true).unwrap();
        let user = repo.get_by_username("admin").unwrap().unwrap();
        assert!(user.is_admin);
        assert!(repo.get_by_username("ghost").unwrap().is_none());
    }
}
