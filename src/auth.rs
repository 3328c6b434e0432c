use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;

pub const ROLE_ADMIN: &str = "Admin";
pub const ROLE_TEACHER: &str = "Teacher";
pub const ROLE_STUDENT: &str = "Student";

pub const TEMP_PASSWORD_LEN: usize = 12;
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("account not found")]
    NotFound,
    #[error("account already exists")]
    AlreadyExists,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("identity store error: {0}")]
    Store(String),
}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        AuthError::Store(e.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VerifiedAccount {
    pub must_change_password: bool,
}

/// Credential storage and role assignment. The entity store never sees a
/// password; everything credential-shaped goes through this seam.
pub trait IdentityProvider {
    fn account_exists(&self, email: &str) -> Result<bool, AuthError>;
    fn create_account(&self, email: &str, password: &str) -> Result<(), AuthError>;
    fn verify(&self, email: &str, password: &str) -> Result<VerifiedAccount, AuthError>;
    fn replace_password(
        &self,
        email: &str,
        new_password: &str,
        must_change: bool,
    ) -> Result<(), AuthError>;
    fn rename_account(&self, old_email: &str, new_email: &str) -> Result<(), AuthError>;
    fn delete_account(&self, email: &str) -> Result<(), AuthError>;
    fn ensure_role(&self, role: &str) -> Result<(), AuthError>;
    fn assign_role(&self, email: &str, role: &str) -> Result<(), AuthError>;
    fn roles_of(&self, email: &str) -> Result<Vec<String>, AuthError>;
}

/// Temporary credential for password recovery: drawn from the OS RNG,
/// never derived from the account holder's name.
pub fn temp_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TEMP_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn random_salt() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill(&mut bytes);
    hex::encode(bytes)
}

fn digest_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Identity accounts live in their own database file, apart from the
/// entity store.
pub struct SqliteIdentity {
    conn: Connection,
}

impl SqliteIdentity {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(workspace)?;
        let conn = Connection::open(workspace.join("identity.sqlite3"))?;
        Self::with_conn(conn)
    }

    fn with_conn(conn: Connection) -> anyhow::Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts(
                id INTEGER PRIMARY KEY,
                email TEXT NOT NULL,
                salt TEXT NOT NULL,
                digest TEXT NOT NULL,
                must_change_password INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_accounts_email ON accounts(email)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS roles(
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS account_roles(
                account_id INTEGER NOT NULL,
                role_id INTEGER NOT NULL,
                PRIMARY KEY(account_id, role_id),
                FOREIGN KEY(account_id) REFERENCES accounts(id),
                FOREIGN KEY(role_id) REFERENCES roles(id)
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    fn account_id(&self, email: &str) -> Result<Option<i64>, AuthError> {
        let id = self
            .conn
            .query_row("SELECT id FROM accounts WHERE email = ?", [email], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(id)
    }
}

impl IdentityProvider for SqliteIdentity {
    fn account_exists(&self, email: &str) -> Result<bool, AuthError> {
        Ok(self.account_id(email)?.is_some())
    }

    fn create_account(&self, email: &str, password: &str) -> Result<(), AuthError> {
        if self.account_exists(email)? {
            return Err(AuthError::AlreadyExists);
        }
        let salt = random_salt();
        let digest = digest_password(&salt, password);
        self.conn.execute(
            "INSERT INTO accounts(email, salt, digest) VALUES(?, ?, ?)",
            (email, &salt, &digest),
        )?;
        Ok(())
    }

    fn verify(&self, email: &str, password: &str) -> Result<VerifiedAccount, AuthError> {
        let row: Option<(String, String, i64)> = self
            .conn
            .query_row(
                "SELECT salt, digest, must_change_password FROM accounts WHERE email = ?",
                [email],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((salt, digest, must_change)) = row else {
            return Err(AuthError::InvalidCredentials);
        };
        if digest_password(&salt, password) != digest {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(VerifiedAccount {
            must_change_password: must_change != 0,
        })
    }

    fn replace_password(
        &self,
        email: &str,
        new_password: &str,
        must_change: bool,
    ) -> Result<(), AuthError> {
        let salt = random_salt();
        let digest = digest_password(&salt, new_password);
        let changed = self.conn.execute(
            "UPDATE accounts SET salt = ?, digest = ?, must_change_password = ? WHERE email = ?",
            (&salt, &digest, must_change as i64, email),
        )?;
        if changed == 0 {
            return Err(AuthError::NotFound);
        }
        Ok(())
    }

    fn rename_account(&self, old_email: &str, new_email: &str) -> Result<(), AuthError> {
        let changed = self.conn.execute(
            "UPDATE accounts SET email = ? WHERE email = ?",
            (new_email, old_email),
        )?;
        if changed == 0 {
            return Err(AuthError::NotFound);
        }
        Ok(())
    }

    fn delete_account(&self, email: &str) -> Result<(), AuthError> {
        let Some(account_id) = self.account_id(email)? else {
            return Ok(());
        };
        self.conn.execute(
            "DELETE FROM account_roles WHERE account_id = ?",
            [account_id],
        )?;
        self.conn
            .execute("DELETE FROM accounts WHERE id = ?", [account_id])?;
        Ok(())
    }

    fn ensure_role(&self, role: &str) -> Result<(), AuthError> {
        self.conn
            .execute("INSERT OR IGNORE INTO roles(name) VALUES(?)", [role])?;
        Ok(())
    }

    // Quietly does nothing for an unknown account; callers that need the
    // account to exist check first.
    fn assign_role(&self, email: &str, role: &str) -> Result<(), AuthError> {
        let Some(account_id) = self.account_id(email)? else {
            return Ok(());
        };
        self.ensure_role(role)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO account_roles(account_id, role_id)
             SELECT ?, id FROM roles WHERE name = ?",
            (account_id, role),
        )?;
        Ok(())
    }

    fn roles_of(&self, email: &str) -> Result<Vec<String>, AuthError> {
        let mut stmt = self.conn.prepare(
            "SELECT r.name
             FROM account_roles ar
             JOIN accounts a ON a.id = ar.account_id
             JOIN roles r ON r.id = ar.role_id
             WHERE a.email = ?
             ORDER BY r.name",
        )?;
        let roles = stmt
            .query_map([email], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> SqliteIdentity {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        SqliteIdentity::with_conn(conn).expect("init identity schema")
    }

    #[test]
    fn create_verify_roundtrip() {
        let identity = test_identity();
        identity
            .create_account("kid@school.test", "hunter22")
            .expect("create");
        assert!(identity.account_exists("kid@school.test").expect("exists"));

        let verified = identity
            .verify("kid@school.test", "hunter22")
            .expect("verify");
        assert!(!verified.must_change_password);

        let err = identity
            .verify("kid@school.test", "wrong")
            .expect_err("wrong password");
        assert!(matches!(err, AuthError::InvalidCredentials));
        let err = identity
            .verify("nobody@school.test", "hunter22")
            .expect_err("unknown account");
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn duplicate_account_is_rejected() {
        let identity = test_identity();
        identity
            .create_account("kid@school.test", "hunter22")
            .expect("create");
        let err = identity
            .create_account("kid@school.test", "other")
            .expect_err("duplicate");
        assert!(matches!(err, AuthError::AlreadyExists));
    }

    #[test]
    fn replace_password_sets_and_clears_must_change() {
        let identity = test_identity();
        identity
            .create_account("kid@school.test", "hunter22")
            .expect("create");
        identity
            .replace_password("kid@school.test", "TempABC12345", true)
            .expect("replace");
        assert!(identity
            .verify("kid@school.test", "hunter22")
            .is_err());
        let verified = identity
            .verify("kid@school.test", "TempABC12345")
            .expect("verify temp");
        assert!(verified.must_change_password);

        identity
            .replace_password("kid@school.test", "chosen-by-user", false)
            .expect("replace again");
        let verified = identity
            .verify("kid@school.test", "chosen-by-user")
            .expect("verify final");
        assert!(!verified.must_change_password);
    }

    #[test]
    fn rename_moves_credentials_and_roles() {
        let identity = test_identity();
        identity
            .create_account("old@school.test", "hunter22")
            .expect("create");
        identity
            .assign_role("old@school.test", ROLE_STUDENT)
            .expect("assign");
        identity
            .rename_account("old@school.test", "new@school.test")
            .expect("rename");

        assert!(!identity.account_exists("old@school.test").expect("exists"));
        identity
            .verify("new@school.test", "hunter22")
            .expect("verify renamed");
        assert_eq!(
            identity.roles_of("new@school.test").expect("roles"),
            vec![ROLE_STUDENT.to_string()]
        );
    }

    #[test]
    fn assign_role_is_a_quiet_noop_for_unknown_accounts() {
        let identity = test_identity();
        identity
            .assign_role("ghost@school.test", ROLE_TEACHER)
            .expect("assign");
        assert!(identity
            .roles_of("ghost@school.test")
            .expect("roles")
            .is_empty());
    }

    #[test]
    fn temp_password_shape() {
        let a = temp_password();
        let b = temp_password();
        assert_eq!(a.len(), TEMP_PASSWORD_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
