//! The demo user directory: thin CRUD over the `app_user` table.
//!
//! Email uniqueness is enforced by the storage index, not by lookup; a
//! duplicate surfaces as [`DirectoryError::DuplicateEmail`] so callers can
//! distinguish it from transport or query failures.

use std::fmt;

use surrealdb::RecordId;
use uuid::Uuid;

use crate::db::schema::AppUserRecord;
use crate::db::{Db, is_unique_violation};

/// Name pools for generated users. Small on purpose; the uuid fragment in
/// the email carries the uniqueness.
const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Grace", "Edsger", "Barbara", "Donald", "Hedy", "Linus", "Margaret", "Dennis",
];
const LAST_NAMES: &[&str] = &[
    "Lovelace", "Turing", "Hopper", "Dijkstra", "Liskov", "Knuth", "Lamarr", "Ritchie", "Hamilton",
    "Kernighan",
];

/// Directory operation failures.
#[derive(Debug)]
pub enum DirectoryError {
    /// The email address is already taken by another user.
    DuplicateEmail(String),
    /// No user with the requested id.
    NotFound(String),
    /// Storage or query failure.
    Database(anyhow::Error),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateEmail(email) => {
                write!(f, "A user with email '{}' already exists", email)
            }
            Self::NotFound(id) => write!(f, "User not found: {}", id),
            Self::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// A freshly generated user profile, not yet stored.
#[derive(Debug, Clone)]
pub struct GeneratedUser {
    pub name: String,
    pub email: String,
}

/// CRUD access to the `app_user` table.
#[derive(Clone)]
pub struct UserDirectory {
    db: Db,
}

impl UserDirectory {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert a new user. The unique index on `email` arbitrates duplicates.
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
    ) -> Result<AppUserRecord, DirectoryError> {
        let query = r#"
            CREATE app_user CONTENT {
                name: $name,
                email: $email
            }
        "#;

        let mut response = self
            .db
            .query(query)
            .bind(("name", name.to_string()))
            .bind(("email", email.to_string()))
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DirectoryError::DuplicateEmail(email.to_string())
                } else {
                    DirectoryError::Database(e.into())
                }
            })?;

        let created: Vec<AppUserRecord> = response.take(0).map_err(|e| {
            if is_unique_violation(&e) {
                DirectoryError::DuplicateEmail(email.to_string())
            } else {
                DirectoryError::Database(e.into())
            }
        })?;

        created
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::Database(anyhow::anyhow!("create returned no record")))
    }

    /// Insert a generated user, regenerating once if the email collides.
    pub async fn create_random_user(&self) -> Result<AppUserRecord, DirectoryError> {
        self.create_random_user_with(random_user).await
    }

    /// Insert a user drawn from `generate`, drawing again once if the email
    /// collides, then giving up.
    pub async fn create_random_user_with<G>(
        &self,
        mut generate: G,
    ) -> Result<AppUserRecord, DirectoryError>
    where
        G: FnMut() -> GeneratedUser,
    {
        let first = generate();
        match self.create_user(&first.name, &first.email).await {
            Err(DirectoryError::DuplicateEmail(_)) => {
                let second = generate();
                self.create_user(&second.name, &second.email).await
            }
            other => other,
        }
    }

    /// List all users, oldest first.
    pub async fn list_users(&self) -> anyhow::Result<Vec<AppUserRecord>> {
        let mut response = self
            .db
            .query("SELECT * FROM app_user ORDER BY created_at ASC")
            .await?;
        let users: Vec<AppUserRecord> = response.take(0)?;
        Ok(users)
    }

    /// Fetch a single user by its record key.
    pub async fn get_user(&self, user_id: &str) -> Result<AppUserRecord, DirectoryError> {
        let record_id = RecordId::from_table_key("app_user", user_id);
        let user: Option<AppUserRecord> = self
            .db
            .select(record_id)
            .await
            .map_err(|e| DirectoryError::Database(e.into()))?;

        user.ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))
    }
}

/// Generate a plausible user profile. The uuid fragment keeps emails unique
/// across the small name pools.
pub fn random_user() -> GeneratedUser {
    let id = Uuid::new_v4();
    let bytes = id.as_bytes();
    let first = FIRST_NAMES[bytes[0] as usize % FIRST_NAMES.len()];
    let last = LAST_NAMES[bytes[1] as usize % LAST_NAMES.len()];
    let fragment = id.simple().to_string();

    GeneratedUser {
        name: format!("{} {}", first, last),
        email: format!(
            "{}.{}.{}@example.com",
            first.to_lowercase(),
            last.to_lowercase(),
            &fragment[..8]
        ),
    }
}
