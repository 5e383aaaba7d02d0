//! CRUD operations for [`Profile`] records.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use potato_shared::UserId;

use crate::database::{decode_id, decode_ts, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::Profile;

const PROFILE_COLUMNS: &str = "id, email, full_name, avatar_url, created_at";

impl Database {
    /// Register a new profile.  `email` must already be normalized.
    pub fn create_profile(&self, email: &str, full_name: Option<&str>) -> Result<Profile> {
        if self.find_profile_by_email(email)?.is_some() {
            return Err(StoreError::EmailTaken(email.to_string()));
        }

        let profile = Profile {
            id: UserId::new(),
            email: email.to_string(),
            full_name: full_name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            avatar_url: None,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO profiles (id, email, full_name, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                profile.id.to_string(),
                profile.email,
                profile.full_name,
                profile.avatar_url,
                encode_ts(&profile.created_at),
            ],
        )?;

        tracing::debug!(user = %profile.id, "profile created");
        Ok(profile)
    }

    pub fn get_profile(&self, id: UserId) -> Result<Profile> {
        self.conn()
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                params![id.to_string()],
                |row| row_to_profile(row, 0),
            )
            .map_err(not_found)
    }

    /// Exact match on the normalized email.
    pub fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>> {
        let profile = self
            .conn()
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE email = ?1"),
                params![email],
                |row| row_to_profile(row, 0),
            )
            .optional()?;
        Ok(profile)
    }
}

/// Map five profile columns starting at `offset` to a [`Profile`].
pub(crate) fn row_to_profile(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Profile> {
    let id_str: String = row.get(offset)?;
    let email: String = row.get(offset + 1)?;
    let full_name: Option<String> = row.get(offset + 2)?;
    let avatar_url: Option<String> = row.get(offset + 3)?;
    let created_str: String = row.get(offset + 4)?;

    Ok(Profile {
        id: decode_id(offset, &id_str)?,
        email,
        full_name,
        avatar_url,
        created_at: decode_ts(offset + 4, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::database::tests::temp_db;
    use crate::StoreError;

    #[test]
    fn create_and_find_by_email() {
        let (_dir, db) = temp_db();
        let created = db.create_profile("ada@example.com", Some(" Ada ")).unwrap();
        assert_eq!(created.full_name.as_deref(), Some("Ada"));

        let found = db.find_profile_by_email("ada@example.com").unwrap().unwrap();
        assert_eq!(found, created);
        assert_eq!(db.get_profile(created.id).unwrap(), created);
    }

    #[test]
    fn unknown_email_is_none() {
        let (_dir, db) = temp_db();
        assert!(db.find_profile_by_email("ghost@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_rejected() {
        let (_dir, db) = temp_db();
        db.create_profile("ada@example.com", None).unwrap();
        let err = db.create_profile("ada@example.com", None).unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken(_)));
    }

    #[test]
    fn missing_profile_is_not_found() {
        let (_dir, db) = temp_db();
        let err = db.get_profile(potato_shared::UserId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
