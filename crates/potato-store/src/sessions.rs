//! Bearer-token sessions.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use potato_shared::UserId;

use crate::database::{encode_ts, Database};
use crate::error::Result;
use crate::models::Profile;
use crate::profiles::row_to_profile;

impl Database {
    /// Issue a new opaque session token for `profile_id`.
    pub fn create_session(&self, profile_id: UserId) -> Result<String> {
        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        self.conn().execute(
            "INSERT INTO sessions (token, profile_id, created_at) VALUES (?1, ?2, ?3)",
            params![token, profile_id.to_string(), encode_ts(&Utc::now())],
        )?;
        Ok(token)
    }

    /// Resolve a token to the profile it authenticates.
    pub fn profile_for_token(&self, token: &str) -> Result<Option<Profile>> {
        let profile = self
            .conn()
            .query_row(
                "SELECT p.id, p.email, p.full_name, p.avatar_url, p.created_at
                 FROM sessions s
                 JOIN profiles p ON p.id = s.profile_id
                 WHERE s.token = ?1",
                params![token],
                |row| row_to_profile(row, 0),
            )
            .optional()?;
        Ok(profile)
    }

    /// Revoke a token.  Returns `true` if it existed.
    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(affected > 0)
    }
}
