//! Direct conversations and their two participants.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use potato_shared::{ConversationId, UserId};

use crate::database::{decode_id, decode_ts, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::{Conversation, ConversationSummary};
use crate::profiles::row_to_profile;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Open a conversation between `creator` and `counterpart`.
    ///
    /// Refuses a conversation with oneself and a second conversation between
    /// the same pair.
    pub fn create_direct_conversation(
        &self,
        creator: UserId,
        counterpart: UserId,
    ) -> Result<Conversation> {
        if creator == counterpart {
            return Err(StoreError::SelfConversation);
        }
        // Both must exist before any row is written.
        self.get_profile(creator)?;
        self.get_profile(counterpart)?;

        if let Some(existing) = self.find_direct_conversation(creator, counterpart)? {
            return Err(StoreError::ConversationExists(existing.id));
        }

        let conversation = Conversation {
            id: ConversationId::new(),
            created_by: creator,
            participants: [creator, counterpart],
            created_at: Utc::now(),
        };

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, created_by, created_at) VALUES (?1, ?2, ?3)",
            params![
                conversation.id.to_string(),
                creator.to_string(),
                encode_ts(&conversation.created_at),
            ],
        )?;
        for participant in conversation.participants {
            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, profile_id)
                 VALUES (?1, ?2)",
                params![conversation.id.to_string(), participant.to_string()],
            )?;
        }
        tx.commit()?;

        tracing::info!(
            conversation = %conversation.id,
            creator = %creator.short(),
            counterpart = %counterpart.short(),
            "conversation created"
        );
        Ok(conversation)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        let (created_by, created_at): (UserId, _) = self
            .conn()
            .query_row(
                "SELECT created_by, created_at FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let created_by: String = row.get(0)?;
                    let created_at: String = row.get(1)?;
                    Ok((decode_id(0, &created_by)?, decode_ts(1, &created_at)?))
                },
            )
            .map_err(not_found)?;

        let mut stmt = self.conn().prepare(
            "SELECT profile_id FROM conversation_participants WHERE conversation_id = ?1",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            let raw: String = row.get(0)?;
            decode_id::<UserId>(0, &raw)
        })?;
        let mut others = Vec::new();
        for row in rows {
            let participant = row?;
            if participant != created_by {
                others.push(participant);
            }
        }
        let Some(counterpart) = others.into_iter().next() else {
            tracing::warn!(conversation = %id, "conversation has no second participant");
            return Err(StoreError::NotFound);
        };

        Ok(Conversation {
            id,
            created_by,
            participants: [created_by, counterpart],
            created_at,
        })
    }

    /// The conversation shared by `a` and `b`, if any.
    pub fn find_direct_conversation(&self, a: UserId, b: UserId) -> Result<Option<Conversation>> {
        let id: Option<ConversationId> = self
            .conn()
            .query_row(
                "SELECT pa.conversation_id
                 FROM conversation_participants pa
                 JOIN conversation_participants pb
                   ON pb.conversation_id = pa.conversation_id
                 WHERE pa.profile_id = ?1 AND pb.profile_id = ?2
                 LIMIT 1",
                params![a.to_string(), b.to_string()],
                |row| {
                    let raw: String = row.get(0)?;
                    decode_id(0, &raw)
                },
            )
            .optional()?;

        id.map(|id| self.get_conversation(id)).transpose()
    }

    /// Every conversation `user` takes part in, newest first, with the other
    /// participant's profile.
    pub fn list_conversations_for(&self, user: UserId) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.created_by, c.created_at,
                    p.id, p.email, p.full_name, p.avatar_url, p.created_at
             FROM conversation_participants me
             JOIN conversations c ON c.id = me.conversation_id
             JOIN conversation_participants other
               ON other.conversation_id = c.id AND other.profile_id != me.profile_id
             JOIN profiles p ON p.id = other.profile_id
             WHERE me.profile_id = ?1
             ORDER BY c.created_at DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let created_by_str: String = row.get(1)?;
            let created_str: String = row.get(2)?;
            let counterpart = row_to_profile(row, 3)?;

            let created_by: UserId = decode_id(1, &created_by_str)?;
            let participants = if created_by == user {
                [user, counterpart.id]
            } else {
                [counterpart.id, user]
            };

            Ok(ConversationSummary {
                conversation: Conversation {
                    id: decode_id(0, &id_str)?,
                    created_by,
                    participants,
                    created_at: decode_ts(2, &created_str)?,
                },
                counterpart,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    pub fn is_participant(&self, conversation: ConversationId, user: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM conversation_participants
                 WHERE conversation_id = ?1 AND profile_id = ?2",
                params![conversation.to_string(), user.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Fail with [`StoreError::NotParticipant`] unless `user` is in the conversation.
    pub fn ensure_participant(&self, conversation: ConversationId, user: UserId) -> Result<()> {
        if self.is_participant(conversation, user)? {
            Ok(())
        } else {
            Err(StoreError::NotParticipant)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::database::tests::temp_db;
    use crate::StoreError;

    #[test]
    fn create_and_list_from_both_sides() {
        let (_dir, db) = temp_db();
        let ada = db.create_profile("ada@example.com", Some("Ada")).unwrap();
        let bob = db.create_profile("bob@example.com", Some("Bob")).unwrap();

        let conv = db.create_direct_conversation(ada.id, bob.id).unwrap();
        assert_eq!(conv.participants, [ada.id, bob.id]);

        let for_ada = db.list_conversations_for(ada.id).unwrap();
        assert_eq!(for_ada.len(), 1);
        assert_eq!(for_ada[0].counterpart, bob);
        assert_eq!(for_ada[0].conversation, conv);

        let for_bob = db.list_conversations_for(bob.id).unwrap();
        assert_eq!(for_bob[0].counterpart, ada);
        assert_eq!(for_bob[0].conversation, conv);

        assert_eq!(db.get_conversation(conv.id).unwrap(), conv);
    }

    #[test]
    fn second_conversation_between_pair_is_refused() {
        let (_dir, db) = temp_db();
        let ada = db.create_profile("ada@example.com", None).unwrap();
        let bob = db.create_profile("bob@example.com", None).unwrap();
        let conv = db.create_direct_conversation(ada.id, bob.id).unwrap();

        // Either direction collides with the existing one.
        let err = db.create_direct_conversation(bob.id, ada.id).unwrap_err();
        assert!(matches!(err, StoreError::ConversationExists(id) if id == conv.id));
    }

    #[test]
    fn self_conversation_is_refused() {
        let (_dir, db) = temp_db();
        let ada = db.create_profile("ada@example.com", None).unwrap();
        let err = db.create_direct_conversation(ada.id, ada.id).unwrap_err();
        assert!(matches!(err, StoreError::SelfConversation));
    }

    #[test]
    fn participant_checks() {
        let (_dir, db) = temp_db();
        let ada = db.create_profile("ada@example.com", None).unwrap();
        let bob = db.create_profile("bob@example.com", None).unwrap();
        let eve = db.create_profile("eve@example.com", None).unwrap();
        let conv = db.create_direct_conversation(ada.id, bob.id).unwrap();

        assert!(db.is_participant(conv.id, bob.id).unwrap());
        assert!(matches!(
            db.ensure_participant(conv.id, eve.id),
            Err(StoreError::NotParticipant)
        ));
        assert!(db.list_conversations_for(eve.id).unwrap().is_empty());
    }
}
