//! Conversation challenges and the affinity score.
//!
//! The completed-challenge set is the idempotence guard for scoring: the
//! insert and the score increment share a transaction, and the increment
//! only happens when the insert actually created the row.

use bouquine_shared::{ChallengeId, ConversationId};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::changes::StoreEvent;
use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::ChallengeCompletion;

impl Database {
    /// Record a completed challenge and award its bonus points.  Returns
    /// `true` when this call performed the completion; a repeat completion
    /// is reported as `false` and awards nothing.
    pub fn complete_challenge(
        &mut self,
        conversation_id: &ConversationId,
        challenge_id: &ChallengeId,
        bonus_points: i64,
    ) -> Result<bool> {
        let newly_completed = {
            let tx = self.conn_mut().transaction()?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM conversations WHERE id = ?1",
                    params![conversation_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound);
            }

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO conversation_challenges
                     (conversation_id, challenge_id, bonus_points, completed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    conversation_id.as_str(),
                    challenge_id.as_str(),
                    bonus_points,
                    encode_ts(&Utc::now())
                ],
            )?;

            if inserted > 0 {
                tx.execute(
                    "UPDATE conversations SET affinity_score = affinity_score + ?2
                     WHERE id = ?1",
                    params![conversation_id.as_str(), bonus_points],
                )?;
            }

            tx.commit()?;
            inserted > 0
        };

        if newly_completed {
            tracing::debug!(
                conversation = %conversation_id,
                challenge = %challenge_id,
                bonus_points,
                "challenge completed"
            );
            self.bus().publish(StoreEvent::ConversationUpdated {
                id: conversation_id.clone(),
            });
        }
        Ok(newly_completed)
    }

    /// All challenges completed in a conversation, oldest first.
    pub fn list_completed_challenges(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ChallengeCompletion>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, challenge_id, bonus_points, completed_at
             FROM conversation_challenges
             WHERE conversation_id = ?1
             ORDER BY completed_at ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id.as_str()], |row| {
            let completed_str: String = row.get(3)?;
            Ok(ChallengeCompletion {
                conversation_id: ConversationId(row.get::<_, String>(0)?),
                challenge_id: ChallengeId(row.get::<_, String>(1)?),
                bonus_points: row.get(2)?,
                completed_at: decode_ts(3, &completed_str)?,
            })
        })?;

        let mut completions = Vec::new();
        for row in rows {
            completions.push(row?);
        }
        Ok(completions)
    }
}
