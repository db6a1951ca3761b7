use std::sync::Arc;
use uuid::Uuid;

use voxmail_shared::errors::{AppError, AppResult};
use voxmail_shared::types::PaginationParams;

use crate::clock::Clock;
use crate::models::{Message, MessageRole, NewMessage};
use crate::store::AccountStore;

/// Paged, chronological view over a user's append-only message log.
///
/// Page 1 holds the newest `per_page` messages. Within a page messages are
/// oldest first, so a client walking pages 1, 2, 3 and prepending each one
/// rebuilds the whole conversation in order.
#[derive(Clone)]
pub struct ConversationPager {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl ConversationPager {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn page(&self, user_id: Uuid, params: PaginationParams) -> AppResult<Vec<Message>> {
        if params.page == 0 {
            return Err(AppError::Validation("page numbers start at 1".into()));
        }
        let Some(offset) = params.offset() else {
            return Ok(Vec::new());
        };
        let mut messages = self
            .store
            .messages_newest_first(user_id, offset, params.limit())?;
        messages.reverse();
        Ok(messages)
    }

    pub fn append(
        &self,
        user_id: Uuid,
        role: MessageRole,
        content: &str,
        analysis: Option<serde_json::Value>,
    ) -> AppResult<Message> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("message content is empty".into()));
        }
        let message = self.store.insert_message(NewMessage {
            id: Uuid::now_v7(),
            user_id,
            role: role.as_str().to_string(),
            content: content.to_string(),
            analysis,
            created_at: self.clock.now(),
        })?;
        tracing::debug!(user_id = %user_id, message_id = %message.id, role = %role, "message appended");
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{NewUser, UserChanges};
    use crate::store::MemoryStore;
    use chrono::Duration;
    use voxmail_shared::errors::ErrorCode;

    fn pager_with_user() -> (ConversationPager, Arc<ManualClock>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch());
        let now = clock.now();
        let user = store
            .upsert_user(
                NewUser::bare("a@x.com", now),
                UserChanges { name: None, password_hash: None, updated_at: now },
            )
            .unwrap();
        (ConversationPager::new(store, clock.clone()), clock, user.id)
    }

    fn seed(pager: &ConversationPager, clock: &ManualClock, user_id: Uuid, count: usize) {
        for i in 1..=count {
            pager.append(user_id, MessageRole::User, &format!("m{i}"), None).unwrap();
            clock.advance(Duration::seconds(1));
        }
    }

    fn contents(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.content.clone()).collect()
    }

    #[test]
    fn pages_are_newest_block_first_oldest_first_within() {
        let (pager, clock, user_id) = pager_with_user();
        seed(&pager, &clock, user_id, 25);

        let first = pager.page(user_id, PaginationParams::new(1, 20)).unwrap();
        let expected: Vec<String> = (6..=25).map(|i| format!("m{i}")).collect();
        assert_eq!(contents(&first), expected);

        let second = pager.page(user_id, PaginationParams::new(2, 20)).unwrap();
        let expected: Vec<String> = (1..=5).map(|i| format!("m{i}")).collect();
        assert_eq!(contents(&second), expected);

        assert!(pager.page(user_id, PaginationParams::new(3, 20)).unwrap().is_empty());
    }

    #[test]
    fn walking_pages_rebuilds_the_log() {
        let (pager, clock, user_id) = pager_with_user();
        seed(&pager, &clock, user_id, 23);

        let mut rebuilt: Vec<Message> = Vec::new();
        for page in 1.. {
            let mut chunk = pager.page(user_id, PaginationParams::new(page, 7)).unwrap();
            if chunk.is_empty() {
                break;
            }
            chunk.extend(rebuilt);
            rebuilt = chunk;
        }

        let expected: Vec<String> = (1..=23).map(|i| format!("m{i}")).collect();
        assert_eq!(contents(&rebuilt), expected);
    }

    #[test]
    fn same_timestamp_keeps_insert_order() {
        let (pager, _, user_id) = pager_with_user();
        pager.append(user_id, MessageRole::User, "question", None).unwrap();
        pager
            .append(user_id, MessageRole::Assistant, "answer", Some(serde_json::json!({"intent": "send"})))
            .unwrap();

        let page = pager.page(user_id, PaginationParams::default()).unwrap();
        assert_eq!(contents(&page), vec!["question", "answer"]);
        assert_eq!(page[1].role, MessageRole::Assistant);
        assert!(page[1].analysis.is_some());
    }

    #[test]
    fn page_zero_is_rejected() {
        let (pager, _, user_id) = pager_with_user();
        let err = pager.page(user_id, PaginationParams::new(0, 20)).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationError);
    }

    #[test]
    fn pages_past_any_offset_are_empty() {
        let (pager, clock, user_id) = pager_with_user();
        seed(&pager, &clock, user_id, 3);

        assert!(pager.page(user_id, PaginationParams::new(u64::MAX, 20)).unwrap().is_empty());
        assert!(pager
            .page(user_id, PaginationParams::new(1_000_000_000_000_000_000, 20))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn empty_content_is_rejected() {
        let (pager, _, user_id) = pager_with_user();
        assert!(pager.append(user_id, MessageRole::User, "   ", None).is_err());
    }

    #[test]
    fn logs_are_per_user() {
        let (pager, clock, user_id) = pager_with_user();
        seed(&pager, &clock, user_id, 3);
        assert!(pager.page(Uuid::now_v7(), PaginationParams::default()).unwrap().is_empty());
    }
}
