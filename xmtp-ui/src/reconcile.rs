//! Reconciliation over the UI-visible message and preview lists.
//!
//! Fetched history, live stream items, and optimistic send echoes all pass
//! through the same merge functions, so the visible lists stay ordered and
//! free of duplicate ids no matter how items interleave on arrival.

use crate::types::{ListMessagesOptions, Message, Preview, SortDirection, preview_key};

/// Page size used by the default pagination options.
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Merge `incoming` into a descending-by-`sent` message list.
///
/// A message whose id is already present is skipped, even when its `sent`
/// differs. New messages are inserted before the first existing message
/// with an earlier `sent` time, or appended when none is earlier. The
/// relative order of untouched entries is preserved and the merge is
/// idempotent.
#[must_use]
pub fn insert_messages_if_new(existing: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut merged = existing.to_vec();
    for message in incoming {
        if merged.iter().any(|m| m.id == message.id) {
            continue;
        }
        let at = merged
            .iter()
            .position(|m| m.sent < message.sent)
            .unwrap_or(merged.len());
        merged.insert(at, message.clone());
    }
    merged
}

/// Merge `incoming` previews by conversation identity.
///
/// A preview for an unknown conversation is appended; an existing preview is
/// replaced only when the incoming message's `sent` is strictly newer.
/// Replays of the same or an older message leave the list unchanged.
#[must_use]
pub fn insert_or_update_previews(existing: &[Preview], incoming: &[Preview]) -> Vec<Preview> {
    let mut merged = existing.to_vec();
    for preview in incoming {
        let key = preview_key(preview);
        match merged.iter_mut().find(|p| preview_key(p) == key) {
            Some(stored) => {
                if stored.preview.sent < preview.preview.sent {
                    *stored = preview.clone();
                }
            }
            None => merged.push(preview.clone()),
        }
    }
    merged
}

/// Stable sort, most recent preview first. Pure; the input is untouched.
#[must_use]
pub fn sort_by_most_recent_preview(previews: &[Preview]) -> Vec<Preview> {
    let mut sorted = previews.to_vec();
    sorted.sort_by(|a, b| b.preview.sent.cmp(&a.preview.sent));
    sorted
}

/// Pagination options for the next history page.
///
/// Always a descending page of [`DEFAULT_PAGE_SIZE`]; when messages are
/// already loaded, the cursor ends at the oldest loaded `sent` time (the
/// boundary message is re-fetched and deduplicated by the merge).
#[must_use]
pub fn next_page_options(messages: &[Message]) -> ListMessagesOptions {
    ListMessagesOptions {
        limit: Some(DEFAULT_PAGE_SIZE),
        direction: Some(SortDirection::Descending),
        start_time: None,
        end_time: messages.last().map(|m| m.sent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Conversation;

    fn msg(id: &str, sent: i64) -> Message {
        Message {
            id: id.into(),
            conversation: Conversation::with_peer("0xPEER"),
            sender_address: "0xPEER".into(),
            sent,
            content: serde_json::json!("hello"),
        }
    }

    fn preview(peer: &str, id: &str, sent: i64) -> Preview {
        Preview {
            conversation: Conversation::with_peer(peer),
            preview: Message {
                id: id.into(),
                conversation: Conversation::with_peer(peer),
                sender_address: peer.into(),
                sent,
                content: serde_json::json!("hello"),
            },
        }
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn inserts_in_descending_position() {
        let existing = vec![msg("a", 10), msg("b", 5), msg("c", 1)];
        let merged = insert_messages_if_new(&existing, &[msg("d", 7)]);
        assert_eq!(ids(&merged), ["a", "d", "b", "c"]);
    }

    #[test]
    fn appends_when_oldest() {
        let existing = vec![msg("a", 10), msg("b", 5)];
        let merged = insert_messages_if_new(&existing, &[msg("c", 1)]);
        assert_eq!(ids(&merged), ["a", "b", "c"]);
    }

    #[test]
    fn merge_into_empty_list() {
        let merged = insert_messages_if_new(&[], &[msg("a", 3), msg("b", 9)]);
        assert_eq!(ids(&merged), ["b", "a"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = vec![msg("a", 10), msg("b", 5)];
        let batch = vec![msg("c", 7), msg("d", 1)];
        let once = insert_messages_if_new(&existing, &batch);
        let twice = insert_messages_if_new(&once, &batch);
        assert_eq!(once, twice);
    }

    #[test]
    fn duplicate_id_is_skipped_even_with_different_sent() {
        let existing = vec![msg("a", 10), msg("b", 5)];
        let merged = insert_messages_if_new(&existing, &[msg("b", 99)]);
        assert_eq!(merged, existing);
    }

    #[test]
    fn untouched_entries_keep_relative_order() {
        let existing = vec![msg("a", 10), msg("b", 10), msg("c", 10)];
        let merged = insert_messages_if_new(&existing, &[msg("d", 11)]);
        assert_eq!(ids(&merged), ["d", "a", "b", "c"]);
    }

    #[test]
    fn preview_replaced_only_when_strictly_newer() {
        let stored = vec![preview("0xA", "m1", 100)];

        let stale = insert_or_update_previews(&stored, &[preview("0xA", "m0", 50)]);
        assert_eq!(stale[0].preview.sent, 100);

        let same = insert_or_update_previews(&stored, &[preview("0xA", "m1", 100)]);
        assert_eq!(same[0].preview.sent, 100);

        let fresh = insert_or_update_previews(&stored, &[preview("0xA", "m2", 150)]);
        assert_eq!(fresh[0].preview.sent, 150);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn unknown_conversation_appends() {
        let stored = vec![preview("0xA", "m1", 100)];
        let merged = insert_or_update_previews(&stored, &[preview("0xB", "m2", 10)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn sort_is_descending_and_pure() {
        let previews = vec![
            preview("0xA", "m1", 10),
            preview("0xB", "m2", 30),
            preview("0xC", "m3", 20),
        ];
        let sorted = sort_by_most_recent_preview(&previews);
        let sents: Vec<i64> = sorted.iter().map(|p| p.preview.sent).collect();
        assert_eq!(sents, [30, 20, 10]);
        // Input untouched.
        assert_eq!(previews[0].preview.sent, 10);
    }

    #[test]
    fn page_options_carry_the_oldest_cursor() {
        let first = next_page_options(&[]);
        assert_eq!(first.limit, Some(DEFAULT_PAGE_SIZE));
        assert_eq!(first.direction, Some(SortDirection::Descending));
        assert_eq!(first.end_time, None);

        let loaded = vec![msg("a", 10), msg("b", 5), msg("c", 1)];
        let next = next_page_options(&loaded);
        assert_eq!(next.end_time, Some(1));
    }
}
