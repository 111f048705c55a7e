use std::fmt;
use std::str::FromStr;

use rollout_core::ConversationId;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::meta::{self, RolloutMetaRow};

/// Hard cap on summary rows inspected per request, bounding worst-case
/// latency on a large store.
pub const MAX_SCAN: usize = 100;

pub const MAX_PAGE_SIZE: usize = 100;

/// Keyset pagination token: strictly-after position in
/// `(updated_at DESC, id DESC)` order. Token form is `"<millis>|<uuid>"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub updated_at: i64,
    pub id: ConversationId,
}

impl Cursor {
    pub fn new(updated_at: i64, id: ConversationId) -> Self {
        Self { updated_at, id }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.updated_at, self.id)
    }
}

impl FromStr for Cursor {
    type Err = StoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_cursor(s).ok_or_else(|| StoreError::Validation(format!("malformed cursor: {s}")))
    }
}

impl serde::Serialize for Cursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Cursor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_cursor(&s).ok_or_else(|| serde::de::Error::custom("invalid cursor"))
    }
}

/// Parse a cursor token; None when the timestamp is not a finite integer or
/// the id is not a well-formed conversation id.
pub fn parse_cursor(token: &str) -> Option<Cursor> {
    let (ts, id) = token.split_once('|')?;
    let updated_at: i64 = ts.parse().ok()?;
    let id: ConversationId = id.parse().ok()?;
    Some(Cursor { updated_at, id })
}

/// One page of rollout summaries, newest first.
#[derive(Debug, Default)]
pub struct ConversationsPage {
    pub items: Vec<RolloutMetaRow>,
    /// Present only when more results may exist beyond this page.
    pub next_cursor: Option<Cursor>,
    /// Summary rows inspected for this request, including skipped ones.
    pub num_scanned: usize,
    /// True iff the scan cap was exhausted before the page filled.
    pub reached_cap: bool,
}

/// Keyset-paginated listing over the summary index, ordered
/// `(updated_at DESC, id DESC)`. Reads summaries only, never item bodies.
/// Summaries without session_meta are incomplete: skipped from the page but
/// counted toward the scan.
#[instrument(skip(db, cursor))]
pub fn list_conversations(
    db: &Database,
    page_size: usize,
    cursor: Option<&Cursor>,
) -> Result<ConversationsPage, StoreError> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(StoreError::Validation(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
        )));
    }

    db.with_conn(|conn| {
        let columns = meta::META_COLUMNS;
        let mut stmt;
        let mut rows = match cursor {
            Some(cursor) => {
                stmt = conn.prepare(&format!(
                    "SELECT {columns} FROM rollouts
                     WHERE updated_at < ?1 OR (updated_at = ?1 AND id < ?2)
                     ORDER BY updated_at DESC, id DESC
                     LIMIT ?3",
                ))?;
                stmt.query(rusqlite::params![
                    cursor.updated_at,
                    cursor.id.to_string(),
                    MAX_SCAN as i64,
                ])?
            }
            None => {
                stmt = conn.prepare(&format!(
                    "SELECT {columns} FROM rollouts
                     ORDER BY updated_at DESC, id DESC
                     LIMIT ?1",
                ))?;
                stmt.query([MAX_SCAN as i64])?
            }
        };

        let mut items = Vec::new();
        let mut num_scanned = 0usize;
        let mut last_scanned: Option<Cursor> = None;
        let mut page_filled_early = false;

        while let Some(row) = rows.next()? {
            num_scanned += 1;
            let meta = meta::row_to_meta(row)?;
            last_scanned = Some(Cursor::new(meta.updated_at, meta.id));
            if meta.session_meta.is_some() {
                items.push(meta);
                if items.len() == page_size {
                    page_filled_early = true;
                    break;
                }
            }
        }

        // The store is conclusively exhausted only when the scan ran dry
        // short of the cap without the page cutting it off.
        let exhausted = !page_filled_early && num_scanned < MAX_SCAN;
        let reached_cap = num_scanned >= MAX_SCAN && items.len() < page_size;

        Ok(ConversationsPage {
            items,
            next_cursor: if exhausted { None } else { last_scanned },
            num_scanned,
            reached_cap,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::insert_meta;
    use uuid::Uuid;

    fn seed(db: &Database, id: ConversationId, updated_at: i64, with_session_meta: bool) {
        db.with_tx(|tx| {
            insert_meta(tx, &id, updated_at, None)?;
            if with_session_meta {
                tx.execute(
                    "UPDATE rollouts SET session_meta = '{\"model\":\"m\"}' WHERE id = ?1",
                    [id.to_string()],
                )?;
            }
            Ok(())
        })
        .unwrap();
    }

    fn id_from(n: u128) -> ConversationId {
        ConversationId::from_uuid(Uuid::from_u128(n))
    }

    #[test]
    fn empty_store_yields_empty_page() {
        let db = Database::in_memory().unwrap();
        let page = list_conversations(&db, 20, None).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.num_scanned, 0);
        assert!(!page.reached_cap);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn page_size_bounds_are_enforced() {
        let db = Database::in_memory().unwrap();
        assert!(matches!(
            list_conversations(&db, 0, None),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            list_conversations(&db, 101, None),
            Err(StoreError::Validation(_))
        ));
        assert!(list_conversations(&db, 1, None).is_ok());
        assert!(list_conversations(&db, 100, None).is_ok());
    }

    #[test]
    fn malformed_cursor_tokens_are_rejected() {
        assert!(parse_cursor("").is_none());
        assert!(parse_cursor("12345").is_none());
        assert!(parse_cursor("abc|not-a-uuid").is_none());
        assert!(parse_cursor("1.5|00000000-0000-0000-0000-000000000001").is_none());
        assert!("nope".parse::<Cursor>().is_err());
        assert!(parse_cursor(&format!("1000|{}", Uuid::from_u128(1))).is_some());
    }

    #[test]
    fn cursor_token_roundtrip() {
        let cursor = Cursor::new(123_456, id_from(42));
        let token = cursor.to_string();
        assert_eq!(parse_cursor(&token), Some(cursor));
        let json = serde_json::to_string(&cursor).unwrap();
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cursor);
    }

    #[test]
    fn orders_by_updated_desc_then_id_desc() {
        let db = Database::in_memory().unwrap();
        seed(&db, id_from(1), 100, true);
        seed(&db, id_from(2), 300, true);
        seed(&db, id_from(3), 200, true);
        seed(&db, id_from(4), 200, true);

        let page = list_conversations(&db, 10, None).unwrap();
        let got: Vec<(i64, ConversationId)> = page
            .items
            .iter()
            .map(|m| (m.updated_at, m.id))
            .collect();
        assert_eq!(
            got,
            vec![
                (300, id_from(2)),
                (200, id_from(4)),
                (200, id_from(3)),
                (100, id_from(1)),
            ]
        );
        assert!(page.next_cursor.is_none());
        assert!(!page.reached_cap);
    }

    #[test]
    fn cursor_walk_visits_every_rollout_once() {
        let db = Database::in_memory().unwrap();
        for n in 0..25u128 {
            seed(&db, id_from(n + 1), 1000 + n as i64, true);
        }

        let mut seen = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = list_conversations(&db, 10, cursor.as_ref()).unwrap();
            assert!(page.items.len() <= 10);
            seen.extend(page.items.iter().map(|m| m.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), 25);
        let mut deduped = seen.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), 25);
        // Newest first across the whole walk.
        assert_eq!(seen.first(), Some(&id_from(25)));
        assert_eq!(seen.last(), Some(&id_from(1)));
    }

    #[test]
    fn incomplete_rollouts_are_skipped_but_counted() {
        let db = Database::in_memory().unwrap();
        seed(&db, id_from(1), 100, true);
        seed(&db, id_from(2), 200, false);
        seed(&db, id_from(3), 300, true);

        let page = list_conversations(&db, 10, None).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.num_scanned, 3);
        assert_eq!(page.items[0].id, id_from(3));
        assert_eq!(page.items[1].id, id_from(1));
    }

    #[test]
    fn scan_cap_bounds_work_and_sets_reached_cap() {
        let db = Database::in_memory().unwrap();
        // 150 incomplete rollouts: nothing listable, but plenty to scan.
        for n in 0..150u128 {
            seed(&db, id_from(n + 1), 1000 + n as i64, false);
        }

        let page = list_conversations(&db, 10, None).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.num_scanned, MAX_SCAN);
        assert!(page.reached_cap);
        let next = page.next_cursor.expect("scan not exhausted");

        // Resuming from the cap finishes the store.
        let page2 = list_conversations(&db, 10, Some(&next)).unwrap();
        assert!(page2.items.is_empty());
        assert_eq!(page2.num_scanned, 50);
        assert!(!page2.reached_cap);
        assert!(page2.next_cursor.is_none());
    }

    #[test]
    fn filled_page_carries_cursor_even_at_store_end() {
        let db = Database::in_memory().unwrap();
        seed(&db, id_from(1), 100, true);
        seed(&db, id_from(2), 200, true);

        let page = list_conversations(&db, 2, None).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(!page.reached_cap);
        let next = page.next_cursor.expect("page filled, more may exist");

        let page2 = list_conversations(&db, 2, Some(&next)).unwrap();
        assert!(page2.items.is_empty());
        assert_eq!(page2.num_scanned, 0);
        assert!(page2.next_cursor.is_none());
    }

    #[test]
    fn cursor_excludes_its_own_position() {
        let db = Database::in_memory().unwrap();
        seed(&db, id_from(1), 100, true);
        seed(&db, id_from(2), 100, true);
        seed(&db, id_from(3), 100, true);

        let page = list_conversations(&db, 1, None).unwrap();
        assert_eq!(page.items[0].id, id_from(3));

        let page2 =
            list_conversations(&db, 1, Some(&Cursor::new(100, id_from(3)))).unwrap();
        assert_eq!(page2.items[0].id, id_from(2));
    }
}
