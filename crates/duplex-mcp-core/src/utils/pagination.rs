//! Opaque cursor pagination for the `*/list` operations.
//!
//! A cursor encodes the next offset into a registry snapshot. Clients treat
//! it as opaque; a cursor that fails to decode is an invalid-params error.

use base64::Engine;

use crate::types::Page;

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Encode the offset the next page starts at.
pub fn encode_cursor(offset: usize) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!("offset:{offset}"))
}

/// Decode a cursor back into an offset.
pub fn decode_cursor(cursor: &str) -> Result<usize, InvalidCursor> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| InvalidCursor)?;
    let text = String::from_utf8(bytes).map_err(|_| InvalidCursor)?;
    text.strip_prefix("offset:")
        .and_then(|n| n.parse().ok())
        .ok_or(InvalidCursor)
}

/// Slice one page out of a snapshot, producing the follow-up cursor when more
/// items remain.
pub fn paginate<T: Clone>(
    items: &[T],
    cursor: Option<&str>,
    page_size: usize,
) -> Result<Page<T>, InvalidCursor> {
    let offset = match cursor {
        Some(cursor) => decode_cursor(cursor)?,
        None => 0,
    };

    let end = (offset + page_size).min(items.len());
    let page: Vec<T> = items.get(offset..end).unwrap_or(&[]).to_vec();
    let next_cursor = if end < items.len() {
        Some(encode_cursor(end))
    } else {
        None
    };

    Ok(Page {
        items: page,
        next_cursor,
    })
}

/// The cursor was not produced by this server.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid pagination cursor")]
pub struct InvalidCursor;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = encode_cursor(42);
        assert_eq!(decode_cursor(&cursor), Ok(42));
    }

    #[test]
    fn test_garbage_cursor_rejected() {
        assert_eq!(decode_cursor("not a cursor"), Err(InvalidCursor));
    }

    #[test]
    fn test_paginate_walks_all_pages() {
        let items: Vec<i32> = (0..7).collect();

        let first = paginate(&items, None, 3).unwrap();
        assert_eq!(first.items, vec![0, 1, 2]);
        let second = paginate(&items, first.next_cursor.as_deref(), 3).unwrap();
        assert_eq!(second.items, vec![3, 4, 5]);
        let third = paginate(&items, second.next_cursor.as_deref(), 3).unwrap();
        assert_eq!(third.items, vec![6]);
        assert!(third.next_cursor.is_none());
    }

    #[test]
    fn test_offset_past_end_is_empty_page() {
        let items = vec![1, 2];
        let page = paginate(&items, Some(encode_cursor(10).as_str()), 3).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
