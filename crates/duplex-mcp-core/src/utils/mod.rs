pub mod identifiers;
pub mod pagination;

pub use identifiers::generate_session_id;
pub use pagination::{DEFAULT_PAGE_SIZE, InvalidCursor, decode_cursor, encode_cursor, paginate};
