//! The paginated attachment listing: fingerprinting, row extraction, and
//! page navigation.

mod pagination;
mod rows;
mod table;

pub use pagination::{Advance, PaginationDriver, PaginationState};
pub(crate) use rows::absolutize;
pub use rows::{AttachmentRecord, InteractionHandle, RowExtractor};
pub use table::{TableSignature, TableTracker};
