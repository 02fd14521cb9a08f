pub mod metadata;
pub mod session;

pub use metadata::MetadataKey;
pub use session::{iso_date, SessionKind, SessionRecord};
