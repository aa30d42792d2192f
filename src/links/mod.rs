pub mod path;
pub mod service;

pub use path::{is_reserved, PathAllocator};
pub use service::{validate_destination, LinkService};
