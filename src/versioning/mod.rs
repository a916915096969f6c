mod allocator;
mod version;

pub use allocator::{VERSION_WIDTH, VersionAllocator, unix_millis};
pub use version::VersionId;
