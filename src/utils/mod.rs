pub mod collection_ext;

pub use collection_ext::{group_by, unique_ordered};
