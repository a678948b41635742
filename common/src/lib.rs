pub mod data;
pub mod filter;
pub mod helpers;
pub mod payloads;
pub mod validate;

pub use helpers::format_file_size;
