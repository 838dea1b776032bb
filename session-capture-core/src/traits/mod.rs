pub mod block_source;
pub mod capture_delegate;
pub mod inline_patch;
pub mod platform;
