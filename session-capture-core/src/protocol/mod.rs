pub mod hook_info;
pub mod names;
pub mod offsets;
