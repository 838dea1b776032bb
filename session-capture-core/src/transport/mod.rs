pub mod layout;
pub mod region;
