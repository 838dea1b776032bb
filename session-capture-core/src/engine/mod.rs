pub mod capture_data;
pub mod capture_engine;
