pub mod error;
pub mod load_report;
pub mod ports;
pub mod records;
pub mod run_report;
pub mod table_spec;
pub mod value_objects;
