pub mod config;
pub mod csv_store;
pub mod dap;
pub mod db;
pub mod housekeeping;
