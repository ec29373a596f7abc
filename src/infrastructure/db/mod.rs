pub mod client;
pub mod sql_utils;
