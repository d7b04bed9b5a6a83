pub mod config;
pub mod counter;
pub mod errors;
pub mod greet_utils;
