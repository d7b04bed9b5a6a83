pub mod hello;
pub mod version;
