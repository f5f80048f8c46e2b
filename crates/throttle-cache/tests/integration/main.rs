pub mod expiration;
pub mod file_throttle;
pub mod utils;
