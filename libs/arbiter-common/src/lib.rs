pub mod error;
pub mod redis;
pub mod stderr;
pub mod types;

pub use error::JudgeError;
