pub mod config;
pub mod download;
pub mod transcribe;

pub use self::config::*;
pub use download::*;
pub use transcribe::*;
