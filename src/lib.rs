pub mod api;
pub mod catalog;
pub mod config;
pub mod content;
pub mod database;
pub mod error;
pub mod level;
pub mod progression;
pub mod student;
pub mod tutor;
pub mod utils;

pub use error::{Error, Result};
