pub mod db;
pub mod instruments;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod runs;

pub use db::*;
pub use models::*;
