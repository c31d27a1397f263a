pub mod config;
pub mod db;
pub mod marketplace;
pub mod model;
pub mod notify;
pub mod sync;
