pub mod analysis;
pub mod config;
pub mod db;
pub mod evaluation;
pub mod routes;
pub mod state;
