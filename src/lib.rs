pub mod api;
pub mod config;
pub mod demo;
pub mod error;
pub mod geo;
pub mod models;
pub mod observability;
pub mod sensor;
pub mod session;
pub mod sim;
pub mod state;
pub mod tracker;
