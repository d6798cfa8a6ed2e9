pub mod aggregator;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod pagination;
pub mod push;
pub mod syndication;
