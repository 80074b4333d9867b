pub mod app;
pub mod auth;
pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod images;
pub mod mail;
pub mod memes;
pub mod query;
pub mod response;
pub mod state;
pub mod storage;
pub mod store;
pub mod users;
