pub mod auth;
pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod extract;
pub mod models;
pub mod oauth;
pub mod routes;
pub mod schema;
pub mod state;
pub mod validator;
