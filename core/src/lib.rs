pub mod auth;
pub mod catalog;
pub mod db;
pub mod models;
pub mod nutrition;
