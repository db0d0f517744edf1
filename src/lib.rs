//! Social-graph backend: profiles, short posts and follow relationships served
//! over HTTP on top of one of three interchangeable storage backends.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
