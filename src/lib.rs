//! Social post scheduler library.
//!
//! Fans posts out to connected platform accounts, publishes them from a
//! background dispatcher, keeps account tokens healthy and serves a JSON API
//! over all of it.

pub mod accounts;
pub mod config;
pub mod constants;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod media;
pub mod platforms;
pub mod scheduler;
pub mod stats;
pub mod web;
