//! HTTP front end for formfetch.

pub mod config;
pub mod doctor;
pub mod http;
pub mod logging;

pub use http::{router, AppState};
