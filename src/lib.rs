//! GeoBridge conversion service
//!
//! This library provides the core functionality for the geobridge system:
//! an async job pipeline that converts user-submitted GeoJSON documents to
//! KML and streams job status to the submitting user over WebSocket.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
