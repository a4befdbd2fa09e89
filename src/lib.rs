//! Photo upload, retrieval and listing backed by two independent stores:
//! a blob store for the bytes and a metadata store for the records.
//! `services::photo_service::PhotoService` keeps the two in agreement.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
