//! Core data models for the photo service.
//!
//! `Photo` maps to the `photos` table via `sqlx::FromRow` and serializes as
//! JSON via `serde`. Blob bytes are never part of these types.

pub mod access;
pub mod pagination;
pub mod photo;
