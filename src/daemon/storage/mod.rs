//! Storage is organized through [activity_store::JsonActivityStore].
//! The basic idea is:
//!   - There is one JSON document holding every capture attempt, oldest first.
//!   - Every change rewrites the document as a whole and replaces it atomically.
//!   - Screenshots live next to it in a flat directory and are referenced by relative path.

pub mod activity_store;
pub mod entities;
