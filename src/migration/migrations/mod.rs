//! All available migrations.
//!
//! This module re-exports all migration implementations.
//! Add new migrations here as they are created.

pub mod v0001;
