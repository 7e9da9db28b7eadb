//! # Repository Module
//!
//! SQL lives here, behind small repository types that own a pool clone.
//!
//! ## Available Repositories
//!
//! - [`kv::KvRepository`] - Key-value documents (`kv_store` table)

pub mod kv;
