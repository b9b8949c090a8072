//! Display payload handling shared by the engine and its data sources.
//!
//! Remote payloads are untyped JSON. [`payload`] validates them into the
//! strict [`crate::DisplayPayload`], [`crate::TreeBranch`] and
//! [`crate::TableMeta`] shapes once, at the boundary, so downstream code can
//! rely on total invariants.

pub mod payload;
