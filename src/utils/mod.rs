//! Utility modules: JSON/BSON conversion and numeric helpers.
pub mod json;
pub mod num;
