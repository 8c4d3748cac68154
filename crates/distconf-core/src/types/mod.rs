//! Core data types

pub mod identifiers;
pub mod storage_config;
