//! Core domain types and logic.

pub mod asset_profile;
pub mod cache;
pub mod calendar;
pub mod cleaning;
pub mod data_manager;
pub mod error;
pub mod indicators;
pub mod normalizer;
pub mod ohlcv;
pub mod pipeline;
pub mod quality;
pub mod records;
pub mod settings;
pub mod validator;
