// src/lib.rs

//! Incremental Telegram channel fetcher library

pub mod error;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod services;
pub mod storage;
pub mod utils;
