//! Connection-independent logic: configuration and history stores, the
//! data-access seam, the operation lifecycle with its retry policy, and the
//! SQL context parser that drives autocomplete.

pub mod autocomplete;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod data_access;
pub mod filter;
pub mod history;
pub mod operation;
pub mod retry;
pub mod sql_context;
pub mod suggestions;
