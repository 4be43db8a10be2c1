// ABOUTME: Library root for sfdc-replicator
// ABOUTME: Exports the sync core, the Salesforce client, and the PostgreSQL store

pub mod config;
pub mod error;
pub mod postgres;
pub mod remote;
pub mod sync;
pub mod utils;
