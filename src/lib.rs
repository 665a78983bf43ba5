//! Resolves sequence-archive accessions (SRP, SRX, ERP, ERX) to their linked
//! BioProject and GEO / ArrayExpress identifiers.

pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod known;
pub mod output;
pub mod providers;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
