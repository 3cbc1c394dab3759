// Library interface for fullfeed modules
// This allows tests and other binaries to import modules

pub mod error;
pub mod ingestion;
pub mod processing;
pub mod resolver;
pub mod response_cache;
pub mod scraping;
pub mod server;
pub mod storage;
pub mod syndication;
