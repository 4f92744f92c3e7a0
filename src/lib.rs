pub mod browser;
pub mod config;
pub mod error;
pub mod model;
pub mod notion;
pub mod output;
pub mod scrape;
pub mod session;
pub mod sync;
pub mod transform;
