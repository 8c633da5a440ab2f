pub mod cache;
pub mod client;
pub mod error;

pub use cache::VersionCache;
pub use client::NpmRegistry;
pub use error::RegistryError;
