pub mod analyzer;
pub mod client;
pub mod types;

pub use analyzer::*;
pub use client::*;
pub use types::*;
