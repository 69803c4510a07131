//! Authenticated site mirroring: crawl a site behind a login, save every
//! page, document and media file under a stable local path and rewrite the
//! saved links to point at the local copies.

pub mod api;
pub mod common;
pub mod error;
pub mod mirror;
pub mod page;
pub mod session;
pub mod state;
pub mod status;
pub mod tree;

#[cfg(test)]
mod testing;

pub use state::State;
