//! git2 implementation of the gitsync backend
//!
//! This crate provides the real [`libgitsync_core::VcsBackend`]:
//! - Clone and open of the mirrored repository
//! - Fetch of a single branch into its remote-tracking ref
//! - Tree diff with rename detection
//! - Force-pull and hard reset of the working tree

mod error;
mod remote;
mod backend;

pub use error::GitError;
pub use remote::{branch_ref, fetch_refspec};
pub use backend::Git2Backend;
