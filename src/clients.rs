//! Clients for the external systems a submission touches.
//!
//! - [`git`]: the local repository, driven through the git CLI
//! - [`github`]: pull requests via the GitHub REST API
//!
//! Each client sits behind a trait with a real implementation and, under
//! `cfg(test)`, a mockall mock.

pub mod git;
pub mod github;
