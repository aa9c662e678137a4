//! GitHub issue-host adapter.

pub mod client;

pub use client::GitHubIssueHost;
