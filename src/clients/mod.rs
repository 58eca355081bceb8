//! HTTP collaborators: project configuration lookup and pull/merge request hosting.

pub mod config_api;
pub mod hosting;

pub use config_api::{ConfigLookup, HttpConfigClient, normalize_repo_url, select_repository};
pub use hosting::{ChangeRequest, HostingPlatform, HttpHostingClient, Platform, RepoInfo};
