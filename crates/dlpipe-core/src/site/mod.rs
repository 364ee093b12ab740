//! Concrete site implementations of the `Downloader` capability.

mod http;
mod manifest;

pub use manifest::{
    Fetched, Manifest, ManifestSettings, ManifestSite, ManifestTask, FAILED_MANIFEST,
};
