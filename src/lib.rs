//! Publish Debian packages into an APT repository that lives entirely in an
//! object store.
//!
//! There is no server: every publish reads the current `Packages` index for
//! its codename, component and architecture, merges the new package in,
//! regenerates the codename's `Release` file and writes everything back,
//! holding an advisory lock kept in the store itself.
//!
//! ```no_run
//! use std::sync::Arc;
//! use apt_s3::{control::DpkgDebExtractor, publish::{Publisher, PublishRequest}, store::LocalStore};
//!
//! # async fn run() -> apt_s3::Result<()> {
//! let store = Arc::new(LocalStore::new(std::path::Path::new("/srv/apt"))?);
//! let publisher = Publisher::new(store, Arc::new(DpkgDebExtractor::new()));
//! let result = publisher
//!     .publish(&PublishRequest::new("stable", "main", "hello_2.10-3_amd64.deb"))
//!     .await?;
//! println!("wrote {:?}", result.written);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod control;
pub mod error;
pub mod lock;
pub mod logging;
pub mod manifest;
pub mod publish;
pub mod store;

pub use error::{Error, Result};
