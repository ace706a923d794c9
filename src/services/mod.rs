//! Services module - the build steps and launchers.
//!
//! Every step is a single linear pass; failures abort the build except for
//! HTTP error responses, which [`download`] retries with backoff.
//!
//! # Components
//!
//! - [`process`]: child process invocation ([`Invocation`], [`CommandRunner`]) with
//!   diagnostics logged before each call
//! - [`environment`]: recovering the variables a batch file such as `vcvarsall.bat` sets
//! - [`download`]: retrying downloads and in-memory zip extraction
//! - [`deploy`]: selecting Qt applications and composing the destination tree
//! - [`entry_points`]: console-script stubs for each bundled application
//! - [`builder`]: the end-to-end build sequence
//! - [`launcher`]: running Designer and bundled applications with the right environment
//!
//! # Usage Example
//!
//! ```ignore
//! use pyqt_tools::services::{BuildDriver, HttpFetcher, RetryPolicy, SystemRunner};
//!
//! let driver = BuildDriver::new(SystemRunner, HttpFetcher::new(), RetryPolicy::default());
//! let (plan, tools, env) = driver.prepare(&config, settings, &Environment::from_process()).await?;
//! let results = driver.execute(&plan, &tools, env).await?;
//! ```

pub mod builder;
pub mod deploy;
pub mod download;
pub mod entry_points;
pub mod environment;
pub mod launcher;
pub mod process;

pub use builder::{BuildDriver, BuildPlan, Tools};
pub use deploy::{DependencyProbe, DeployError, WindeployqtProbe};
pub use download::{DownloadError, Downloader, Fetch, HttpFetcher, RetryPolicy};
pub use entry_points::BuildResults;
pub use environment::{CaptureError, capture_batch_environment, parse_captured_environment};
pub use launcher::{DesignerOptions, ToolsLayout};
pub use process::{CommandRunner, Invocation, ProcessError, SystemRunner};
