//! wardline-runtime — the assembled application context.
//!
//! Everything below this crate is wired through traits; this crate picks
//! the production implementations (HTTP transport, persisted identity,
//! log-based content presentation, the system clock) and owns the
//! background tasks. Hosts construct one [`Platform`] and share it.
//!
//! ```no_run
//! use wardline_config::PlatformConfig;
//! use wardline_runtime::Platform;
//!
//! # async fn run() -> wardline_core::error::Result<()> {
//! let platform = Platform::init(PlatformConfig::default()).await?;
//! let quote = platform
//!     .execute("fetch_quote", "market_data", || async {
//!         Ok::<_, std::io::Error>("VNM 65.3")
//!     })
//!     .await;
//! platform.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod platform;
pub mod presenter;
pub mod probe;

pub use platform::{Platform, PlatformStatus};
pub use presenter::LogPresenter;
pub use probe::HostProbe;
