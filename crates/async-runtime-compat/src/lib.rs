//! Runtime-agnostic async utilities
//!
//! The lifecycle crates never name an executor directly. Background work
//! (such as plugin listeners) goes through a [`Spawner`], and every
//! wallclock deadline goes through [`sleep`] / [`timeout`], which pick the
//! timer of whichever runtime feature is enabled.
//!
//! # Examples
//!
//! ```no_run
//! use async_runtime_compat::prelude::*;
//! use std::time::Duration;
//!
//! async fn bounded<S: Spawner>(spawner: &S) {
//!     spawner.spawn(Box::pin(async {
//!         sleep(Duration::from_millis(10)).await;
//!     }));
//!
//!     let slow = std::future::pending::<()>();
//!     assert!(timeout(Duration::from_millis(5), slow).await.is_err());
//! }
//!
//! # #[cfg(feature = "smol")]
//! smol::block_on(bounded(&SmolSpawner));
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod runtime_utils;

#[cfg(feature = "tokio")]
pub mod tokio;

#[cfg(feature = "smol")]
pub mod smol;

pub use runtime_utils::{Elapsed, sleep, timeout};

/// Boxed future accepted by [`Spawner::spawn`]
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A spawner that can run futures in the background on an async runtime
pub trait Spawner: Send + Sync {
    /// Spawn a future on the runtime
    ///
    /// The future runs to completion in the background; nothing awaits it.
    fn spawn(&self, future: BoxedTask);
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::Spawner;
    pub use crate::runtime_utils::{Elapsed, sleep, timeout};

    #[cfg(feature = "tokio")]
    pub use crate::tokio::TokioSpawner;

    #[cfg(feature = "smol")]
    pub use crate::smol::SmolSpawner;
}

/// Spawner for the runtime selected at compile time
///
/// `smol` wins when both runtime features are enabled.
pub fn default_spawner() -> std::sync::Arc<dyn Spawner> {
    #[cfg(feature = "smol")]
    {
        std::sync::Arc::new(smol::SmolSpawner)
    }

    #[cfg(all(feature = "tokio", not(feature = "smol")))]
    {
        std::sync::Arc::new(tokio::TokioSpawner)
    }

    #[cfg(not(any(feature = "smol", feature = "tokio")))]
    {
        compile_error!("One of the runtime features must be enabled: smol or tokio");
    }
}
