//! Timers and deadlines
//!
//! [`timeout`] races a future against a one-shot timer. Whichever side
//! settles first wins and the other is dropped on the spot, so a finished
//! future never leaves a live timer behind and an expired deadline never
//! keeps polling the future.

use futures::future::{self, Either};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Sleep for the specified duration using the enabled runtime's timer
pub async fn sleep(duration: Duration) {
    #[cfg(feature = "smol")]
    {
        smol::Timer::after(duration).await;
    }

    #[cfg(all(feature = "tokio", not(feature = "smol")))]
    {
        ::tokio::time::sleep(duration).await;
    }

    #[cfg(not(any(feature = "smol", feature = "tokio")))]
    {
        compile_error!("One of the runtime features must be enabled: smol or tokio");
    }
}

/// The deadline passed before the raced future completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    /// Length of the deadline that expired
    pub after: Duration,
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline of {}ms elapsed", self.after.as_millis())
    }
}

impl std::error::Error for Elapsed {}

/// Await `future`, giving up once `duration` has passed
pub async fn timeout<F>(duration: Duration, future: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    let timer = sleep(duration);
    futures::pin_mut!(future, timer);

    match future::select(future, timer).await {
        Either::Left((output, _timer)) => Ok(output),
        Either::Right(((), _future)) => Err(Elapsed { after: duration }),
    }
}
