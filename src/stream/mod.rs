//! Stream adapters over the engine's watch and broadcast channels

mod throttle;

pub use throttle::{Throttle, ThrottleExt};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::warn;

use crate::types::UpdateRate;

/// Current value of `rx` followed by every change, capped at `rate`.
pub fn watch_stream<T>(rx: watch::Receiver<T>, rate: UpdateRate) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    let values = WatchStream::new(rx);
    match rate.throttle_interval() {
        None => values.boxed(),
        Some(interval) => values.throttle(interval).boxed(),
    }
}

/// Items published on `rx` after subscription. Lag is logged and skipped.
pub fn broadcast_stream<T>(rx: broadcast::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
{
    BroadcastStream::new(rx)
        .filter_map(|item| async move {
            match item {
                Ok(value) => Some(value),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Stream subscriber lagged");
                    None
                }
            }
        })
        .boxed()
}
