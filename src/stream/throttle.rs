//! Stream throttling utilities

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait to add throttling to any Stream
pub trait ThrottleExt: Stream {
    /// Throttle the stream to emit at most once per interval
    ///
    /// Uses "latest-wins" semantics - if multiple items arrive
    /// during an interval, only the latest is emitted. The last item
    /// before the source ends is always delivered.
    fn throttle(self, duration: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, duration)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// A stream combinator that throttles emission rate
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
        done: bool,
    }
}

impl<S: Stream> Throttle<S> {
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        // Delay rather than burst after an idle period
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self { stream, interval, pending: None, done: false }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Drain everything available, keeping only the latest
        while !*this.done {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => *this.done = true,
                Poll::Pending => break,
            }
        }

        if this.pending.is_none() {
            // The source registered the waker unless it has ended
            return if *this.done { Poll::Ready(None) } else { Poll::Pending };
        }
        if !*this.done {
            ready!(this.interval.poll_tick(cx));
        }
        Poll::Ready(this.pending.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::watch;
    use tokio_stream::wrappers::WatchStream;

    #[tokio::test(start_paused = true)]
    async fn keeps_latest_item_per_interval() {
        let (tx, rx) = watch::channel(0u32);
        let mut throttled = WatchStream::new(rx).throttle(Duration::from_millis(100));

        assert_eq!(throttled.next().await, Some(0));
        for value in 1..=5 {
            tx.send_replace(value);
        }
        assert_eq!(throttled.next().await, Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_source_keeps_stream_open() {
        let (tx, rx) = watch::channel(1u32);
        let mut throttled = WatchStream::new(rx).throttle(Duration::from_millis(50));
        assert_eq!(throttled.next().await, Some(1));

        let waiter = tokio::spawn(async move { throttled.next().await });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!waiter.is_finished());

        tx.send_replace(2);
        assert_eq!(waiter.await.unwrap(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_last_item_when_source_ends() {
        let items = futures::stream::iter([1, 2, 3]);
        let collected: Vec<_> = items.throttle(Duration::from_secs(1)).collect().await;
        assert_eq!(collected, vec![3]);
    }
}
