//! Fixed-interval retry with a hard ceiling.
//!
//! Every wait on an external endpoint goes through these helpers so no code
//! path can block past its configured `max_wait_time`.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use tokio::time::sleep;

/// Operation kept failing until the ceiling was reached.
#[derive(Debug)]
pub struct RetryTimeout<E> {
    pub waited: Duration,
    pub attempts: u32,
    pub last: E,
}

/// Retry `op` every `interval` until it succeeds or `ceiling` would be exceeded.
///
/// `op` is always attempted at least once.
pub async fn retry_until<T, E, F, Fut>(
    ceiling: Duration,
    interval: Duration,
    mut op: F,
) -> Result<T, RetryTimeout<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let last = match op().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if started.elapsed() + interval > ceiling {
            return Err(RetryTimeout {
                waited: started.elapsed(),
                attempts,
                last,
            });
        }
        sleep(interval).await;
    }
}

/// Poll `probe` every `interval` until it returns `true`.
///
/// Returns the time waited, or `Err` with the time waited once `ceiling` is hit.
pub async fn wait_until<F, Fut>(ceiling: Duration, interval: Duration, mut probe: F) -> Result<Duration, Duration>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    retry_until(ceiling, interval, || {
        let fut = probe();
        async move { if fut.await { Ok(()) } else { Err(()) } }
    })
    .await
    .map(|()| started.elapsed())
    .map_err(|t| t.waited)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[tokio::test]
    async fn succeeds_on_first_try_without_sleeping() {
        let r: Result<u32, RetryTimeout<()>> =
            retry_until(Duration::from_secs(1), Duration::from_secs(10), || async { Ok(7) }).await;
        assert_eq!(r.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Cell::new(0);
        let r = retry_until(Duration::from_secs(1), Duration::from_millis(5), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { if n < 3 { Err("not yet") } else { Ok(n) } }
        })
        .await;
        assert_eq!(r.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn gives_up_at_ceiling_with_last_error() {
        let started = Instant::now();
        let r: Result<(), _> =
            retry_until(Duration::from_millis(60), Duration::from_millis(10), || async {
                Err::<(), _>("down")
            })
            .await;
        let t = r.unwrap_err();
        assert_eq!(t.last, "down");
        assert!(t.attempts >= 2);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn wait_until_reports_timeout() {
        let r = wait_until(Duration::from_millis(30), Duration::from_millis(10), || async { false }).await;
        assert!(r.is_err());

        let ok = wait_until(Duration::from_millis(30), Duration::from_millis(10), || async { true }).await;
        assert!(ok.is_ok());
    }
}
