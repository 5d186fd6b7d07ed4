//! Platform abstraction layer. The teacher's `zwave-pal` splits a `std`
//! backend (`futures-timer`, `chrono`) from an `embassy` backend for
//! embedded targets; this gateway only ever runs hosted, so the split
//! collapses to a single `tokio`-backed implementation (see `DESIGN.md`).

use std::time::Duration;

/// Sleeps for the given duration, suspending the calling task.
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Runs `fut`, returning `None` if it didn't complete within `duration`.
pub async fn timeout<F: std::future::Future>(duration: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(duration, fut).await.ok()
}

/// Fills `buf` with cryptographically secure random bytes, standing in for
/// the module's `ZW_GET_RANDOM` call when a local source is acceptable
/// (spec §4.E note on `ZW_Random`).
pub fn fill_random(buf: &mut [u8]) {
    getrandom::getrandom(buf).expect("system RNG must be available");
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    fill_random(&mut buf);
    buf
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn sleep_and_timeout() {
        sleep(Duration::from_millis(1)).await;
        let result = timeout(Duration::from_millis(50), async {
            sleep(Duration::from_millis(1)).await;
            42
        })
        .await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn timeout_fires() {
        let result = timeout(Duration::from_millis(5), async {
            sleep(Duration::from_secs(10)).await;
        })
        .await;
        assert_eq!(result, None);
    }

    #[test]
    fn random_bytes_are_not_all_zero_with_overwhelming_probability() {
        let bytes: [u8; 16] = random_bytes();
        assert!(bytes.iter().any(|b| *b != 0));
    }
}
