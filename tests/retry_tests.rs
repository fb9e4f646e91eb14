use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use anyhow::{Result, anyhow};
use blog_notifier::{models::retry::RetryConfig, utils::retry_with_backoff};
use tokio::{sync::Mutex, time::Instant};

fn config(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms,
        max_delay_ms,
        backoff_multiplier: 2,
    }
}

/// Test: A call that succeeds first time is made exactly once
#[tokio::test]
async fn test_success_is_not_retried() -> Result<()> {
    let calls = Arc::new(AtomicU32::new(0));

    let value = retry_with_backoff(&config(3, 20, 200), || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(7)
        }
    })
    .await?;

    assert_eq!(value, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: A call that recovers is retried until it succeeds
#[tokio::test]
async fn test_recovering_call_is_retried() -> Result<()> {
    let calls = Arc::new(AtomicU32::new(0));

    let value = retry_with_backoff(&config(5, 20, 200), || {
        let calls = Arc::clone(&calls);
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("connection reset"))
            } else {
                Ok("delivered")
            }
        }
    })
    .await?;

    assert_eq!(value, "delivered");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: The last error comes back once every attempt has failed
#[tokio::test]
async fn test_exhausted_attempts_return_last_error() -> Result<()> {
    let calls = Arc::new(AtomicU32::new(0));

    let result = retry_with_backoff(&config(4, 10, 100), || {
        let calls = Arc::clone(&calls);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("failure #{}", n + 1))
        }
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(result.unwrap_err().to_string(), "failure #4");

    Ok(())
}

/// Test: A zero attempt budget still makes one attempt
#[tokio::test]
async fn test_zero_attempts_still_tries_once() -> Result<()> {
    let calls = Arc::new(AtomicU32::new(0));

    let result = retry_with_backoff(&config(0, 10, 100), || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("down"))
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: Gaps between attempts grow exponentially within the jitter band
#[tokio::test]
async fn test_backoff_grows_exponentially() -> Result<()> {
    let cfg = config(4, 100, 1_000);
    let start = Instant::now();
    let stamps = Arc::new(Mutex::new(Vec::new()));

    let _ = retry_with_backoff(&cfg, || {
        let stamps = Arc::clone(&stamps);
        async move {
            stamps.lock().await.push(start.elapsed().as_millis());
            Err::<(), _>(anyhow!("fail"))
        }
    })
    .await;

    let stamps = stamps.lock().await;
    assert_eq!(stamps.len(), 4);
    assert!(stamps[0] < 50, "first attempt should be immediate");

    for i in 1..stamps.len() {
        let gap = stamps[i] - stamps[i - 1];
        let nominal = (cfg.initial_delay_ms * 2u64.pow(i as u32 - 1)) as u128;
        assert!(
            gap >= nominal * 8 / 10 && gap <= nominal * 13 / 10,
            "gap {} was {}ms, expected about {}ms",
            i,
            gap,
            nominal
        );
    }

    Ok(())
}

/// Test: Task backoff is capped and jittered
#[tokio::test]
async fn test_delay_for_caps_and_jitters() -> Result<()> {
    let cfg = config(10, 100, 300);

    let first = cfg.delay_for(1).as_millis();
    assert!((89..=111).contains(&first), "first delay was {}ms", first);

    for retry in 3..10 {
        let delay = cfg.delay_for(retry).as_millis();
        assert!(delay <= 330, "retry {} waited {}ms past the cap", retry, delay);
    }

    let samples: Vec<u128> = (0..20).map(|_| cfg.delay_for(2).as_millis()).collect();
    let min = samples.iter().min().copied().unwrap_or_default();
    let max = samples.iter().max().copied().unwrap_or_default();
    assert!(max > min, "jitter should vary delays ({}..{})", min, max);

    Ok(())
}
