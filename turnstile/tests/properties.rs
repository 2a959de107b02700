use std::num::NonZeroUsize;
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;
use turnstile::FixedWindow;
use turnstile::SlidingWindow;
use turnstile::Strategy as LimiterStrategy;
use turnstile::TokenBucket;

/// Offsets in milliseconds, sorted, so time only moves forwards.
fn arrivals() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..5_000, 1..400).prop_map(|mut offsets| {
        offsets.sort_unstable();
        offsets
    })
}

fn decisions(limiter: &dyn LimiterStrategy, anchor: Instant, offsets: &[u64]) -> Vec<bool> {
    offsets
        .iter()
        .map(|offset| {
            limiter
                .process_at(anchor + Duration::from_millis(*offset))
                .is_continue()
        })
        .collect()
}

fn admitted(offsets: &[u64], decisions: &[bool]) -> Vec<u64> {
    offsets
        .iter()
        .zip(decisions)
        .filter(|(_, admitted)| **admitted)
        .map(|(offset, _)| *offset)
        .collect()
}

proptest! {
    #[test]
    fn sliding_window_never_exceeds_the_limit_in_any_window(
        permit_limit in 1usize..20,
        window_ms in 1u64..2_000,
        segments in 1usize..10,
        offsets in arrivals(),
    ) {
        let anchor = Instant::now();
        let rl = SlidingWindow::new(
            NonZeroUsize::new(permit_limit).unwrap(),
            Duration::from_millis(window_ms),
            NonZeroUsize::new(segments).unwrap(),
        )
        .anchored(anchor);

        let admitted = admitted(&offsets, &decisions(&rl, anchor, &offsets));
        // The busiest half-open interval of length `window` starts at an admission.
        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|t| **t < start + window_ms)
                .count();
            prop_assert!(in_window <= permit_limit, "{in_window} admitted from {start}ms");
        }
    }

    #[test]
    fn fixed_window_never_exceeds_the_limit_per_window(
        permit_limit in 1usize..20,
        window_ms in 1u64..2_000,
        offsets in arrivals(),
    ) {
        let anchor = Instant::now();
        let rl = FixedWindow::new(
            NonZeroUsize::new(permit_limit).unwrap(),
            Duration::from_millis(window_ms),
        )
        .anchored(anchor);

        // A window opens at the first arrival after the previous one expired.
        let mut window_start = 0;
        let mut in_window = 0;
        for (offset, admitted) in offsets.iter().zip(decisions(&rl, anchor, &offsets)) {
            if offset - window_start >= window_ms {
                window_start = *offset;
                in_window = 0;
            }
            in_window += usize::from(admitted);
            prop_assert!(in_window <= permit_limit, "{in_window} admitted from {window_start}ms");
        }
    }

    #[test]
    fn token_bucket_never_spends_more_than_it_earns(
        token_limit in 1usize..20,
        tokens_per_period in 1usize..5,
        period_ms in 1u64..500,
        offsets in arrivals(),
    ) {
        let anchor = Instant::now();
        let rl = TokenBucket::new(
            NonZeroUsize::new(token_limit).unwrap(),
            tokens_per_period,
            Duration::from_millis(period_ms),
        )
        .anchored(anchor);

        let admitted = admitted(&offsets, &decisions(&rl, anchor, &offsets));
        for (count, offset) in admitted.iter().enumerate() {
            let earned = token_limit as u64 + (offset / period_ms) * tokens_per_period as u64;
            prop_assert!(count as u64 + 1 <= earned);
        }
    }

    #[test]
    fn identical_histories_give_identical_decisions(
        permit_limit in 1usize..20,
        window_ms in 1u64..2_000,
        segments in 1usize..10,
        offsets in arrivals(),
    ) {
        let anchor = Instant::now();
        let build = || {
            SlidingWindow::new(
                NonZeroUsize::new(permit_limit).unwrap(),
                Duration::from_millis(window_ms),
                NonZeroUsize::new(segments).unwrap(),
            )
            .anchored(anchor)
        };

        prop_assert_eq!(
            decisions(&build(), anchor, &offsets),
            decisions(&build(), anchor, &offsets)
        );
    }
}
