use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::utils::clock::Clock;

/// Single-slot schedule for capture cycles. Ticks that come due while a cycle is running are
/// dropped instead of piling up.
#[derive(Debug, Default)]
pub struct Ticker {
    period: Option<Duration>,
    next: Option<Instant>,
}

impl Ticker {
    pub fn idle() -> Self {
        Self::default()
    }

    /// The first tick is due immediately.
    pub fn start(&mut self, period: Duration, now: Instant) {
        self.period = Some(period);
        self.next = Some(now);
    }

    pub fn stop(&mut self) {
        self.period = None;
        self.next = None;
    }

    /// Resolves when the next tick is due. Never resolves while idle.
    pub async fn wait(&self, clock: &dyn Clock) {
        match self.next {
            Some(at) => clock.sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    /// Moves to the first tick after `now`. Returns the number of skipped ticks. A tick that
    /// can't be represented as an instant stops the schedule.
    pub fn complete(&mut self, now: Instant) -> u32 {
        let (Some(period), Some(mut next)) = (self.period, self.next) else {
            return 0;
        };
        let mut skipped = 0;
        loop {
            let Some(following) = next.checked_add(period) else {
                warn!("Next capture after {period:?} is out of range, stopping the schedule");
                self.stop();
                return skipped;
            };
            next = following;
            if next > now {
                break;
            }
            skipped += 1;
        }
        if skipped > 0 {
            warn!("Capture cycle overran its schedule, skipped {skipped} ticks");
        }
        self.next = Some(next);
        skipped
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::utils::clock::DefaultClock;

    use super::Ticker;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate() {
        let mut ticker = Ticker::idle();
        let start = Instant::now();
        ticker.start(Duration::from_secs(60), start);

        ticker.wait(&DefaultClock).await;
        assert_eq!(Instant::now(), start);

        ticker.complete(Instant::now());
        ticker.wait(&DefaultClock).await;
        assert_eq!(Instant::now(), start + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ticker_never_fires() {
        let ticker = Ticker::idle();
        let result =
            tokio::time::timeout(Duration::from_secs(3600), ticker.wait(&DefaultClock)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_overrun_skips_missed_ticks() {
        let start = Instant::now();
        let period = Duration::from_secs(10);
        let mut ticker = Ticker::idle();
        ticker.start(period, start);

        // A cycle that took 35 seconds misses the ticks at 10, 20 and 30.
        let skipped = ticker.complete(start + Duration::from_secs(35));
        assert_eq!(skipped, 3);
        assert_eq!(ticker.next, Some(start + Duration::from_secs(40)));

        // A quick cycle keeps the regular cadence.
        assert_eq!(ticker.complete(start + Duration::from_secs(41)), 0);
        assert_eq!(ticker.next, Some(start + Duration::from_secs(50)));

        ticker.stop();
        assert_eq!(ticker.complete(start + Duration::from_secs(100)), 0);
        assert_eq!(ticker.next, None);
    }

    #[test]
    fn test_unrepresentable_tick_stops() {
        let start = Instant::now();
        let mut ticker = Ticker::idle();
        ticker.start(Duration::from_secs(u64::MAX), start);

        assert_eq!(ticker.complete(start), 0);
        assert_eq!(ticker.next, None);
        assert_eq!(ticker.period, None);
    }
}
