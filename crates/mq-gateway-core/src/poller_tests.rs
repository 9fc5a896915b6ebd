//! Tests for the poll loop and its schedule.

use super::*;
use std::sync::atomic::AtomicU32;

mod schedule {
    use super::*;

    #[test]
    fn test_fixed_schedule_is_constant() {
        let schedule = PollSchedule::fixed(Duration::from_secs(5));
        for _ in 0..10 {
            assert_eq!(schedule.next_delay(), Duration::from_secs(5));
        }
    }

    #[test]
    fn test_jittered_delay_stays_in_window() {
        let schedule =
            PollSchedule::jittered(Duration::from_millis(1000), Duration::from_millis(2000));
        for _ in 0..100 {
            let delay = schedule.next_delay();
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }

    #[test]
    fn test_jittered_bounds_are_ordered() {
        let schedule = PollSchedule::jittered(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(schedule.min_delay(), Duration::from_secs(1));
        assert_eq!(schedule.max_delay(), Duration::from_secs(2));
    }
}

mod poll_loop {
    use super::*;

    fn counting_step(
        counter: Arc<AtomicU32>,
        stop_after: u32,
    ) -> impl FnMut() -> std::future::Ready<PollOutcome> + Send + 'static {
        move || {
            let calls = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if calls >= stop_after {
                PollOutcome::Stop
            } else {
                PollOutcome::Continue
            })
        }
    }

    /// Verify that a step returning Stop ends the loop.
    #[tokio::test(start_paused = true)]
    async fn test_stop_outcome_ends_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let handle = spawn_poller(
            "test",
            PollSchedule::fixed(Duration::from_millis(100)),
            CancellationFlag::new(),
            counting_step(counter.clone(), 3),
        );

        handle.join().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    /// Verify that no step runs before the first delay elapses.
    #[tokio::test(start_paused = true)]
    async fn test_first_step_waits_for_delay() {
        let counter = Arc::new(AtomicU32::new(0));
        let handle = spawn_poller(
            "test",
            PollSchedule::fixed(Duration::from_secs(5)),
            CancellationFlag::new(),
            counting_step(counter.clone(), u32::MAX),
        );

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        handle.cancel();
    }

    /// Verify that cancelling stops further steps.
    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_rescheduling() {
        let counter = Arc::new(AtomicU32::new(0));
        let handle = spawn_poller(
            "test",
            PollSchedule::fixed(Duration::from_millis(100)),
            CancellationFlag::new(),
            counting_step(counter.clone(), u32::MAX),
        );

        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.cancel();
        assert!(handle.is_cancelled());
        let seen = counter.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
        assert!(handle.is_finished());
    }
}
