//! Broadcast scheduler: a fixed-period timer that collects one snapshot per tick and
//! pushes it to every subscribed channel. Ticks with no subscribers do no work.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::collect_overview;
use crate::proto::ServerMessage;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nobody subscribed; collectors were not touched.
    Idle,
    Broadcast { delivered: usize, dropped: usize },
    EncodeFailed,
}

/// One scheduler tick.
pub async fn broadcast_tick(state: &AppState) -> TickOutcome {
    if state.registry.subscriber_count().await == 0 {
        return TickOutcome::Idle;
    }
    let snapshot = collect_overview(state).await;
    let frame: Arc<str> = match ServerMessage::SystemUpdate(snapshot).to_json() {
        Ok(js) => js.into(),
        Err(e) => {
            warn!(error = %e, "failed to encode snapshot");
            return TickOutcome::EncodeFailed;
        }
    };
    let d = state.registry.broadcast(frame).await;
    debug!(delivered = d.delivered, dropped = d.dropped.len(), "tick broadcast");
    TickOutcome::Broadcast {
        delivered: d.delivered,
        dropped: d.dropped.len(),
    }
}

/// Owns the broadcast timer. Construct once per process and hand it to whatever
/// owns the listener; `start`/`stop` are the only lifecycle entry points.
pub struct MonitorSupervisor {
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorSupervisor {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            task: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the timer. Returns false if it is already running.
    pub async fn start(&self, state: AppState) -> bool {
        let mut slot = self.task.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        let period = self.period;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; broadcasts start one period in.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                broadcast_tick(&state).await;
            }
        }));
        info!(period_ms = period.as_millis() as u64, "broadcast timer started");
        true
    }

    /// Cancel the timer. Safe to call repeatedly; returns whether a timer was running.
    pub async fn stop(&self) -> bool {
        match self.task.lock().await.take() {
            Some(handle) => {
                handle.abort();
                info!("broadcast timer stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::metrics::testing::FakeProbe;
    use crate::proto::ServerMessage;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    fn state_with(probe: Arc<FakeProbe>) -> AppState {
        AppState::new(AgentConfig::default(), probe)
    }

    #[tokio::test]
    async fn idle_tick_invokes_no_collectors() {
        let probe = Arc::new(FakeProbe::default());
        let state = state_with(probe.clone());
        // connected but not subscribed
        let (tx, _rx) = mpsc::channel(4);
        state.registry.register(tx).await;

        assert_eq!(broadcast_tick(&state).await, TickOutcome::Idle);
        assert_eq!(probe.total_calls(), 0);
    }

    #[tokio::test]
    async fn subscribed_tick_sends_one_snapshot_to_each() {
        let probe = Arc::new(FakeProbe::default());
        let state = state_with(probe.clone());
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = state.registry.register(tx_a).await;
        let b = state.registry.register(tx_b).await;
        state.registry.set_subscribed(a, true).await;
        state.registry.set_subscribed(b, true).await;

        let out = broadcast_tick(&state).await;
        assert_eq!(
            out,
            TickOutcome::Broadcast {
                delivered: 2,
                dropped: 0
            }
        );
        // one collection, shared by both channels
        assert_eq!(probe.cpu_calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.process_calls.load(Ordering::SeqCst), 1);

        let fa = rx_a.recv().await.unwrap();
        let fb = rx_b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&fa, &fb));
        match serde_json::from_str::<ServerMessage>(&fa).unwrap() {
            ServerMessage::SystemUpdate(s) => {
                assert_eq!(s.processes.map(|p| p.len()), Some(3));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn dead_channel_does_not_block_others() {
        let probe = Arc::new(FakeProbe::default());
        let state = state_with(probe);
        let (tx_dead, rx_dead) = mpsc::channel(4);
        let (tx_live, mut rx_live) = mpsc::channel(4);
        let dead = state.registry.register(tx_dead).await;
        let live = state.registry.register(tx_live).await;
        state.registry.set_subscribed(dead, true).await;
        state.registry.set_subscribed(live, true).await;
        drop(rx_dead);

        let out = broadcast_tick(&state).await;
        assert_eq!(
            out,
            TickOutcome::Broadcast {
                delivered: 1,
                dropped: 1
            }
        );
        assert!(rx_live.recv().await.is_some());
        assert_eq!(state.registry.channel_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_skips_work_until_someone_subscribes() {
        let probe = Arc::new(FakeProbe::default());
        let state = state_with(probe.clone());
        let sup = MonitorSupervisor::new(Duration::from_millis(5000));
        assert!(sup.start(state.clone()).await);
        assert!(!sup.start(state.clone()).await);

        tokio::time::sleep(Duration::from_millis(12_000)).await;
        assert_eq!(probe.total_calls(), 0);

        let (tx, mut rx) = mpsc::channel(8);
        let id = state.registry.register(tx).await;
        state.registry.set_subscribed(id, true).await;
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert!(rx.recv().await.is_some());
        assert!(probe.cpu_calls.load(Ordering::SeqCst) >= 1);

        assert!(sup.stop().await);
        assert!(!sup.stop().await);
        assert!(!sup.is_running().await);
    }
}
