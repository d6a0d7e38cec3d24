//! Snapshot aggregation: run the collectors concurrently and fold their outcomes
//! into one Snapshot. A failing collector nulls its field and leaves an error string.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::warn;

use crate::config::AgentConfig;
use crate::cpu::CpuCollector;
use crate::error::CollectorError;
use crate::memory::MemoryCollector;
use crate::processes::ProcessCollector;
use crate::state::{new_shared_system, AppState};
use crate::types::{CpuSample, MemorySample, ProcessRecord, Snapshot, SortKey};

/// The three collectors behind one seam.
pub trait HostProbe: Send + Sync + 'static {
    fn cpu(&self) -> BoxFuture<'_, Result<CpuSample, CollectorError>>;
    fn memory(&self) -> BoxFuture<'_, Result<MemorySample, CollectorError>>;
    fn processes(
        &self,
        limit: usize,
        sort: SortKey,
    ) -> BoxFuture<'_, Result<Vec<ProcessRecord>, CollectorError>>;
}

/// Collectors backed by the running host.
pub struct SystemProbe {
    cpu: CpuCollector,
    memory: MemoryCollector,
    processes: ProcessCollector,
}

impl SystemProbe {
    pub fn new(config: &AgentConfig) -> Self {
        let sys = new_shared_system();
        Self {
            cpu: CpuCollector::new(sys.clone()),
            memory: MemoryCollector::new(sys),
            processes: ProcessCollector::new(config.command_timeout),
        }
    }
}

impl HostProbe for SystemProbe {
    fn cpu(&self) -> BoxFuture<'_, Result<CpuSample, CollectorError>> {
        async move { Ok(self.cpu.sample().await) }.boxed()
    }

    fn memory(&self) -> BoxFuture<'_, Result<MemorySample, CollectorError>> {
        self.memory.sample().boxed()
    }

    fn processes(
        &self,
        limit: usize,
        sort: SortKey,
    ) -> BoxFuture<'_, Result<Vec<ProcessRecord>, CollectorError>> {
        self.processes.list(limit, sort).boxed()
    }
}

fn settle<T>(
    collector: &'static str,
    joined: Result<Result<T, CollectorError>, JoinError>,
) -> Result<T, CollectorError> {
    joined.unwrap_or_else(|e| {
        Err(CollectorError::Task {
            collector,
            reason: e.to_string(),
        })
    })
}

/// Run cpu, memory and (when `processes` is set) the process table as separate tasks,
/// wait for all of them, and assemble whatever succeeded. Never fails as a whole.
pub async fn collect_snapshot(
    probe: Arc<dyn HostProbe>,
    processes: Option<(usize, SortKey)>,
) -> Snapshot {
    let cpu_task = {
        let p = probe.clone();
        tokio::spawn(async move { p.cpu().await })
    };
    let mem_task = {
        let p = probe.clone();
        tokio::spawn(async move { p.memory().await })
    };
    let proc_task = processes.map(|(limit, sort)| {
        let p = probe.clone();
        tokio::spawn(async move { p.processes(limit, sort).await })
    });

    let (cpu, memory, procs) = tokio::join!(cpu_task, mem_task, async move {
        match proc_task {
            Some(t) => Some(t.await),
            None => None,
        }
    });

    let mut errors = Vec::new();
    let mut keep = |name: &'static str, err: CollectorError| {
        warn!(collector = name, error = %err, "collector failed");
        errors.push(format!("{name}: {err}"));
    };

    let cpu = settle("cpu", cpu).map_err(|e| keep("cpu", e)).ok();
    let memory = settle("memory", memory).map_err(|e| keep("memory", e)).ok();
    let processes = procs.map(|joined| match settle("processes", joined) {
        Ok(rows) => rows,
        Err(e) => {
            keep("processes", e);
            vec![ProcessRecord::current_process()]
        }
    });

    Snapshot {
        timestamp: Utc::now(),
        cpu,
        memory,
        processes,
        errors,
    }
}

/// Full snapshot for a broadcast tick or the overview route.
pub async fn collect_overview(state: &AppState) -> Snapshot {
    collect_snapshot(
        state.probe.clone(),
        Some((state.config.top_n, SortKey::Cpu)),
    )
    .await
}

/// CPU and memory only, for on-demand requests.
pub async fn collect_quick(state: &AppState) -> Snapshot {
    collect_snapshot(state.probe.clone(), None).await
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted probe that counts how often each collector ran.
    #[derive(Default)]
    pub struct FakeProbe {
        pub fail_cpu: bool,
        pub fail_memory: bool,
        pub fail_processes: bool,
        pub panic_memory: bool,
        pub cpu_delay: Duration,
        pub cpu_calls: AtomicUsize,
        pub memory_calls: AtomicUsize,
        pub process_calls: AtomicUsize,
    }

    impl FakeProbe {
        pub fn total_calls(&self) -> usize {
            self.cpu_calls.load(Ordering::SeqCst)
                + self.memory_calls.load(Ordering::SeqCst)
                + self.process_calls.load(Ordering::SeqCst)
        }
    }

    pub fn sample_cpu() -> CpuSample {
        CpuSample {
            model: "Test CPU".into(),
            cores: 4,
            speed: 2400,
            usage: 42,
            temperature: None,
        }
    }

    impl HostProbe for FakeProbe {
        fn cpu(&self) -> BoxFuture<'_, Result<CpuSample, CollectorError>> {
            async move {
                self.cpu_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.cpu_delay).await;
                if self.fail_cpu {
                    return Err(CollectorError::Read {
                        path: "/proc/stat",
                        source: std::io::Error::other("permission denied"),
                    });
                }
                Ok(sample_cpu())
            }
            .boxed()
        }

        fn memory(&self) -> BoxFuture<'_, Result<MemorySample, CollectorError>> {
            async move {
                self.memory_calls.fetch_add(1, Ordering::SeqCst);
                if self.panic_memory {
                    panic!("sensor driver exploded");
                }
                if self.fail_memory {
                    return Err(CollectorError::Read {
                        path: "/proc/meminfo",
                        source: std::io::Error::other("gone"),
                    });
                }
                Ok(MemorySample::from_totals(8192, 2048))
            }
            .boxed()
        }

        fn processes(
            &self,
            limit: usize,
            sort: SortKey,
        ) -> BoxFuture<'_, Result<Vec<ProcessRecord>, CollectorError>> {
            async move {
                self.process_calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_processes {
                    return Err(CollectorError::Exhausted(vec!["ps: not found".into()]));
                }
                let rows = vec![
                    ProcessRecord {
                        cpu: 90.0,
                        ..ProcessRecord::with_pid(1)
                    },
                    ProcessRecord {
                        cpu: 10.0,
                        ..ProcessRecord::with_pid(2)
                    },
                    ProcessRecord {
                        cpu: 50.0,
                        ..ProcessRecord::with_pid(3)
                    },
                ];
                Ok(crate::processes::rank(rows, limit, sort))
            }
            .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{sample_cpu, FakeProbe};
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn all_collectors_succeed() {
        let probe = Arc::new(FakeProbe::default());
        let snap = collect_snapshot(probe.clone(), Some((2, SortKey::Cpu))).await;
        assert_eq!(snap.cpu, Some(sample_cpu()));
        assert_eq!(snap.memory.as_ref().map(|m| m.used), Some(6144));
        let pids: Vec<u32> = snap.processes.unwrap().iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![1, 3]);
        assert!(snap.errors.is_empty());
        assert_eq!(probe.total_calls(), 3);
    }

    #[tokio::test]
    async fn cpu_failure_only_nulls_cpu() {
        let probe = Arc::new(FakeProbe {
            fail_cpu: true,
            ..FakeProbe::default()
        });
        let snap = collect_snapshot(probe, Some((10, SortKey::Cpu))).await;
        assert!(snap.cpu.is_none());
        assert!(snap.memory.is_some());
        assert_eq!(snap.processes.as_ref().map(Vec::len), Some(3));
        assert_eq!(
            snap.errors,
            vec!["cpu: failed to read /proc/stat: permission denied".to_string()]
        );
    }

    #[tokio::test]
    async fn process_exhaustion_substitutes_self_record() {
        let probe = Arc::new(FakeProbe {
            fail_processes: true,
            ..FakeProbe::default()
        });
        let snap = collect_snapshot(probe, Some((10, SortKey::Cpu))).await;
        let procs = snap.processes.unwrap();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].pid, std::process::id());
        assert_eq!(snap.errors.len(), 1);
        assert!(snap.errors[0].starts_with("processes: all process listing commands failed"));
        assert!(snap.cpu.is_some() && snap.memory.is_some());
    }

    #[tokio::test]
    async fn panicking_collector_is_contained() {
        let probe = Arc::new(FakeProbe {
            panic_memory: true,
            ..FakeProbe::default()
        });
        let snap = collect_snapshot(probe, None).await;
        assert!(snap.memory.is_none());
        assert!(snap.cpu.is_some());
        assert_eq!(snap.errors.len(), 1);
        assert!(snap.errors[0].starts_with("memory: memory collector task failed"));
    }

    #[tokio::test]
    async fn every_collector_failing_still_yields_a_snapshot() {
        let probe = Arc::new(FakeProbe {
            fail_cpu: true,
            fail_memory: true,
            fail_processes: true,
            ..FakeProbe::default()
        });
        let snap = collect_snapshot(probe, Some((5, SortKey::Memory))).await;
        assert!(snap.cpu.is_none());
        assert!(snap.memory.is_none());
        assert_eq!(snap.processes.map(|p| p.len()), Some(1));
        assert_eq!(snap.errors.len(), 3);
    }

    #[tokio::test]
    async fn quick_snapshot_skips_process_table() {
        let probe = Arc::new(FakeProbe::default());
        let snap = collect_snapshot(probe.clone(), None).await;
        assert!(snap.processes.is_none());
        assert_eq!(probe.process_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn collectors_run_concurrently() {
        let probe = Arc::new(FakeProbe {
            cpu_delay: Duration::from_secs(3),
            ..FakeProbe::default()
        });
        let started = tokio::time::Instant::now();
        let snap = collect_snapshot(probe.clone(), Some((10, SortKey::Pid))).await;
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(snap.errors.is_empty());
        assert_eq!(probe.memory_calls.load(Ordering::SeqCst), 1);
    }
}
