//! CPU collector: utilization from two tick readings, static specs via sysinfo,
//! and best-effort thermal readings from sysfs.

use once_cell::sync::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::time::{sleep, Duration};

use crate::state::SharedSystem;
use crate::types::CpuSample;

/// Gap between the two counter readings used for utilization.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Probed in order; first readable sensor wins.
pub const THERMAL_PATHS: &[&str] = &[
    "/sys/class/thermal/thermal_zone0/temp",
    "/sys/class/hwmon/hwmon0/temp1_input",
    "/sys/class/hwmon/hwmon1/temp1_input",
    "/sys/class/hwmon/hwmon2/temp1_input",
    "/sys/devices/platform/coretemp.0/hwmon/hwmon0/temp1_input",
];

// Runtime toggle (read once)
fn temp_enabled() -> bool {
    static ON: OnceCell<bool> = OnceCell::new();
    *ON.get_or_init(|| {
        std::env::var("PULSETOP_AGENT_TEMP")
            .map(|v| v != "0")
            .unwrap_or(true)
    })
}

/// Idle and total jiffies summed over every core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub idle: u64,
    pub total: u64,
}

/// Sum the per-core lines of /proc/stat ("cpu0 user nice system idle iowait irq softirq steal ...").
/// The aggregate "cpu" line is skipped so cores are not counted twice.
pub fn parse_proc_stat(content: &str) -> Option<CpuTicks> {
    let mut acc = CpuTicks::default();
    let mut seen = false;
    for line in content.lines() {
        let mut it = line.split_whitespace();
        let Some(label) = it.next() else { continue };
        let is_core = label
            .strip_prefix("cpu")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if !is_core {
            continue;
        }
        let vals: Vec<u64> = it.take(8).map(|t| t.parse().unwrap_or(0)).collect();
        if vals.len() < 4 {
            continue;
        }
        // idle + iowait
        let idle = vals[3].saturating_add(vals.get(4).copied().unwrap_or(0));
        acc.idle = acc.idle.saturating_add(idle);
        acc.total = acc.total.saturating_add(vals.iter().sum::<u64>());
        seen = true;
    }
    seen.then_some(acc)
}

/// 100 - round(100 * idle_delta / total_delta), clamped to 0..=100.
pub fn usage_between(before: CpuTicks, after: CpuTicks) -> u8 {
    let dt = after.total.saturating_sub(before.total);
    if dt == 0 {
        return 0;
    }
    let di = after.idle.saturating_sub(before.idle);
    let idle_pct = (di as f64 / dt as f64 * 100.0).round();
    (100.0 - idle_pct).clamp(0.0, 100.0) as u8
}

fn clamp_usage(v: f32) -> u8 {
    if v.is_finite() {
        v.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

#[cfg(target_os = "linux")]
fn read_ticks() -> Option<CpuTicks> {
    fs::read_to_string("/proc/stat")
        .ok()
        .and_then(|s| parse_proc_stat(&s))
}

#[cfg(not(target_os = "linux"))]
fn read_ticks() -> Option<CpuTicks> {
    None
}

/// Convert a sysfs millidegree reading to whole degrees.
pub fn millidegrees_to_celsius(raw: &str) -> Option<i64> {
    let v = raw.trim().parse::<f64>().ok()?;
    Some((v / 1000.0).round() as i64)
}

/// First path that reads and parses wins. No sensor is not an error.
pub fn read_temperature<P: AsRef<Path>>(paths: &[P]) -> Option<i64> {
    paths.iter().find_map(|p| {
        fs::read_to_string(p)
            .ok()
            .and_then(|s| millidegrees_to_celsius(&s))
    })
}

pub struct CpuCollector {
    sys: SharedSystem,
    thermal_paths: Vec<PathBuf>,
    interval: Duration,
}

impl CpuCollector {
    pub fn new(sys: SharedSystem) -> Self {
        let thermal_paths = if cfg!(target_os = "linux") && temp_enabled() {
            THERMAL_PATHS.iter().map(PathBuf::from).collect()
        } else {
            Vec::new()
        };
        Self {
            sys,
            thermal_paths,
            interval: SAMPLE_INTERVAL,
        }
    }

    /// Never fails: every sub-step degrades to neutral data on its own.
    pub async fn sample(&self) -> CpuSample {
        let usage = self.utilization().await;

        let (model, cores, speed) = {
            let mut sys = self.sys.lock().await;
            sys.refresh_cpu_frequency();
            let cpus = sys.cpus();
            // Heterogeneous cores: the first one speaks for the machine.
            let model = cpus
                .first()
                .map(|c| c.brand().trim().to_string())
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| "unknown".to_string());
            let speed = cpus.first().map(|c| c.frequency()).unwrap_or(0);
            (model, cpus.len(), speed)
        };

        let temperature = read_temperature(&self.thermal_paths);

        CpuSample {
            model,
            cores,
            speed,
            usage,
            temperature,
        }
    }

    async fn utilization(&self) -> u8 {
        if let Some(before) = read_ticks() {
            sleep(self.interval).await;
            if let Some(after) = read_ticks() {
                return usage_between(before, after);
            }
        }

        // No /proc: let sysinfo diff its own counters across the same kind of gap.
        self.sys.lock().await.refresh_cpu_usage();
        sleep(self.interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;
        let mut sys = self.sys.lock().await;
        sys.refresh_cpu_usage();
        clamp_usage(sys.global_cpu_usage())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const STAT_A: &str = "cpu  200 0 100 700 0 0 0 0 0 0
cpu0 100 0 50 350 0 0 0 0 0 0
cpu1 100 0 50 350 0 0 0 0 0 0
intr 12345
ctxt 999
";

    const STAT_B: &str = "cpu  400 0 200 1000 0 0 0 0 0 0
cpu0 200 0 100 500 0 0 0 0 0 0
cpu1 200 0 100 500 0 0 0 0 0 0
";

    #[test]
    fn proc_stat_sums_cores_and_skips_aggregate() {
        let t = parse_proc_stat(STAT_A).unwrap();
        assert_eq!(t.idle, 700);
        assert_eq!(t.total, 1000);
    }

    #[test]
    fn proc_stat_counts_iowait_as_idle() {
        let t = parse_proc_stat("cpu0 10 0 10 60 20 0 0 0\n").unwrap();
        assert_eq!(t.idle, 80);
        assert_eq!(t.total, 100);
    }

    #[test]
    fn proc_stat_without_core_lines_is_none() {
        assert!(parse_proc_stat("cpu 1 2 3 4\nintr 5\n").is_none());
        assert!(parse_proc_stat("").is_none());
    }

    #[test]
    fn usage_from_deltas() {
        let a = parse_proc_stat(STAT_A).unwrap();
        let b = parse_proc_stat(STAT_B).unwrap();
        // dt = 600, di = 300 -> idle 50% -> usage 50%
        assert_eq!(usage_between(a, b), 50);
        let c = CpuTicks { idle: 1000, total: 1700 };
        // dt = 700, di = 300 -> idle 43% -> usage 57%
        assert_eq!(usage_between(a, c), 57);
    }

    #[test]
    fn usage_stays_in_range() {
        let a = CpuTicks { idle: 0, total: 0 };
        assert_eq!(usage_between(a, a), 0);
        // counters going backwards (e.g. hotplug) must not escape 0..=100
        let weird = CpuTicks { idle: 500, total: 100 };
        assert!(usage_between(a, weird) <= 100);
        assert_eq!(usage_between(a, CpuTicks { idle: 0, total: 50 }), 100);
        assert_eq!(clamp_usage(f32::NAN), 0);
        assert_eq!(clamp_usage(180.0), 100);
        assert_eq!(clamp_usage(-3.0), 0);
    }

    #[test]
    fn millidegrees_round_to_whole_degrees() {
        assert_eq!(millidegrees_to_celsius("45500\n"), Some(46));
        assert_eq!(millidegrees_to_celsius("38200"), Some(38));
        assert_eq!(millidegrees_to_celsius("n/a"), None);
    }

    #[test]
    fn first_readable_thermal_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("thermal_zone9/temp");
        let garbage = dir.path().join("garbage");
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::File::create(&garbage).unwrap().write_all(b"busy").unwrap();
        std::fs::File::create(&first).unwrap().write_all(b"51000\n").unwrap();
        std::fs::File::create(&second).unwrap().write_all(b"70000\n").unwrap();

        assert_eq!(read_temperature(&[&missing, &garbage, &first, &second]), Some(51));
        assert_eq!(read_temperature(&[&missing]), None);
        assert_eq!(read_temperature::<&Path>(&[]), None);
    }

    #[tokio::test]
    async fn live_sample_is_within_bounds() {
        let sys = crate::state::new_shared_system();
        let c = CpuCollector::new(sys);
        let s = c.sample().await;
        assert!(s.usage <= 100);
        assert!(!s.model.is_empty());
    }
}
