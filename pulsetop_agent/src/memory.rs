//! Memory collector: base totals from sysinfo, extended breakdown (and a fallback
//! for the totals) from /proc/meminfo.

use std::io;

use crate::error::CollectorError;
use crate::state::SharedSystem;
use crate::types::MemorySample;

#[cfg(target_os = "linux")]
const MEMINFO: Option<&str> = Some("/proc/meminfo");
#[cfg(not(target_os = "linux"))]
const MEMINFO: Option<&str> = None;

pub fn bytes_to_mb(b: u64) -> u64 {
    (b as f64 / (1024.0 * 1024.0)).round() as u64
}

pub fn kb_to_mb(kb: u64) -> u64 {
    (kb as f64 / 1024.0).round() as u64
}

/// Value of `key` (e.g. "SwapTotal") in MB. A missing key or a line without digits yields 0.
pub fn meminfo_mb(content: &str, key: &str) -> u64 {
    content
        .lines()
        .find(|line| {
            line.strip_prefix(key)
                .is_some_and(|rest| rest.trim_start().starts_with(':'))
        })
        .and_then(first_integer)
        .map(kb_to_mb)
        .unwrap_or(0)
}

fn first_integer(line: &str) -> Option<u64> {
    let start = line.find(|c: char| c.is_ascii_digit())?;
    let digits: String = line[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Fill the extended fields from meminfo text. `swap_used` is always derived.
pub fn apply_meminfo(sample: &mut MemorySample, content: &str) {
    let swap_total = meminfo_mb(content, "SwapTotal");
    let swap_free = meminfo_mb(content, "SwapFree");
    sample.available = Some(meminfo_mb(content, "MemAvailable"));
    sample.buffers = Some(meminfo_mb(content, "Buffers"));
    sample.cached = Some(meminfo_mb(content, "Cached"));
    sample.swap_total = Some(swap_total);
    sample.swap_free = Some(swap_free);
    sample.swap_used = Some(swap_total.saturating_sub(swap_free));
}

/// Totals straight from meminfo, for when sysinfo reports nothing.
pub fn sample_from_meminfo(content: &str) -> Option<MemorySample> {
    let total = meminfo_mb(content, "MemTotal");
    if total == 0 {
        return None;
    }
    let free = match meminfo_mb(content, "MemAvailable") {
        0 => meminfo_mb(content, "MemFree"),
        avail => avail,
    };
    Some(MemorySample::from_totals(total, free))
}

/// Combine sysinfo byte totals with the meminfo read. Only an unreadable source
/// with no sysinfo totals to fall back on is an error.
pub fn assemble(
    total: u64,
    free: u64,
    meminfo: Option<(&'static str, io::Result<String>)>,
) -> Result<MemorySample, CollectorError> {
    let base = (total > 0).then(|| MemorySample::from_totals(bytes_to_mb(total), bytes_to_mb(free)));
    match (base, meminfo) {
        (base, Some((path, Ok(content)))) => {
            let mut sample = match base.or_else(|| sample_from_meminfo(&content)) {
                Some(s) => s,
                None => {
                    return Err(CollectorError::Read {
                        path,
                        source: io::Error::new(io::ErrorKind::InvalidData, "no MemTotal entry"),
                    })
                }
            };
            apply_meminfo(&mut sample, &content);
            Ok(sample)
        }
        (Some(sample), _) => Ok(sample),
        (None, Some((path, Err(source)))) => Err(CollectorError::Read { path, source }),
        (None, None) => Err(CollectorError::Read {
            path: "sysinfo memory",
            source: io::Error::other("memory totals unavailable"),
        }),
    }
}

pub struct MemoryCollector {
    sys: SharedSystem,
    meminfo: Option<&'static str>,
}

impl MemoryCollector {
    pub fn new(sys: SharedSystem) -> Self {
        Self {
            sys,
            meminfo: MEMINFO,
        }
    }

    /// Fails only when neither sysinfo nor meminfo can report totals.
    pub async fn sample(&self) -> Result<MemorySample, CollectorError> {
        let (total, available, free) = {
            let mut sys = self.sys.lock().await;
            sys.refresh_memory();
            (sys.total_memory(), sys.available_memory(), sys.free_memory())
        };
        // "free" means allocatable without swapping; some platforms only report raw free.
        let free = if available > 0 { available } else { free };

        let meminfo = match self.meminfo {
            Some(path) => Some((path, tokio::fs::read_to_string(path).await)),
            None => None,
        };
        assemble(total, free, meminfo)
    }
}
