//! One-line text rendering of snapshots for headless output.

use std::fmt::Write as _;

use crate::types::Snapshot;

const TOP_SHOWN: usize = 3;

/// Human-readable size from a value in MB.
pub fn human_mb(mb: u64) -> String {
    const K: f64 = 1024.0;
    let mb = mb as f64;
    if mb < K {
        return format!("{mb:.0}MB");
    }
    let gb = mb / K;
    if gb < K {
        return format!("{gb:.1}GB");
    }
    let tb = gb / K;
    format!("{tb:.2}TB")
}

pub fn summary_line(snap: &Snapshot) -> String {
    let mut out = String::new();
    match &snap.cpu {
        Some(cpu) => {
            let _ = write!(out, "cpu {}% {}c", cpu.usage, cpu.cores);
            if let Some(t) = cpu.temperature {
                let _ = write!(out, " {t}°C");
            }
        }
        None => out.push_str("cpu n/a"),
    }
    out.push_str(" | ");
    match &snap.memory {
        Some(mem) => {
            let _ = write!(
                out,
                "mem {}/{} {}%",
                human_mb(mem.used),
                human_mb(mem.total),
                mem.percentage
            );
        }
        None => out.push_str("mem n/a"),
    }
    if let Some(procs) = snap.processes.as_deref().filter(|p| !p.is_empty()) {
        out.push_str(" | top:");
        for p in procs.iter().take(TOP_SHOWN) {
            let _ = write!(out, " {} {:.1}%", p.name, p.cpu);
        }
    }
    for err in &snap.errors {
        let _ = write!(out, "\n  ! {err}");
    }
    out
}
