//! Process table collector. Shells out to the platform listing utility, trying
//! command variants from most to least capable, and parses whichever answered.

use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CollectorError;
use crate::memory::kb_to_mb;
use crate::types::{ProcessRecord, SortKey};

pub type RowParser = fn(&str) -> Vec<ProcessRecord>;

/// One listing command and the parser for the column layout it prints.
pub struct ListingCommand {
    pub program: &'static str,
    pub args: &'static [&'static str],
    pub parse: RowParser,
}

impl ListingCommand {
    pub fn display(&self) -> String {
        std::iter::once(self.program)
            .chain(self.args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub static POSIX_COMMANDS: &[ListingCommand] = &[
    ListingCommand {
        program: "ps",
        args: &["-eo", "pid,ppid,user,%cpu,%mem,rss,stat,args"],
        parse: parse_ps_full,
    },
    ListingCommand {
        program: "ps",
        args: &["aux"],
        parse: parse_ps_aux,
    },
    ListingCommand {
        program: "ps",
        args: &["-A", "-o", "pid,comm"],
        parse: parse_ps_minimal,
    },
];

pub static WINDOWS_COMMANDS: &[ListingCommand] = &[
    ListingCommand {
        program: "tasklist",
        args: &["/V", "/FO", "CSV", "/NH"],
        parse: parse_tasklist_verbose,
    },
    ListingCommand {
        program: "tasklist",
        args: &["/FO", "CSV", "/NH"],
        parse: parse_tasklist,
    },
];

pub fn platform_commands() -> &'static [ListingCommand] {
    if cfg!(windows) {
        WINDOWS_COMMANDS
    } else {
        POSIX_COMMANDS
    }
}

// ---------- Field helpers ----------

/// Positive integer pid, or None (the row gets dropped).
fn parse_pid(tok: &str) -> Option<u32> {
    tok.parse::<u32>().ok().filter(|p| *p > 0)
}

fn parse_pct(tok: &str) -> f32 {
    tok.replace(',', ".").parse::<f32>().unwrap_or(0.0)
}

/// Pid that may carry locale grouping ("1.234").
fn parse_grouped_pid(tok: &str) -> Option<u32> {
    let cleaned: String = tok
        .chars()
        .filter(|c| !matches!(c, ',' | '.' | ' ' | '\u{a0}'))
        .collect();
    parse_pid(&cleaned)
}

/// Integer with any thousands separators or unit suffix removed ("123,456 K" -> 123456).
fn parse_grouped_int(tok: &str) -> u64 {
    let digits: String = tok.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Executable name from an argv[0]. Kernel threads ("[kworker/0:1]") are kept whole.
fn command_name(arg0: &str) -> String {
    if arg0.starts_with('[') {
        return arg0.to_string();
    }
    arg0.rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(arg0)
        .to_string()
}

/// Human status from a ps STAT code.
fn status_from_stat(stat: &str) -> String {
    let status = match stat.chars().next() {
        Some('R') => "running",
        Some('S') => "sleeping",
        Some('D') => "disk-sleep",
        Some('I') => "idle",
        Some('T') | Some('t') => "stopped",
        Some('Z') => "zombie",
        Some('X') => "dead",
        Some(_) => stat,
        None => ProcessRecord::UNKNOWN,
    };
    status.to_string()
}

// ---------- POSIX parsers ----------

/// `ps -eo pid,ppid,user,%cpu,%mem,rss,stat,args`
pub fn parse_ps_full(out: &str) -> Vec<ProcessRecord> {
    out.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 8 {
                return None;
            }
            let pid = parse_pid(cols[0])?;
            let command = cols[7..].join(" ");
            Some(ProcessRecord {
                pid,
                ppid: cols[1].parse().ok(),
                user: cols[2].to_string(),
                cpu: parse_pct(cols[3]),
                memory_percent: Some(parse_pct(cols[4])),
                memory_mb: kb_to_mb(cols[5].parse().unwrap_or(0)),
                status: status_from_stat(cols[6]),
                name: command_name(cols[7]),
                command,
            })
        })
        .collect()
}

/// `ps aux`: USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND
pub fn parse_ps_aux(out: &str) -> Vec<ProcessRecord> {
    out.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 11 {
                return None;
            }
            let pid = parse_pid(cols[1])?;
            Some(ProcessRecord {
                pid,
                ppid: None,
                user: cols[0].to_string(),
                cpu: parse_pct(cols[2]),
                memory_percent: Some(parse_pct(cols[3])),
                memory_mb: kb_to_mb(cols[5].parse().unwrap_or(0)),
                status: status_from_stat(cols[7]),
                name: command_name(cols[10]),
                command: cols[10..].join(" "),
            })
        })
        .collect()
}

/// `ps -A -o pid,comm`: pid and name only.
pub fn parse_ps_minimal(out: &str) -> Vec<ProcessRecord> {
    out.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 2 {
                return None;
            }
            let pid = parse_pid(cols[0])?;
            let command = cols[1..].join(" ");
            Some(ProcessRecord {
                name: command_name(&command),
                command,
                ..ProcessRecord::with_pid(pid)
            })
        })
        .collect()
}

// ---------- Windows parsers ----------

/// Split one quoted-CSV line. Doubled quotes inside a field are an escaped quote.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches(['\r', '\n']).chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    fields.push(cur);
    fields
}

fn tasklist_base(cols: &[String]) -> Option<ProcessRecord> {
    let pid = parse_grouped_pid(cols[1].trim())?;
    let image = cols[0].trim().to_string();
    Some(ProcessRecord {
        memory_mb: kb_to_mb(parse_grouped_int(&cols[4])),
        name: image.clone(),
        command: image,
        ..ProcessRecord::with_pid(pid)
    })
}

/// `tasklist /FO CSV /NH`: "Image Name","PID","Session Name","Session#","Mem Usage"
pub fn parse_tasklist(out: &str) -> Vec<ProcessRecord> {
    out.lines()
        .filter_map(|line| {
            let cols = split_csv_line(line);
            if cols.len() < 5 {
                return None;
            }
            tasklist_base(&cols)
        })
        .collect()
}

/// `tasklist /V /FO CSV /NH`: the basic columns plus Status, User Name, CPU Time, Window Title.
pub fn parse_tasklist_verbose(out: &str) -> Vec<ProcessRecord> {
    out.lines()
        .filter_map(|line| {
            let cols = split_csv_line(line);
            if cols.len() < 9 {
                return None;
            }
            let mut rec = tasklist_base(&cols)?;
            let status = cols[5].trim().to_ascii_lowercase();
            if !status.is_empty() {
                rec.status = status;
            }
            let user = cols[6].trim();
            if !user.is_empty() && user != "N/A" {
                rec.user = user.to_string();
            }
            Some(rec)
        })
        .collect()
}

// ---------- Ordering ----------

/// Numeric descending for cpu/memory, ascending for pid, case-insensitive ascending for name.
pub fn sort_records(records: &mut [ProcessRecord], key: SortKey) {
    match key {
        SortKey::Cpu => records.sort_by(|a, b| b.cpu.total_cmp(&a.cpu)),
        SortKey::Memory => records.sort_by(|a, b| b.memory_mb.cmp(&a.memory_mb)),
        SortKey::Name => records.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        }),
        SortKey::Pid => records.sort_by_key(|r| r.pid),
    }
}

/// Drop duplicate pids, sort, then truncate to `limit`.
pub fn rank(mut records: Vec<ProcessRecord>, limit: usize, key: SortKey) -> Vec<ProcessRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    records.retain(|r| seen.insert(r.pid));
    sort_records(&mut records, key);
    records.truncate(limit);
    records
}

// ---------- Collector ----------

async fn run_listing(
    cmd: &ListingCommand,
    deadline: Instant,
    timeout: Duration,
) -> Result<String, CollectorError> {
    if Instant::now() >= deadline {
        return Err(CollectorError::Timeout {
            command: cmd.display(),
            timeout,
        });
    }
    let mut command = Command::new(cmd.program);
    command
        .args(cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout_at(deadline, command.output()).await {
        Ok(res) => res.map_err(|source| CollectorError::Spawn {
            command: cmd.display(),
            source,
        })?,
        Err(_) => {
            return Err(CollectorError::Timeout {
                command: cmd.display(),
                timeout,
            })
        }
    };
    if !output.status.success() {
        return Err(CollectorError::ExitStatus {
            command: cmd.display(),
            status: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub struct ProcessCollector {
    commands: &'static [ListingCommand],
    timeout: Duration,
}

impl ProcessCollector {
    pub fn new(timeout: Duration) -> Self {
        Self::with_commands(platform_commands(), timeout)
    }

    pub fn with_commands(commands: &'static [ListingCommand], timeout: Duration) -> Self {
        Self { commands, timeout }
    }

    /// First command that runs cleanly and yields rows wins; exhausting the list is an error.
    /// `timeout` bounds the whole chain: once it expires no further variant is tried.
    pub async fn list(&self, limit: usize, sort: SortKey) -> Result<Vec<ProcessRecord>, CollectorError> {
        let deadline = Instant::now() + self.timeout;
        let mut failures = Vec::new();
        for cmd in self.commands {
            let rows = match run_listing(cmd, deadline, self.timeout).await {
                Ok(stdout) => (cmd.parse)(&stdout),
                Err(e @ CollectorError::Timeout { .. }) => {
                    debug!(command = %cmd.display(), error = %e, "process listing out of time");
                    return Err(e);
                }
                Err(e) => {
                    debug!(command = %cmd.display(), error = %e, "process listing failed");
                    failures.push(e.to_string());
                    continue;
                }
            };
            if rows.is_empty() {
                let e = CollectorError::NoRows {
                    command: cmd.display(),
                };
                debug!(error = %e, "process listing unusable");
                failures.push(e.to_string());
                continue;
            }
            return Ok(rank(rows, limit, sort));
        }
        Err(CollectorError::Exhausted(failures))
    }
}
