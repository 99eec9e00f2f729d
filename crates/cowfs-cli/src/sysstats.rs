//! Host memory, load and CPU figures for `cowfs stats`.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostStats {
    pub total_ram: u64,
    pub free_ram: u64,
    pub uptime_secs: u64,
    /// 1, 5 and 15 minute load averages
    pub load: [f64; 3],
    pub procs: u16,
    /// Busy share of all CPUs over a short sample window
    pub cpu_percent: Option<f64>,
}

impl HostStats {
    pub fn used_percent(&self) -> f64 {
        if self.total_ram == 0 {
            return 0.0;
        }
        (self.total_ram - self.free_ram.min(self.total_ram)) as f64 * 100.0 / self.total_ram as f64
    }
}

/// Aggregate CPU time counters from the first line of `/proc/stat`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_cpu_line(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    // user nice system idle iowait irq softirq steal
    let values: Vec<u64> = fields.take(8).map(|f| f.parse().ok()).collect::<Option<_>>()?;
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total - idle,
        total,
    })
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn cpu_percent_between(before: CpuTimes, after: CpuTimes) -> Option<f64> {
    let total = after.total.checked_sub(before.total)?;
    let busy = after.busy.checked_sub(before.busy)?;
    if total == 0 {
        return None;
    }
    Some(busy as f64 * 100.0 / total as f64)
}

#[cfg(target_os = "linux")]
const CPU_SAMPLE: std::time::Duration = std::time::Duration::from_millis(200);

#[cfg(target_os = "linux")]
fn sample_cpu_percent() -> Option<f64> {
    let read = || {
        std::fs::read_to_string("/proc/stat")
            .ok()
            .and_then(|s| parse_cpu_line(&s))
    };
    let before = read()?;
    std::thread::sleep(CPU_SAMPLE);
    cpu_percent_between(before, read()?)
}

// Fixed-point scale of sysinfo load averages
#[cfg(target_os = "linux")]
const SI_LOAD_SHIFT: u32 = 16;

#[cfg(target_os = "linux")]
pub fn host_stats() -> Option<HostStats> {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    // SAFETY: `info` is a valid, writable sysinfo struct
    if unsafe { libc::sysinfo(&mut info) } != 0 {
        return None;
    }
    let unit = u64::from(info.mem_unit.max(1));
    let scale = f64::from(1u32 << SI_LOAD_SHIFT);
    Some(HostStats {
        total_ram: info.totalram as u64 * unit,
        free_ram: info.freeram as u64 * unit,
        uptime_secs: info.uptime.max(0) as u64,
        load: [
            info.loads[0] as f64 / scale,
            info.loads[1] as f64 / scale,
            info.loads[2] as f64 / scale,
        ],
        procs: info.procs,
        cpu_percent: sample_cpu_percent(),
    })
}

#[cfg(not(target_os = "linux"))]
pub fn host_stats() -> Option<HostStats> {
    None
}
