//! Human-readable output for storage listings.

use std::io::{self, Write};

use anyhow::Result;
use cowfs_core::{CowEngine, FileMetadata, StorageUsage};

use crate::sysstats::HostStats;

const UNITS: [(&str, u64); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    for (unit, scale) in UNITS {
        if bytes >= scale {
            return format!("{:.2} {}", bytes as f64 / scale as f64, unit);
        }
    }
    format!("{} bytes", bytes)
}

/// Format number with comma separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn print_versions<W: Write>(meta: &FileMetadata, out: &mut W) -> io::Result<()> {
    writeln!(out)?;
    writeln!(
        out,
        "  {} (created {})",
        meta.filename(),
        meta.creation_time().to_rfc3339()
    )?;
    writeln!(out, "  {:>3}  {:<25} {:>12} {:>7}", "", "timestamp", "size", "blocks")?;
    for v in meta.versions() {
        let marker = if v.version as usize == meta.current_version() {
            "*"
        } else {
            " "
        };
        writeln!(
            out,
            "{} {:>3}  {:<25} {:>12} {:>7}",
            marker,
            v.version,
            v.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            format_bytes(v.size),
            v.blocks.len()
        )?;
    }
    Ok(())
}

pub fn print_blocks(engine: &CowEngine) -> Result<()> {
    let ids = engine.list_blocks()?;
    let mut total = 0u64;
    for id in &ids {
        let size = engine.block_size(id)?;
        total += size;
        println!("{}  {:>6}", id, size);
    }
    println!();
    println!(
        "  {} blocks, {}",
        format_number(ids.len() as u64),
        format_bytes(total)
    );
    Ok(())
}

pub fn print_usage(usage: &StorageUsage) {
    println!();
    println!("  cowfs storage usage");
    println!("  ===================");
    println!(
        "    📦 Blocks:   {} ({})",
        format_number(usage.block_count),
        format_bytes(usage.total_blocks_size)
    );
    println!(
        "    📄 Files:    {} ({})",
        format_number(usage.file_count),
        format_bytes(usage.total_metadata_size)
    );
    println!("    💾 Total:    {}", format_bytes(usage.total_size));
}

pub fn print_host(host: &HostStats) {
    println!();
    println!("  Host");
    println!("  ====");
    println!(
        "    Memory:   {} free of {} ({:.1}% used)",
        format_bytes(host.free_ram),
        format_bytes(host.total_ram),
        host.used_percent()
    );
    println!(
        "    Load:     {:.2} {:.2} {:.2}",
        host.load[0], host.load[1], host.load[2]
    );
    if let Some(cpu) = host.cpu_percent {
        println!("    CPU:      {:.1}% busy", cpu);
    }
    println!("    Uptime:   {}s, {} processes", format_number(host.uptime_secs), host.procs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 bytes");
        assert_eq!(format_bytes(4095), "4.00 KB");
        assert_eq!(format_bytes(1023), "1023 bytes");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(3 << 20), "3.00 MB");
        assert_eq!(format_bytes(1 << 30), "1.00 GB");
    }

    #[test]
    fn test_print_versions_marks_current() {
        let mut meta = FileMetadata::new("notes");
        meta.push_version(vec![cowfs_core::BlockId::generate()], 5);
        meta.push_version(vec![cowfs_core::BlockId::generate()], 12);
        meta.rewind();

        let mut out = Vec::new();
        print_versions(&meta, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().filter(|l| l.contains("bytes")).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].starts_with("*   1"));
        assert!(rows[2].starts_with("    2"));
        assert!(text.contains("notes (created "));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(123456), "123,456");
        assert_eq!(format_number(1234567), "1,234,567");
    }
}
