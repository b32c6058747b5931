//! Libvirt scaled-integer units.
//!
//! Capacities and memory sizes in descriptors carry an optional `unit`
//! attribute. Units are case-sensitive: `KB` is 1000 bytes, `k`/`KiB` is 1024.

use crate::error::{HypervisorError, Result};

/// Multiplier in bytes for a libvirt unit name.
pub fn unit_multiplier(unit: &str) -> Option<u64> {
    let multiplier = match unit {
        "b" | "bytes" => 1,
        "KB" => 1_000,
        "k" | "KiB" => 1 << 10,
        "MB" => 1_000_000,
        "M" | "MiB" => 1 << 20,
        "GB" => 1_000_000_000,
        "G" | "GiB" => 1 << 30,
        "TB" => 1_000_000_000_000,
        "T" | "TiB" => 1 << 40,
        "PB" => 1_000_000_000_000_000,
        "P" | "PiB" => 1 << 50,
        "EB" => 1_000_000_000_000_000_000,
        "E" | "EiB" => 1 << 60,
        _ => return None,
    };
    Some(multiplier)
}

/// Convert `value` expressed in `unit` to bytes.
pub fn to_bytes(value: u64, unit: &str) -> Result<u64> {
    let multiplier = unit_multiplier(unit)
        .ok_or_else(|| HypervisorError::InvalidConfig(format!("unknown unit '{}'", unit)))?;

    value.checked_mul(multiplier).ok_or_else(|| {
        HypervisorError::InvalidConfig(format!("{} {} overflows a 64-bit byte count", value, unit))
    })
}

/// Convert `value` expressed in `unit` to KiB, rounding down.
pub fn to_kib(value: u64, unit: &str) -> Result<u64> {
    Ok(to_bytes(value, unit)? / 1024)
}
