//! # Configuration surface
//!
//! Typed configuration mirroring spec.md §6's enumerated options, loaded
//! from CLI flags layered over built-in defaults. The CLI/config *loader*
//! itself is treated as ambient plumbing (spec.md lists it as an external
//! collaborator) but the shape of the surface it produces is not — every
//! field below is named in spec.md §6.

use crate::error::{ConfigError, ConfigResult};
use clap::Parser;

/// Minimum allowed `rx_chunk_size`, per spec.md §6.
pub const RX_CHUNK_MIN: u32 = 2000;

/// Dispatch discipline a partition uses to serialize actions (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DispatchStrategy {
    /// (a) Per-partition reader-writer-biased locking. Always available.
    Locking,
    /// (b) Delegation to a single owning worker per partition.
    Delegation,
    /// (c) Flat-combining queue.
    Combining,
}

impl Default for DispatchStrategy {
    fn default() -> Self {
        DispatchStrategy::Locking
    }
}

/// Server configuration, parsed from CLI flags.
#[derive(Parser, Debug, Clone)]
#[command(name = "memvaultd", about = "memcached-protocol in-memory cache server")]
pub struct Config {
    /// Address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    pub addr: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 11211)]
    pub port: u16,

    /// Total value-storage cap across all partitions, in bytes.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pub volume: u64,

    /// Number of partitions (shards). Rounded up to a power of two.
    #[arg(long, default_value_t = 8)]
    pub nparts: u16,

    /// Dispatch discipline used by every partition.
    #[arg(long, value_enum, default_value_t = DispatchStrategy::Locking)]
    pub dispatch_strategy: DispatchStrategy,

    /// CPU set restricting which workers own partitions under delegation
    /// dispatch, e.g. `"0-3,5"`. Ignored by locking/combining dispatch.
    /// Parsed and validated but not enforced: pinning owner tasks to
    /// specific cores would need a platform affinity crate the rest of the
    /// dependency stack has no other use for, so the flag is accepted for
    /// wire/CLI compatibility and owner tasks are scheduled by tokio as
    /// normal.
    #[arg(long)]
    pub affinity: Option<String>,

    /// Per-connection read buffer chunk size, in bytes. Floor of 2000.
    #[arg(long, default_value_t = 16 * 1024)]
    pub rx_chunk_size: u32,

    /// Per-connection write buffer chunk size, in bytes.
    #[arg(long, default_value_t = 16 * 1024)]
    pub tx_chunk_size: u32,

    /// Maximum commands parsed per reader invocation before yielding.
    #[arg(long, default_value_t = 64)]
    pub batch_size: u32,

    /// Log level, forwarded to `env_logger` if `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            addr: "127.0.0.1".to_string(),
            port: 11211,
            volume: 64 * 1024 * 1024,
            nparts: 8,
            dispatch_strategy: DispatchStrategy::Locking,
            affinity: None,
            rx_chunk_size: 16 * 1024,
            tx_chunk_size: 16 * 1024,
            batch_size: 64,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Validate and normalize the configuration, rounding `nparts` up to a
    /// power of two and enforcing the `rx_chunk_size` floor from spec.md §6.
    pub fn normalize(mut self) -> ConfigResult<Self> {
        if self.nparts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "nparts",
                reason: "must be at least 1".to_string(),
            });
        }
        self.nparts = self.nparts.next_power_of_two();

        if self.rx_chunk_size < RX_CHUNK_MIN {
            self.rx_chunk_size = RX_CHUNK_MIN;
        }

        if self.volume == 0 {
            return Err(ConfigError::InvalidValue {
                field: "volume",
                reason: "must be greater than 0".to_string(),
            });
        }

        if let Some(cpu_set) = &self.affinity {
            parse_cpu_set(cpu_set).map_err(|reason| ConfigError::InvalidValue {
                field: "affinity",
                reason,
            })?;
        }

        Ok(self)
    }

    /// Per-partition share of the total volume cap.
    pub fn volume_per_partition(&self) -> u64 {
        self.volume / self.nparts as u64
    }
}

/// Parse a `"0-3,5"`-style cpu set into the individual core indices it
/// names, rejecting anything else. Used only to validate the `--affinity`
/// flag early; nothing currently consumes the parsed set (see the field's
/// doc comment).
fn parse_cpu_set(spec: &str) -> Result<Vec<u32>, String> {
    let mut cores = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(format!("empty entry in cpu set `{spec}`"));
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.parse().map_err(|_| format!("bad range start in `{part}`"))?;
                let end: u32 = end.parse().map_err(|_| format!("bad range end in `{part}`"))?;
                if start > end {
                    return Err(format!("range `{part}` counts down instead of up"));
                }
                cores.extend(start..=end);
            }
            None => {
                let core: u32 = part.parse().map_err(|_| format!("`{part}` is not a core index"))?;
                cores.push(core);
            }
        }
    }
    Ok(cores)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nparts_rounds_up_to_power_of_two() {
        let cfg = Config { nparts: 5, ..Config::default() }.normalize().unwrap();
        assert_eq!(cfg.nparts, 8);
    }

    #[test]
    fn rx_chunk_floor_enforced() {
        let cfg = Config { rx_chunk_size: 100, ..Config::default() }.normalize().unwrap();
        assert_eq!(cfg.rx_chunk_size, RX_CHUNK_MIN);
    }

    #[test]
    fn zero_volume_rejected() {
        let cfg = Config { volume: 0, ..Config::default() };
        assert!(cfg.normalize().is_err());
    }

    #[test]
    fn malformed_affinity_is_rejected() {
        let cfg = Config { affinity: Some("a-b".to_string()), ..Config::default() };
        assert!(cfg.normalize().is_err());
    }

    #[test]
    fn ranged_affinity_is_accepted() {
        let cfg = Config { affinity: Some("0-3,5".to_string()), ..Config::default() }.normalize();
        assert!(cfg.is_ok());
    }
}
