//! Command-line argument parsing.

use clap::{Parser, Subcommand};

/// sham - friendly interface to a libvirt hypervisor
#[derive(Parser, Debug)]
#[command(name = "sham")]
#[command(about = "sham - manage libvirt storage pools, volumes and VMs")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Hypervisor connection URI (e.g., qemu:///system)
    #[arg(long, env = "SHAM_URI")]
    pub uri: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Enable development mode (in-memory mock hypervisor with demo inventory)
    #[arg(long)]
    pub dev: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List storage pools
    Pools,

    /// List the volumes in a storage pool
    Volumes {
        /// Storage pool name
        pool: String,
    },

    /// List VMs
    Vms,

    /// Show one VM with its disks and interfaces
    Show {
        /// VM name
        name: String,
    },

    /// Show free host memory
    FreeMemory,

    /// Create a copy-on-write clone of a VM
    Clone {
        /// Source VM name
        source: String,
        /// Name of the new VM
        name: String,
        /// Memory for the clone in KiB (defaults to the source's)
        #[arg(long)]
        memory: Option<u64>,
        /// Start the clone once it is defined
        #[arg(long)]
        start: bool,
    },

    /// Start a VM
    Start {
        /// VM name
        name: String,
    },

    /// Forcibly stop a VM
    Shutdown {
        /// VM name
        name: String,
        /// Wipe and delete the VM's disks after stopping it
        #[arg(long)]
        delete: bool,
    },

    /// Undefine a stopped VM and delete its disks
    Delete {
        /// VM name
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clone() {
        let args = Args::try_parse_from([
            "sham", "--dev", "clone", "base", "web-1", "--memory", "524288", "--start", "--json",
        ])
        .unwrap();

        assert!(args.dev);
        assert!(args.json);
        assert_eq!(
            args.command,
            Command::Clone {
                source: "base".to_string(),
                name: "web-1".to_string(),
                memory: Some(524288),
                start: true,
            }
        );
    }

    #[test]
    fn test_parse_shutdown_and_globals() {
        let args = Args::try_parse_from([
            "sham",
            "--uri",
            "qemu+ssh://root@host/system",
            "-l",
            "debug",
            "shutdown",
            "web",
            "--delete",
        ])
        .unwrap();

        assert_eq!(args.uri.as_deref(), Some("qemu+ssh://root@host/system"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(
            args.command,
            Command::Shutdown {
                name: "web".to_string(),
                delete: true
            }
        );
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Args::try_parse_from(["sham"]).is_err());
        assert!(Args::try_parse_from(["sham", "volumes"]).is_err());
    }
}
