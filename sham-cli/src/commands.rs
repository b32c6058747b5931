//! Subcommand execution.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use sham_hypervisor::{Manager, NetworkInterface, VirtualMachine, VmSummary, Volume};
use tracing::info;

use crate::cli::Command;

/// A storage pool and how many volumes it holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolReport {
    pub name: String,
    pub volumes: usize,
}

/// Everything `show` prints about a VM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmDetails {
    #[serde(flatten)]
    pub summary: VmSummary,
    pub disks: Vec<Volume>,
    pub interfaces: Vec<NetworkInterface>,
}

/// Result of one subcommand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Pools(Vec<PoolReport>),
    Volumes(Vec<Volume>),
    Vms(Vec<VmSummary>),
    Vm(Box<VmDetails>),
    FreeMemory { free_memory_gb: f64 },
    Done { message: String },
}

impl Report {
    fn done(message: impl Into<String>) -> Self {
        Report::Done {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize output")
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();

        macro_rules! emit {
            ($($arg:tt)*) => {{
                out.push_str(&format!($($arg)*));
                out.push('\n');
            }};
        }

        match self {
            Report::Pools(pools) => {
                emit!("{:<24} {:>8}", "POOL", "VOLUMES");
                for pool in pools {
                    emit!("{:<24} {:>8}", pool.name, pool.volumes);
                }
            }
            Report::Volumes(volumes) => {
                emit!("{:<32} {:<8} {:>16}  {}", "VOLUME", "FORMAT", "CAPACITY", "BACKING");
                for vol in volumes {
                    let backing = vol.backing.as_ref().map_or("-", |b| b.path.as_str());
                    emit!(
                        "{:<32} {:<8} {:>16}  {}",
                        vol.name,
                        vol.format,
                        vol.capacity,
                        backing
                    );
                }
            }
            Report::Vms(vms) => {
                emit!(
                    "{:<24} {:<6} {:>5} {:>12}  {}",
                    "NAME",
                    "TYPE",
                    "CPUS",
                    "MEMORY_KIB",
                    "STATE"
                );
                for vm in vms {
                    emit!(
                        "{:<24} {:<6} {:>5} {:>12}  {}",
                        vm.name,
                        vm.domain_type,
                        vm.num_cpus,
                        vm.current_memory,
                        running_label(vm.running)
                    );
                }
            }
            Report::Vm(details) => {
                let vm = &details.summary;
                emit!("Name:           {}", vm.name);
                emit!("Type:           {}", vm.domain_type);
                emit!("CPUs:           {}", vm.num_cpus);
                emit!("Memory (KiB):   {} / {}", vm.current_memory, vm.max_memory);
                emit!("State:          {}", running_label(vm.running));
                emit!("Disks:");
                for disk in &details.disks {
                    emit!("  {} ({}, pool {})", disk.path, disk.format, disk.pool);
                }
                emit!("Interfaces:");
                for nic in &details.interfaces {
                    emit!(
                        "  {} {} mac={}",
                        nic.kind,
                        nic.source.as_deref().unwrap_or("-"),
                        nic.mac().unwrap_or("auto")
                    );
                }
            }
            Report::FreeMemory { free_memory_gb } => emit!("{:.2} GB free", free_memory_gb),
            Report::Done { message } => emit!("{}", message),
        }

        out
    }
}

fn running_label(running: bool) -> &'static str {
    if running {
        "running"
    } else {
        "not running"
    }
}

async fn require_vm(manager: &Manager, name: &str) -> Result<VirtualMachine> {
    manager
        .find_vm(name)
        .await?
        .ok_or_else(|| anyhow!("VM not found: {}", name))
}

/// Run one subcommand against the manager.
pub async fn execute(manager: &Manager, command: Command) -> Result<Report> {
    let report = match command {
        Command::Pools => {
            let mut pools = Vec::new();
            for pool in manager.list_storage_pools().await? {
                pools.push(PoolReport {
                    volumes: pool.volume_count().await?,
                    name: pool.name().to_string(),
                });
            }
            Report::Pools(pools)
        }
        Command::Volumes { pool } => {
            let pool = manager
                .find_pool(&pool)
                .await?
                .ok_or_else(|| anyhow!("Storage pool not found: {}", pool))?;
            Report::Volumes(pool.list_volumes().await?)
        }
        Command::Vms => {
            let mut summaries = Vec::new();
            for vm in manager.list_vms().await? {
                summaries.push(vm.summary().await?);
            }
            Report::Vms(summaries)
        }
        Command::Show { name } => {
            let vm = require_vm(manager, &name).await?;
            Report::Vm(Box::new(VmDetails {
                summary: vm.summary().await?,
                disks: vm.disks().await?,
                interfaces: vm.interfaces()?,
            }))
        }
        Command::FreeMemory => Report::FreeMemory {
            free_memory_gb: manager.free_memory_gb().await?,
        },
        Command::Clone {
            source,
            name,
            memory,
            start,
        } => {
            let source = require_vm(manager, &source).await?;
            let clone = manager
                .fast_clone(&source, &name, memory)
                .await
                .with_context(|| format!("Failed to clone {}", source.name()))?;

            if start {
                clone.start().await?;
                info!(vm = %clone.name(), "Clone started");
            }
            Report::done(format!("Created {} from {}", clone.name(), source.name()))
        }
        Command::Start { name } => {
            require_vm(manager, &name).await?.start().await?;
            Report::done(format!("Started {}", name))
        }
        Command::Shutdown { name, delete } => {
            require_vm(manager, &name).await?.shutdown(delete).await?;
            if delete {
                Report::done(format!("Stopped {} and deleted its disks", name))
            } else {
                Report::done(format!("Stopped {}", name))
            }
        }
        Command::Delete { name } => {
            require_vm(manager, &name).await?.delete().await?;
            Report::done(format!("Deleted {}", name))
        }
    };

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sham_hypervisor::{MockConnector, MockHypervisor};
    use std::sync::Arc;

    async fn demo() -> (MockHypervisor, Manager) {
        let mock = MockHypervisor::with_demo_inventory();
        let connector = Arc::new(MockConnector::new(mock.clone()));
        let manager = Manager::connect("test:///default", connector).await.unwrap();
        (mock, manager)
    }

    #[tokio::test]
    async fn test_pools_and_volumes() {
        let (_mock, manager) = demo().await;

        let report = execute(&manager, Command::Pools).await.unwrap();
        assert_eq!(
            report,
            Report::Pools(vec![PoolReport {
                name: "default".to_string(),
                volumes: 2
            }])
        );
        assert!(report.to_text().contains("default"));

        let report = execute(
            &manager,
            Command::Volumes {
                pool: "default".to_string(),
            },
        )
        .await
        .unwrap();
        let json = report.to_json().unwrap();
        assert!(json.contains("base.qcow2"));

        assert!(execute(
            &manager,
            Command::Volumes {
                pool: "missing".to_string()
            }
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_clone_start_and_show() {
        let (mock, manager) = demo().await;

        execute(
            &manager,
            Command::Clone {
                source: "base".to_string(),
                name: "web-1".to_string(),
                memory: Some(1048576),
                start: true,
            },
        )
        .await
        .unwrap();

        let report = execute(
            &manager,
            Command::Show {
                name: "web-1".to_string(),
            },
        )
        .await
        .unwrap();

        match &report {
            Report::Vm(details) => {
                assert!(details.summary.running);
                assert_eq!(details.summary.current_memory, 1048576);
                assert_eq!(details.disks.len(), 2);
                assert_eq!(details.interfaces.len(), 1);
            }
            other => panic!("unexpected report: {:?}", other),
        }

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["name"], "web-1");
        assert_eq!(json["running"], true);

        execute(
            &manager,
            Command::Shutdown {
                name: "web-1".to_string(),
                delete: true,
            },
        )
        .await
        .unwrap();
        assert!(!mock.has_volume("default", "web-1-disk0.qcow2"));
    }

    #[tokio::test]
    async fn test_vms_and_free_memory() {
        let (mock, manager) = demo().await;
        mock.set_free_memory(4_000_000_000);

        let report = execute(&manager, Command::Vms).await.unwrap();
        match &report {
            Report::Vms(vms) => {
                assert_eq!(vms.len(), 1);
                assert_eq!(vms[0].name, "base");
                assert!(!vms[0].running);
            }
            other => panic!("unexpected report: {:?}", other),
        }

        let report = execute(&manager, Command::FreeMemory).await.unwrap();
        assert_eq!(report.to_text(), "4.00 GB free\n");
    }

    #[test]
    fn test_text_lines() {
        let report = Report::Pools(vec![PoolReport {
            name: "default".to_string(),
            volumes: 3,
        }]);
        let text = report.to_text();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("POOL"));
        assert!(lines[1].starts_with("default"));
        assert!(lines[1].ends_with('3'));

        assert_eq!(Report::done("Started web").to_text(), "Started web\n");
    }

    #[tokio::test]
    async fn test_unknown_vm() {
        let (_mock, manager) = demo().await;

        let err = execute(
            &manager,
            Command::Start {
                name: "ghost".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("VM not found"));
    }
}
