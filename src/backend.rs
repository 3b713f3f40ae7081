// External data sources and side effects behind a trait so the pairing
// and provisioning logic can run against canned fixtures in tests.

use std::collections::BTreeMap;
use std::process::Command;

use tracing::debug;

use crate::ip_link::{self, LinkDevice};
use crate::{Result, VfnetError};

/// PCI-enumeration metadata for one bus address, as reported by
/// `lspci -vmmks`. Missing keys default to "unknown".
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PciMetadata {
    pub device_name: String,
    pub driver: String,
    pub module: String,
    pub iommu_group: String,
    pub vendor: String,
}

impl Default for PciMetadata {
    fn default() -> Self {
        Self {
            device_name: "unknown".to_string(),
            driver: "unknown".to_string(),
            module: "unknown".to_string(),
            iommu_group: "unknown".to_string(),
            vendor: "unknown".to_string(),
        }
    }
}

/// Everything the engine needs from outside sysfs: PCI enumeration,
/// the netlink link table, and the two provisioning side effects.
pub trait Backend {
    /// PCI metadata for a single device, keyed by bus address.
    fn pci_metadata(&self, bus_address: &str) -> Result<PciMetadata>;

    /// The full link table from netlink, keyed by interface name.
    fn link_table(&self) -> Result<BTreeMap<String, LinkDevice>>;

    /// Set a VF MAC, addressed through the parent PF since the VF may not
    /// have an interface of its own yet.
    fn set_vf_mac(&self, pf_iface: &str, vf_index: u32, mac: &str) -> Result<()>;

    /// Unload and reload a kernel module.
    fn reload_module(&self, module: &str) -> Result<()>;
}

/// Live implementation shelling out to lspci, ip, and modprobe.
#[derive(Debug, Default)]
pub struct SystemBackend;

impl SystemBackend {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        debug!("running {} {}", program, args.join(" "));
        let output = Command::new(program).args(args).output().map_err(|e| {
            VfnetError::CommandFailed {
                command: program.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !output.status.success() {
            return Err(VfnetError::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Backend for SystemBackend {
    fn pci_metadata(&self, bus_address: &str) -> Result<PciMetadata> {
        let stdout = self.run("lspci", &["-vmmks", bus_address])?;
        Ok(parse_lspci_output(&stdout))
    }

    fn link_table(&self) -> Result<BTreeMap<String, LinkDevice>> {
        let stdout = self.run("ip", &["-j", "link", "show"])?;
        ip_link::parse_link_table(&stdout)
    }

    fn set_vf_mac(&self, pf_iface: &str, vf_index: u32, mac: &str) -> Result<()> {
        self.run(
            "ip",
            &["link", "set", pf_iface, "vf", &vf_index.to_string(), "mac", mac],
        )?;
        Ok(())
    }

    fn reload_module(&self, module: &str) -> Result<()> {
        let reload = self
            .run("modprobe", &["-r", module])
            .and_then(|_| self.run("modprobe", &[module]));
        reload.map_err(|e| VfnetError::DriverReloadFailed {
            module: module.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Parse the `Key:\tValue` lines of `lspci -vmmks` output.
pub fn parse_lspci_output(stdout: &str) -> PciMetadata {
    let mut meta = PciMetadata::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "Device" => meta.device_name = value,
            "Driver" => meta.driver = value,
            "Module" => meta.module = value,
            "IOMMUGroup" => meta.iommu_group = value,
            "Vendor" => meta.vendor = value,
            _ => {}
        }
    }
    meta
}
