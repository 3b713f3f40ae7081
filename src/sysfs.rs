// Sysfs access for network devices under /sys/class/net.
//
// The attribute surface is a trait so discovery and provisioning can run
// against a synthetic device tree in tests; `SysfsNet` is the live
// implementation rooted at a configurable directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Result, VfnetError};

/// One virtfn slot binding on a PF: the zero-based slot index and the PCI
/// bus address the kernel bound to it. The slot order is the authoritative
/// VF index assignment.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VfSlot {
    pub index: u32,
    pub pci_address: String,
}

/// Per-interface kernel attribute surface consumed by discovery and
/// provisioning.
pub trait NetSysfs {
    /// Enumerate every interface entry. Fails only if the device directory
    /// itself is unreadable; an empty directory is a valid (empty) result.
    fn interfaces(&self) -> Result<Vec<String>>;

    /// Path of the interface entry, for display.
    fn interface_path(&self, iface: &str) -> PathBuf;

    /// An entry with no `device` subdirectory is not physical hardware
    /// (bridge, loopback, tunnel, ...).
    fn has_device(&self, iface: &str) -> bool;

    /// A working `device/physfn` backlink marks the entry as a VF.
    fn is_vf(&self, iface: &str) -> bool;

    /// PCI bus address of the interface's device: the basename of the
    /// `device` symlink target, not the interface name.
    fn pci_address(&self, iface: &str) -> Result<String>;

    /// The owning PF's bus address, through the `physfn` backlink.
    fn parent_pci_address(&self, iface: &str) -> Result<String>;

    /// Basename of the resolved `device/subsystem` link, or "unknown"
    /// when the link is absent.
    fn subsystem(&self, iface: &str) -> String;

    fn mac_address(&self, iface: &str) -> Result<String>;

    /// Whether the device exposes the SR-IOV control attribute at all.
    fn has_sriov_attrs(&self, iface: &str) -> bool;

    fn read_numvfs(&self, iface: &str) -> Result<u32>;

    fn read_totalvfs(&self, iface: &str) -> Result<u32>;

    /// Write the target VF count. Fire-and-forget from the kernel's point
    /// of view: success here does not mean the child devices exist yet.
    fn write_numvfs(&self, iface: &str, num_vfs: u32) -> Result<()>;

    /// Enumerate `virtfn<N>` slot links, sorted numerically by N, each
    /// resolved to the bound VF's bus address.
    fn virtfn_slots(&self, iface: &str) -> Result<Vec<VfSlot>>;

    /// Count the `virtfn*` links without resolving them.
    fn count_virtfn(&self, iface: &str) -> u32;

    /// Kernel module backing a VF slot's driver, via
    /// `device/virtfn<N>/driver/module`.
    fn vf_module(&self, iface: &str, index: u32) -> Option<String>;
}

/// Live sysfs tree, rooted at `/sys/class/net` by default.
#[derive(Debug, Clone)]
pub struct SysfsNet {
    root: PathBuf,
}

impl SysfsNet {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The live kernel tree.
    pub fn system() -> Self {
        Self::new("/sys/class/net")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn device_dir(&self, iface: &str) -> PathBuf {
        self.root.join(iface).join("device")
    }

    fn read_attr(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| VfnetError::SysfsRead {
            path: path.display().to_string(),
            source: e,
        })
    }

    fn read_u32(&self, path: &Path) -> Result<u32> {
        let raw = self.read_attr(path)?;
        raw.trim()
            .parse::<u32>()
            .map_err(|e| VfnetError::ParseError {
                what: "sysfs integer attribute",
                reason: format!("{}: {}", path.display(), e),
            })
    }

    /// Basename of a symlink target (or of the canonicalized path when the
    /// entry is a plain directory).
    fn resolve_basename(&self, path: &Path) -> Result<String> {
        let target = if path.is_symlink() {
            fs::read_link(path).map_err(|e| VfnetError::SysfsRead {
                path: path.display().to_string(),
                source: e,
            })?
        } else {
            fs::canonicalize(path).map_err(|e| VfnetError::SysfsRead {
                path: path.display().to_string(),
                source: e,
            })?
        };
        target
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| VfnetError::ParseError {
                what: "symlink target",
                reason: format!("{} resolves to a bare root path", path.display()),
            })
    }
}

impl NetSysfs for SysfsNet {
    fn interfaces(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| VfnetError::SysfsRead {
            path: self.root.display().to_string(),
            source: e,
        })?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn interface_path(&self, iface: &str) -> PathBuf {
        self.root.join(iface)
    }

    fn has_device(&self, iface: &str) -> bool {
        self.device_dir(iface).is_dir()
    }

    fn is_vf(&self, iface: &str) -> bool {
        self.device_dir(iface).join("physfn").is_symlink()
    }

    fn pci_address(&self, iface: &str) -> Result<String> {
        self.resolve_basename(&self.device_dir(iface))
    }

    fn parent_pci_address(&self, iface: &str) -> Result<String> {
        self.resolve_basename(&self.device_dir(iface).join("physfn"))
    }

    fn subsystem(&self, iface: &str) -> String {
        let link = self.device_dir(iface).join("subsystem");
        if !link.is_symlink() {
            return "unknown".to_string();
        }
        self.resolve_basename(&link)
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn mac_address(&self, iface: &str) -> Result<String> {
        let path = self.root.join(iface).join("address");
        Ok(self.read_attr(&path)?.trim().to_string())
    }

    fn has_sriov_attrs(&self, iface: &str) -> bool {
        self.device_dir(iface).join("sriov_numvfs").exists()
    }

    fn read_numvfs(&self, iface: &str) -> Result<u32> {
        self.read_u32(&self.device_dir(iface).join("sriov_numvfs"))
    }

    fn read_totalvfs(&self, iface: &str) -> Result<u32> {
        self.read_u32(&self.device_dir(iface).join("sriov_totalvfs"))
    }

    fn write_numvfs(&self, iface: &str, num_vfs: u32) -> Result<()> {
        let path = self.device_dir(iface).join("sriov_numvfs");
        fs::write(&path, num_vfs.to_string()).map_err(|e| VfnetError::SysfsWrite {
            path: path.display().to_string(),
            source: e,
        })
    }

    fn virtfn_slots(&self, iface: &str) -> Result<Vec<VfSlot>> {
        let device_dir = self.device_dir(iface);
        let entries = fs::read_dir(&device_dir).map_err(|e| VfnetError::SysfsRead {
            path: device_dir.display().to_string(),
            source: e,
        })?;

        let mut slots = Vec::new();
        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(suffix) = name.strip_prefix("virtfn") else {
                continue;
            };
            let Ok(index) = suffix.parse::<u32>() else {
                continue;
            };
            let pci_address = self.resolve_basename(&device_dir.join(&name))?;
            slots.push(VfSlot { index, pci_address });
        }
        slots.sort_by_key(|slot| slot.index);
        Ok(slots)
    }

    fn count_virtfn(&self, iface: &str) -> u32 {
        let Ok(entries) = fs::read_dir(self.device_dir(iface)) else {
            return 0;
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .strip_prefix("virtfn")
                    .is_some_and(|suffix| suffix.parse::<u32>().is_ok())
            })
            .count() as u32
    }

    fn vf_module(&self, iface: &str, index: u32) -> Option<String> {
        let link = self
            .device_dir(iface)
            .join(format!("virtfn{index}/driver/module"));
        self.resolve_basename(&link).ok()
    }
}
