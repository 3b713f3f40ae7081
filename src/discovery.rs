// Device discovery and PF/VF pairing.
//
// Three partially-overlapping sources are fused into one snapshot: the
// sysfs network-device tree (role detection, counts, slot bindings), PCI
// enumeration metadata (names, drivers, IOMMU groups), and the netlink
// link table (live per-VF attributes). The PF's ordered virtfn slot list
// is the authoritative VF index assignment; netlink records are matched
// to slots by that index, and slots whose VF has no network interface
// (bound to another driver, or passed through to a guest) get a record
// synthesized from PCI metadata alone.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::ip_link::VfInfo;
use crate::sysfs::{NetSysfs, VfSlot};
use crate::{Result, VfnetError};

/// A host-visible physical network device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalFunction {
    /// PCI bus address; stable and unique across boots.
    pub pci_address: String,
    /// Interface name; may change across boots.
    pub interface: String,
    pub device_path: PathBuf,
    pub subsystem: String,
    pub device_name: String,
    pub driver: String,
    pub module: String,
    pub iommu_group: String,
    pub vendor: String,
    pub mac_address: String,
    pub sriov_capable: bool,
    pub sriov_numvfs: u32,
    pub sriov_totalvfs: u32,
    /// Ordered virtfn slot bindings; the position in this list is the
    /// VF index.
    pub vf_slots: Vec<VfSlot>,
}

impl PhysicalFunction {
    fn validate(&self) -> Result<()> {
        if self.sriov_numvfs > self.sriov_totalvfs {
            return Err(VfnetError::ParseError {
                what: "sriov counts",
                reason: format!(
                    "{}: sriov_numvfs {} exceeds sriov_totalvfs {}",
                    self.interface, self.sriov_numvfs, self.sriov_totalvfs
                ),
            });
        }
        Ok(())
    }
}

/// A virtual function. `interface` is `None` when the VF has no network
/// interface on the host (hidden: bound to another driver or handed to a
/// guest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualFunction {
    pub pci_address: String,
    pub interface: Option<String>,
    pub parent_pci_address: String,
    pub vf_index: u32,
    pub mac_address: Option<String>,
    pub device_name: String,
    pub driver: String,
    /// Live netlink attributes, when the parent's link table entry had a
    /// record for this index.
    pub link: Option<VfInfo>,
}

/// Immutable point-in-time view of the PF/VF graph. Built fresh on every
/// discovery run; a failed run leaves the caller's previous snapshot
/// untouched rather than producing a partial one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pfs: BTreeMap<String, PhysicalFunction>,
    vfs: BTreeMap<String, VirtualFunction>,
    complete: bool,
}

impl Snapshot {
    pub fn pfs(&self) -> &BTreeMap<String, PhysicalFunction> {
        &self.pfs
    }

    pub fn vfs(&self) -> &BTreeMap<String, VirtualFunction> {
        &self.vfs
    }

    pub fn complete(&self) -> bool {
        self.complete
    }

    /// Look up a PF by caller-supplied token: interface name first, then
    /// bus address. Each namespace is unique on its own, so first match
    /// wins.
    pub fn find_pf(&self, token: &str) -> Option<&PhysicalFunction> {
        self.pfs
            .values()
            .find(|pf| pf.interface == token)
            .or_else(|| self.pfs.get(token))
    }

    /// Same token rules as [`Snapshot::find_pf`], for VFs.
    pub fn find_vf(&self, token: &str) -> Option<&VirtualFunction> {
        self.vfs
            .values()
            .find(|vf| vf.interface.as_deref() == Some(token))
            .or_else(|| self.vfs.get(token))
    }

    /// VFs belonging to a PF, ordered by VF index.
    pub fn vfs_of(&self, pf: &PhysicalFunction) -> Vec<&VirtualFunction> {
        let mut children: Vec<&VirtualFunction> = self
            .vfs
            .values()
            .filter(|vf| vf.parent_pci_address == pf.pci_address)
            .collect();
        children.sort_by_key(|vf| vf.vf_index);
        children
    }
}

/// Raw VF data from a directly-enumerated network-device entry, before
/// the reconciliation pass assigns its slot index.
struct NetdevVf {
    pci_address: String,
    interface: String,
    parent_pci_address: String,
    mac_address: Option<String>,
}

/// Build a fresh snapshot from sysfs, PCI enumeration, and the link
/// table. Fails only when the device tree itself is unreadable or an
/// enumerated entry disappears mid-run; no devices at all is an empty
/// but valid snapshot.
pub fn discover(sysfs: &dyn NetSysfs, backend: &dyn Backend) -> Result<Snapshot> {
    let mut pfs: BTreeMap<String, PhysicalFunction> = BTreeMap::new();
    let mut netdev_vfs: BTreeMap<String, NetdevVf> = BTreeMap::new();

    for iface in sysfs.interfaces()? {
        if !sysfs.has_device(&iface) {
            // Bridges, loopbacks, tunnels: not physical hardware.
            debug!("skipping {iface}: no attached device");
            continue;
        }

        if sysfs.is_vf(&iface) {
            let pci_address = sysfs.pci_address(&iface)?;
            let mac_address = sysfs.mac_address(&iface).ok();
            netdev_vfs.insert(
                pci_address.clone(),
                NetdevVf {
                    pci_address,
                    interface: iface.clone(),
                    parent_pci_address: sysfs.parent_pci_address(&iface)?,
                    mac_address,
                },
            );
            continue;
        }

        let pci_address = sysfs.pci_address(&iface)?;
        let subsystem = sysfs.subsystem(&iface);
        if subsystem != "pci" {
            debug!("skipping {iface}: subsystem '{subsystem}' is not pci");
            continue;
        }

        // Capable only if the control attribute exists and the device
        // reports at least one slot; buggy drivers expose the attribute
        // with a zero total.
        let mut sriov_capable = sysfs.has_sriov_attrs(&iface);
        let (sriov_numvfs, sriov_totalvfs) = if sriov_capable {
            (sysfs.read_numvfs(&iface)?, sysfs.read_totalvfs(&iface)?)
        } else {
            (0, 0)
        };
        if sriov_capable && sriov_totalvfs == 0 {
            debug!("{iface}: sriov attributes present but total VFs is 0, demoting");
            sriov_capable = false;
        }

        let meta = backend.pci_metadata(&pci_address).unwrap_or_else(|e| {
            warn!("pci metadata lookup failed for {pci_address}: {e}");
            Default::default()
        });

        let pf = PhysicalFunction {
            pci_address: pci_address.clone(),
            interface: iface.clone(),
            device_path: sysfs.interface_path(&iface),
            subsystem,
            device_name: meta.device_name,
            driver: meta.driver,
            module: meta.module,
            iommu_group: meta.iommu_group,
            vendor: meta.vendor,
            mac_address: sysfs.mac_address(&iface)?,
            sriov_capable,
            sriov_numvfs,
            sriov_totalvfs,
            vf_slots: sysfs.virtfn_slots(&iface)?,
        };
        pf.validate()?;
        pfs.insert(pci_address, pf);
    }

    let link_table = backend.link_table().unwrap_or_else(|e| {
        warn!("link table fetch failed: {e}");
        BTreeMap::new()
    });

    // Reconciliation: walk every PF's slot list and pair each slot with
    // its VF record, synthesizing one when the VF has no interface.
    let mut vfs: BTreeMap<String, VirtualFunction> = BTreeMap::new();
    for pf in pfs.values() {
        let link = link_table.get(&pf.interface);
        for slot in &pf.vf_slots {
            let vfinfo = link.and_then(|dev| dev.vfinfo(slot.index)).cloned();
            let meta = backend.pci_metadata(&slot.pci_address).unwrap_or_else(|e| {
                warn!("pci metadata lookup failed for {}: {e}", slot.pci_address);
                Default::default()
            });

            let vf = match netdev_vfs.remove(&slot.pci_address) {
                Some(raw) => VirtualFunction {
                    pci_address: raw.pci_address,
                    interface: Some(raw.interface),
                    parent_pci_address: raw.parent_pci_address,
                    vf_index: slot.index,
                    mac_address: raw.mac_address,
                    device_name: meta.device_name,
                    driver: meta.driver,
                    link: vfinfo,
                },
                None => VirtualFunction {
                    pci_address: slot.pci_address.clone(),
                    interface: None,
                    parent_pci_address: pf.pci_address.clone(),
                    vf_index: slot.index,
                    mac_address: vfinfo
                        .as_ref()
                        .and_then(|info| info.address.clone()),
                    device_name: meta.device_name,
                    driver: meta.driver,
                    link: vfinfo,
                },
            };
            vfs.insert(vf.pci_address.clone(), vf);
        }
    }

    // Netdev VF entries whose parent never made it into the PF map (for
    // example a non-PCI parent). Kept, with no slot index to assign.
    for (pci_address, raw) in netdev_vfs {
        warn!(
            "VF {} ({}) has no matching slot on a known PF",
            pci_address, raw.interface
        );
        let meta = backend.pci_metadata(&pci_address).unwrap_or_default();
        vfs.insert(
            pci_address.clone(),
            VirtualFunction {
                pci_address: raw.pci_address,
                interface: Some(raw.interface),
                parent_pci_address: raw.parent_pci_address,
                vf_index: 0,
                mac_address: raw.mac_address,
                device_name: meta.device_name,
                driver: meta.driver,
                link: None,
            },
        );
    }

    debug!("discovered {} PFs, {} VFs", pfs.len(), vfs.len());
    Ok(Snapshot {
        pfs,
        vfs,
        complete: true,
    })
}
