#![allow(dead_code)]

// Shared fixtures: an in-memory kernel standing in for the sysfs tree
// and the external tools, instrumented to record every write, MAC set,
// and module reload.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

use vfnet::backend::{Backend, PciMetadata};
use vfnet::ip_link::{LinkDevice, VfInfo};
use vfnet::mac::derive_mac;
use vfnet::sysfs::{NetSysfs, VfSlot};
use vfnet::{Result, VfnetError};

#[derive(Debug, Clone)]
pub struct FakePf {
    pub interface: String,
    pub pci_address: String,
    pub mac: String,
    pub device_name: String,
    pub driver: String,
    pub module: String,
    pub vf_module: String,
    pub has_sriov_attrs: bool,
    pub totalvfs: u32,
    pub numvfs: u32,
    /// VF bus address per slot, in index order.
    pub slots: Vec<String>,
    /// Live MAC per VF index, as the link table reports it.
    pub vf_macs: Vec<String>,
}

impl FakePf {
    pub fn new(interface: &str, pci_address: &str, totalvfs: u32) -> Self {
        Self {
            interface: interface.to_string(),
            pci_address: pci_address.to_string(),
            mac: "d0:23:23:23:45:a8".to_string(),
            device_name: "I350 Gigabit Network Connection".to_string(),
            driver: "igb".to_string(),
            module: "igb".to_string(),
            vf_module: "igbvf".to_string(),
            has_sriov_attrs: totalvfs > 0,
            totalvfs,
            numvfs: 0,
            slots: Vec::new(),
            vf_macs: Vec::new(),
        }
    }

    /// Populate slots and driver-default MACs for an existing VF count.
    pub fn with_vfs(mut self, count: u32) -> Self {
        self.numvfs = count;
        self.slots = (0..count)
            .map(|index| format!("{}:vf{}", self.pci_address, index))
            .collect();
        self.vf_macs = (0..count)
            .map(|index| format!("02:00:00:00:aa:{index:02x}"))
            .collect();
        self
    }
}

/// A VF that is visible as its own network interface.
#[derive(Debug, Clone)]
pub struct FakeNetdevVf {
    pub interface: String,
    pub pci_address: String,
    pub parent_pci_address: String,
    pub mac: String,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub pfs: Vec<FakePf>,
    /// Interfaces with no attached device (bridges, loopback).
    pub plain_interfaces: Vec<String>,
    pub netdev_vfs: Vec<FakeNetdevVf>,

    /// When false, writes are recorded but the fake kernel never
    /// instantiates (or removes) the child devices.
    pub reactive: bool,
    /// When true, freshly created VFs come up with their derived MAC
    /// already assigned.
    pub default_macs_derived: bool,
    pub fail_reload: bool,

    pub numvfs_writes: Vec<(String, u32)>,
    pub mac_sets: Vec<(String, u32, String)>,
    pub module_reloads: Vec<String>,
    pub link_table_fetches: u32,
}

impl FakeState {
    fn pf(&self, iface: &str) -> Option<&FakePf> {
        self.pfs.iter().find(|pf| pf.interface == iface)
    }

    fn pf_mut(&mut self, iface: &str) -> Option<&mut FakePf> {
        self.pfs.iter_mut().find(|pf| pf.interface == iface)
    }
}

pub type SharedState = Rc<RefCell<FakeState>>;

pub fn fake_world(state: FakeState) -> (FakeSysfs, FakeBackend, SharedState) {
    let shared = Rc::new(RefCell::new(state));
    (
        FakeSysfs {
            state: shared.clone(),
        },
        FakeBackend {
            state: shared.clone(),
        },
        shared,
    )
}

pub struct FakeSysfs {
    state: SharedState,
}

impl NetSysfs for FakeSysfs {
    fn interfaces(&self) -> Result<Vec<String>> {
        let state = self.state.borrow();
        let mut names: Vec<String> = state
            .plain_interfaces
            .iter()
            .cloned()
            .chain(state.pfs.iter().map(|pf| pf.interface.clone()))
            .chain(state.netdev_vfs.iter().map(|vf| vf.interface.clone()))
            .collect();
        names.sort();
        Ok(names)
    }

    fn interface_path(&self, iface: &str) -> PathBuf {
        PathBuf::from(format!("/sys/class/net/{iface}"))
    }

    fn has_device(&self, iface: &str) -> bool {
        let state = self.state.borrow();
        state.pf(iface).is_some() || state.netdev_vfs.iter().any(|vf| vf.interface == iface)
    }

    fn is_vf(&self, iface: &str) -> bool {
        self.state
            .borrow()
            .netdev_vfs
            .iter()
            .any(|vf| vf.interface == iface)
    }

    fn pci_address(&self, iface: &str) -> Result<String> {
        let state = self.state.borrow();
        state
            .pf(iface)
            .map(|pf| pf.pci_address.clone())
            .or_else(|| {
                state
                    .netdev_vfs
                    .iter()
                    .find(|vf| vf.interface == iface)
                    .map(|vf| vf.pci_address.clone())
            })
            .ok_or_else(|| VfnetError::DeviceNotFound(iface.to_string()))
    }

    fn parent_pci_address(&self, iface: &str) -> Result<String> {
        self.state
            .borrow()
            .netdev_vfs
            .iter()
            .find(|vf| vf.interface == iface)
            .map(|vf| vf.parent_pci_address.clone())
            .ok_or_else(|| VfnetError::DeviceNotFound(iface.to_string()))
    }

    fn subsystem(&self, _iface: &str) -> String {
        "pci".to_string()
    }

    fn mac_address(&self, iface: &str) -> Result<String> {
        let state = self.state.borrow();
        state
            .pf(iface)
            .map(|pf| pf.mac.clone())
            .or_else(|| {
                state
                    .netdev_vfs
                    .iter()
                    .find(|vf| vf.interface == iface)
                    .map(|vf| vf.mac.clone())
            })
            .ok_or_else(|| VfnetError::DeviceNotFound(iface.to_string()))
    }

    fn has_sriov_attrs(&self, iface: &str) -> bool {
        self.state
            .borrow()
            .pf(iface)
            .is_some_and(|pf| pf.has_sriov_attrs)
    }

    fn read_numvfs(&self, iface: &str) -> Result<u32> {
        self.state
            .borrow()
            .pf(iface)
            .map(|pf| pf.numvfs)
            .ok_or_else(|| VfnetError::DeviceNotFound(iface.to_string()))
    }

    fn read_totalvfs(&self, iface: &str) -> Result<u32> {
        self.state
            .borrow()
            .pf(iface)
            .map(|pf| pf.totalvfs)
            .ok_or_else(|| VfnetError::DeviceNotFound(iface.to_string()))
    }

    fn write_numvfs(&self, iface: &str, num_vfs: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.numvfs_writes.push((iface.to_string(), num_vfs));

        let reactive = state.reactive;
        let derived = state.default_macs_derived;
        let Some(pf) = state.pf_mut(iface) else {
            return Err(VfnetError::DeviceNotFound(iface.to_string()));
        };
        if reactive {
            pf.numvfs = num_vfs;
            pf.slots = (0..num_vfs)
                .map(|index| format!("{}:vf{}", pf.pci_address, index))
                .collect();
            pf.vf_macs = (0..num_vfs)
                .map(|index| {
                    if derived {
                        derive_mac(&pf.mac, index, &pf.device_name)
                    } else {
                        format!("02:00:00:00:aa:{index:02x}")
                    }
                })
                .collect();
        }
        Ok(())
    }

    fn virtfn_slots(&self, iface: &str) -> Result<Vec<VfSlot>> {
        let state = self.state.borrow();
        let pf = state
            .pf(iface)
            .ok_or_else(|| VfnetError::DeviceNotFound(iface.to_string()))?;
        Ok(pf
            .slots
            .iter()
            .enumerate()
            .map(|(index, pci_address)| VfSlot {
                index: index as u32,
                pci_address: pci_address.clone(),
            })
            .collect())
    }

    fn count_virtfn(&self, iface: &str) -> u32 {
        self.state
            .borrow()
            .pf(iface)
            .map(|pf| pf.slots.len() as u32)
            .unwrap_or(0)
    }

    fn vf_module(&self, iface: &str, index: u32) -> Option<String> {
        let state = self.state.borrow();
        let pf = state.pf(iface)?;
        if (index as usize) < pf.slots.len() {
            Some(pf.vf_module.clone())
        } else {
            None
        }
    }
}

pub struct FakeBackend {
    state: SharedState,
}

impl Backend for FakeBackend {
    fn pci_metadata(&self, bus_address: &str) -> Result<PciMetadata> {
        let state = self.state.borrow();
        if let Some(pf) = state.pfs.iter().find(|pf| pf.pci_address == bus_address) {
            return Ok(PciMetadata {
                device_name: pf.device_name.clone(),
                driver: pf.driver.clone(),
                module: pf.module.clone(),
                iommu_group: "20".to_string(),
                vendor: "Intel Corporation".to_string(),
            });
        }
        for pf in &state.pfs {
            if pf.slots.iter().any(|slot| slot == bus_address) {
                return Ok(PciMetadata {
                    device_name: format!("{} Virtual Function", pf.device_name),
                    driver: pf.vf_module.clone(),
                    module: pf.vf_module.clone(),
                    iommu_group: "21".to_string(),
                    vendor: "Intel Corporation".to_string(),
                });
            }
        }
        Ok(PciMetadata::default())
    }

    fn link_table(&self) -> Result<BTreeMap<String, LinkDevice>> {
        let mut state = self.state.borrow_mut();
        state.link_table_fetches += 1;

        let mut table = BTreeMap::new();
        for iface in &state.plain_interfaces {
            table.insert(
                iface.clone(),
                LinkDevice {
                    ifname: iface.clone(),
                    ..Default::default()
                },
            );
        }
        for pf in &state.pfs {
            table.insert(
                pf.interface.clone(),
                LinkDevice {
                    ifname: pf.interface.clone(),
                    address: Some(pf.mac.clone()),
                    vfinfo_list: pf
                        .vf_macs
                        .iter()
                        .enumerate()
                        .map(|(index, mac)| VfInfo {
                            vf: index as u32,
                            address: Some(mac.clone()),
                            spoofchk: Some(true),
                            trust: Some(false),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                },
            );
        }
        Ok(table)
    }

    fn set_vf_mac(&self, pf_iface: &str, vf_index: u32, mac: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state
            .mac_sets
            .push((pf_iface.to_string(), vf_index, mac.to_string()));
        if let Some(pf) = state.pf_mut(pf_iface) {
            if let Some(slot_mac) = pf.vf_macs.get_mut(vf_index as usize) {
                *slot_mac = mac.to_string();
            }
        }
        Ok(())
    }

    fn reload_module(&self, module: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_reload {
            return Err(VfnetError::DriverReloadFailed {
                module: module.to_string(),
                reason: "modprobe: FATAL: module in use".to_string(),
            });
        }
        state.module_reloads.push(module.to_string());
        Ok(())
    }
}
