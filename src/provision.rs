// VF count provisioning.
//
// Drives a PF from its current VF count to a target count: validate,
// drain to zero when the kernel requires it, write the control attribute,
// poll the three observable surfaces (count attribute, virtfn slot links,
// netlink vfinfo list) until they converge, then normalize VF MACs to
// their derived addresses and reload the VF driver module if any MAC
// changed. The kernel write is not undone on a convergence timeout; the
// discrepancy is surfaced instead.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::discovery::discover;
use crate::mac::derive_mac;
use crate::poll::wait_for;
use crate::sysfs::NetSysfs;
use crate::{Result, VfnetError};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_ATTEMPTS: u32 = 60;

/// Result of a provisioning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub interface: String,
    pub target: u32,
    /// False when the PF already had the target count and nothing was
    /// touched.
    pub changed: bool,
    pub macs_changed: u32,
    pub driver_reloaded: bool,
    /// Module reload failure, reported without undoing the count change.
    pub reload_failure: Option<String>,
}

/// VF provisioning state machine over an injectable sysfs tree and
/// backend. One call per PF at a time; the kernel exposes no lock on the
/// count attribute, so concurrent calls against the same PF are on the
/// caller.
pub struct Provisioner<'a> {
    sysfs: &'a dyn NetSysfs,
    backend: &'a dyn Backend,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl<'a> Provisioner<'a> {
    pub fn new(sysfs: &'a dyn NetSysfs, backend: &'a dyn Backend) -> Self {
        Self {
            sysfs,
            backend,
            poll_interval: POLL_INTERVAL,
            poll_attempts: POLL_ATTEMPTS,
        }
    }

    /// Override the convergence polling bounds (tests use a zero
    /// interval).
    pub fn with_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    /// Transition the PF named by `token` (interface name or bus address)
    /// to exactly `target` VFs.
    pub fn set_vf_count(&self, token: &str, target: u32) -> Result<Provisioned> {
        // Validating
        let snapshot = discover(self.sysfs, self.backend)?;
        let pf = snapshot
            .find_pf(token)
            .ok_or_else(|| VfnetError::DeviceNotFound(token.to_string()))?;

        if !pf.sriov_capable || pf.sriov_totalvfs == 0 {
            return Err(VfnetError::NotSriovCapable(token.to_string()));
        }
        if target > pf.sriov_totalvfs {
            return Err(VfnetError::InvalidTargetCount {
                requested: target,
                total_vfs: pf.sriov_totalvfs,
            });
        }
        if pf.sriov_numvfs == target {
            info!(
                "current VF count {} on {} matches target, doing nothing",
                target, pf.interface
            );
            return Ok(Provisioned {
                interface: pf.interface.clone(),
                target,
                changed: false,
                macs_changed: 0,
                driver_reloaded: false,
                reload_failure: None,
            });
        }

        let iface = pf.interface.clone();
        let pf_mac = pf.mac_address.clone();
        let device_name = pf.device_name.clone();
        let pf_module = pf.module.clone();

        // Draining: a live count cannot be changed in place; the kernel
        // requires a reduction to zero before a new non-zero count.
        if pf.sriov_numvfs > 0 && target > 0 {
            info!("existing VFs found on {iface}, removing before recreating");
            self.set_vf_count(&iface, 0)?;
        }

        // Writing
        info!("setting VF count on {iface} to {target}");
        self.sysfs.write_numvfs(&iface, target)?;

        // ConvergingCount
        let count = wait_for(
            self.poll_interval,
            self.poll_attempts,
            || self.sysfs.read_numvfs(&iface),
            |count| *count == target,
        )?;

        // ConvergingTopology
        let slots = wait_for(
            self.poll_interval,
            self.poll_attempts,
            || -> Result<u32> { Ok(self.sysfs.count_virtfn(&iface)) },
            |count| *count == target,
        )?;

        // ConvergingLinkState
        let linked = wait_for(
            self.poll_interval,
            self.poll_attempts,
            || -> Result<u32> {
                Ok(self
                    .backend
                    .link_table()?
                    .get(&iface)
                    .map(|dev| dev.vfinfo_list.len() as u32)
                    .unwrap_or(0))
            },
            |count| *count == target,
        )?;
        if !linked.converged() {
            warn!(
                "link table still reports {} VFs on {iface}, continuing to final check",
                linked.value()
            );
        }

        // Final consistency check: the count attribute and the slot links
        // must both agree with the target.
        let observed_count = count.into_value();
        if observed_count != target {
            return Err(VfnetError::ConvergenceTimeout {
                what: "sriov_numvfs",
                expected: target,
                observed: observed_count,
            });
        }
        let observed_slots = slots.into_value();
        if observed_slots != target {
            return Err(VfnetError::ConvergenceTimeout {
                what: "virtfn slot links",
                expected: target,
                observed: observed_slots,
            });
        }

        // Deletion degenerates to the write and convergence phases.
        if target == 0 {
            info!("all VFs removed from {iface}");
            return Ok(Provisioned {
                interface: iface,
                target,
                changed: true,
                macs_changed: 0,
                driver_reloaded: false,
                reload_failure: None,
            });
        }

        info!("VFs created on {iface}, normalizing MAC addresses");
        let macs_changed = self.normalize_macs(&iface, &pf_mac, &device_name)?;

        // Drivers apply a VF MAC change cleanly only across a module
        // reload.
        let mut driver_reloaded = false;
        let mut reload_failure = None;
        if macs_changed > 0 {
            let module = self
                .sysfs
                .vf_module(&iface, 0)
                .unwrap_or_else(|| pf_module.clone());
            info!("at least one MAC was reset, reloading VF driver {module}");
            match self.backend.reload_module(&module) {
                Ok(()) => driver_reloaded = true,
                Err(e) => {
                    warn!("driver reload failed, VF counts are unaffected: {e}");
                    reload_failure = Some(e.to_string());
                }
            }
        }

        Ok(Provisioned {
            interface: iface,
            target,
            changed: true,
            macs_changed,
            driver_reloaded,
            reload_failure,
        })
    }

    /// Remove every VF from the PF.
    pub fn delete_vfs(&self, token: &str) -> Result<Provisioned> {
        self.set_vf_count(token, 0)
    }

    /// Set each VF's MAC to its derived address, addressed through the
    /// parent PF since the VF interface may not exist yet. Returns how
    /// many were changed.
    fn normalize_macs(&self, iface: &str, pf_mac: &str, device_name: &str) -> Result<u32> {
        let table = self.backend.link_table()?;
        let Some(link) = table.get(iface) else {
            warn!("{iface} missing from link table, skipping MAC normalization");
            return Ok(0);
        };

        let mut changed = 0;
        for info in &link.vfinfo_list {
            let expected = derive_mac(pf_mac, info.vf, device_name);
            if info.address.as_deref() == Some(expected.as_str()) {
                debug!("MAC for VF {} already {expected}, doing nothing", info.vf);
                continue;
            }
            info!(
                "setting MAC for VF {} on {iface} from {} to {expected}",
                info.vf,
                info.address.as_deref().unwrap_or("unknown")
            );
            self.backend.set_vf_mac(iface, info.vf, &expected)?;
            changed += 1;
        }
        Ok(changed)
    }
}
