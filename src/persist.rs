// The flat `interface:count` config file consumed at boot by the vfup
// agent. Lines starting with `#` and blank lines are preserved on
// update; updates are keyed by interface name.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::backend::Backend;
use crate::discovery::discover;
use crate::sysfs::NetSysfs;
use crate::{Result, VfnetError};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vfnet/vf.config";

/// Parse the config file into `{interface → configured VF count}`.
pub fn read_vf_config(path: &Path) -> Result<BTreeMap<String, u32>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| VfnetError::ConfigError(format!("{}: {}", path.display(), e)))?;

    let mut config = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((interface, count)) = line.split_once(':') else {
            return Err(VfnetError::ConfigError(format!(
                "malformed line in {}: '{line}'",
                path.display()
            )));
        };
        let count = count.trim().parse::<u32>().map_err(|e| {
            VfnetError::ConfigError(format!("bad VF count for '{interface}': {e}"))
        })?;
        config.insert(interface.trim().to_string(), count);
    }
    Ok(config)
}

/// Update (or append) the entry for one interface, leaving comments and
/// unrelated lines untouched. Creates the file if it does not exist.
pub fn persist_pf_config(path: &Path, interface: &str, num_vfs: u32) -> Result<()> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(VfnetError::ConfigError(format!("{}: {}", path.display(), e)));
        }
    };

    let mut updated_lines = Vec::new();
    let mut found = false;
    for line in contents.lines() {
        if line.starts_with(&format!("{interface}:")) {
            updated_lines.push(format!("{interface}:{num_vfs}"));
            found = true;
        } else {
            updated_lines.push(line.to_string());
        }
    }
    if !found {
        updated_lines.push(format!("{interface}:{num_vfs}"));
    }

    let mut output = updated_lines.join("\n");
    output.push('\n');
    fs::write(path, output)
        .map_err(|e| VfnetError::ConfigError(format!("{}: {}", path.display(), e)))
}

/// Persist the current VF count of every SR-IOV-capable PF.
pub fn persist_all(path: &Path, sysfs: &dyn NetSysfs, backend: &dyn Backend) -> Result<()> {
    let snapshot = discover(sysfs, backend)?;
    for pf in snapshot.pfs().values() {
        if pf.sriov_capable {
            persist_device(path, sysfs, backend, &pf.interface, None)?;
        }
    }
    Ok(())
}

/// Persist a VF count for one PF. `target` of `None` persists the
/// current live count. The count is validated against the device before
/// being written.
pub fn persist_device(
    path: &Path,
    sysfs: &dyn NetSysfs,
    backend: &dyn Backend,
    token: &str,
    target: Option<u32>,
) -> Result<()> {
    let snapshot = discover(sysfs, backend)?;
    let pf = snapshot
        .find_pf(token)
        .ok_or_else(|| VfnetError::DeviceNotFound(token.to_string()))?;

    if pf.sriov_totalvfs == 0 {
        return Err(VfnetError::NotSriovCapable(token.to_string()));
    }

    let vfs_to_set = target.unwrap_or(pf.sriov_numvfs);
    if vfs_to_set > pf.sriov_totalvfs {
        return Err(VfnetError::InvalidTargetCount {
            requested: vfs_to_set,
            total_vfs: pf.sriov_totalvfs,
        });
    }

    info!("persisting {} VFs for {}", vfs_to_set, pf.interface);
    persist_pf_config(path, &pf.interface, vfs_to_set)
}
