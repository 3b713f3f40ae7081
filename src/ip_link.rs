// Typed view of `ip -j link show` output. Only the fields the pairing and
// provisioning code consume are modeled; everything else in the JSON is
// ignored on deserialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;

/// One interface record from the netlink dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkDevice {
    pub ifname: String,
    #[serde(default)]
    pub ifindex: Option<u32>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub operstate: Option<String>,
    #[serde(default)]
    pub link_type: Option<String>,
    /// The interface's own MAC.
    #[serde(default)]
    pub address: Option<String>,
    /// Per-VF records, present only on PFs with active VFs.
    #[serde(default)]
    pub vfinfo_list: Vec<VfInfo>,
}

/// Live VF attributes as reported over netlink. `vf` is the kernel's VF
/// index on the parent PF.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VfInfo {
    pub vf: u32,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub spoofchk: Option<bool>,
    #[serde(default)]
    pub trust: Option<bool>,
    #[serde(default)]
    pub link_state: Option<String>,
    #[serde(default)]
    pub rate: Option<VfRate>,
    #[serde(default)]
    pub vlan_list: Vec<VfVlan>,
    #[serde(default)]
    pub query_rss_en: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VfRate {
    #[serde(default)]
    pub max_tx: u64,
    #[serde(default)]
    pub min_tx: u64,
}

/// `vlan_list` entries can be empty objects when no VLAN is bound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VfVlan {
    #[serde(default)]
    pub vlan: Option<u32>,
    #[serde(default)]
    pub qos: Option<u32>,
}

/// Parse the JSON array from `ip -j link show` into a map keyed by
/// interface name.
pub fn parse_link_table(json: &str) -> Result<BTreeMap<String, LinkDevice>> {
    let links: Vec<LinkDevice> = serde_json::from_str(json)?;
    Ok(links
        .into_iter()
        .map(|link| (link.ifname.clone(), link))
        .collect())
}

impl LinkDevice {
    /// Find the VF-info record for a given VF index. If the kernel ever
    /// reports duplicate indices the last record wins.
    pub fn vfinfo(&self, vf_index: u32) -> Option<&VfInfo> {
        self.vfinfo_list.iter().rev().find(|info| info.vf == vf_index)
    }
}
