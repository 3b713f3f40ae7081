use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vfnet::{
    Result, SysfsNet, SystemBackend, discover,
    persist::{self, DEFAULT_CONFIG_PATH},
    provision::Provisioner,
    tables,
};

#[derive(Parser)]
#[command(name = "vfnet")]
#[command(about = "A virtual function manager for SR-IOV network devices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the persisted VF configuration
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the sysfs network-device root (development only)
    #[arg(long, default_value = "/sys/class/net", hide = true)]
    sysfs_root: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List detected network devices
    #[command(alias = "ls")]
    List,
    /// Set the number of virtual functions for a network device
    #[command(alias = "create")]
    Set {
        /// Interface name or PCI bus address of the PF
        device: String,
        /// Number of VFs to create (0 removes all VFs)
        count: u32,
    },
    /// Persist VF counts so the boot-time agent recreates them
    Persist {
        /// Interface name or PCI bus address; all capable PFs if omitted
        device: Option<String>,
        /// VF count to persist; the current live count if omitted
        count: Option<u32>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let sysfs = SysfsNet::new(&cli.sysfs_root);
    let backend = SystemBackend::new();

    match cli.command {
        Commands::List => list_devices(&sysfs, &backend, &cli.config),
        Commands::Set { device, count } => {
            let result = Provisioner::new(&sysfs, &backend).set_vf_count(&device, count)?;
            if !result.changed {
                println!(
                    "Current VF count on {} already matches {}. Doing nothing.",
                    result.interface, result.target
                );
                return Ok(());
            }
            println!("Set {} VFs on {}.", result.target, result.interface);
            if result.macs_changed > 0 {
                println!("Reset {} VF MAC addresses.", result.macs_changed);
            }
            if result.driver_reloaded {
                println!("VF driver reloaded successfully.");
            }
            if let Some(reason) = result.reload_failure {
                println!(
                    "Warning: VF driver reload failed ({reason}). \
                     VF counts are correct but some MACs may not apply until reboot."
                );
            }
            Ok(())
        }
        Commands::Persist { device, count } => {
            match device {
                Some(device) => {
                    persist::persist_device(&cli.config, &sysfs, &backend, &device, count)?;
                }
                None => persist::persist_all(&cli.config, &sysfs, &backend)?,
            }
            println!("VF configuration written to {}.", cli.config.display());
            Ok(())
        }
    }
}

fn list_devices(sysfs: &SysfsNet, backend: &SystemBackend, config: &PathBuf) -> Result<()> {
    println!("------ Detecting network devices... ------");
    let snapshot = discover(sysfs, backend)?;
    println!(" - Detection complete.");

    match snapshot.pfs().len() {
        0 => println!(" - No physical NICs detected."),
        1 => println!(" - 1 physical NIC detected."),
        n => println!(" - {n} physical NICs detected."),
    }
    match snapshot.vfs().len() {
        0 => println!(" - No VF network devices detected."),
        1 => println!(" - 1 VF network device detected."),
        n => println!(" - {n} VF network devices detected."),
    }

    let vf_config = persist::read_vf_config(config).unwrap_or_default();

    let pf_rows: Vec<Vec<String>> = snapshot
        .pfs()
        .values()
        .map(|pf| {
            let (can_vf, active) = if pf.sriov_capable {
                (
                    "Yes".to_string(),
                    format!("{}/{}", pf.sriov_numvfs, pf.sriov_totalvfs),
                )
            } else {
                ("No".to_string(), String::new())
            };
            let configured = vf_config
                .get(&pf.interface)
                .map(|count| format!("{}/{}", count, pf.sriov_totalvfs))
                .unwrap_or_else(|| "N/A".to_string());
            vec![
                pf.pci_address.clone(),
                pf.interface.clone(),
                pf.subsystem.clone(),
                pf.device_name.clone(),
                pf.driver.clone(),
                can_vf,
                active,
                configured,
                pf.iommu_group.clone(),
                pf.device_path.display().to_string(),
            ]
        })
        .collect();

    println!("\nPF Network Devices:");
    tables::print_table(
        &[
            "PCI BDF",
            "Interface",
            "Subsystem",
            "Description",
            "Driver",
            "Can VF?",
            "Active VFs",
            "Config VFs",
            "IOMMU Grp",
            "Device Path",
        ],
        &pf_rows,
    );

    let mut vf_rows: Vec<Vec<String>> = snapshot
        .vfs()
        .values()
        .map(|vf| {
            let parent_interface = snapshot
                .pfs()
                .get(&vf.parent_pci_address)
                .map(|pf| pf.interface.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            vec![
                vf.pci_address.clone(),
                vf.interface.clone().unwrap_or_else(|| "-".to_string()),
                vf.mac_address.clone().unwrap_or_else(|| "unknown".to_string()),
                parent_interface,
                vf.vf_index.to_string(),
                vf.driver.clone(),
                vf.device_name.clone(),
                vf.parent_pci_address.clone(),
            ]
        })
        .collect();
    vf_rows.sort_by(|a, b| (&a[3], &a[0]).cmp(&(&b[3], &b[0])));

    println!("\nVF Network Devices:");
    tables::print_table(
        &[
            "PCI BDF",
            "Interface",
            "MAC Address",
            "Parent",
            "VF #",
            "Driver",
            "Description",
            "Parent BDF",
        ],
        &vf_rows,
    );

    Ok(())
}
