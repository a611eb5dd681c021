//! Host side helpers for firmware build scripts: audit a region table and write the
//! layout it implies into `OUT_DIR`.

use anyhow::Context;
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};
use trustzone_pc_secure_rt::{
    hal::{RotConfig, SealedRotConfig},
    region::ProgrammingPath,
    table::PlatformConfig,
    RegionTable,
};

pub const LINKER_FRAGMENT: &str = "protection_layout.x";
pub const REPORT: &str = "protection_report.txt";

/// Runs every static check on `table`.
pub fn audit(table: &RegionTable) -> anyhow::Result<()> {
    table
        .audit()
        .context("region table does not describe a safe partition")
}

/// Audits `table` and lists every grant it hands out.
pub fn audit_report(table: &RegionTable, config: &PlatformConfig) -> anyhow::Result<String> {
    audit(table)?;

    let mut out = String::new();
    writeln!(out, "boot image @ {:#010X}", config.boot_image_base)?;
    writeln!(
        out,
        "contexts: secure {}, non-secure {}, companion {}",
        config.service_pc.value(),
        config.nonsecure_pc.value(),
        config.companion_pc.value()
    )?;

    writeln!(out, "attribution:")?;
    for window in table.attribution {
        writeln!(
            out,
            "  {}: {:#010X}..={:#010X} {:?}",
            window.name, window.start, window.limit, window.attribute
        )?;
    }

    writeln!(out, "memory:")?;
    for region in table.memory {
        let contexts: Vec<String> = region
            .contexts
            .iter()
            .map(|pc| pc.value().to_string())
            .collect();
        let controller = match region.path {
            ProgrammingPath::Direct => format!("mpc {}", region.controller.0),
            ProgrammingPath::EnclaveSealed => "enclave".to_string(),
        };
        writeln!(
            out,
            "  {}: {} {:#010X}..{:#010X} ({:#X} byte blocks) {:?} {:?} pc {}",
            region.name,
            controller,
            region.start(),
            region.end(),
            region.granularity.bytes(),
            region.security,
            region.access,
            contexts.join(" ")
        )?;

        if let Some(gate) = region.gate {
            writeln!(out, "    gated by block {}", gate.0)?;
        }
        if region.path == ProgrammingPath::EnclaveSealed {
            for pc in region.contexts {
                let sealed = SealedRotConfig::seal(RotConfig::for_context(region, *pc));
                writeln!(out, "    pc {} crc {:#010X}", pc.value(), sealed.crc)?;
            }
        }
    }

    writeln!(out, "peripherals:")?;
    for run in table.peripherals {
        writeln!(
            out,
            "  ppc {} {}..={}: {:?} secure {:?} non-secure {:?}",
            run.ppc.0,
            run.start.0,
            run.end.0,
            run.attributes.security,
            run.attributes.secure_privilege,
            run.attributes.nonsecure_privilege
        )?;
    }

    writeln!(out, "masks:")?;
    for mask in table.masks {
        writeln!(
            out,
            "  ppc {} {}..={}: {:#04X}",
            mask.ppc.0,
            mask.start.0,
            mask.end.0,
            mask.mask.bits()
        )?;
    }

    writeln!(out, "masters:")?;
    for binding in table.masters {
        writeln!(
            out,
            "  {} ({}): pc {}",
            binding.name,
            binding.master.0,
            binding.context.value()
        )?;
    }

    Ok(out)
}

/// Linker symbols for the boot image and the bounds of every region, so the firmware's
/// memory map can be checked against the table at link time.
pub fn linker_fragment(table: &RegionTable, config: &PlatformConfig) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "/* Generated from the protection region table */")?;
    writeln!(out, "_ns_boot_image = {:#010X};", config.boot_image_base)?;

    for region in table.memory {
        let symbol = region.name.replace('-', "_");
        writeln!(out, "_{}_start = {:#010X};", symbol, region.start())?;
        writeln!(out, "_{}_end = {:#010X};", symbol, region.end())?;
    }

    Ok(out)
}

/// Writes the linker fragment and the grant report of `table` into `out_dir`.
pub fn generate_layout_for<P: AsRef<Path>>(
    out_dir: P,
    table: &RegionTable,
    config: &PlatformConfig,
) -> anyhow::Result<()> {
    let report = audit_report(table, config)?;
    let fragment = linker_fragment(table, config)?;

    let out_dir = out_dir.as_ref();
    write(out_dir.join(LINKER_FRAGMENT), &fragment)?;
    write(out_dir.join(REPORT), &report)?;

    Ok(())
}

/// Build script entry point for the board selected on the secure runtime.
pub fn generate_layout<P: AsRef<Path>>(out_dir: P) -> anyhow::Result<()> {
    use trustzone_pc_secure_rt::table::psoc_edge;

    generate_layout_for(out_dir, &psoc_edge::TABLE, &psoc_edge::CONFIG)
}

/// [`generate_layout`] into the `OUT_DIR` cargo gives the build script.
pub fn generate_layout_in_out_dir() -> anyhow::Result<()> {
    let out_dir = std::env::var("OUT_DIR").context("OUT_DIR is not set outside build scripts")?;
    generate_layout(PathBuf::from(out_dir))
}

fn write(path: PathBuf, contents: &str) -> anyhow::Result<()> {
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trustzone_pc_secure_rt::{
        hal::{EndpointAddr, IpcChannel},
        region::{
            Access, Granularity, MaskRun, MasterBinding, MasterId, MemoryRegion, MpcId, PcMask,
            PeriRegionId, PeripheralAttributes, PeripheralRun, PpcId, Privilege, SauAttribute,
            SauWindow, Security,
        },
        ConfigError, ProtectionContext,
    };

    const PC2: ProtectionContext = ProtectionContext::new(2);
    const PC5: ProtectionContext = ProtectionContext::new(5);

    const SRAM: MemoryRegion = MemoryRegion {
        name: "sram-ns",
        controller: MpcId(0),
        base: 0x2400_0000,
        offset: 0x1_0000,
        size: 0x1_0000,
        granularity: Granularity::K4,
        security: Security::NonSecure,
        access: Access::ReadWrite,
        contexts: &[PC2, PC5],
        path: ProgrammingPath::Direct,
        gate: None,
    };

    static MEMORY: [MemoryRegion; 2] = [
        SRAM,
        MemoryRegion {
            name: "nvm",
            controller: MpcId(2),
            base: 0x2200_0000,
            offset: 0x4_0000,
            size: 0x4_0000,
            granularity: Granularity::K4,
            security: Security::NonSecure,
            access: Access::ReadWrite,
            contexts: &[PC5],
            path: ProgrammingPath::EnclaveSealed,
            gate: None,
        },
    ];
    static RUNS: [PeripheralRun; 1] = [PeripheralRun {
        ppc: PpcId(0),
        start: PeriRegionId(0),
        end: PeriRegionId(3),
        attributes: PeripheralAttributes {
            security: Security::NonSecure,
            secure_privilege: Privilege::Any,
            nonsecure_privilege: Privilege::Any,
        },
    }];
    static MASKS: [MaskRun; 1] = [MaskRun {
        ppc: PpcId(0),
        start: PeriRegionId(0),
        end: PeriRegionId(3),
        mask: PcMask::from_bits(0x24),
    }];
    static MASTERS: [MasterBinding; 1] = [MasterBinding {
        name: "dma",
        master: MasterId(3),
        context: PC5,
    }];
    static WINDOWS: [SauWindow; 1] = [SauWindow {
        name: "ns-sram",
        start: 0x2401_0000,
        limit: 0x2401_FFFF,
        attribute: SauAttribute::NonSecure,
    }];
    static TABLE: RegionTable = RegionTable {
        memory: &MEMORY,
        peripherals: &RUNS,
        masks: &MASKS,
        masters: &MASTERS,
        attribution: &WINDOWS,
    };
    const CONFIG: PlatformConfig = PlatformConfig {
        boot_image_base: 0x2204_0000,
        cpu_master: MasterId(0),
        service_pc: PC2,
        nonsecure_pc: PC5,
        companion_pc: ProtectionContext::new(6),
        semaphore_channel: IpcChannel(4),
        semaphore_count: 128,
        elevation_endpoint: EndpointAddr(1),
        elevation_delay_ms: 10,
        core_clock_hz: 200_000_000,
    };

    #[test]
    fn report_lists_every_grant() {
        let crc = SealedRotConfig::seal(RotConfig::for_context(&MEMORY[1], PC5)).crc;

        let expected = format!(
            "boot image @ 0x22040000
contexts: secure 2, non-secure 5, companion 6
attribution:
  ns-sram: 0x24010000..=0x2401FFFF NonSecure
memory:
  sram-ns: mpc 0 0x24010000..0x24020000 (0x1000 byte blocks) NonSecure ReadWrite pc 2 5
  nvm: enclave 0x22040000..0x22080000 (0x1000 byte blocks) NonSecure ReadWrite pc 5
    pc 5 crc {crc:#010X}
peripherals:
  ppc 0 0..=3: NonSecure secure Any non-secure Any
masks:
  ppc 0 0..=3: 0x24
masters:
  dma (3): pc 5
"
        );

        assert_eq!(audit_report(&TABLE, &CONFIG).unwrap(), expected);
    }

    #[test]
    fn linker_fragment_bounds_each_region() {
        assert_eq!(
            linker_fragment(&TABLE, &CONFIG).unwrap(),
            "/* Generated from the protection region table */
_ns_boot_image = 0x22040000;
_sram_ns_start = 0x24010000;
_sram_ns_end = 0x24020000;
_nvm_start = 0x22040000;
_nvm_end = 0x22080000;
"
        );
    }

    #[test]
    fn unsafe_table_is_refused() {
        static BAD: [MemoryRegion; 1] = [MemoryRegion {
            offset: 0x800,
            ..SRAM
        }];
        let table = RegionTable {
            memory: &BAD,
            ..TABLE
        };

        let error = audit_report(&table, &CONFIG).unwrap_err();
        assert_eq!(
            error.downcast_ref::<ConfigError>(),
            Some(&ConfigError::Misaligned {
                region: "sram-ns",
                granularity: 0x1000
            })
        );
    }

    #[test]
    fn board_layout_is_written_to_out_dir() {
        let dir = std::env::temp_dir().join(format!("trustzone-pc-tools-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        generate_layout(&dir).unwrap();

        let fragment = fs::read_to_string(dir.join(LINKER_FRAGMENT)).unwrap();
        let report = fs::read_to_string(dir.join(REPORT)).unwrap();
        assert!(fragment.contains("_ns_boot_image = 0x22040000;"));
        assert!(fragment.contains("_sram1_shm_start = 0x240FC000;"));
        assert!(report.contains("rram-nvm: enclave"));
        assert!(report.contains("ppc 0 0..=165: 0x64"));
        assert!(report.contains("smif1-xip: 0x64000000..=0x64FFFFFF NonSecure"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
