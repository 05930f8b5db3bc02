// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use serde::Deserialize;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    generate_statics()
}

/// Lowers the app-wide image descriptor -- produced by whatever packs an
/// application together and handed to us as a RON blob in `PMOS_KCONFIG` --
/// into the `static`s `startup` and the rest of the kernel build against.
///
/// Unlike the MPU-era layout this kernel started from, task and region
/// descriptors here are already architecture-independent (`abi::RegionDesc`
/// describes a page-aligned virtual range, not an MPU slot), so this is a
/// straight transcription rather than a per-target lowering.
fn generate_statics() -> Result<(), Box<dyn std::error::Error>> {
    let image_id: u64 = env::var("PMOS_IMAGE_ID")?.parse()?;
    println!("cargo:rerun-if-env-changed=PMOS_IMAGE_ID");

    let kconfig: KernelConfig = ron::de::from_str(&env::var("PMOS_KCONFIG")?)?;
    println!("cargo:rerun-if-env-changed=PMOS_KCONFIG");

    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());
    let mut file = File::create(out.join("kconfig.rs")).unwrap();

    writeln!(file, "// See build.rs for details")?;

    writeln!(file, "#[no_mangle]")?;
    writeln!(file, "pub static PMOS_IMAGE_ID: u64 = {};", image_id)?;
    writeln!(
        file,
        "const PMOS_FAULT_NOTIFICATION: u32 = {};",
        kconfig.supervisor_notification
    )?;
    writeln!(file, "const PMOS_TASK_COUNT: usize = {};", kconfig.tasks.len())?;
    writeln!(file, "const PMOS_NUM_CPUS: usize = {};", kconfig.num_cpus)?;

    writeln!(
        file,
        "static PMOS_TASK_DESCS: [abi::TaskDesc; PMOS_TASK_COUNT] = ["
    )?;
    for task in &kconfig.tasks {
        writeln!(file, "    abi::TaskDesc {{")?;
        writeln!(file, "        regions: [")?;
        for region in &task.regions {
            writeln!(file, "            {},", region)?;
        }
        writeln!(file, "        ],")?;
        writeln!(file, "        entry_point: {:#x},", task.entry_point)?;
        writeln!(file, "        initial_stack: {:#x},", task.initial_stack)?;
        writeln!(file, "        priority: {},", task.priority)?;
        writeln!(
            file,
            "        flags: abi::TaskFlags::from_bits_retain({}),",
            task.flags.bits()
        )?;
        writeln!(file, "    }},")?;
    }
    writeln!(file, "];")?;

    writeln!(
        file,
        "static PMOS_REGION_DESCS: [abi::RegionDesc; {}] = [",
        kconfig.regions.len()
    )?;
    for region in &kconfig.regions {
        writeln!(file, "    abi::RegionDesc {{")?;
        writeln!(file, "        base: {:#x},", region.base)?;
        writeln!(file, "        size: {:#x},", region.size)?;
        writeln!(
            file,
            "        attributes: abi::RegionAttributes::from_bits_retain({}),",
            region.attributes.bits()
        )?;
        writeln!(file, "        reserved_zero: 0,")?;
        writeln!(file, "    }},")?;
    }
    writeln!(file, "];")?;

    // Boot-time interrupt ownership: `startup::irq_owner_task` linearly
    // scans this to answer `SetInterrupt`'s "is the caller this GSI's
    // default owner" check. GSI counts on pmOS's targets run in the tens,
    // so there's no need for `phash`/`phash-gen`'s build-time perfect
    // hashing here -- `irq`'s actual dispatch table is built at runtime
    // from `SetInterrupt` calls, not from this list.
    writeln!(file, "static PMOS_INTERRUPTS: &[abi::Interrupt] = &[")?;
    for irq in &kconfig.irqs {
        writeln!(
            file,
            "    abi::Interrupt {{ gsi: abi::Gsi({}), owner: abi::InterruptOwner {{ task: {}, notification: 0b{:b} }} }},",
            irq.gsi.0, irq.owner.task, irq.owner.notification,
        )?;
    }
    writeln!(file, "];")?;

    Ok(())
}

#[derive(Deserialize)]
struct KernelConfig {
    tasks: Vec<abi::TaskDesc>,
    regions: Vec<abi::RegionDesc>,
    irqs: Vec<abi::Interrupt>,
    supervisor_notification: u32,
    num_cpus: usize,
}
