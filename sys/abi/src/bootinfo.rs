// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bootloader hand-off: a chain of tagged structs the bootstrap CPU
//! finds in a memory-mapped region on entry, terminated by
//! `LoadTag::CLOSE`. Each tag's `offset_to_next` lets the kernel skip tags
//! it doesn't understand (forward-compatibility with newer bootloaders).

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Generic tag header. Every tag in the chain starts with one of these;
/// `offset_to_next` is relative to the start of *this* tag.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct LoadTagGeneric {
    pub tag: u32,
    pub flags: u32,
    pub offset_to_next: u32,
}

impl LoadTagGeneric {
    pub const CLOSE: u32 = 0;
    pub const STACK_DESCRIPTOR: u32 = 1;
    pub const ARGUMENTS: u32 = 2;
    pub const ENVIRONMENT: u32 = 3;
    pub const MODULES: u32 = 4;
    pub const FRAMEBUFFER: u32 = 5;
    pub const RSDP: u32 = 6;
    pub const FDT: u32 = 7;
    pub const MEMORY_MAP: u32 = 8;
}

/// Range of physical frames the bootstrap task is free to hand to the
/// kernel's frame allocator. Excludes the kernel image, the tag chain
/// itself, and anything named by a `MODULES` tag.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct MemoryMapDescriptor {
    pub header: LoadTagGeneric,
    pub phys_base: u64,
    pub frame_count: u64,
}

/// Describes the stack the bootstrap task should start on.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct StackDescriptor {
    pub header: LoadTagGeneric,
    pub base: u64,
    pub size: u64,
}

/// One loaded module: a memory-object id plus offsets into the tag's own
/// trailing bytes for its path and command line.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct ModuleDescriptor {
    pub mem_object_id: u64,
    pub size: u64,
    pub path_offset: u32,
    pub cmdline_offset: u32,
}

/// Framebuffer parameters handed off from the bootloader's own mode-set.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct FramebufferDescriptor {
    pub header: LoadTagGeneric,
    pub phys_base: u64,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bpp: u32,
}

/// ACPI RSDP location, handed off so the kernel need not search BIOS memory
/// itself.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct RsdpDescriptor {
    pub header: LoadTagGeneric,
    pub rsdp_phys: u64,
    pub rsdp20_phys: u64,
}

/// Flattened device tree memory object, on arches that boot from one.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct FdtDescriptor {
    pub header: LoadTagGeneric,
    pub mem_object_id: u64,
}
