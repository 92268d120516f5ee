use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::{
    env,
    fs::{self, File},
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
};

const DEFAULT_LAYOUT_FILENAME: &str = "memory/stm32g071rb.ron";

#[derive(Debug, Clone, Copy, Deserialize)]
struct RegionFile {
    start: u32,
    length: u32,
}

impl RegionFile {
    fn end(&self) -> u32 { self.start + self.length }
    fn overlaps(&self, other: &RegionFile) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

#[derive(Debug, Deserialize)]
struct MemoryLayoutFile {
    flash_base: u32,
    page_size: u32,
    bootloader: RegionFile,
    metadata: RegionFile,
    slots: [RegionFile; 2],
    ram: RegionFile,
    dispatch_offset: u32,
}

fn main() -> Result<()> {
    println!("cargo:rerun-if-env-changed=TWINBOOT_LAYOUT");
    let filename = env::var("TWINBOOT_LAYOUT").unwrap_or_else(|_| DEFAULT_LAYOUT_FILENAME.into());
    println!("cargo:rerun-if-changed={}", filename);

    let layout = read_layout(&filename)?;
    validate(&layout)?;

    let out = PathBuf::from(env::var("OUT_DIR")?);
    generate_linker_script(&out, &layout)?;
    generate_layout_module(&out, &layout)?;
    println!("cargo:rustc-link-search={}", out.display());
    Ok(())
}

fn read_layout(filename: &str) -> Result<MemoryLayoutFile> {
    let file = File::open(filename).with_context(|| format!("Failed to open {}", filename))?;
    let mut buf_reader = BufReader::new(file);
    let mut contents = String::new();
    buf_reader.read_to_string(&mut contents)?;
    Ok(ron::from_str(&contents)?)
}

fn validate(layout: &MemoryLayoutFile) -> Result<()> {
    let page = layout.page_size;
    ensure!(page.is_power_of_two() && page % 8 == 0, "Page size must be a power of two");

    let mut flash_regions = vec![("bootloader", layout.bootloader), ("metadata", layout.metadata)];
    flash_regions.push(("slot 1", layout.slots[0]));
    flash_regions.push(("slot 2", layout.slots[1]));

    for (name, region) in &flash_regions {
        ensure!(region.start >= layout.flash_base, "The {} region starts before flash", name);
        ensure!(
            (region.start - layout.flash_base) % page == 0,
            "The {} region is not page aligned",
            name
        );
        ensure!(region.length > 0, "The {} region is empty", name);
        ensure!(region.length % page == 0, "The {} region is not a whole number of pages", name);
    }

    for (i, (name, region)) in flash_regions.iter().enumerate() {
        for (other_name, other) in flash_regions.iter().skip(i + 1) {
            ensure!(!region.overlaps(other), "The {} and {} regions overlap", name, other_name);
        }
    }

    ensure!(layout.metadata.length == page, "Metadata must occupy exactly one page");
    ensure!(
        layout.dispatch_offset % 8 == 0 && layout.dispatch_offset < layout.bootloader.length,
        "Dispatch table offset must be aligned and inside the bootloader region"
    );
    Ok(())
}

/// Generates the linker script `memory.x`, reserving the tail of the
/// bootloader region for the dispatch table.
fn generate_linker_script(out: &Path, layout: &MemoryLayoutFile) -> Result<()> {
    let mut file = File::create(out.join("memory.x"))?;
    let code_length = layout.bootloader.length - layout.dispatch_offset;
    write!(
        file,
        "MEMORY\n\
         {{\n\
             FLASH : ORIGIN = 0x{:08X}, LENGTH = {}\n\
             DISPATCH : ORIGIN = 0x{:08X}, LENGTH = {}\n\
             RAM : ORIGIN = 0x{:08X}, LENGTH = {}K\n\
         }}\n\
         \n\
         SECTIONS\n\
         {{\n\
             .dispatch_table ORIGIN(DISPATCH) :\n\
             {{\n\
                 KEEP(*(.dispatch_table));\n\
             }} > DISPATCH\n\
         }} INSERT AFTER .rodata;\n",
        layout.bootloader.start,
        code_length,
        layout.bootloader.start + code_length,
        layout.dispatch_offset,
        layout.ram.start,
        layout.ram.length / 1024,
    )?;
    Ok(())
}

/// Generates the `MemoryLayout` constant consumed by `ports::layout`.
fn generate_layout_module(out: &Path, layout: &MemoryLayoutFile) -> Result<()> {
    let region = |r: &RegionFile| format!("Region::new(Address(0x{:08X}), 0x{:X})", r.start, r.length);
    let contents = format!(
        "pub const LAYOUT: MemoryLayout = MemoryLayout {{\n    \
             flash_base: Address(0x{:08X}),\n    \
             page_size: {},\n    \
             bootloader: {},\n    \
             metadata: {},\n    \
             slots: [{}, {}],\n    \
             dispatch_offset: 0x{:X},\n\
         }};\n",
        layout.flash_base,
        layout.page_size,
        region(&layout.bootloader),
        region(&layout.metadata),
        region(&layout.slots[0]),
        region(&layout.slots[1]),
        layout.dispatch_offset,
    );
    fs::write(out.join("memory_layout.rs"), contents)?;
    Ok(())
}
