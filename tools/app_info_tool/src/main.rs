use byteorder::{LittleEndian, WriteBytesExt};
use clap::Parser;
use crc::crc32::{self, Hasher32};
use std::{fs, io, path::PathBuf};

const PROGRAM_UNIT: usize = 8;
const VECTOR_TABLE_SIZE: usize = 47 * 4;
const ERASED: u8 = 0xFF;

#[derive(Parser)]
#[clap(about = "Tool to prepare application images and their info descriptor for installation", version)]
struct Opts {
    #[clap(help = "Raw application binary")]
    filename: PathBuf,
    #[clap(long, help = "Application id, shared by all versions of the same application")]
    id: u32,
    #[clap(long = "image-version", help = "Version number of this build")]
    image_version: u32,
    #[clap(long, help = "Where to write the padded image (defaults to <filename>.padded)")]
    image_out: Option<PathBuf>,
    #[clap(long, help = "Where to write the info descriptor (defaults to <filename>.info)")]
    info_out: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
struct AppInfo {
    id: u32,
    version: u32,
    size: u32,
    vector_table_checksum: u32,
    app_checksum: u32,
}

impl AppInfo {
    fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(20);
        for field in
            [self.id, self.version, self.size, self.vector_table_checksum, self.app_checksum]
        {
            bytes.write_u32::<LittleEndian>(field)?;
        }
        Ok(bytes)
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut digest = crc32::Digest::new(crc32::IEEE);
    digest.write(bytes);
    digest.sum32()
}

/// Pads the image with erased bytes up to a whole number of program units.
fn pad(mut image: Vec<u8>) -> Vec<u8> {
    let remainder = image.len() % PROGRAM_UNIT;
    if remainder != 0 {
        image.resize(image.len() + PROGRAM_UNIT - remainder, ERASED);
    }
    image
}

fn describe(image: &[u8], id: u32, version: u32) -> io::Result<AppInfo> {
    if image.len() < VECTOR_TABLE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Image is smaller than its vector table ({} bytes)", VECTOR_TABLE_SIZE),
        ));
    }
    let size = u32::try_from(image.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Image too large"))?;
    Ok(AppInfo {
        id,
        version,
        size,
        vector_table_checksum: checksum(&image[..VECTOR_TABLE_SIZE]),
        app_checksum: checksum(image),
    })
}

fn with_suffix(path: &PathBuf, suffix: &str) -> PathBuf {
    let mut name = path.clone().into_os_string();
    name.push(suffix);
    name.into()
}

fn main() -> io::Result<()> {
    let opts = Opts::parse();

    println!("Reading {}", opts.filename.display());
    let image = pad(fs::read(&opts.filename)?);
    let info = describe(&image, opts.id, opts.image_version)?;
    println!("* Size: {} bytes", info.size);
    println!("* Vector table CRC: 0x{:08x}", info.vector_table_checksum);
    println!("* Application CRC: 0x{:08x}", info.app_checksum);

    let image_out = opts.image_out.unwrap_or_else(|| with_suffix(&opts.filename, ".padded"));
    let info_out = opts.info_out.unwrap_or_else(|| with_suffix(&opts.filename, ".info"));
    fs::write(&image_out, &image)?;
    println!("Padded image written to {}", image_out.display());
    fs::write(&info_out, info.to_bytes()?)?;
    println!("Info descriptor written to {}", info_out.display());

    println!("Done!");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn images_are_padded_with_erased_bytes() {
        let padded = pad(vec![1, 2, 3]);
        assert_eq!(padded, vec![1, 2, 3, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(pad(vec![0; 16]).len(), 16);
    }

    #[test]
    fn descriptor_is_twenty_little_endian_bytes() {
        // Given
        let image = pad(vec![0xAB; 301]);

        // When
        let info = describe(&image, 7, 2).unwrap();
        let bytes = info.to_bytes().unwrap();

        // Then
        assert_eq!(info.size, 304);
        assert_eq!(info.vector_table_checksum, checksum(&image[..VECTOR_TABLE_SIZE]));
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[..4], &[7, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &304u32.to_le_bytes());
    }

    #[test]
    fn checksum_is_the_iso_hdlc_crc() {
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn images_shorter_than_a_vector_table_are_rejected() {
        assert!(describe(&[0u8; 16], 1, 1).is_err());
    }
}
