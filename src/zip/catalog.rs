//! Central directory parsing.
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the object's end
//! 2. If ZIP64, read the ZIP64 EOCD for 64-bit sizes and offsets
//! 3. Read the Central Directory to get metadata for all entries
//!
//! Only the tail of the archive is fetched, which keeps listing cheap when
//! every byte costs a range request.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::ChunkedRangeReader;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Ordered, immutable list of the entries of one archive.
#[derive(Debug, Clone)]
pub struct ArchiveCatalog {
    entries: Arc<[ArchiveEntry]>,
}

impl ArchiveCatalog {
    /// Read the trailer and central directory through `reader`.
    ///
    /// Any structural problem is reported as [`Error::Format`].
    pub async fn build(reader: &ChunkedRangeReader) -> Result<Self> {
        let size = reader.size();
        let (eocd, eocd_offset) = find_eocd(reader, size).await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = read_zip64_eocd(reader, eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        match cd_offset.checked_add(cd_size) {
            Some(end) if end <= eocd_offset => {}
            _ => {
                return Err(Error::Format(format!(
                    "central directory ({} bytes at {}) extends past its trailer at {}",
                    cd_size, cd_offset, eocd_offset
                )));
            }
        }
        // Every record needs at least CDFH_MIN_SIZE bytes.
        if total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > cd_size {
            return Err(Error::Format(format!(
                "central directory of {} bytes cannot hold {} entries",
                cd_size, total_entries
            )));
        }

        let mut cd_data = vec![0u8; cd_size as usize];
        reader
            .read_exact_at(cd_offset, &mut cd_data)
            .await
            .map_err(eof_as_format)?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());
        for index in 0..total_entries {
            let entry = parse_cdfh(&mut cursor)
                .map_err(|e| Error::Format(format!("central directory record {index}: {e}")))?;
            entries.push(entry);
        }
        if cursor.position() != cd_size {
            return Err(Error::Format(format!(
                "central directory has {} bytes after its {} declared records",
                cd_size - cursor.position(),
                total_entries
            )));
        }

        tracing::debug!(entries = entries.len(), cd_offset, cd_size, "parsed central directory");

        Ok(Self {
            entries: entries.into(),
        })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn eof_as_format(err: Error) -> Error {
    match err {
        Error::EndOfData { offset } => {
            Error::Format(format!("archive truncated at offset {offset}"))
        }
        other => other,
    }
}

/// Find and parse the End of Central Directory record, returning it with its offset.
async fn find_eocd(
    reader: &ChunkedRangeReader,
    size: u64,
) -> Result<(EndOfCentralDirectory, u64)> {
    let eocd_size = EndOfCentralDirectory::SIZE as u64;
    if size < eocd_size {
        return Err(Error::Format("too small to be a ZIP archive".into()));
    }

    // Common case: no archive comment, the trailer is the last 22 bytes.
    let offset = size - eocd_size;
    let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
    reader.read_exact_at(offset, &mut buf).await?;
    if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
        return Ok((EndOfCentralDirectory::from_bytes(&buf)?, offset));
    }

    // Otherwise scan backwards over the largest possible comment.
    let search_size = (MAX_COMMENT_SIZE + eocd_size).min(size);
    let search_start = size - search_size;

    let mut buf = vec![0u8; search_size as usize];
    reader.read_exact_at(search_start, &mut buf).await?;

    for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
        if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
            // The comment length must account for every remaining byte.
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let eocd =
                    EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                return Ok((eocd, search_start + i as u64));
            }
        }
    }

    Err(Error::Format("end of central directory not found".into()))
}

/// Read the ZIP64 End of Central Directory record via the locator that
/// immediately precedes the regular EOCD.
async fn read_zip64_eocd(reader: &ChunkedRangeReader, eocd_offset: u64) -> Result<Zip64EOCD> {
    let locator_offset = eocd_offset
        .checked_sub(Zip64EOCDLocator::SIZE as u64)
        .ok_or_else(|| Error::Format("missing ZIP64 locator".into()))?;
    let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
    reader.read_exact_at(locator_offset, &mut locator_buf).await?;
    let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

    let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
    reader
        .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
        .await
        .map_err(eof_as_format)?;

    Zip64EOCD::from_bytes(&eocd64_buf)
}

/// Parse one Central Directory File Header.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> std::io::Result<ArchiveEntry> {
    use std::io::{Error as IoError, ErrorKind};

    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(IoError::new(ErrorKind::InvalidData, "bad header signature"));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    let name = String::from_utf8_lossy(&file_name_bytes).into_owned();
    let is_directory = name.ends_with('/');

    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra)?;
    let mut extra = Cursor::new(extra.as_slice());

    while extra.position() + 4 <= extra_field_length as u64 {
        let header_id = extra.read_u16::<LittleEndian>()?;
        let field_size = extra.read_u16::<LittleEndian>()? as u64;
        let field_end = extra.position() + field_size;

        if header_id == 0x0001 {
            // ZIP64 extended information: each value is present only when
            // the corresponding header field is saturated.
            if uncompressed_size == 0xFFFFFFFF && extra.position() + 8 <= field_end {
                uncompressed_size = extra.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && extra.position() + 8 <= field_end {
                compressed_size = extra.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == 0xFFFFFFFF && extra.position() + 8 <= field_end {
                lfh_offset = extra.read_u64::<LittleEndian>()?;
            }
        }
        extra.set_position(field_end);
    }

    let mut comment = vec![0u8; file_comment_length as usize];
    cursor.read_exact(&mut comment)?;

    Ok(ArchiveEntry {
        name,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_mod_time,
        last_mod_date,
        is_directory,
    })
}
