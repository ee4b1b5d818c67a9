use std::io;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use flate2::{Crc, Decompress, FlushDecompress, Status};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::io::{ChunkedRangeReader, RangeSource};

use super::catalog::ArchiveCatalog;
use super::structures::{ArchiveEntry, CompressionMethod, LFH_SIGNATURE, LFH_SIZE};

/// Size of the buffer used to stream entry data (1 MiB).
pub const COPY_BUFFER_SIZE: usize = 1 << 20;

/// A remote archive: the chunk-cached reader plus its parsed catalog.
///
/// Read-only once opened, so one instance can be shared by any number of
/// extraction workers.
pub struct RemoteArchive {
    reader: Arc<ChunkedRangeReader>,
    catalog: ArchiveCatalog,
}

impl RemoteArchive {
    pub async fn open(source: Arc<dyn RangeSource>, chunk_size: u64) -> Result<Self> {
        Self::from_reader(Arc::new(ChunkedRangeReader::new(source, chunk_size))).await
    }

    pub async fn from_reader(reader: Arc<ChunkedRangeReader>) -> Result<Self> {
        let catalog = ArchiveCatalog::build(&reader).await?;
        Ok(Self { reader, catalog })
    }

    /// All entries in central directory order. Never touches the filesystem.
    pub fn entries(&self) -> &[ArchiveEntry] {
        self.catalog.entries()
    }

    pub fn catalog(&self) -> &ArchiveCatalog {
        &self.catalog
    }

    pub fn reader(&self) -> &Arc<ChunkedRangeReader> {
        &self.reader
    }

    /// Offset of the entry's data, found by reading its local file header
    /// (whose variable-length fields may differ from the central directory).
    pub async fn data_offset(&self, entry: &ArchiveEntry) -> Result<u64> {
        let mut lfh = [0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh).await?;
        if &lfh[0..4] != LFH_SIGNATURE {
            return Err(Error::Format(format!(
                "invalid local file header for '{}'",
                entry.name
            )));
        }

        let file_name_length = LittleEndian::read_u16(&lfh[26..28]) as u64;
        let extra_field_length = LittleEndian::read_u16(&lfh[28..30]) as u64;
        Ok(entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    /// Stream the decompressed bytes of `entry` into `out`.
    ///
    /// Compressed input and inflated output each go through a
    /// [`COPY_BUFFER_SIZE`] buffer, so no single write is larger than that.
    /// Output beyond the size declared in the central directory is never
    /// written; the CRC-32 is checked once the entry is complete.
    /// Returns the number of bytes written.
    pub async fn copy_entry<W>(&self, entry: &ArchiveEntry, out: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut inflater = match entry.compression_method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflate => Some(Inflater::new()),
            CompressionMethod::Unknown(method) => {
                return Err(Error::UnsupportedCompression {
                    entry: entry.name.clone(),
                    method,
                });
            }
        };

        let mut offset = self.data_offset(entry).await?;
        let mut remaining = entry.compressed_size;
        let mut input = vec![0u8; COPY_BUFFER_SIZE.min(remaining as usize)];
        let mut sink = EntrySink::new(entry, out);

        while remaining > 0 {
            let n = (remaining as usize).min(input.len());
            self.reader.read_exact_at(offset, &mut input[..n]).await?;
            offset += n as u64;
            remaining -= n as u64;

            match inflater.as_mut() {
                None => sink.write(&input[..n]).await?,
                Some(inflater) => {
                    inflater.feed(&input[..n], &mut sink).await?;
                    // Anything after the end of the deflate stream is ignored.
                    if inflater.done {
                        break;
                    }
                }
            }
        }

        if let Some(inflater) = inflater.as_mut()
            && !inflater.done
            && entry.compressed_size > 0
        {
            inflater.finish(&mut sink).await?;
        }

        sink.finish().await
    }

    /// Decompress `entry` fully into memory.
    pub async fn read_entry(&self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(entry.uncompressed_size.min(COPY_BUFFER_SIZE as u64) as usize);
        self.copy_entry(entry, &mut data).await?;
        Ok(data)
    }
}

/// Destination of one entry's bytes, enforcing its declared size and
/// accumulating its CRC-32.
struct EntrySink<'a, W: ?Sized> {
    entry: &'a ArchiveEntry,
    out: &'a mut W,
    crc: Crc,
    written: u64,
}

impl<'a, W> EntrySink<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    fn new(entry: &'a ArchiveEntry, out: &'a mut W) -> Self {
        Self {
            entry,
            out,
            crc: Crc::new(),
            written: 0,
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let total = self.written + data.len() as u64;
        if total > self.entry.uncompressed_size {
            return Err(corrupt(
                self.entry,
                format!(
                    "data exceeds the declared {} bytes",
                    self.entry.uncompressed_size
                ),
            ));
        }
        self.crc.update(data);
        self.out.write_all(data).await?;
        self.written = total;
        Ok(())
    }

    async fn finish(self) -> Result<u64> {
        self.out.flush().await?;

        if self.written != self.entry.uncompressed_size {
            return Err(corrupt(
                self.entry,
                format!(
                    "expected {} bytes, produced {}",
                    self.entry.uncompressed_size, self.written
                ),
            ));
        }
        if self.crc.sum() != self.entry.crc32 {
            return Err(Error::ChecksumMismatch {
                entry: self.entry.name.clone(),
                expected: self.entry.crc32,
                actual: self.crc.sum(),
            });
        }
        Ok(self.written)
    }
}

/// Raw DEFLATE decoder draining into a fixed output buffer.
struct Inflater {
    stream: Decompress,
    buf: Vec<u8>,
    done: bool,
}

impl Inflater {
    fn new() -> Self {
        Self {
            stream: Decompress::new(false),
            buf: vec![0u8; COPY_BUFFER_SIZE],
            done: false,
        }
    }

    /// Inflate all of `input`, writing each filled output buffer to `sink`.
    async fn feed<W>(&mut self, input: &[u8], sink: &mut EntrySink<'_, W>) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut consumed = 0;
        while !self.done {
            let (used, produced) =
                self.step(&input[consumed..], FlushDecompress::None, sink.entry)?;
            consumed += used;
            sink.write(&self.buf[..produced]).await?;

            if consumed == input.len() && produced < self.buf.len() {
                break;
            }
            if used == 0 && produced == 0 {
                if consumed == input.len() {
                    break;
                }
                return Err(corrupt(sink.entry, "deflate stream made no progress"));
            }
        }
        Ok(())
    }

    /// Flush what the decoder still holds after the last input block.
    async fn finish<W>(&mut self, sink: &mut EntrySink<'_, W>) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        while !self.done {
            let (_, produced) = self.step(&[], FlushDecompress::Finish, sink.entry)?;
            sink.write(&self.buf[..produced]).await?;
            if produced == 0 && !self.done {
                return Err(corrupt(sink.entry, "deflate stream is truncated"));
            }
        }
        Ok(())
    }

    fn step(
        &mut self,
        input: &[u8],
        flush: FlushDecompress,
        entry: &ArchiveEntry,
    ) -> Result<(usize, usize)> {
        let (in_before, out_before) = (self.stream.total_in(), self.stream.total_out());
        let status = self
            .stream
            .decompress(input, &mut self.buf, flush)
            .map_err(|e| corrupt(entry, e))?;
        if status == Status::StreamEnd {
            self.done = true;
        }
        Ok((
            (self.stream.total_in() - in_before) as usize,
            (self.stream.total_out() - out_before) as usize,
        ))
    }
}

fn corrupt(
    entry: &ArchiveEntry,
    cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> Error {
    Error::Decompress {
        entry: entry.name.clone(),
        source: io::Error::new(io::ErrorKind::InvalidData, cause),
    }
}
