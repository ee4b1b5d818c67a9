use super::RangeSource;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

/// Local file exposed through the same range-fetch capability as a remote object.
pub struct LocalFileSource {
    #[cfg(unix)]
    file: std::fs::File,
    #[cfg(not(unix))]
    file: std::sync::Mutex<std::fs::File>,
    size: u64,
}

impl LocalFileSource {
    pub fn new(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("open archive '{}'", path.display()))?;
        let size = file.metadata()?.len();
        Ok(Self {
            #[cfg(unix)]
            file,
            #[cfg(not(unix))]
            file: std::sync::Mutex::new(file),
            size,
        })
    }
}

#[async_trait]
impl RangeSource for LocalFileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn fetch_range(&self, start: u64, end: u64) -> Result<Bytes> {
        if end < start || end >= self.size {
            bail!("range {}-{} outside file of {} bytes", start, end, self.size);
        }
        let mut buf = vec![0u8; (end - start + 1) as usize];

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(&mut buf, start)?;
        }

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = self
                .file
                .lock()
                .map_err(|_| anyhow::anyhow!("file handle poisoned"))?;
            file.seek(SeekFrom::Start(start))?;
            file.read_exact(&mut buf)?;
        }

        Ok(Bytes::from(buf))
    }
}
