#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use zip::write::SimpleFileOptions;

use rangezip::{RangeSource, RemoteArchive};

/// In-memory object counting its range fetches.
pub struct MemorySource {
    data: Bytes,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Bytes::from(data),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RangeSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn fetch_range(&self, start: u64, end: u64) -> anyhow::Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.slice(start as usize..=end as usize))
    }
}

/// In-memory object whose first fetch covering `gate` blocks until released.
pub struct GatedSource {
    data: Bytes,
    gate: u64,
    armed: AtomicBool,
    pub reached: Notify,
    pub release: Notify,
}

impl GatedSource {
    pub fn new(data: Vec<u8>, gate: u64) -> Arc<Self> {
        Arc::new(Self {
            data: Bytes::from(data),
            gate,
            armed: AtomicBool::new(true),
            reached: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl RangeSource for GatedSource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn fetch_range(&self, start: u64, end: u64) -> anyhow::Result<Bytes> {
        if (start..=end).contains(&self.gate) && self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.release.notified().await;
        }
        Ok(self.data.slice(start as usize..=end as usize))
    }
}

pub enum Item<'a> {
    Stored(&'a str, &'a [u8]),
    Deflated(&'a str, &'a [u8]),
    Dir(&'a str),
}

pub fn build_zip(items: &[Item<'_>]) -> Vec<u8> {
    build_zip_with_comment(items, "")
}

pub fn build_zip_with_comment(items: &[Item<'_>], comment: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let deflated =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for item in items {
        match item {
            Item::Stored(name, data) => {
                writer.start_file(*name, stored).unwrap();
                writer.write_all(data).unwrap();
            }
            Item::Deflated(name, data) => {
                writer.start_file(*name, deflated).unwrap();
                writer.write_all(data).unwrap();
            }
            Item::Dir(name) => writer.add_directory(*name, stored).unwrap(),
        }
    }
    let mut data = writer.finish().unwrap().into_inner();

    // Archive comment: the trailer's last field is its length.
    if !comment.is_empty() {
        let len_at = data.len() - 2;
        data[len_at..].copy_from_slice(&(comment.len() as u16).to_le_bytes());
        data.extend_from_slice(comment.as_bytes());
    }
    data
}

/// Rename an entry in both its local and central headers. Names must have
/// equal length.
pub fn rename_entry(data: &mut [u8], from: &str, to: &str) {
    assert_eq!(from.len(), to.len());
    let len = from.len();
    for at in 0..=data.len() - len {
        if &data[at..at + len] == from.as_bytes() {
            data[at..at + len].copy_from_slice(to.as_bytes());
        }
    }
}

/// Offset of the central directory record for `name`.
pub fn cdfh_offset(data: &[u8], name: &str) -> usize {
    (0..data.len() - 46)
        .find(|&at| {
            &data[at..at + 4] == b"PK\x01\x02"
                && data[at + 46..].starts_with(name.as_bytes())
        })
        .unwrap()
}

/// Overwrite the uncompressed size the central directory declares for `name`.
pub fn declare_uncompressed_size(data: &mut [u8], name: &str, size: u32) {
    let at = cdfh_offset(data, name) + 24;
    data[at..at + 4].copy_from_slice(&size.to_le_bytes());
}

/// Deterministic bytes that do not compress well.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}

pub async fn open(data: Vec<u8>, chunk_size: u64) -> Arc<RemoteArchive> {
    Arc::new(
        RemoteArchive::open(MemorySource::new(data), chunk_size)
            .await
            .unwrap(),
    )
}

/// Every file and directory below `root`, keyed by `/`-separated relative
/// path. Directories map to `None`.
pub fn read_tree(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Option<Vec<u8>>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let rel = path
                .strip_prefix(root)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if path.is_dir() {
                out.insert(rel, None);
                walk(root, &path, out);
            } else {
                out.insert(rel, Some(std::fs::read(&path).unwrap()));
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}
