//! Background page reads. Each job owns its staging vector and hands it back
//! through the result channel.

use std::fs::File;
use std::path::{Path, PathBuf};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use memmap2::Mmap;
use rayon::prelude::*;

use crate::format::{page_data_path, page_header_path, words_from_bytes, PageHeader};
use crate::processor::types::{CLUSTER_DATA_WORDS, GROUP_DATA_WORDS};
use crate::streaming::resident::PageStrides;
use crate::{AdaptrixError, AdaptrixResult};

pub struct PageLoadJob {
    pub page: u32,
    pub slot: usize,
    pub job: usize,
    pub header: PageHeader,
    pub strides: PageStrides,
    pub staging: Vec<u32>,
}

pub struct PageLoadResult {
    pub page: u32,
    pub slot: usize,
    pub job: usize,
    pub staging: Vec<u32>,
    pub result: AdaptrixResult<()>,
}

pub type HeaderReceiver = Receiver<AdaptrixResult<Vec<PageHeader>>>;

fn corrupt(path: &Path, reason: String) -> AdaptrixError {
    AdaptrixError::CorruptFile { path: path.display().to_string(), reason }
}

/// Reads one page's data file into the upload layout described by `strides`.
pub fn read_page_into(path: &Path, header: &PageHeader, strides: &PageStrides, staging: &mut [u32]) -> AdaptrixResult<()> {
    if !strides.fits(header) {
        return Err(corrupt(path, format!("page contents {:?} exceed slot strides {:?}", header, strides)));
    }
    if staging.len() < strides.upload_words() {
        return Err(corrupt(path, "staging buffer smaller than the upload layout".to_string()));
    }
    let expected = header.data_word_count() * 4;
    if expected == 0 {
        return Ok(());
    }

    let file = File::open(path)?;
    let map = unsafe { Mmap::map(&file)? };
    if map.len() < expected {
        return Err(corrupt(path, format!("expected {} bytes, found {}", expected, map.len())));
    }

    let v = header.vertex_value_count as usize;
    let sections = [
        (0, v),
        (strides.attribute_offset(), v * 2),
        (strides.index_offset(), header.index_value_count as usize),
        (strides.group_offset(), header.group_count as usize * GROUP_DATA_WORDS),
        (strides.instance_offset(), header.instance_count as usize * CLUSTER_DATA_WORDS),
    ];
    let mut cursor = 0usize;
    for (offset, words) in sections {
        words_from_bytes(&map[cursor..cursor + words * 4], &mut staging[offset..offset + words]);
        cursor += words * 4;
    }
    Ok(())
}

/// Reads every page header of a bake in parallel.
pub fn read_headers(dir: &Path, page_count: usize) -> AdaptrixResult<Vec<PageHeader>> {
    (0..page_count)
        .into_par_iter()
        .map(|i| PageHeader::read(&page_header_path(dir, i)))
        .collect()
}

/// Fixed-size I/O pool, one worker per upload slot.
pub struct PageLoader {
    pool: rayon::ThreadPool,
    dir: PathBuf,
    sender: Sender<PageLoadResult>,
    receiver: Receiver<PageLoadResult>,
}

impl PageLoader {
    pub fn new(dir: PathBuf, threads: usize) -> AdaptrixResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("lume-page-io-{}", i))
            .build()
            .map_err(std::io::Error::other)?;
        let (sender, receiver) = unbounded();
        Ok(Self { pool, dir, sender, receiver })
    }

    /// Starts the one-off header job.
    pub fn load_headers(&self, page_count: usize) -> HeaderReceiver {
        let (tx, rx) = bounded(1);
        let dir = self.dir.clone();
        self.pool.spawn(move || {
            let headers = read_headers(&dir, page_count);
            let _ = tx.send(headers);
        });
        rx
    }

    pub fn submit(&self, job: PageLoadJob) {
        let sender = self.sender.clone();
        let path = page_data_path(&self.dir, job.page as usize);
        self.pool.spawn(move || {
            let PageLoadJob { page, slot, job, header, strides, mut staging } = job;
            let result = read_page_into(&path, &header, &strides, &mut staging);
            let _ = sender.send(PageLoadResult { page, slot, job, staging, result });
        });
    }

    pub fn try_recv(&self) -> Option<PageLoadResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks for the next finished job.
    pub fn recv(&self) -> Option<PageLoadResult> {
        self.receiver.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::write_words;
    use std::io::Write;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lume-jobs-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_page(dir: &Path, index: usize, header: &PageHeader, data: &[u32]) {
        let mut f = File::create(page_header_path(dir, index)).unwrap();
        write_words(&mut f, &header.to_words()).unwrap();
        let mut f = File::create(page_data_path(dir, index)).unwrap();
        write_words(&mut f, data).unwrap();
        f.flush().unwrap();
    }

    fn sample() -> (PageHeader, Vec<u32>, PageStrides) {
        let header = PageHeader {
            bounds: [1, 2, 3],
            instance_count: 1,
            group_count: 1,
            vertex_value_count: 2,
            index_value_count: 1,
        };
        // positions 2, attributes 4, indices 1, group 4, cluster 4
        let data: Vec<u32> = (1..=15).collect();
        let strides = PageStrides { vertex: 4, index: 2, group: 8, instance: 8 };
        (header, data, strides)
    }

    #[test]
    fn test_read_page_into_layout() {
        let dir = temp_dir("layout");
        let (header, data, strides) = sample();
        write_page(&dir, 0, &header, &data);

        let mut staging = vec![0u32; strides.upload_words()];
        read_page_into(&page_data_path(&dir, 0), &header, &strides, &mut staging).unwrap();
        assert_eq!(&staging[0..2], &[1, 2]);
        assert_eq!(&staging[4..8], &[3, 4, 5, 6]);
        assert_eq!(staging[12], 7);
        assert_eq!(&staging[14..18], &[8, 9, 10, 11]);
        assert_eq!(&staging[22..26], &[12, 13, 14, 15]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_truncated_page_is_reported() {
        let dir = temp_dir("truncated");
        let (header, data, strides) = sample();
        write_page(&dir, 0, &header, &data[..10]);
        let mut staging = vec![0u32; strides.upload_words()];
        let err = read_page_into(&page_data_path(&dir, 0), &header, &strides, &mut staging).unwrap_err();
        assert!(matches!(err, AdaptrixError::CorruptFile { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_loader_round_trip() {
        let dir = temp_dir("loader");
        let (header, data, strides) = sample();
        write_page(&dir, 0, &header, &data);
        write_page(&dir, 1, &PageHeader::default(), &[]);

        let loader = PageLoader::new(dir.clone(), 2).unwrap();
        let headers = loader.load_headers(2).recv().unwrap().unwrap();
        assert_eq!(headers, vec![header, PageHeader::default()]);

        loader.submit(PageLoadJob {
            page: 0,
            slot: 3,
            job: 1,
            header,
            strides,
            staging: vec![0; strides.upload_words()],
        });
        let done = loader.recv().unwrap();
        assert!(done.result.is_ok());
        assert_eq!((done.page, done.slot, done.job), (0, 3, 1));
        assert_eq!(done.staging[22], 12);
        std::fs::remove_dir_all(&dir).ok();
    }
}
