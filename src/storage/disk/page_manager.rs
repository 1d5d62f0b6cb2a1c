use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Reads and writes fixed-size pages of a single database file.
pub struct PageManager {
    file: File,
    page_size: usize,
}

impl PageManager {
    pub fn create(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self { file, page_size })
    }

    pub fn open(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            return Err(StorageError::FileCorrupted(format!(
                "file length {} is not a multiple of the page size {}",
                len, page_size
            )));
        }

        Ok(Self { file, page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Read a page into `buf`. Returns false if the page lies beyond the end
    /// of the file.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> StorageResult<bool> {
        self.check_len(buf.len())?;

        let offset = self.page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset >= file_size {
            return Ok(false);
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;

        Ok(true)
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        self.check_len(data.len())?;

        let offset = self.page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        // Extend file if necessary
        if offset >= file_size {
            self.file.set_len(offset + self.page_size as u64)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;

        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / self.page_size as u64) as u32)
    }

    /// Drop every page at or beyond `page_count`.
    pub fn truncate(&mut self, page_count: u32) -> StorageResult<()> {
        if self.num_pages()? > page_count {
            self.file
                .set_len(page_count as u64 * self.page_size as u64)?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn check_len(&self, len: usize) -> StorageResult<()> {
        if len != self.page_size {
            return Err(StorageError::Internal(format!(
                "buffer size must be the page size ({}), got {}",
                self.page_size, len
            )));
        }
        Ok(())
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        page_id.0 as u64 * self.page_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 256;

    #[test]
    fn test_create_and_open() -> StorageResult<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        // Create new file
        {
            let pm = PageManager::create(&file_path, PAGE_SIZE)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        // Open existing file
        {
            let pm = PageManager::open(&file_path, PAGE_SIZE)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> StorageResult<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::create(&file_path, PAGE_SIZE)?;

        let mut write_buf = vec![0u8; PAGE_SIZE];
        write_buf[0] = 42;
        write_buf[PAGE_SIZE - 1] = 24;
        pm.write_page(PageId(0), &write_buf)?;

        let mut read_buf = vec![0u8; PAGE_SIZE];
        assert!(pm.read_page(PageId(0), &mut read_buf)?);

        assert_eq!(read_buf[0], 42);
        assert_eq!(read_buf[PAGE_SIZE - 1], 24);

        Ok(())
    }

    #[test]
    fn test_read_nonexistent_page() -> StorageResult<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::create(&file_path, PAGE_SIZE)?;

        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(!pm.read_page(PageId(10), &mut buf)?);

        Ok(())
    }

    #[test]
    fn test_invalid_buffer_size() -> StorageResult<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::create(&file_path, PAGE_SIZE)?;

        let mut small_buf = vec![0u8; 100];
        assert!(pm.read_page(PageId(0), &mut small_buf).is_err());
        assert!(pm.write_page(PageId(0), &small_buf).is_err());

        Ok(())
    }

    #[test]
    fn test_open_nonexistent_file() -> StorageResult<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("nonexistent.db");

        assert!(PageManager::open(&file_path, PAGE_SIZE).is_err());

        Ok(())
    }

    #[test]
    fn test_file_growth_and_truncate() -> StorageResult<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::create(&file_path, PAGE_SIZE)?;

        // Write to page 5 (skipping 0-4)
        pm.write_page(PageId(5), &vec![5u8; PAGE_SIZE])?;
        assert_eq!(pm.num_pages()?, 6);

        pm.truncate(2)?;
        assert_eq!(pm.num_pages()?, 2);
        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(!pm.read_page(PageId(5), &mut buf)?);

        Ok(())
    }

    #[test]
    fn test_persistence() -> StorageResult<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        {
            let mut pm = PageManager::create(&file_path, PAGE_SIZE)?;
            pm.write_page(PageId(0), &vec![99u8; PAGE_SIZE])?;
            pm.sync()?;
        }

        {
            let mut pm = PageManager::open(&file_path, PAGE_SIZE)?;
            let mut buf = vec![0u8; PAGE_SIZE];
            pm.read_page(PageId(0), &mut buf)?;
            assert_eq!(buf[0], 99);
        }

        Ok(())
    }

    #[test]
    fn test_open_rejects_wrong_page_size() -> StorageResult<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        {
            let mut pm = PageManager::create(&file_path, PAGE_SIZE)?;
            pm.write_page(PageId(0), &vec![1u8; PAGE_SIZE])?;
        }
        let err = PageManager::open(&file_path, 192).err();
        assert!(matches!(err, Some(StorageError::FileCorrupted(_))));
        Ok(())
    }
}
