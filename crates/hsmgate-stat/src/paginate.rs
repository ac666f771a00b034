//! Paginated directory listing.
//!
//! A [`DirectoryLister`] walks a directory forward in pages of at most
//! `page_size` entries, translating each entry with a [`StatTranslator`].
//! Entries that cannot be translated are dropped from their page. A failed
//! page read ends the listing; there is no way to rewind.

use crate::translate::{EntryOutcome, StatTranslator};
use hsmgate_core::{
    DirAttributes, Error, NativeDirEntry, ProtocolStat, Result, StorageBackend,
};
use std::sync::Arc;

/// One batch of translated entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryPage {
    /// Translated entries in enumeration order
    pub entries: Vec<ProtocolStat>,
    /// True on the last page of the listing
    pub end_of_directory: bool,
    /// Backend cursor after this page
    pub cursor: u64,
}

/// Forward-only pager over one directory
#[derive(Debug)]
pub struct DirectoryLister<B> {
    backend: Arc<B>,
    translator: StatTranslator<B>,
    path: String,
    dir: DirAttributes,
    page_size: usize,
    cursor: u64,
    native: Vec<NativeDirEntry>,
    finished: bool,
}

impl<B: StorageBackend> DirectoryLister<B> {
    /// Resolve `path` to a directory handle and prepare to list it.
    ///
    /// # Errors
    ///
    /// Returns `Generic` for a zero page size and
    /// `System { op: "dir_attributes" }` if `path` is not a readable
    /// directory.
    pub fn open(backend: Arc<B>, path: &str, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::generic("page size must be non-zero"));
        }
        let dir = backend
            .dir_attributes(path)
            .map_err(|errno| Error::system("dir_attributes", errno))?;
        tracing::debug!(path, entries = dir.entry_count, page_size, "listing directory");

        Ok(Self {
            translator: StatTranslator::new(Arc::clone(&backend)),
            backend,
            path: path.to_string(),
            dir,
            page_size,
            cursor: 0,
            native: Vec::with_capacity(page_size.min(dir.entry_count as usize)),
            finished: false,
        })
    }

    /// Entry count reported when the directory was opened
    #[must_use]
    pub fn entry_count(&self) -> u32 {
        self.dir.entry_count
    }

    /// True once the last page was produced or a page read failed
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fill `page` with the next batch, reusing its buffers.
    ///
    /// Returns true if more pages may follow. Once the listing is finished,
    /// further calls produce an empty final page.
    ///
    /// # Errors
    ///
    /// Returns `System { op: "read_dir" }` if the backend read fails, or
    /// `Generic` if the backend cursor stops advancing. Either ends the
    /// listing.
    pub fn read_page(&mut self, page: &mut DirectoryPage) -> Result<bool> {
        if self.finished {
            page.entries.clear();
            page.end_of_directory = true;
            page.cursor = self.cursor;
            return Ok(false);
        }

        let read = match self.backend.read_dir(
            self.dir.handle,
            self.cursor,
            self.page_size,
            &mut self.native,
        ) {
            Ok(read) => read,
            Err(errno) => {
                self.finished = true;
                tracing::error!(path = %self.path, %errno, "directory read failed");
                return Err(Error::system("read_dir", errno));
            }
        };
        if !read.end_of_directory && read.next_cursor == self.cursor {
            self.finished = true;
            return Err(Error::generic("directory cursor did not advance"));
        }

        let mut used = 0;
        for entry in &self.native {
            if used == page.entries.len() {
                page.entries.push(ProtocolStat::default());
            }
            match self.translator.translate_dir_entry(
                self.dir.handle,
                entry,
                &self.path,
                &mut page.entries[used],
            ) {
                Ok(EntryOutcome::Translated) => used += 1,
                Ok(EntryOutcome::Skip) => {}
                Err(err) => {
                    tracing::warn!(name = %entry.name, "entry translation failed: {}", err);
                }
            }
        }
        page.entries.truncate(used);
        page.end_of_directory = read.end_of_directory;
        page.cursor = read.next_cursor;

        self.cursor = read.next_cursor;
        self.finished = read.end_of_directory;
        Ok(!read.end_of_directory)
    }
}

impl<B: StorageBackend> Iterator for DirectoryLister<B> {
    type Item = Result<DirectoryPage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut page = DirectoryPage::default();
        Some(self.read_page(&mut page).map(|_| page))
    }
}

impl<B: StorageBackend> std::iter::FusedIterator for DirectoryLister<B> {}
