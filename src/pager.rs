use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::btree::{InternalNode, LeafNode, NodeType};
use crate::constants::*;

#[derive(Debug)]
pub struct Page {
    pub buffer: [u8; PAGE_SIZE],
}

impl Page {
    fn zeroed() -> Self {
        Page {
            buffer: [0u8; PAGE_SIZE],
        }
    }

    pub fn node_type(&self) -> NodeType {
        crate::btree::node_type(&self.buffer)
    }

    pub fn leaf(&self) -> LeafNode<&[u8; PAGE_SIZE]> {
        LeafNode::new(&self.buffer)
    }

    pub fn leaf_mut(&mut self) -> LeafNode<&mut [u8; PAGE_SIZE]> {
        LeafNode::new(&mut self.buffer)
    }

    pub fn internal(&self) -> InternalNode<&[u8; PAGE_SIZE]> {
        InternalNode::new(&self.buffer)
    }

    pub fn internal_mut(&mut self) -> InternalNode<&mut [u8; PAGE_SIZE]> {
        InternalNode::new(&mut self.buffer)
    }

    /// Whether the stored cell count fits in the page. Node views index by
    /// that count, so pages read from disk are checked before use.
    fn counts_fit(&self) -> bool {
        match self.node_type() {
            NodeType::Leaf => self.leaf().num_cells() as usize <= LEAF_NODE_MAX_CELLS,
            NodeType::Internal => self.internal().num_keys() as usize <= INTERNAL_NODE_MAX_CELLS,
        }
    }
}

/// Owns the database file and the single in-memory copy of every page
/// that has been touched this session.
pub struct Pager {
    file: File,
    pub file_length: u64,
    num_pages: u32,
    max_pages: u32,
    pages: HashMap<u32, Page>,
}

#[derive(Debug, Error)]
pub enum PagerError {
    #[error("I/O error: {0}")]
    File(#[from] std::io::Error),
    #[error("Db file is not a whole number of pages. Corrupt file.")]
    Corrupt { file_length: u64 },
    #[error("Tried to fetch page number out of bounds. {page_num} >= {max_pages}")]
    PagesFull { page_num: u32, max_pages: u32 },
    #[error("Page {page_num} holds more cells than fit. Corrupt file.")]
    CorruptPage { page_num: u32 },
}

impl Pager {
    pub fn new<P>(filename: P, max_pages: u32) -> Result<Self, PagerError>
    where
        P: AsRef<Path>,
    {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(filename)?;
        let file_length = file.seek(SeekFrom::End(0))?;

        if file_length % PAGE_SIZE as u64 != 0 {
            return Err(PagerError::Corrupt { file_length });
        }
        let num_pages = (file_length / PAGE_SIZE as u64) as u32;
        debug!(file_length, num_pages, "opened database file");

        Ok(Pager {
            file,
            file_length,
            num_pages,
            max_pages,
            pages: HashMap::with_capacity(max_pages as usize),
        })
    }

    /// Number of pages that exist, on disk or only in memory so far.
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// New pages always go onto the end of the file until free pages are
    /// recycled.
    pub fn unused_page_num(&self) -> u32 {
        self.num_pages
    }

    pub fn get_page(&mut self, page_num: u32) -> Result<&mut Page, PagerError> {
        if page_num >= self.max_pages {
            return Err(PagerError::PagesFull {
                page_num,
                max_pages: self.max_pages,
            });
        }

        match self.pages.entry(page_num) {
            Entry::Occupied(o) => Ok(o.into_mut()),
            Entry::Vacant(v) => {
                let mut page = Page::zeroed();
                let pages_in_file = self.file_length / PAGE_SIZE as u64;

                // pages past the end of the file have never been flushed,
                // so there is nothing on disk to read for them yet
                if (page_num as u64) < pages_in_file {
                    trace!(page_num, "loading page from disk");
                    self.file
                        .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
                    self.file.read_exact(&mut page.buffer)?;
                    if !page.counts_fit() {
                        warn!(page_num, "page header cell count is out of range");
                        return Err(PagerError::CorruptPage { page_num });
                    }
                } else {
                    trace!(page_num, "allocating fresh page");
                }

                if page_num >= self.num_pages {
                    self.num_pages = page_num + 1;
                }

                Ok(v.insert(page))
            }
        }
    }

    pub fn flush(&mut self, page_num: u32) -> Result<(), PagerError> {
        let page = match self.pages.get(&page_num) {
            Some(p) => p,
            // a page that was never read into memory cannot have changed
            None => return Ok(()),
        };

        let offset = page_num as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&page.buffer)?;
        self.file_length = self.file_length.max(offset + PAGE_SIZE as u64);
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<(), PagerError> {
        for page_num in 0..self.num_pages {
            self.flush(page_num)?;
        }
        self.file.sync_all()?;
        debug!(num_pages = self.num_pages, "flushed all pages");
        Ok(())
    }
}
