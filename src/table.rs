use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::btree::{set_node_root, set_parent_pointer, LeafNode, NodeError, NodeType};
use crate::constants::*;
use crate::pager::{Pager, PagerError};
use crate::row::Row;

/// Capacity knobs. Neither changes the file layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    pub max_pages: u32,
    pub internal_node_max_keys: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            max_pages: TABLE_MAX_PAGES,
            internal_node_max_keys: INTERNAL_NODE_MAX_CELLS as u32,
        }
    }
}

pub struct Table {
    root_page_num: u32,
    pager: Pager,
    config: TableConfig,
    closed: bool,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error(transparent)]
    Pager(PagerError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("Error: Duplicate key.")]
    DuplicateKey(u32),
    #[error("Error: Table full.")]
    TableFull,
    #[error("Error: Need to implement searching an internal node.")]
    UnimplementedTraversal { page_num: u32 },
    #[error("page {child} is not a child of page {parent}")]
    OrphanPage { parent: u32, child: u32 },
}

impl From<PagerError> for TableError {
    fn from(e: PagerError) -> Self {
        match e {
            PagerError::PagesFull { .. } => TableError::TableFull,
            other => TableError::Pager(other),
        }
    }
}

impl Table {
    pub fn open<P>(filename: P) -> Result<Self, TableError>
    where
        P: AsRef<Path>,
    {
        Table::open_with(filename, TableConfig::default())
    }

    pub fn open_with<P>(filename: P, config: TableConfig) -> Result<Self, TableError>
    where
        P: AsRef<Path>,
    {
        let config = TableConfig {
            internal_node_max_keys: config
                .internal_node_max_keys
                .clamp(1, INTERNAL_NODE_MAX_CELLS as u32),
            ..config
        };
        let mut pager = Pager::new(filename, config.max_pages)?;
        if pager.num_pages() == 0 {
            // New database file. Page 0 starts out as an empty root leaf.
            let mut root = pager.get_page(0)?.leaf_mut();
            root.initialize();
            root.set_root(true);
        }

        Ok(Table {
            root_page_num: 0,
            pager,
            config,
            closed: false,
        })
    }

    /// Flushes every resident page and releases the file.
    pub fn close(mut self) -> Result<(), TableError> {
        self.closed = true;
        self.pager.flush_all()?;
        Ok(())
    }

    /// The root never moves off this page; splits rewrite it in place.
    pub fn root_page_num(&self) -> u32 {
        self.root_page_num
    }

    pub fn constants() -> String {
        constants_report()
    }

    pub fn insert(&mut self, row: &Row) -> Result<(), TableError> {
        self.find(row.id)?.insert(row)
    }

    /// Every row in ascending key order.
    pub fn select(&mut self) -> Result<Cursor<'_>, TableError> {
        self.start()
    }

    pub fn start(&mut self) -> Result<Cursor<'_>, TableError> {
        let page_num = self.leaf_page_for(None)?;
        let num_cells = self.pager.get_page(page_num)?.leaf().num_cells();
        Ok(Cursor {
            table: self,
            page_num,
            cell_num: 0,
            end_of_table: num_cells == 0,
        })
    }

    /// Position of `key`, or the position where it would be inserted.
    pub fn find(&mut self, key: u32) -> Result<Cursor<'_>, TableError> {
        let page_num = self.leaf_page_for(Some(key))?;
        let cell_num = self.pager.get_page(page_num)?.leaf().find(key);
        Ok(Cursor {
            table: self,
            page_num,
            cell_num,
            end_of_table: false,
        })
    }

    /// Leaf that holds `key`, or the leftmost leaf for `None`. Only one
    /// level of internal nodes is searched.
    fn leaf_page_for(&mut self, key: Option<u32>) -> Result<u32, TableError> {
        let root_page_num = self.root_page_num;
        let root = self.pager.get_page(root_page_num)?;
        if root.node_type() == NodeType::Leaf {
            return Ok(root_page_num);
        }

        let node = root.internal();
        let child_num = key.map_or(0, |key| node.find_child(key));
        let child = node.child(child_num)?;
        match self.pager.get_page(child)?.node_type() {
            NodeType::Leaf => Ok(child),
            NodeType::Internal => {
                warn!(page_num = child, "search reached a second level of internal nodes");
                Err(TableError::UnimplementedTraversal { page_num: child })
            }
        }
    }

    /// Largest key reachable from `page_num`.
    pub fn node_max_key(&mut self, mut page_num: u32) -> Result<u32, TableError> {
        loop {
            let page = self.pager.get_page(page_num)?;
            match page.node_type() {
                NodeType::Leaf => return Ok(page.leaf().max_key()),
                NodeType::Internal => page_num = page.internal().right_child(),
            }
        }
    }

    /// How many new pages inserting into the full node `page_num` takes,
    /// counting every ancestor that would split as well.
    fn pages_needed_for_split(&mut self, mut page_num: u32) -> Result<u32, TableError> {
        let mut needed = 0;
        loop {
            let page = self.pager.get_page(page_num)?;
            let (full, is_root, parent) = match page.node_type() {
                NodeType::Leaf => {
                    let leaf = page.leaf();
                    (
                        leaf.num_cells() as usize >= LEAF_NODE_MAX_CELLS,
                        leaf.is_root(),
                        leaf.parent(),
                    )
                }
                NodeType::Internal => {
                    let node = page.internal();
                    (
                        node.num_keys() >= self.config.internal_node_max_keys,
                        node.is_root(),
                        node.parent(),
                    )
                }
            };
            if !full {
                return Ok(needed);
            }
            needed += 1;
            if is_root {
                // the old root contents move to a page of their own
                return Ok(needed + 1);
            }
            page_num = parent;
        }
    }

    fn set_parent(&mut self, page_num: u32, parent: u32) -> Result<(), TableError> {
        set_parent_pointer(&mut self.pager.get_page(page_num)?.buffer, parent);
        Ok(())
    }

    /// Points the children of an internal node back at it after the node
    /// has been moved or split.
    fn adopt_children(&mut self, page_num: u32) -> Result<(), TableError> {
        let page = self.pager.get_page(page_num)?;
        if page.node_type() == NodeType::Leaf {
            return Ok(());
        }
        let children = page.internal().children();
        for child in children {
            self.set_parent(child, page_num)?;
        }
        Ok(())
    }

    /// Moves half the cells of a full leaf to a new page, inserting `cell`
    /// on whichever side it belongs, then updates or creates the parent.
    fn leaf_split_and_insert(
        &mut self,
        old_page_num: u32,
        cell_num: u32,
        cell: &[u8],
    ) -> Result<(), TableError> {
        let new_page_num = self.pager.unused_page_num();
        debug!(old_page_num, new_page_num, "splitting leaf");

        let old_buffer = self.pager.get_page(old_page_num)?.buffer;
        let old = LeafNode::new(&old_buffer);
        let (is_root, parent) = (old.is_root(), old.parent());
        let mut cells: Vec<&[u8]> = (0..old.num_cells()).map(|i| old.cell(i)).collect();
        cells.insert(cell_num as usize, cell);
        let (left, right) = cells.split_at(LEAF_NODE_LEFT_SPLIT_COUNT);

        let mut new_leaf = self.pager.get_page(new_page_num)?.leaf_mut();
        new_leaf.initialize();
        new_leaf.set_parent(parent);
        write_cells(&mut new_leaf, right);

        let mut old_leaf = self.pager.get_page(old_page_num)?.leaf_mut();
        write_cells(&mut old_leaf, left);

        if is_root {
            self.create_new_root(new_page_num)
        } else {
            self.internal_node_insert(parent, old_page_num, new_page_num)
        }
    }

    /// Splitting the root: its contents move to a new left child and page
    /// `root_page_num` is rewritten as an internal node over the two halves.
    fn create_new_root(&mut self, right_child_page_num: u32) -> Result<(), TableError> {
        let root_page_num = self.root_page_num;
        let root_buffer = self.pager.get_page(root_page_num)?.buffer;
        let left_child_page_num = self.pager.unused_page_num();
        debug!(left_child_page_num, right_child_page_num, "promoting new root");

        let left_child = self.pager.get_page(left_child_page_num)?;
        left_child.buffer = root_buffer;
        set_node_root(&mut left_child.buffer, false);
        set_parent_pointer(&mut left_child.buffer, root_page_num);
        self.adopt_children(left_child_page_num)?;
        self.set_parent(right_child_page_num, root_page_num)?;

        let left_child_max_key = self.node_max_key(left_child_page_num)?;
        let mut root = self.pager.get_page(root_page_num)?.internal_mut();
        root.initialize();
        root.set_root(true);
        root.set_entries(
            &[left_child_page_num, right_child_page_num],
            &[left_child_max_key],
        );
        Ok(())
    }

    /// Registers `right_page_num`, freshly split off `left_page_num`, with
    /// their parent. The left child's key drops to its new maximum and the
    /// right child takes over the old one.
    fn internal_node_insert(
        &mut self,
        parent_page_num: u32,
        left_page_num: u32,
        right_page_num: u32,
    ) -> Result<(), TableError> {
        let left_max_key = self.node_max_key(left_page_num)?;
        let parent = self.pager.get_page(parent_page_num)?.internal();
        let (mut children, mut keys) = (parent.children(), parent.keys());

        let index = children
            .iter()
            .position(|child| *child == left_page_num)
            .ok_or(TableError::OrphanPage {
                parent: parent_page_num,
                child: left_page_num,
            })?;
        keys.insert(index, left_max_key);
        children.insert(index + 1, right_page_num);
        self.set_parent(right_page_num, parent_page_num)?;

        if keys.len() as u32 <= self.config.internal_node_max_keys {
            self.pager
                .get_page(parent_page_num)?
                .internal_mut()
                .set_entries(&children, &keys);
            Ok(())
        } else {
            self.internal_split(parent_page_num, &children, &keys)
        }
    }

    /// Halves an overfull internal node. The key between the halves is not
    /// stored in either; it is the left half's maximum and reappears in the
    /// parent.
    fn internal_split(
        &mut self,
        page_num: u32,
        children: &[u32],
        keys: &[u32],
    ) -> Result<(), TableError> {
        let new_page_num = self.pager.unused_page_num();
        debug!(page_num, new_page_num, "splitting internal node");

        let left_count = (children.len() + 1) / 2;
        let (left_children, right_children) = children.split_at(left_count);
        let left_keys = &keys[..left_count - 1];
        let right_keys = &keys[left_count..];

        let node = self.pager.get_page(page_num)?.internal();
        let (is_root, parent) = (node.is_root(), node.parent());

        let mut new_node = self.pager.get_page(new_page_num)?.internal_mut();
        new_node.initialize();
        new_node.set_parent(parent);
        new_node.set_entries(right_children, right_keys);
        self.adopt_children(new_page_num)?;

        self.pager
            .get_page(page_num)?
            .internal_mut()
            .set_entries(left_children, left_keys);

        if is_root {
            self.create_new_root(new_page_num)
        } else {
            self.internal_node_insert(parent, page_num, new_page_num)
        }
    }

    /// Depth-first rendering used by `.btree`.
    pub fn print_tree(&mut self) -> Result<String, TableError> {
        let mut out = String::new();
        self.print_node(self.root_page_num, 0, &mut out)?;
        Ok(out)
    }

    fn print_node(
        &mut self,
        page_num: u32,
        indentation_level: usize,
        out: &mut String,
    ) -> Result<(), TableError> {
        let page = self.pager.get_page(page_num)?;
        match page.node_type() {
            NodeType::Leaf => {
                let leaf = page.leaf();
                let num_cells = leaf.num_cells();
                push_line(out, indentation_level, &format!("- leaf (size {})", num_cells));
                for i in 0..num_cells {
                    push_line(out, indentation_level + 1, &format!("- {}", leaf.key(i)));
                }
            }
            NodeType::Internal => {
                let node = page.internal();
                let (children, keys) = (node.children(), node.keys());
                push_line(
                    out,
                    indentation_level,
                    &format!("- internal (size {})", keys.len()),
                );
                for (child, key) in children.iter().zip(&keys) {
                    self.print_node(*child, indentation_level + 1, out)?;
                    push_line(out, indentation_level + 1, &format!("- key {}", key));
                }
                if let Some(right_child) = children.last() {
                    self.print_node(*right_child, indentation_level + 1, out)?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.pager.flush_all() {
            error!(error = %e, "dropping table failed to flush pages to disk");
        }
    }
}

fn write_cells<B: AsRef<[u8]> + AsMut<[u8]>>(leaf: &mut LeafNode<B>, cells: &[&[u8]]) {
    for (i, cell) in cells.iter().enumerate() {
        leaf.cell_mut(i as u32).copy_from_slice(cell);
    }
    leaf.set_num_cells(cells.len() as u32);
}

fn push_line(out: &mut String, indentation_level: usize, text: &str) {
    out.extend(std::iter::repeat(' ').take(indentation_level));
    out.push_str(text);
    out.push('\n');
}

/// A position inside a leaf. Iterating a cursor yields the rows from that
/// position onwards, crossing into sibling leaves, exactly once.
pub struct Cursor<'table> {
    table: &'table mut Table,
    pub page_num: u32,
    pub cell_num: u32,
    pub end_of_table: bool,
}

impl Cursor<'_> {
    pub fn row(&mut self) -> Result<Row, TableError> {
        let page = self.table.pager.get_page(self.page_num)?;
        Ok(Row::deserialize(page.leaf().value(self.cell_num)))
    }

    pub fn advance(&mut self) -> Result<(), TableError> {
        let leaf = self.table.pager.get_page(self.page_num)?.leaf();
        let (num_cells, is_root, parent) = (leaf.num_cells(), leaf.is_root(), leaf.parent());

        self.cell_num += 1;
        if self.cell_num < num_cells {
            return Ok(());
        }
        if is_root {
            self.end_of_table = true;
            return Ok(());
        }

        let siblings = self.table.pager.get_page(parent)?.internal().children();
        let next = siblings
            .iter()
            .position(|child| *child == self.page_num)
            .and_then(|i| siblings.get(i + 1));
        match next {
            Some(next_page_num) => {
                if self.table.pager.get_page(*next_page_num)?.node_type() != NodeType::Leaf {
                    return Err(TableError::UnimplementedTraversal {
                        page_num: *next_page_num,
                    });
                }
                self.page_num = *next_page_num;
                self.cell_num = 0;
            }
            None => self.end_of_table = true,
        }
        Ok(())
    }

    pub fn insert(&mut self, row: &Row) -> Result<(), TableError> {
        let key = row.id;
        let leaf = self.table.pager.get_page(self.page_num)?.leaf();
        let num_cells = leaf.num_cells();
        if self.cell_num < num_cells && leaf.key(self.cell_num) == key {
            return Err(TableError::DuplicateKey(key));
        }

        let mut cell = [0u8; LEAF_NODE_CELL_SIZE];
        LittleEndian::write_u32(&mut cell[LEAF_NODE_KEY_OFFSET..], key);
        row.serialize_into(&mut cell[LEAF_NODE_VALUE_OFFSET..]);

        if (num_cells as usize) < LEAF_NODE_MAX_CELLS {
            self.table
                .pager
                .get_page(self.page_num)?
                .leaf_mut()
                .insert_cell(self.cell_num, &cell);
            return Ok(());
        }

        let needed = self.table.pages_needed_for_split(self.page_num)?;
        if self.table.pager.num_pages() + needed > self.table.pager.max_pages() {
            warn!(
                needed,
                num_pages = self.table.pager.num_pages(),
                "insert needs more pages than the table allows"
            );
            return Err(TableError::TableFull);
        }
        self.table
            .leaf_split_and_insert(self.page_num, self.cell_num, &cell)
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<Row, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end_of_table {
            return None;
        }
        let step = self
            .row()
            .and_then(|row| self.advance().map(|()| row));
        if step.is_err() {
            self.end_of_table = true;
        }
        Some(step)
    }
}
