//! Views over the bytes of a page, interpreted as B-tree nodes.
//!
//! Every page starts with the common header (node type, root flag, parent
//! page number). Leaves follow it with a cell count and `{key, row}` cells;
//! internal nodes with a key count, the right child and `{child, key}` cells,
//! where each key is the largest key reachable through its child.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::constants::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal,
    Leaf,
}

impl From<u8> for NodeType {
    fn from(orig: u8) -> NodeType {
        match orig {
            0 => NodeType::Internal,
            _ => NodeType::Leaf,
        }
    }
}

impl From<NodeType> for u8 {
    fn from(orig: NodeType) -> u8 {
        match orig {
            NodeType::Internal => 0,
            NodeType::Leaf => 1,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("Tried to access child_num {child_num} > num_keys {num_keys}")]
    ChildOutOfRange { child_num: u32, num_keys: u32 },
}

pub fn node_type(buffer: &[u8]) -> NodeType {
    buffer[NODE_TYPE_OFFSET].into()
}

pub fn set_node_type(buffer: &mut [u8], node_type: NodeType) {
    buffer[NODE_TYPE_OFFSET] = node_type.into();
}

pub fn is_node_root(buffer: &[u8]) -> bool {
    buffer[IS_ROOT_OFFSET] != 0
}

pub fn set_node_root(buffer: &mut [u8], is_root: bool) {
    buffer[IS_ROOT_OFFSET] = is_root as u8;
}

pub fn parent_pointer(buffer: &[u8]) -> u32 {
    LittleEndian::read_u32(&buffer[PARENT_POINTER_OFFSET..])
}

pub fn set_parent_pointer(buffer: &mut [u8], page_num: u32) {
    LittleEndian::write_u32(&mut buffer[PARENT_POINTER_OFFSET..], page_num);
}

pub struct LeafNode<B> {
    buffer: B,
}

impl<B: AsRef<[u8]>> LeafNode<B> {
    pub fn new(buffer: B) -> Self {
        LeafNode { buffer }
    }

    fn bytes(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    pub fn is_root(&self) -> bool {
        is_node_root(self.bytes())
    }

    pub fn parent(&self) -> u32 {
        parent_pointer(self.bytes())
    }

    pub fn num_cells(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes()[LEAF_NODE_NUM_CELLS_OFFSET..])
    }

    pub fn cell(&self, cell_num: u32) -> &[u8] {
        let start = LEAF_NODE_HEADER_SIZE + cell_num as usize * LEAF_NODE_CELL_SIZE;
        &self.bytes()[start..start + LEAF_NODE_CELL_SIZE]
    }

    pub fn key(&self, cell_num: u32) -> u32 {
        LittleEndian::read_u32(&self.cell(cell_num)[LEAF_NODE_KEY_OFFSET..])
    }

    pub fn value(&self, cell_num: u32) -> &[u8] {
        &self.cell(cell_num)[LEAF_NODE_VALUE_OFFSET..]
    }

    /// Key of the last cell, or zero for an empty leaf.
    pub fn max_key(&self) -> u32 {
        match self.num_cells() {
            0 => 0,
            n => self.key(n - 1),
        }
    }

    /// Binary search for `key`. Returns the matching cell or the position
    /// where it would be inserted, which may be one past the last cell.
    pub fn find(&self, key: u32) -> u32 {
        let mut min_index = 0;
        let mut one_past_max_index = self.num_cells();
        while one_past_max_index != min_index {
            let index = (min_index + one_past_max_index) / 2;
            let key_at_index = self.key(index);
            if key == key_at_index {
                return index;
            }
            if key < key_at_index {
                one_past_max_index = index;
            } else {
                min_index = index + 1;
            }
        }
        min_index
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafNode<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut()
    }

    pub fn initialize(&mut self) {
        set_node_type(self.bytes_mut(), NodeType::Leaf);
        set_node_root(self.bytes_mut(), false);
        self.set_num_cells(0);
    }

    pub fn set_root(&mut self, is_root: bool) {
        set_node_root(self.bytes_mut(), is_root);
    }

    pub fn set_parent(&mut self, page_num: u32) {
        set_parent_pointer(self.bytes_mut(), page_num);
    }

    pub fn set_num_cells(&mut self, num_cells: u32) {
        LittleEndian::write_u32(&mut self.bytes_mut()[LEAF_NODE_NUM_CELLS_OFFSET..], num_cells);
    }

    pub fn cell_mut(&mut self, cell_num: u32) -> &mut [u8] {
        let start = LEAF_NODE_HEADER_SIZE + cell_num as usize * LEAF_NODE_CELL_SIZE;
        &mut self.bytes_mut()[start..start + LEAF_NODE_CELL_SIZE]
    }

    pub fn set_key(&mut self, cell_num: u32, key: u32) {
        LittleEndian::write_u32(&mut self.cell_mut(cell_num)[LEAF_NODE_KEY_OFFSET..], key);
    }

    /// Shifts the cells at and after `cell_num` one slot right and writes
    /// `cell` into the gap. The caller checks there is room.
    pub fn insert_cell(&mut self, cell_num: u32, cell: &[u8]) {
        let num_cells = self.num_cells();
        let start = LEAF_NODE_HEADER_SIZE + cell_num as usize * LEAF_NODE_CELL_SIZE;
        let end = LEAF_NODE_HEADER_SIZE + num_cells as usize * LEAF_NODE_CELL_SIZE;
        self.bytes_mut()
            .copy_within(start..end, start + LEAF_NODE_CELL_SIZE);
        self.cell_mut(cell_num).copy_from_slice(cell);
        self.set_num_cells(num_cells + 1);
    }
}

pub struct InternalNode<B> {
    buffer: B,
}

impl<B: AsRef<[u8]>> InternalNode<B> {
    pub fn new(buffer: B) -> Self {
        InternalNode { buffer }
    }

    fn bytes(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    pub fn is_root(&self) -> bool {
        is_node_root(self.bytes())
    }

    pub fn parent(&self) -> u32 {
        parent_pointer(self.bytes())
    }

    pub fn num_keys(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes()[INTERNAL_NODE_NUM_KEYS_OFFSET..])
    }

    pub fn right_child(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes()[INTERNAL_NODE_RIGHT_CHILD_OFFSET..])
    }

    fn cell_offset(cell_num: u32) -> usize {
        INTERNAL_NODE_HEADER_SIZE + cell_num as usize * INTERNAL_NODE_CELL_SIZE
    }

    /// Child `num_keys` is the right child.
    pub fn child(&self, child_num: u32) -> Result<u32, NodeError> {
        let num_keys = self.num_keys();
        if child_num > num_keys {
            Err(NodeError::ChildOutOfRange {
                child_num,
                num_keys,
            })
        } else if child_num == num_keys {
            Ok(self.right_child())
        } else {
            Ok(LittleEndian::read_u32(
                &self.bytes()[Self::cell_offset(child_num)..],
            ))
        }
    }

    pub fn key(&self, key_num: u32) -> u32 {
        LittleEndian::read_u32(
            &self.bytes()[Self::cell_offset(key_num) + INTERNAL_NODE_CHILD_SIZE..],
        )
    }

    /// Index of the child that should contain `key`: the first key at or
    /// above it, or `num_keys` for the right child.
    pub fn find_child(&self, key: u32) -> u32 {
        let mut min_index = 0;
        let mut max_index = self.num_keys();
        while min_index != max_index {
            let index = (min_index + max_index) / 2;
            if self.key(index) >= key {
                max_index = index;
            } else {
                min_index = index + 1;
            }
        }
        min_index
    }

    /// Every child page number in order, the right child last.
    pub fn children(&self) -> Vec<u32> {
        let num_keys = self.num_keys();
        let mut children: Vec<u32> = (0..num_keys)
            .map(|i| LittleEndian::read_u32(&self.bytes()[Self::cell_offset(i)..]))
            .collect();
        children.push(self.right_child());
        children
    }

    pub fn keys(&self) -> Vec<u32> {
        (0..self.num_keys()).map(|i| self.key(i)).collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> InternalNode<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut()
    }

    pub fn initialize(&mut self) {
        set_node_type(self.bytes_mut(), NodeType::Internal);
        set_node_root(self.bytes_mut(), false);
        self.set_num_keys(0);
    }

    pub fn set_root(&mut self, is_root: bool) {
        set_node_root(self.bytes_mut(), is_root);
    }

    pub fn set_parent(&mut self, page_num: u32) {
        set_parent_pointer(self.bytes_mut(), page_num);
    }

    pub fn set_num_keys(&mut self, num_keys: u32) {
        LittleEndian::write_u32(&mut self.bytes_mut()[INTERNAL_NODE_NUM_KEYS_OFFSET..], num_keys);
    }

    pub fn set_right_child(&mut self, page_num: u32) {
        LittleEndian::write_u32(
            &mut self.bytes_mut()[INTERNAL_NODE_RIGHT_CHILD_OFFSET..],
            page_num,
        );
    }

    pub fn set_cell(&mut self, cell_num: u32, child: u32, key: u32) {
        let offset = Self::cell_offset(cell_num);
        let bytes = self.bytes_mut();
        LittleEndian::write_u32(&mut bytes[offset..], child);
        LittleEndian::write_u32(&mut bytes[offset + INTERNAL_NODE_CHILD_SIZE..], key);
    }

    /// Rewrites the routing entries: `children` holds one more page than
    /// `keys`, and its last entry becomes the right child.
    pub fn set_entries(&mut self, children: &[u32], keys: &[u32]) {
        debug_assert_eq!(children.len(), keys.len() + 1);
        for (i, (child, key)) in children.iter().zip(keys).enumerate() {
            self.set_cell(i as u32, *child, *key);
        }
        self.set_num_keys(keys.len() as u32);
        if let Some(right_child) = children.last() {
            self.set_right_child(*right_child);
        }
    }
}
