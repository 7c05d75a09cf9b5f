use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::constants::*;

/// A fixed-width row. Text columns are stored exactly as they sit on disk,
/// including the unused bytes past the terminator.
#[derive(Clone, PartialEq, Eq)]
pub struct Row {
    pub id: u32,
    username: [u8; USERNAME_SIZE],
    email: [u8; EMAIL_SIZE],
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("{field} is {len} bytes, at most {max} allowed")]
    StringTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

impl Row {
    pub fn new(id: u32, username: &str, email: &str) -> Result<Self, RowError> {
        Ok(Row {
            id,
            username: text_column::<USERNAME_SIZE>(
                "username",
                username.as_bytes(),
                COLUMN_USERNAME_SIZE,
            )?,
            email: text_column::<EMAIL_SIZE>("email", email.as_bytes(), COLUMN_EMAIL_SIZE)?,
        })
    }

    pub fn username(&self) -> &[u8] {
        until_terminator(&self.username)
    }

    pub fn email(&self) -> &[u8] {
        until_terminator(&self.email)
    }

    pub fn serialize(&self) -> [u8; ROW_SIZE] {
        let mut buf = [0u8; ROW_SIZE];
        self.serialize_into(&mut buf);
        buf
    }

    /// Writes the row into the first `ROW_SIZE` bytes of `buf`.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[ID_OFFSET..USERNAME_OFFSET], self.id);
        buf[USERNAME_OFFSET..EMAIL_OFFSET].copy_from_slice(&self.username);
        buf[EMAIL_OFFSET..ROW_SIZE].copy_from_slice(&self.email);
    }

    /// Reads a row back from the first `ROW_SIZE` bytes of `buf`.
    pub fn deserialize(buf: &[u8]) -> Row {
        let mut username = [0u8; USERNAME_SIZE];
        let mut email = [0u8; EMAIL_SIZE];
        username.copy_from_slice(&buf[USERNAME_OFFSET..EMAIL_OFFSET]);
        email.copy_from_slice(&buf[EMAIL_OFFSET..ROW_SIZE]);

        Row {
            id: LittleEndian::read_u32(&buf[ID_OFFSET..USERNAME_OFFSET]),
            username,
            email,
        }
    }
}

fn text_column<const N: usize>(
    field: &'static str,
    bytes: &[u8],
    max: usize,
) -> Result<[u8; N], RowError> {
    if bytes.len() > max {
        return Err(RowError::StringTooLong {
            field,
            len: bytes.len(),
            max,
        });
    }
    let mut column = [0u8; N];
    column[..bytes.len()].copy_from_slice(bytes);
    Ok(column)
}

fn until_terminator(column: &[u8]) -> &[u8] {
    match column.iter().position(|b| *b == 0) {
        Some(end) => &column[..end],
        None => column,
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.id,
            String::from_utf8_lossy(self.username()),
            String::from_utf8_lossy(self.email())
        )
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row")
            .field("id", &self.id)
            .field("username", &String::from_utf8_lossy(self.username()))
            .field("email", &String::from_utf8_lossy(self.email()))
            .finish()
    }
}
