//! Wire-level enums used by the DNS message header and question section.
//!
//! Trimmed from the teacher's much larger `enums.rs`: this project only
//! ever builds PTR answers and pass-through RCODE responses, and compares
//! the parsed QTYPE directly against the [`PTR_TYPE`] constant, so the
//! teacher's full `RecordType`/`RecordClass` catalogue has no counterpart
//! here.

use packed_struct::prelude::*;

#[derive(Debug, Eq, PartialEq, PrimitiveEnum_u8, Copy, Clone)]
/// A four bit field that specifies the kind of query in a message.
pub enum OpCode {
    /// A standard query (QUERY)
    Query = 0,
    /// Server status request (STATUS)
    Status = 2,
    /// 3-15, reserved for future use
    Reserved = 15,
}

impl From<u8> for OpCode {
    fn from(input: u8) -> Self {
        match input {
            0 => Self::Query,
            2 => Self::Status,
            _ => Self::Reserved,
        }
    }
}

#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, Eq, PartialEq)]
/// Response code: NOERROR, FORMATERROR, SERVFAIL, etc.
pub enum Rcode {
    NoError = 0,
    FormatError = 1,
    ServFail = 2,
    /// The domain name referenced in the query does not exist.
    NameError = 3,
    NotImplemented = 4,
    Refused = 5,
}

impl From<u8> for Rcode {
    fn from(input: u8) -> Self {
        match input {
            0 => Self::NoError,
            1 => Self::FormatError,
            2 => Self::ServFail,
            3 => Self::NameError,
            4 => Self::NotImplemented,
            _ => Self::Refused,
        }
    }
}

#[derive(Debug, PrimitiveEnum_u8, Clone, Copy, Eq, PartialEq)]
pub enum PacketType {
    Query = 0,
    Answer = 1,
}

impl From<bool> for PacketType {
    fn from(input: bool) -> Self {
        match input {
            false => Self::Query,
            true => Self::Answer,
        }
    }
}

/// The only record type this project ever needs to recognize; everything
/// else is an opaque pass-through value compared directly against this
/// constant, per SPEC_FULL.md §4.1.
pub const PTR_TYPE: u16 = 12;
pub const RECORD_CLASS_IN: u16 = 1;
