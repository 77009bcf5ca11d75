//! Typed server→client and client→server payloads. Each direction is a
//! distinct namespace of message kinds: the same `kind` byte means
//! different things depending on which side sent it.

use crate::codec::{Decoder, DecodeError, Encoder};

pub mod kind {
    pub mod server {
        pub const ALLOC: u8 = 1;
        pub const FREE: u8 = 2;
        pub const REFERENCES: u8 = 3;
        pub const PAUSE: u8 = 4;
        pub const RESUME: u8 = 5;
    }
    pub mod client {
        pub const REFERENCES: u8 = 1;
        pub const PAUSE: u8 = 2;
        pub const RESUME: u8 = 3;
    }
}

/// One reached object in a `REFERENCES` reply: its address, the type name
/// (possibly annotated with ` (Root)` / ` (Deleted)`), and its direct parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    pub addr: u64,
    pub type_name: String,
    pub parents: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Alloc {
        frame: u64,
        addr: u64,
        size: u32,
        type_name: String,
        call_stack: String,
    },
    Free {
        frame: u64,
        addr: u64,
        size: u32,
    },
    References {
        request_id: u64,
        entries: Vec<ReferenceEntry>,
    },
    Pause {
        request_id: u64,
        error_code: u8,
    },
    Resume {
        request_id: u64,
        error_code: u8,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> u8 {
        use kind::server::*;
        match self {
            ServerMessage::Alloc { .. } => ALLOC,
            ServerMessage::Free { .. } => FREE,
            ServerMessage::References { .. } => REFERENCES,
            ServerMessage::Pause { .. } => PAUSE,
            ServerMessage::Resume { .. } => RESUME,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(64);
        match self {
            ServerMessage::Alloc { frame, addr, size, type_name, call_stack } => {
                enc.write_u64(*frame)
                    .write_u64(*addr)
                    .write_u32(*size)
                    .write_string(type_name)
                    .write_string(call_stack);
            }
            ServerMessage::Free { frame, addr, size } => {
                enc.write_u64(*frame).write_u64(*addr).write_u32(*size);
            }
            ServerMessage::References { request_id, entries } => {
                enc.write_u64(*request_id).write_varint(entries.len() as u64);
                for entry in entries {
                    enc.write_varint(entry.addr).write_string(&entry.type_name);
                    enc.write_varint(entry.parents.len() as u64);
                    for parent in &entry.parents {
                        enc.write_varint(*parent);
                    }
                }
            }
            ServerMessage::Pause { request_id, error_code } | ServerMessage::Resume { request_id, error_code } => {
                enc.write_u64(*request_id).write_u8(*error_code);
            }
        }
        enc.into_vec()
    }

    pub fn decode(kind: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        use kind::server::*;
        let mut dec = Decoder::new(payload);
        Ok(match kind {
            ALLOC => {
                let frame = dec.read_u64()?;
                let addr = dec.read_u64()?;
                let size = dec.read_u32()?;
                let type_name = dec.read_string()?;
                let call_stack = dec.read_string()?;
                ServerMessage::Alloc { frame, addr, size, type_name, call_stack }
            }
            FREE => {
                let frame = dec.read_u64()?;
                let addr = dec.read_u64()?;
                let size = dec.read_u32()?;
                ServerMessage::Free { frame, addr, size }
            }
            REFERENCES => {
                let request_id = dec.read_u64()?;
                let n = dec.read_varint()?;
                let mut entries = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let addr = dec.read_varint()?;
                    let type_name = dec.read_string()?;
                    let p = dec.read_varint()?;
                    let mut parents = Vec::with_capacity(p as usize);
                    for _ in 0..p {
                        parents.push(dec.read_varint()?);
                    }
                    entries.push(ReferenceEntry { addr, type_name, parents });
                }
                ServerMessage::References { request_id, entries }
            }
            PAUSE => {
                let request_id = dec.read_u64()?;
                let error_code = dec.read_u8()?;
                ServerMessage::Pause { request_id, error_code }
            }
            RESUME => {
                let request_id = dec.read_u64()?;
                let error_code = dec.read_u8()?;
                ServerMessage::Resume { request_id, error_code }
            }
            other => return Err(DecodeError::UnknownMessageKind(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    References { request_id: u64, addrs: Vec<u64> },
    Pause { request_id: u64 },
    Resume { request_id: u64 },
}

impl ClientMessage {
    pub fn kind(&self) -> u8 {
        use kind::client::*;
        match self {
            ClientMessage::References { .. } => REFERENCES,
            ClientMessage::Pause { .. } => PAUSE,
            ClientMessage::Resume { .. } => RESUME,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(32);
        match self {
            ClientMessage::References { request_id, addrs } => {
                enc.write_u64(*request_id).write_u64(addrs.len() as u64);
                for addr in addrs {
                    enc.write_u64(*addr);
                }
            }
            ClientMessage::Pause { request_id } | ClientMessage::Resume { request_id } => {
                enc.write_u64(*request_id);
            }
        }
        enc.into_vec()
    }

    pub fn decode(kind: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        use kind::client::*;
        let mut dec = Decoder::new(payload);
        Ok(match kind {
            REFERENCES => {
                let request_id = dec.read_u64()?;
                let n = dec.read_u64()?;
                let mut addrs = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    addrs.push(dec.read_u64()?);
                }
                ClientMessage::References { request_id, addrs }
            }
            PAUSE => ClientMessage::Pause { request_id: dec.read_u64()? },
            RESUME => ClientMessage::Resume { request_id: dec.read_u64()? },
            other => return Err(DecodeError::UnknownMessageKind(other)),
        })
    }
}
