use crate::esy::frame::MsgHeader;

use bytes::BufMut;
use chrono::Utc;
use enum_dispatch::enum_dispatch;
use std::sync::atomic::{AtomicU32, Ordering};

/// userId tail 0xFC14: single-register writes (from traffic analysis).
pub const USER_ID_WRITE: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC, 0x14];
/// userId tail 0xFC17: multi-writes and poll requests.
pub const USER_ID_CONTROL: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC, 0x17];

pub const SOURCE_APP: u8 = 0x10;
pub const FUN_WRITE: u8 = 0x00;
pub const FUN_POLL: u8 = 0x20;
pub const PAGE_WRITE: u16 = 0x0800;
pub const PAGE_POLL: u16 = 0x0300;

/// Holding register that selects the pattern mode.
pub const MODE_REGISTER: u16 = 57;

/// Segments the app requests on a normal poll cycle.
pub const DEFAULT_POLL_SEGMENTS: [u16; 4] = [0, 1, 3, 6];

#[enum_dispatch]
pub trait WireCommand {
    fn user_id(&self) -> [u8; 8];
    fn fun_code(&self) -> u8;
    fn page_index(&self) -> u16;
    fn payload(&self) -> Vec<u8>;
}

/// Write one value to one register.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteSingle {
    pub register: u16,
    pub value: u16,
}

impl WireCommand for WriteSingle {
    fn user_id(&self) -> [u8; 8] {
        USER_ID_WRITE
    }

    fn fun_code(&self) -> u8 {
        FUN_WRITE
    }

    fn page_index(&self) -> u16 {
        PAGE_WRITE
    }

    fn payload(&self) -> Vec<u8> {
        let mut p = Vec::with_capacity(8);
        p.put_u16(1); // one operation
        p.put_u16(self.register);
        p.put_u16(1); // one value
        p.put_u16(self.value);
        p
    }
}

/// Write runs of values to several registers in one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteMultiple {
    pub writes: Vec<(u16, Vec<u16>)>,
}

impl WireCommand for WriteMultiple {
    fn user_id(&self) -> [u8; 8] {
        USER_ID_CONTROL
    }

    fn fun_code(&self) -> u8 {
        FUN_WRITE
    }

    fn page_index(&self) -> u16 {
        PAGE_WRITE
    }

    fn payload(&self) -> Vec<u8> {
        let mut p = Vec::new();
        p.put_u16(self.writes.len() as u16);
        for (addr, values) in &self.writes {
            p.put_u16(*addr);
            p.put_u16(values.len() as u16);
            for v in values {
                p.put_u16(*v);
            }
        }
        p
    }
}

/// Ask the device to publish specific segments on the UP topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollRequest {
    pub segments: Vec<u16>,
}

impl WireCommand for PollRequest {
    fn user_id(&self) -> [u8; 8] {
        USER_ID_CONTROL
    }

    fn fun_code(&self) -> u8 {
        FUN_POLL
    }

    fn page_index(&self) -> u16 {
        PAGE_POLL
    }

    fn payload(&self) -> Vec<u8> {
        let mut p = Vec::with_capacity(2 + self.segments.len() * 2);
        p.put_u16(self.segments.len() as u16);
        for id in &self.segments {
            p.put_u16(*id);
        }
        p
    }
}

#[enum_dispatch(WireCommand)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Downlink {
    WriteSingle,
    WriteMultiple,
    PollRequest,
}

impl Downlink {
    /// Frames the command as header + payload bytes ready to publish.
    pub fn frame(&self, config_id: u32, msg_id: u32) -> Vec<u8> {
        let payload = self.payload();
        let header = MsgHeader {
            config_id,
            msg_id,
            user_id: self.user_id(),
            fun_code: self.fun_code(),
            source_id: SOURCE_APP,
            page_index: self.page_index(),
            data_length: payload.len() as u32,
        };

        let mut out = Vec::with_capacity(24 + payload.len());
        out.extend_from_slice(&header.bytes());
        out.extend_from_slice(&payload);
        out
    }
}

/// Builds downlink frames with the right msgId policy per command class:
/// polls and plain register writes get a monotonic counter, mode changes
/// get the coarse wall-clock so retries are distinguishable on the wire.
pub struct CommandBuilder {
    config_id: u32,
    msg_id: AtomicU32,
}

impl CommandBuilder {
    pub fn new(config_id: u32) -> Self {
        Self {
            config_id,
            msg_id: AtomicU32::new(0),
        }
    }

    pub fn config_id(&self) -> u32 {
        self.config_id
    }

    fn next_msg_id(&self) -> u32 {
        self.msg_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn write_register(&self, register: u16, value: u16) -> Vec<u8> {
        Downlink::from(WriteSingle { register, value }).frame(self.config_id, self.next_msg_id())
    }

    pub fn write_registers(&self, writes: Vec<(u16, Vec<u16>)>) -> Vec<u8> {
        Downlink::from(WriteMultiple { writes }).frame(self.config_id, self.next_msg_id())
    }

    pub fn poll(&self, segments: &[u16]) -> Vec<u8> {
        Downlink::from(PollRequest {
            segments: segments.to_vec(),
        })
        .frame(self.config_id, self.next_msg_id())
    }

    pub fn set_mode(&self, code: u16) -> Vec<u8> {
        let msg_id = Utc::now().timestamp() as u32;
        Downlink::from(WriteSingle {
            register: MODE_REGISTER,
            value: code,
        })
        .frame(self.config_id, msg_id)
    }
}
