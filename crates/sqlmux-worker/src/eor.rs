//! End-of-response coding.
//!
//! Every final reply of the native protocol is an EOR netstring (command
//! 502). Its payload is the ASCII state code (`'0' + code`), the two bytes
//! of the request id (high byte first), then the serialized form of any
//! wrapped packets.

use sqlmux_wire::netstring;
use sqlmux_wire::{EorCode, NetstringCommand, Packet, ResponseCode};

/// Builds EOR packets and owns the request id sequence.
#[derive(Debug, Clone, Default)]
pub struct ResponseCoder {
    rq_id: u16,
    more_pending: bool,
    restart: bool,
}

impl ResponseCoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The request id the next EOR will carry.
    pub fn request_id(&self) -> u16 {
        self.rq_id
    }

    /// Restart the sequence at `id`.
    pub fn set_request_id(&mut self, id: u16) {
        self.rq_id = id;
    }

    /// Does the reader already hold further requests?
    pub fn set_more_pending(&mut self, more: bool) {
        self.more_pending = more;
    }

    /// Report `Restart` on every EOR from now on.
    ///
    /// Set once the backend connection has to be replaced; the client should
    /// reconnect after reading the reply.
    pub fn set_restart(&mut self) {
        self.restart = true;
    }

    pub fn restart_pending(&self) -> bool {
        self.restart
    }

    /// Wrap `inner` in an EOR carrying `code`.
    ///
    /// `Free` is reported as `MoreIncomingRequests` while more requests are
    /// buffered, and any code becomes `Restart` after [`set_restart`]. Each
    /// call consumes one request id.
    ///
    /// [`set_restart`]: ResponseCoder::set_restart
    pub fn eor(&mut self, code: EorCode, inner: &[Packet]) -> Packet {
        let code = if self.restart {
            EorCode::Restart
        } else if code == EorCode::Free && self.more_pending {
            EorCode::MoreIncomingRequests
        } else {
            code
        };
        let id = self.rq_id;
        self.rq_id = self.rq_id.wrapping_add(1);

        let inner_len: usize = inner.iter().map(|p| p.serialized().len()).sum();
        let mut payload = Vec::with_capacity(3 + inner_len);
        payload.push(b'0' + code.code());
        payload.extend_from_slice(&id.to_be_bytes());
        for packet in inner {
            payload.extend_from_slice(packet.serialized());
        }
        tracing::trace!(code = %code, rq_id = id, wrapped = inner.len(), "eor");
        netstring::encode(NetstringCommand::Eor.code(), &payload)
    }
}

/// A native response packet.
pub fn response(code: ResponseCode, payload: &[u8]) -> Packet {
    netstring::encode(code.code(), payload)
}

/// A `Value` response carrying text.
pub fn value(text: impl AsRef<[u8]>) -> Packet {
    response(ResponseCode::Value, text.as_ref())
}

/// Split an EOR payload into its code, request id and wrapped bytes.
pub fn parse_eor(payload: &[u8]) -> Option<(EorCode, u16, &[u8])> {
    let (&code, rest) = payload.split_first()?;
    let code = EorCode::from_code(code.checked_sub(b'0')?)?;
    let id = u16::from_be_bytes([*rest.first()?, *rest.get(1)?]);
    Some((code, id, &rest[2..]))
}
