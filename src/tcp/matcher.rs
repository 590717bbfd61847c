//! Per-connection receive-buffer state machine (spec §4.5).

use std::sync::Arc;
use std::time::Duration;

use crate::diag::{matcher_trace, server_debug};
use crate::mock::{MockCell, TcpMockCell, TcpMockKind};
use crate::predicate::{compare, Actual};
use crate::resolver::{tcp_to_bool, tcp_to_bytes, tcp_to_int};

/// A resolved TCP response, ready to write.
pub struct ResolvedTcp {
    pub body: Vec<u8>,
    pub body_delay: Duration,
    pub destroy_socket: bool,
}

/// Whether `cell` may currently match on `conn_id` (spec §4.5 step 2's head/
/// tail eligibility rules).
fn eligible_on(cell: &TcpMockCell, conn_id: u64) -> bool {
    if cell.is_head() {
        true
    } else {
        cell.pin_record()
            .map(|pin| pin.bound_to(conn_id))
            .unwrap_or(false)
    }
}

/// On connection established: the first pending init mock, if any (spec
/// §4.5 "On connection established").
pub fn try_init(mocks: &[Arc<TcpMockCell>], conn_id: u64) -> Option<(Arc<TcpMockCell>, Vec<u8>)> {
    for cell in mocks {
        if cell.is_done() {
            continue;
        }
        if let TcpMockKind::Init(payload) = &cell.kind {
            if !cell.mark_done() {
                continue;
            }
            if let Some(pin) = cell.pin_record() {
                pin.bind(conn_id);
            }
            let bytes = tcp_to_bytes(payload, &[]);
            server_debug!("tcp conn {conn_id}: init mock #{} wrote {} bytes", cell.id(), bytes.len());
            return Some((cell.clone(), bytes));
        }
    }
    None
}

/// Scan for the first pending, eligible, satisfied req/res mock against the
/// entire accumulated buffer (spec §4.5 step 2, "not a sliding window").
fn find_match(mocks: &[Arc<TcpMockCell>], conn_id: u64, buffer: &[u8]) -> Option<Arc<TcpMockCell>> {
    mocks
        .iter()
        .find(|cell| {
            if cell.is_done() {
                return false;
            }
            match &cell.kind {
                TcpMockKind::Init(_) => false,
                TcpMockKind::ReqRes { req, .. } => {
                    if !eligible_on(cell, conn_id) {
                        return false;
                    }
                    let satisfied = compare(req, &Actual::from(buffer));
                    if !satisfied {
                        matcher_trace!("tcp conn {conn_id}: mock #{} not satisfied by buffer", cell.id());
                    }
                    satisfied
                }
            }
        })
        .cloned()
}

/// Per-connection receive-buffer state (spec §3 "Receive buffer (TCP)").
pub struct TcpConnection {
    id: u64,
    buffer: Vec<u8>,
}

impl TcpConnection {
    pub fn new(id: u64) -> Self {
        Self { id, buffer: Vec::new() }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Append `data` and attempt a match; clears the buffer on success (spec
    /// §4.5 step 3).
    pub fn on_data(
        &mut self,
        data: &[u8],
        mocks: &[Arc<TcpMockCell>],
    ) -> Option<(Arc<TcpMockCell>, ResolvedTcp)> {
        self.buffer.extend_from_slice(data);

        let cell = find_match(mocks, self.id, &self.buffer)?;
        if !cell.mark_done() {
            // Lost a race with another thread also scanning this connection's
            // snapshot; caller will try again on the next chunk.
            return None;
        }
        if cell.is_head() {
            if let Some(pin) = cell.pin_record() {
                pin.bind(self.id);
            }
        }

        let matched_buffer = std::mem::take(&mut self.buffer);

        let res = match &cell.kind {
            TcpMockKind::ReqRes { res, .. } => res,
            TcpMockKind::Init(_) => unreachable!("find_match excludes init mocks"),
        };
        let record = res.resolve_record(&matched_buffer);
        let resolved = ResolvedTcp {
            body: tcp_to_bytes(&record.body, &matched_buffer),
            body_delay: Duration::from_millis(
                tcp_to_int(&record.body_delay, &matched_buffer, 0).max(0) as u64,
            ),
            destroy_socket: tcp_to_bool(&record.destroy_socket, &matched_buffer),
        };

        server_debug!("tcp conn {}: matched mock #{}", self.id, cell.id());
        Some((cell, resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{TcpResponseDescriptor, TcpResponseRecord};
    use crate::mockset::MockSet;
    use crate::predicate::Predicate;
    use crate::resolver::TcpFieldValue;

    fn reqres_mock(set: &MockSet<TcpMockCell>, req: Predicate, body: &str) -> Arc<TcpMockCell> {
        let id = set.next_id();
        let cell = Arc::new(TcpMockCell::new(
            id,
            TcpMockKind::ReqRes {
                req,
                res: TcpResponseDescriptor::Record(TcpResponseRecord {
                    body: TcpFieldValue::literal(body.as_bytes().to_vec()),
                    ..TcpResponseRecord::default()
                }),
            },
        ));
        set.register(cell.clone());
        cell
    }

    #[test]
    fn matches_across_writes_and_clears_buffer() {
        let set = MockSet::new();
        reqres_mock(&set, Predicate::bytes(b"abcd".to_vec()), "1234");

        let mut conn = TcpConnection::new(1);
        assert!(conn.on_data(b"ab", &set.snapshot()).is_none());
        let (_cell, resolved) = conn.on_data(b"cd", &set.snapshot()).unwrap();
        assert_eq!(resolved.body, b"1234");
        assert!(conn.buffer.is_empty());
    }
}
