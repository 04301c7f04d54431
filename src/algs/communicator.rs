//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the collective helpers in
//! [`crate::algs::collective`] call `.wait()` on every handle before they
//! trust that a buffer is ready, and before they return.
//!
//! Collective methods (`allgather`, `allreduce_sum`, `barrier`) must be
//! called by every rank in the same order.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::mesh_error::{CommError, MeshJoinError};

/// Typed message tag. Offsets wrap around.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `by` steps after this one.
    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

const ALLGATHER_TAG: CommTag = CommTag::new(0xA110);

/// Non-blocking point-to-point interface plus the few collectives the join needs.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf` to `peer`. The buffer is copied.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of `buf.len()` bytes from `peer`; the data comes back
    /// through [`Wait::wait`].
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// `true` for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }

    /// Gather `sendbuf` from every rank into `recvbuf`, rank-major.
    ///
    /// Every rank passes a `sendbuf` of the same length `n`, and
    /// `recvbuf.len() == n * size()`.
    fn allgather(&self, sendbuf: &[u8], recvbuf: &mut [u8]) -> Result<(), MeshJoinError> {
        let n = sendbuf.len();
        let me = self.rank();
        let size = self.size().max(1);
        if recvbuf.len() != n * size {
            return Err(MeshJoinError::WireError(format!(
                "allgather receive buffer holds {} bytes, expected {}",
                recvbuf.len(),
                n * size
            )));
        }
        recvbuf[me * n..(me + 1) * n].copy_from_slice(sendbuf);

        let peers: Vec<usize> = (0..size).filter(|&r| r != me).collect();
        let mut recvs = Vec::with_capacity(peers.len());
        for &peer in &peers {
            let mut scratch = vec![0u8; n];
            recvs.push((peer, self.irecv(peer, ALLGATHER_TAG.as_u16(), &mut scratch)));
        }
        let mut sends = Vec::with_capacity(peers.len());
        for &peer in &peers {
            sends.push(self.isend(peer, ALLGATHER_TAG.as_u16(), sendbuf));
        }

        let mut maybe_err = None;
        for (peer, h) in recvs {
            match h.wait() {
                Some(data) if data.len() == n => {
                    recvbuf[peer * n..(peer + 1) * n].copy_from_slice(&data);
                }
                Some(data) => {
                    maybe_err.get_or_insert_with(|| MeshJoinError::CommError {
                        neighbor: peer,
                        source: Box::new(CommError(format!(
                            "allgather expected {n} bytes, got {}",
                            data.len()
                        ))),
                    });
                }
                None => {
                    maybe_err.get_or_insert_with(|| MeshJoinError::CommError {
                        neighbor: peer,
                        source: Box::new(CommError(format!(
                            "allgather received nothing from rank {peer}"
                        ))),
                    });
                }
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Element-wise sum of `values` over all ranks, in place.
    fn allreduce_sum(&self, values: &mut [u64]) -> Result<(), MeshJoinError> {
        let n = values.len();
        let mut sendbuf = Vec::with_capacity(n * 8);
        for v in values.iter() {
            sendbuf.extend_from_slice(&v.to_le_bytes());
        }
        let mut recvbuf = vec![0u8; n * 8 * self.size().max(1)];
        self.allgather(&sendbuf, &mut recvbuf)?;
        values.iter_mut().for_each(|v| *v = 0);
        if n == 0 {
            return Ok(());
        }
        for chunk in recvbuf.chunks_exact(n * 8) {
            for (slot, raw) in values.iter_mut().zip(chunk.chunks_exact(8)) {
                let mut b = [0u8; 8];
                b.copy_from_slice(raw);
                *slot = slot.wrapping_add(u64::from_le_bytes(b));
            }
        }
        Ok(())
    }

    /// Block until every rank reaches the barrier.
    fn barrier(&self) -> Result<(), MeshJoinError> {
        let mut recvbuf = vec![0u8; self.size().max(1)];
        self.allgather(&[1u8], &mut recvbuf)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Compile-time no-op comm for pure serial runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: ranks as threads of one process ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// FIFO per key, so repeated collectives on one tag never overtake.
static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);

pub struct LocalHandle {
    buf: Arc<Mutex<Option<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.buf.lock().take()
    }
}

/// In-process communicator: one instance per simulated rank, each driven
/// from its own thread. All instances share a global mailbox, so tests
/// using it must not run concurrently with each other.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
}

impl RayonComm {
    pub fn new(rank: usize, size: usize) -> Self {
        Self { rank, size }
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        MAILBOX
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        let key = (peer, self.rank, tag);
        let buf_arc = Arc::new(Mutex::new(None));
        let buf_arc_clone = buf_arc.clone();
        let buf_len = buf.len();
        let handle = std::thread::spawn(move || {
            loop {
                let msg = MAILBOX.get_mut(&key).and_then(|mut q| q.pop_front());
                if let Some(bytes) = msg {
                    let n = buf_len.min(bytes.len());
                    *buf_arc_clone.lock() = Some(bytes[..n].to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalHandle {
            buf: buf_arc,
            handle: Some(handle),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::mesh_error::MeshJoinError;
    use mpi::collective::SystemOperation;
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI only guarantees tags up to 32767.
    fn mpi_tag(tag: u16) -> i32 {
        (tag & 0x7FFF) as i32
    }

    pub struct MpiComm {
        pub world: SimpleCommunicator,
        pub rank: usize,
        size: usize,
        _universe: Universe,
    }

    // SAFETY: each rank drives its communicator from a single thread; the
    // handles are never used concurrently.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new() -> Result<Self, MeshJoinError> {
            let universe = mpi::initialize().ok_or(MeshJoinError::MpiInit)?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }
    }

    /// Pending request owning its leaked buffer until completion.
    pub struct MpiHandle(Box<dyn FnOnce() -> Option<Vec<u8>>>);

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            (self.0)()
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let ptr: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: `ptr` is a live allocation released only after the
            // request completed.
            let data: &'static [u8] = unsafe { &*ptr };
            let req = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                data,
                mpi_tag(tag),
            );
            MpiHandle(Box::new(move || {
                req.wait();
                // SAFETY: `ptr` came from `Box::into_raw` above and the
                // request no longer references it.
                drop(unsafe { Box::from_raw(ptr) });
                None
            }))
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let ptr: *mut [u8] = Box::into_raw(vec![0u8; buf.len()].into_boxed_slice());
            // SAFETY: as in `isend`; `data` is the only reference made from
            // `ptr` and it goes to the request.
            let data: &'static mut [u8] = unsafe { &mut *ptr };
            let req = self.world.process_at_rank(peer as i32).immediate_receive_into_with_tag(
                StaticScope,
                data,
                mpi_tag(tag),
            );
            MpiHandle(Box::new(move || {
                req.wait();
                // SAFETY: as in `isend`, the request has completed.
                let owned = unsafe { Box::from_raw(ptr) };
                Some(owned.into_vec())
            }))
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn allgather(&self, sendbuf: &[u8], recvbuf: &mut [u8]) -> Result<(), MeshJoinError> {
            self.world.all_gather_into(sendbuf, recvbuf);
            Ok(())
        }

        fn allreduce_sum(&self, values: &mut [u64]) -> Result<(), MeshJoinError> {
            let send = values.to_vec();
            self.world
                .all_reduce_into(&send[..], values, SystemOperation::sum());
            Ok(())
        }

        fn barrier(&self) -> Result<(), MeshJoinError> {
            self.world.barrier();
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn commtag_offset_wraps() {
        assert_eq!(CommTag::new(u16::MAX).offset(1).as_u16(), 0);
        assert_eq!(CommTag::new(10).offset(2), CommTag::new(12));
    }

    #[test]
    #[serial]
    fn rayon_roundtrip_two_ranks() {
        let comm0 = RayonComm::new(0, 2);
        let comm1 = RayonComm::new(1, 2);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comm1.irecv(0, 7, &mut recv_buf);
        let send_handle = comm0.isend(1, 7, &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    #[serial]
    fn rayon_same_tag_is_fifo() {
        let comm0 = RayonComm::new(0, 2);
        let comm1 = RayonComm::new(1, 2);
        comm0.isend(1, 9, &[1]);
        comm0.isend(1, 9, &[2]);
        assert_eq!(comm1.irecv(0, 9, &mut [0u8; 1]).wait(), Some(vec![1]));
        assert_eq!(comm1.irecv(0, 9, &mut [0u8; 1]).wait(), Some(vec![2]));
    }

    #[test]
    #[serial]
    fn rayon_allreduce_three_ranks() {
        let handles: Vec<_> = (0..3)
            .map(|r| {
                std::thread::spawn(move || {
                    let comm = RayonComm::new(r, 3);
                    let mut vals = [r as u64 + 1, 10];
                    comm.allreduce_sum(&mut vals).unwrap();
                    comm.barrier().unwrap();
                    vals
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), [6, 30]);
        }
    }

    #[test]
    fn no_comm_allgather_is_identity() {
        let comm = NoComm;
        let mut out = [0u8; 3];
        comm.allgather(&[4, 5, 6], &mut out).unwrap();
        assert_eq!(out, [4, 5, 6]);
        let mut vals = [7u64];
        comm.allreduce_sum(&mut vals).unwrap();
        assert_eq!(vals, [7]);
    }

    #[cfg(feature = "mpi-support")]
    #[test]
    fn mpi_roundtrip() {
        let comm = MpiComm::new().expect("MPI init");
        let size = comm.size();
        let next = (comm.rank + 1) % size;
        let prev = (comm.rank + size - 1) % size;
        let payload: Vec<u8> = (0..16).map(|i| 40 + i).collect();
        let mut recv = [0u8; 16];
        let r = comm.irecv(prev, 9, &mut recv);
        let s = comm.isend(next, 9, &payload);
        s.wait();
        // the receive buffer comes back whole, at the posted length
        assert_eq!(r.wait(), Some(payload));
    }
}
