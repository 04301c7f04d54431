//! All-to-all exchange of variable-sized byte buffers.
//!
//! Two symmetric phases: every rank first tells every peer how many bytes
//! follow, then the payloads travel. Both functions are collective and
//! guarantee that every send/receive handle is drained before returning,
//! even if an error occurs.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use bytemuck::Zeroable;

use crate::algs::wire::{WireCount, read_records, wire_count, write_records};
use crate::mesh_error::{CommError, MeshJoinError};

/// Exchange one count with every other rank.
///
/// `counts[r]` is what this rank announces to rank `r`; the result holds what
/// every rank announced to this one (the own slot is copied through). A count
/// too large for the wire is announced as 0 and reported once the exchange
/// completed.
pub fn exchange_sizes<C>(
    comm: &C,
    counts: &[usize],
    tag: CommTag,
) -> Result<Vec<usize>, MeshJoinError>
where
    C: Communicator,
{
    let me = comm.rank();
    let size = comm.size().max(1);
    if counts.len() != size {
        return Err(MeshJoinError::WireError(format!(
            "exchange_sizes got {} counts for {size} ranks",
            counts.len()
        )));
    }
    let mut sizes_in = vec![0usize; size];
    sizes_in[me] = counts[me];
    if comm.is_no_comm() || size == 1 {
        return Ok(sizes_in);
    }

    // 1) post all receives
    let mut recvs = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != me) {
        let mut cnt = [0u8; std::mem::size_of::<WireCount>()];
        recvs.push((peer, comm.irecv(peer, tag.as_u16(), &mut cnt)));
    }

    // 2) post all sends
    let mut maybe_err = None;
    let mut pending_sends = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != me) {
        let cnt = WireCount::new(counts[peer]).unwrap_or_else(|e| {
            maybe_err.get_or_insert(e);
            WireCount::zeroed()
        });
        let mut buf = Vec::with_capacity(std::mem::size_of::<WireCount>());
        write_records(&mut buf, &[cnt]);
        pending_sends.push(comm.isend(peer, tag.as_u16(), &buf));
    }

    // 3) wait for all recvs, collect counts (but do not early-return)
    for (peer, h) in recvs {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                match read_records::<WireCount>(&data, 1) {
                    Ok((cnt, _)) => sizes_in[peer] = cnt[0].get(),
                    Err(e) => {
                        maybe_err.get_or_insert(e);
                    }
                }
            }
            Some(data) => {
                maybe_err.get_or_insert_with(|| MeshJoinError::CommError {
                    neighbor: peer,
                    source: Box::new(CommError(format!(
                        "expected {} bytes for size header, got {}",
                        std::mem::size_of::<WireCount>(),
                        data.len()
                    ))),
                });
            }
            None => {
                maybe_err.get_or_insert_with(|| MeshJoinError::CommError {
                    neighbor: peer,
                    source: Box::new(CommError(format!("failed to receive size from rank {peer}"))),
                });
            }
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}

/// Send `send[r]` to every rank `r` and return what every rank sent here.
///
/// Uses `tag` for the size phase and `tag.offset(1)` for the payloads. A
/// buffer too large for the wire travels empty and fails the call after the
/// exchange.
pub fn exchange_payloads<C>(
    comm: &C,
    mut send: Vec<Vec<u8>>,
    tag: CommTag,
) -> Result<Vec<Vec<u8>>, MeshJoinError>
where
    C: Communicator,
{
    let me = comm.rank();
    let size = comm.size().max(1);
    let mut maybe_err = None;
    for buf in send.iter_mut() {
        if let Err(e) = wire_count(buf.len()) {
            maybe_err.get_or_insert(e);
            buf.clear();
        }
    }
    let counts: Vec<usize> = send.iter().map(Vec::len).collect();
    let sizes_in = exchange_sizes(comm, &counts, tag)?;

    let mut received = vec![Vec::new(); size];
    received[me] = std::mem::take(&mut send[me]);
    if comm.is_no_comm() || size == 1 {
        return match maybe_err {
            Some(err) => Err(err),
            None => Ok(received),
        };
    }

    let data_tag = tag.offset(1).as_u16();
    let mut recvs = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != me) {
        let mut buffer = vec![0u8; sizes_in[peer]];
        recvs.push((peer, comm.irecv(peer, data_tag, &mut buffer)));
    }
    // always post a send, even if empty
    let mut pending_sends = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != me) {
        pending_sends.push(comm.isend(peer, data_tag, &send[peer]));
    }

    for (peer, h) in recvs {
        match h.wait() {
            Some(raw) if raw.len() == sizes_in[peer] => received[peer] = raw,
            Some(raw) => {
                maybe_err.get_or_insert_with(|| MeshJoinError::CommError {
                    neighbor: peer,
                    source: Box::new(CommError(format!(
                        "expected {} payload bytes from {peer}, got {}",
                        sizes_in[peer],
                        raw.len()
                    ))),
                });
            }
            None if sizes_in[peer] == 0 => {}
            None => {
                maybe_err.get_or_insert_with(|| MeshJoinError::CommError {
                    neighbor: peer,
                    source: Box::new(CommError(format!("failed to receive payload from rank {peer}"))),
                });
            }
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(received),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};
    use serial_test::serial;

    #[test]
    fn serial_exchange_keeps_own_slot() {
        let out = exchange_payloads(&NoComm, vec![vec![1, 2, 3]], CommTag::new(0x10)).unwrap();
        assert_eq!(out, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn wrong_count_len_is_rejected() {
        assert!(exchange_sizes(&NoComm, &[1, 2], CommTag::new(0x10)).is_err());
    }

    #[test]
    #[serial]
    fn three_ranks_all_to_all() {
        let handles: Vec<_> = (0..3usize)
            .map(|r| {
                std::thread::spawn(move || {
                    let comm = RayonComm::new(r, 3);
                    // rank r sends r+1 copies of (10*r + dst) to dst
                    let send = (0..3usize)
                        .map(|dst| vec![(10 * r + dst) as u8; r + 1])
                        .collect();
                    exchange_payloads(&comm, send, CommTag::new(0x2000)).unwrap()
                })
            })
            .collect();
        for (me, h) in handles.into_iter().enumerate() {
            let got = h.join().unwrap();
            for (src, buf) in got.iter().enumerate() {
                assert_eq!(buf, &vec![(10 * src + me) as u8; src + 1]);
            }
        }
    }

    #[test]
    #[serial]
    #[cfg(target_pointer_width = "64")]
    fn oversized_count_fails_only_its_sender() {
        let handles: Vec<_> = (0..3usize)
            .map(|r| {
                std::thread::spawn(move || {
                    let comm = RayonComm::new(r, 3);
                    let mut counts = vec![r + 1; 3];
                    if r == 0 {
                        counts[1] = u32::MAX as usize + 1;
                    }
                    exchange_sizes(&comm, &counts, CommTag::new(0x2100))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(matches!(results[0], Err(MeshJoinError::WireError(_))));
        // the refused count reaches its peer as 0
        assert_eq!(results[1].as_ref().unwrap(), &vec![0, 2, 3]);
        assert_eq!(results[2].as_ref().unwrap(), &vec![1, 2, 3]);
    }
}
