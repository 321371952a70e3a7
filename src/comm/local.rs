use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

use super::{Communicator, Tag};
use crate::error::CommError;

struct Envelope {
    src: usize,
    tag: Tag,
    payload: Vec<u8>,
}

/// One process's inbox: the channel receiver plus messages that arrived
/// ahead of the `(src, tag)` the caller is currently waiting for.
struct Endpoint {
    rx: Mutex<Receiver<Envelope>>,
    pending: Mutex<VecDeque<Envelope>>,
}

/// In-process communicator: one endpoint per simulated process, backed by
/// unbounded channels. This is the reference transport used by the tests and
/// by single-machine runs; each endpoint belongs to exactly one thread.
///
/// Message order per `(sender, tag)` is FIFO because each sender's envelopes
/// traverse a single channel in send order. Subgroups created by `split`
/// reuse the parent's channels with translated ranks, so tags must be
/// disjoint across concurrently active protocols (see `comm::tags`).
#[derive(Clone)]
pub struct LocalComm {
    endpoint: Arc<Endpoint>,
    senders: Arc<Vec<Sender<Envelope>>>,
    members: Arc<Vec<usize>>,
    rank: usize,
    global_rank: usize,
}

impl LocalComm {
    /// Creates the endpoints of a `size`-process group; hand one to each
    /// thread.
    pub fn cluster(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "a communicator needs at least one member");
        let mut senders = Vec::with_capacity(size);
        let mut endpoints = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = channel();
            senders.push(tx);
            endpoints.push(Arc::new(Endpoint {
                rx: Mutex::new(rx),
                pending: Mutex::new(VecDeque::new()),
            }));
        }
        let senders = Arc::new(senders);
        let members: Arc<Vec<usize>> = Arc::new((0..size).collect());
        endpoints
            .into_iter()
            .enumerate()
            .map(|(rank, endpoint)| LocalComm {
                endpoint,
                senders: Arc::clone(&senders),
                members: Arc::clone(&members),
                rank,
                global_rank: rank,
            })
            .collect()
    }

    /// Waits until a message from global rank `src` with `tag` is available;
    /// consumes it only when asked to.
    fn wait_matching(&self, src: usize, tag: Tag, consume: bool) -> Result<Envelope, CommError> {
        {
            let mut pending = self.endpoint.pending.lock().unwrap();
            if let Some(at) = pending.iter().position(|e| e.src == src && e.tag == tag) {
                if consume {
                    return Ok(pending.remove(at).unwrap());
                }
                let found = &pending[at];
                return Ok(Envelope {
                    src: found.src,
                    tag: found.tag,
                    payload: found.payload.clone(),
                });
            }
        }
        loop {
            let envelope = {
                let rx = self.endpoint.rx.lock().unwrap();
                rx.recv()
                    .map_err(|_| CommError::Disconnected { rank: src })?
            };
            if envelope.src == src && envelope.tag == tag {
                if !consume {
                    self.endpoint.pending.lock().unwrap().push_back(Envelope {
                        src: envelope.src,
                        tag: envelope.tag,
                        payload: envelope.payload.clone(),
                    });
                }
                return Ok(envelope);
            }
            self.endpoint.pending.lock().unwrap().push_back(envelope);
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn send(&self, dest: usize, tag: Tag, payload: &[u8]) -> Result<(), CommError> {
        let global_dest = self.members[dest];
        self.senders[global_dest]
            .send(Envelope {
                src: self.global_rank,
                tag,
                payload: payload.to_vec(),
            })
            .map_err(|_| CommError::Disconnected { rank: dest })
    }

    fn recv(&self, src: usize, tag: Tag) -> Result<Vec<u8>, CommError> {
        let envelope = self.wait_matching(self.members[src], tag, true)?;
        Ok(envelope.payload)
    }

    fn probe(&self, src: usize, tag: Tag) -> Result<usize, CommError> {
        let envelope = self.wait_matching(self.members[src], tag, false)?;
        Ok(envelope.payload.len())
    }

    fn split(&self, color: usize, key: usize, tag: Tag) -> Result<Self, CommError> {
        // collective agreement on membership: everyone learns every
        // (color, key) and derives the same group layout
        let packed = [(color as u64).to_le_bytes(), (key as u64).to_le_bytes()].concat();
        for dest in 0..self.size() {
            self.send(dest, tag, &packed)?;
        }

        let mut tagged: Vec<(usize, usize, usize)> = Vec::with_capacity(self.size());
        for src in 0..self.size() {
            let payload = self.recv(src, tag)?;
            if payload.len() != 16 {
                return Err(CommError::MalformedPayload {
                    rank: src,
                    reason: "split exchange expects 16 bytes",
                });
            }
            let peer_color = u64::from_le_bytes(payload[..8].try_into().unwrap()) as usize;
            let peer_key = u64::from_le_bytes(payload[8..].try_into().unwrap()) as usize;
            tagged.push((peer_color, peer_key, self.members[src]));
        }

        let mut group: Vec<(usize, usize)> = tagged
            .into_iter()
            .filter(|&(c, _, _)| c == color)
            .map(|(_, key, global)| (key, global))
            .collect();
        group.sort();
        let members: Vec<usize> = group.into_iter().map(|(_, global)| global).collect();
        let rank = members
            .iter()
            .position(|&g| g == self.global_rank)
            .expect("split caller must be a member of its own color");

        Ok(LocalComm {
            endpoint: Arc::clone(&self.endpoint),
            senders: Arc::clone(&self.senders),
            members: Arc::new(members),
            rank,
            global_rank: self.global_rank,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn point_to_point_and_probe() {
        let mut comms = LocalComm::cluster(2);
        let c1 = comms.pop().unwrap();
        let c0 = comms.pop().unwrap();

        let handle = thread::spawn(move || {
            c1.send(0, 7, b"hello").unwrap();
            c1.recv(0, 8).unwrap()
        });

        assert_eq!(c0.probe(1, 7).unwrap(), 5);
        assert_eq!(c0.recv(1, 7).unwrap(), b"hello");
        c0.send(1, 8, b"world").unwrap();
        assert_eq!(handle.join().unwrap(), b"world");
    }

    #[test]
    fn out_of_order_tags_are_buffered() {
        let mut comms = LocalComm::cluster(2);
        let c1 = comms.pop().unwrap();
        let c0 = comms.pop().unwrap();

        let handle = thread::spawn(move || {
            c1.send(0, 1, b"first-tag").unwrap();
            c1.send(0, 2, b"second-tag").unwrap();
        });
        // receive in reverse tag order
        assert_eq!(c0.recv(1, 2).unwrap(), b"second-tag");
        assert_eq!(c0.recv(1, 1).unwrap(), b"first-tag");
        handle.join().unwrap();
    }

    #[test]
    fn fifo_per_sender_and_tag() {
        let mut comms = LocalComm::cluster(2);
        let c1 = comms.pop().unwrap();
        let c0 = comms.pop().unwrap();

        let handle = thread::spawn(move || {
            for i in 0..10u8 {
                c1.send(0, 3, &[i]).unwrap();
            }
        });
        for i in 0..10u8 {
            assert_eq!(c0.recv(1, 3).unwrap(), vec![i]);
        }
        handle.join().unwrap();
    }

    #[test]
    fn collectives_over_four_ranks() {
        let comms = LocalComm::cluster(4);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank();

                    let got = comm
                        .bcast(2, 10, (rank == 2).then_some(&b"pivot"[..]))
                        .unwrap();
                    assert_eq!(got, b"pivot");

                    let parts: Vec<Vec<u8>> =
                        (0..4).map(|dest| vec![rank as u8, dest as u8]).collect();
                    let received = comm.alltoallv(&parts, 11).unwrap();
                    for (src, payload) in received.iter().enumerate() {
                        assert_eq!(payload, &vec![src as u8, rank as u8]);
                    }

                    let exscan = comm.exscan_sum(10 + rank as u64, 12).unwrap();
                    let expected: u64 = (0..rank as u64).map(|r| 10 + r).sum();
                    assert_eq!(exscan, expected);

                    let total = comm.allreduce_sum(rank as u64, 13).unwrap();
                    assert_eq!(total, 6);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn split_forms_disjoint_groups_with_key_order() {
        let comms = LocalComm::cluster(4);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank();
                    // evens and odds, keyed by reverse rank
                    let sub = comm.split(rank % 2, 10 - rank, 20).unwrap();
                    assert_eq!(sub.size(), 2);
                    // key order reverses the global order inside each group
                    let expected_rank = if rank < 2 { 1 } else { 0 };
                    assert_eq!(sub.rank(), expected_rank);

                    // the subgroup is a working communicator
                    let sum = sub.allreduce_sum(rank as u64, 21).unwrap();
                    let expected_sum = if rank % 2 == 0 { 2 } else { 4 };
                    assert_eq!(sum, expected_sum);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
