//! Chunked bulk transfer across endpoint threads.

mod common;

use common::{run_endpoints, test_config};
use ssmp_core::{Message, SsmpError, CHUNK_SIZE};

fn pattern(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + seed * 7) % 256) as u8).collect()
}

#[test]
fn round_trip_for_edge_lengths() {
    let lengths = [
        0,
        1,
        CHUNK_SIZE - 1,
        CHUNK_SIZE,
        CHUNK_SIZE + 1,
        10 * CHUNK_SIZE + 37,
    ];
    run_endpoints(test_config("big", 2), 2, move |ep| {
        for (seed, &len) in lengths.iter().enumerate() {
            if ep.id().get() == 0 {
                ep.send(1u32, &Message::with_w0(len as i32));
                ep.send_big(1u32, &pattern(len, seed));
                // wait for the receiver so transfers never overlap
                assert_eq!(ep.recv_from(1u32).w0(), len as i32);
            } else {
                let announced = ep.recv_from(0u32).w0() as usize;
                assert_eq!(announced, len);
                let mut buf = vec![0u8; announced];
                ep.recv_from_big(0u32, &mut buf).unwrap();
                assert_eq!(buf, pattern(len, seed), "mismatch for length {}", len);
                ep.send(0u32, &Message::with_w0(len as i32));
            }
        }
    });
}

#[test]
fn bidirectional_transfers_use_separate_buffers() {
    run_endpoints(test_config("bidir", 2), 2, |ep| {
        let me = ep.id().get();
        let peer = 1 - me;
        let out = pattern(3 * CHUNK_SIZE + 5, me as usize);
        let mut back = vec![0u8; out.len()];
        // one side sends first so neither blocks on a full buffer it must drain
        if me == 0 {
            ep.send_big(peer, &out);
            ep.recv_from_big(peer, &mut back).unwrap();
        } else {
            ep.recv_from_big(peer, &mut back).unwrap();
            ep.send_big(peer, &out);
        }
        assert_eq!(back, pattern(out.len(), peer as usize));
    });
}

#[test]
fn chunk_from_unexpected_sender_is_reported() {
    run_endpoints(test_config("wrong", 3), 3, |ep| match ep.id().get() {
        2 => {
            ep.send_big(1u32, &[7u8; 64]);
        }
        1 => {
            let mut buf = [0u8; 64];
            let err = ep.recv_from_big(0u32, &mut buf).unwrap_err();
            assert!(matches!(err, SsmpError::Protocol(_)));
            assert_eq!(buf, [0u8; 64]);
            // the chunk is still there for the right caller
            ep.recv_from_big(2u32, &mut buf).unwrap();
            assert_eq!(buf, [7u8; 64]);
        }
        _ => {}
    });
}

#[test]
#[should_panic(expected = "cannot message itself")]
fn receiving_bulk_from_self_panics() {
    run_endpoints(test_config("bself", 2), 2, |ep| {
        if ep.id().get() == 0 {
            let mut buf = [0u8; 8];
            let _ = ep.recv_from_big(0u32, &mut buf);
        }
    });
}
