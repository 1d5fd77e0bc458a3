//! Integration tests for container command idempotency.
//!
//! Every command kind is applied repeatedly, the way retries and log replays
//! deliver it, and must leave the same state and return the same result as a
//! single application.

use tessera_core::prelude::*;

fn chunk_write(block: BlockId, name: &str, data: &[u8], overwrite: bool) -> ContainerCommand {
    ContainerCommand::write_chunk(block, ChunkInfo::for_data(name, 0, data), data.to_vec(), overwrite)
}

#[test]
fn test_container_lifecycle_scenario() {
    let sm = ContainerStateMachine::default();
    let c1 = ContainerId::new(1);
    let block_a = BlockId::new(c1, 100);
    let data = b"block A payload".to_vec();

    // CreateContainer twice.
    let create = ContainerCommand::create(c1);
    let created = sm.apply(&create).unwrap();
    let after_create = sm.container(c1).unwrap();
    assert_eq!(sm.apply(&create).unwrap(), created);
    assert_eq!(sm.container(c1).unwrap(), after_create);

    // A second CreateContainer with its own command id is also a no-op.
    assert!(sm.apply(&ContainerCommand::create(c1)).is_ok());
    assert_eq!(sm.container(c1).unwrap(), after_create);

    // WriteChunk twice without overwrite.
    let write = chunk_write(block_a, "chunk-0", &data, false);
    let written = sm.apply(&write).unwrap();
    let bytes_after_first = sm.container(c1).unwrap().stats.bytes_written;
    assert_eq!(sm.apply(&write).unwrap(), written);
    assert_eq!(sm.container(c1).unwrap().stats.bytes_written, bytes_after_first);
    assert_eq!(sm.read_chunk(block_a, "chunk-0").unwrap(), data);

    // PutBlock twice.
    let put = ContainerCommand::put_block(BlockData::new(
        block_a,
        1,
        vec![ChunkInfo::for_data("chunk-0", 0, &data)],
    ));
    let committed = sm.apply(&put).unwrap();
    assert_eq!(sm.apply(&put).unwrap(), committed);
    assert_eq!(sm.block(block_a).unwrap().bcsid, 1);

    // CloseContainer twice.
    let close = ContainerCommand::close(c1);
    let closed = sm.apply(&close).unwrap();
    assert_eq!(sm.state(c1), Some(ContainerState::Closed));
    assert_eq!(sm.apply(&close).unwrap(), closed);
    assert!(sm.apply(&ContainerCommand::close(c1)).is_ok());
    assert_eq!(sm.state(c1), Some(ContainerState::Closed));
}

#[test]
fn test_n_applications_equal_one() {
    let c = ContainerId::new(2);
    let block = BlockId::new(c, 1);
    let data = b"abcdef".to_vec();
    let log = vec![
        ContainerCommand::create(c),
        chunk_write(block, "c0", &data, false),
        ContainerCommand::put_block(BlockData::new(block, 4, vec![ChunkInfo::for_data("c0", 0, &data)])),
        ContainerCommand::mark_closing(c),
        ContainerCommand::close(c),
    ];

    let once = ContainerStateMachine::default();
    let once_results: Vec<_> = log.iter().map(|cmd| once.apply(cmd)).collect();

    for n in 2..5 {
        let many = ContainerStateMachine::default();
        for (cmd, expected) in log.iter().zip(&once_results) {
            for _ in 0..n {
                assert_eq!(&many.apply(cmd), expected, "{} applied {n} times", cmd.name());
            }
        }
        assert_eq!(many.container(c), once.container(c));
        assert_eq!(many.metadata_digest(c).unwrap(), once.metadata_digest(c).unwrap());
    }
}

#[test]
fn test_structural_violations_are_rejected() {
    let sm = ContainerStateMachine::default();
    let c = ContainerId::new(3);
    let block = BlockId::new(c, 1);
    sm.apply(&ContainerCommand::create(c)).unwrap();
    sm.apply(&chunk_write(block, "c0", b"first", false)).unwrap();

    let mismatch = sm.apply(&chunk_write(block, "c0", b"second", false)).unwrap_err();
    assert_eq!(
        mismatch,
        TesseraError::ChunkAlreadyExists {
            block_id: block,
            chunk_name: "c0".to_string()
        }
    );
    assert!(mismatch.is_structural());

    // Overwrite replaces unconditionally.
    sm.apply(&chunk_write(block, "c0", b"second", true)).unwrap();
    assert_eq!(sm.read_chunk(block, "c0").unwrap(), b"second".to_vec());

    sm.apply(&ContainerCommand::mark_closing(c)).unwrap();
    let err = sm.apply(&chunk_write(block, "c1", b"late", false)).unwrap_err();
    assert_eq!(
        err,
        TesseraError::ContainerNotOpen {
            container_id: c,
            state: ContainerState::Closing
        }
    );
}

#[test]
fn test_bcsid_is_monotonic() {
    let sm = ContainerStateMachine::default();
    let c = ContainerId::new(4);
    let block = BlockId::new(c, 9);
    sm.apply(&ContainerCommand::create(c)).unwrap();

    sm.apply(&ContainerCommand::put_block(BlockData::new(block, 10, vec![]))).unwrap();
    let stale = sm
        .apply(&ContainerCommand::put_block(BlockData::new(block, 3, vec![])))
        .unwrap();
    assert_eq!(stale, CommandResult::Block(BlockData::new(block, 10, vec![])));

    sm.apply(&ContainerCommand::put_block(BlockData::new(block, 11, vec![]))).unwrap();
    assert_eq!(sm.container(c).unwrap().bcsid, 11);
}

#[test]
fn test_independent_containers_apply_concurrently() {
    let sm = std::sync::Arc::new(ContainerStateMachine::default());
    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let sm = sm.clone();
            std::thread::spawn(move || {
                let c = ContainerId::new(i);
                sm.apply(&ContainerCommand::create(c)).unwrap();
                for j in 0..50u64 {
                    let data = format!("{i}-{j}").into_bytes();
                    let cmd = chunk_write(BlockId::new(c, j), "c", &data, false);
                    sm.apply(&cmd).unwrap();
                    sm.apply(&cmd).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(sm.container_ids().len(), 8);
    for id in sm.container_ids() {
        let stats = sm.container(id).unwrap().stats;
        assert_eq!(stats.chunk_writes, 50);
    }
}

#[test]
fn test_unhealthy_is_reachable_from_any_state() {
    let sm = ContainerStateMachine::default();
    let c = ContainerId::new(5);
    sm.apply(&ContainerCommand::create(c)).unwrap();
    sm.apply(&ContainerCommand::close(c)).unwrap();

    let mark = ContainerCommand::mark_unhealthy(c, "checksum failure on disk");
    sm.apply(&mark).unwrap();
    sm.apply(&mark).unwrap();
    assert_eq!(sm.state(c), Some(ContainerState::Unhealthy));

    let err = sm.apply(&ContainerCommand::close(c)).unwrap_err();
    assert_eq!(err.code(), "E105");
}
