//! Fuzz target: `ChunkPool` (firmware chunk ring)
//!
//! The first bytes pick the pool depth and chunk size; the rest is a
//! script of engine feeds (with fuzzed offsets) interleaved with worker
//! drains, aborts and injected write errors. Checks:
//! - No panics or out-of-bounds copies under any script
//! - Chunks reach the writer in order, on chunk boundaries
//! - A write error makes every later feed refuse with `InvalidData`
//!
//! cargo fuzz run fuzz_firmware_pipeline

#![no_main]

use cloudlink::error::FirmwareDataError;
use cloudlink::firmware::{ChunkPool, DownloadStatus, Feed};
use libfuzzer_sys::fuzz_target;

const IMAGE_SIZE: u32 = 1024;

fuzz_target!(|data: &[u8]| {
    let [pool_size, chunk_size, script @ ..] = data else {
        return;
    };
    let chunk_size = u32::from(*chunk_size) + 1;
    let mut pool = ChunkPool::new(pool_size % 6);
    pool.begin(0, IMAGE_SIZE, chunk_size);

    let mut next_write = 0u32;
    let mut failed = false;
    let mut ops = script.chunks_exact(3);
    for op in &mut ops {
        let (kind, a, b) = (op[0] % 5, op[1], op[2]);
        match kind {
            0 | 1 => {
                let offset = if kind == 0 {
                    pool.tail_offset()
                } else {
                    u32::from(a) * 4
                };
                let room = (IMAGE_SIZE - pool.tail_offset()) as usize;
                if room == 0 {
                    continue;
                }
                let len = (b as usize % 97 + 1).min(room);
                let piece = vec![a; len];
                let fed = pool.feed(0, offset, &piece);
                if failed && pool.is_started() {
                    assert_eq!(fed, Feed::Refused(DownloadStatus::InvalidData));
                }
            }
            2 | 3 => {
                if let Some(job) = pool.next_job() {
                    assert_eq!(job.offset, next_write);
                    assert_eq!(job.offset % chunk_size, 0);
                    assert!(job.bytes().len() as u32 <= chunk_size);
                    next_write = job.offset + job.bytes().len() as u32;
                    let result = if kind == 3 && a & 1 == 1 {
                        failed = true;
                        Err(FirmwareDataError::InvalidData)
                    } else {
                        Ok(())
                    };
                    pool.finish(job, result);
                }
            }
            _ => {
                pool.release();
                pool.begin(0, IMAGE_SIZE, chunk_size);
                next_write = 0;
                failed = false;
            }
        }
        assert!(pool.tail_offset() <= IMAGE_SIZE);
    }
});
