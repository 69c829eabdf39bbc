//! Fuzz target: `Slot::advance` (request assembly)
//!
//! Reads `(limit, [len, more, bytes...]*)` from the input and drives the
//! slot through arbitrary chunk sequences, checking:
//! - No panics under any chunk split or size limit
//! - The assembled request never exceeds the limit
//! - Overflow always leaves the slot free with `RequestTooBig` recorded
//!
//! cargo fuzz run fuzz_receive_assembly

#![no_main]

use cloudlink::error::ReceiveError;
use cloudlink::slot::{Progress, Slot, SlotPhase};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&limit, mut rest)) = data.split_first() else {
        return;
    };

    let mut slot: Slot<ReceiveError> = Slot::new(true);
    slot.max_request_size = (limit != 0xFF).then_some(limit as usize);

    while let [len, flags, tail @ ..] = rest {
        let n = (*len as usize).min(tail.len());
        let (chunk, next) = tail.split_at(n);
        rest = next;

        let more = flags & 1 == 1;
        let installed = flags & 2 == 2;
        match slot.advance(chunk, more, ReceiveError::RequestTooBig, || installed) {
            Progress::Overflow => {
                assert_eq!(slot.phase, SlotPhase::Free);
                assert_eq!(slot.error, Some(ReceiveError::RequestTooBig));
                assert!(slot.request.is_empty());
            }
            Progress::Processed => unreachable!("worker never ran"),
            Progress::NeedMore | Progress::Waiting | Progress::Finished => {}
        }
        if let Some(max) = slot.max_request_size {
            assert!(slot.request.len() <= max);
        }
    }

    if slot.phase == SlotPhase::QueuedToWorker {
        let request = slot.take_request().unwrap_or_default();
        slot.finish_work(request, None);
        assert_eq!(
            slot.advance(&[], false, ReceiveError::RequestTooBig, || true),
            Progress::Processed
        );
    }
});
