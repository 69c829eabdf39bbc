//! Firmware download through the connector and the firmware worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cloudlink::config::{FirmwareTargetConfig, FirmwareVersion};
use cloudlink::engine::{CallbackStatus, FirmwareRequest};
use cloudlink::error::{FirmwareDataError, FirmwareRequestError};
use cloudlink::firmware::{CancelReason, CompleteStatus, DownloadStatus, TargetInfo};
use cloudlink::ports::{DeviceControl, FirmwareHandler};
use cloudlink::{Request, Services};

use crate::mock_engine::Harness;

#[derive(Default)]
struct Flash {
    writes: Mutex<Vec<(u32, Vec<u8>, bool)>>,
    cancelled: Mutex<Vec<(u8, CancelReason)>>,
    refuse: Option<FirmwareRequestError>,
    fail_writes: AtomicBool,
    keep_running: bool,
}

impl FirmwareHandler for Flash {
    fn request(&self, _target: u8, _filename: &str, _code_size: u32) -> Result<(), FirmwareRequestError> {
        self.refuse.map_or(Ok(()), Err)
    }

    fn data(&self, _target: u8, offset: u32, data: &[u8], last: bool) -> Result<(), FirmwareDataError> {
        // Slow enough that the engine sees the ring fill up.
        thread::sleep(Duration::from_millis(2));
        self.writes.lock().unwrap().push((offset, data.to_vec(), last));
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FirmwareDataError::InvalidData);
        }
        Ok(())
    }

    fn cancel(&self, target: u8, reason: CancelReason) {
        self.cancelled.lock().unwrap().push((target, reason));
    }

    fn reset(&self, _target: u8, system_reset: &mut bool, version: &mut FirmwareVersion) {
        *version = FirmwareVersion::new(2, 0, 0, 1);
        *system_reset = !self.keep_running;
    }
}

#[derive(Default)]
struct Board {
    resets: Mutex<u32>,
}

impl DeviceControl for Board {
    fn reset(&self) -> anyhow::Result<()> {
        *self.resets.lock().unwrap() += 1;
        Ok(())
    }
}

fn harness(flash: Arc<Flash>, device: Option<Arc<Board>>) -> Harness {
    let mut config = Harness::config();
    config.chunk_pool_size = 2;
    config.firmware_targets = vec![
        FirmwareTargetConfig {
            chunk_size: 16,
            ..FirmwareTargetConfig::default()
        },
        FirmwareTargetConfig {
            description: "Bootloader".into(),
            filespec: r"boot.*\.bin".into(),
            maximum_size: 64,
            ..FirmwareTargetConfig::default()
        },
    ];
    Harness::start_with(
        config,
        Services {
            firmware: Some(flash),
            device: device.map(|d| d as Arc<dyn DeviceControl>),
            ..Services::default()
        },
    )
}

fn start(h: &Harness, target: u8, code_size: u32) -> DownloadStatus {
    let mut status = DownloadStatus::EncounteredError;
    let r = h.connector.dispatch(Request::Firmware(FirmwareRequest::DownloadStart {
        target,
        filename: "image.bin",
        code_size,
        status: &mut status,
    }));
    assert_eq!(r, CallbackStatus::Continue);
    status
}

fn data(h: &Harness, target: u8, offset: u32, bytes: &[u8]) -> (CallbackStatus, DownloadStatus) {
    let mut status = DownloadStatus::Success;
    let r = h.poll(|c| {
        c.dispatch(Request::Firmware(FirmwareRequest::DownloadData {
            target,
            offset,
            data: bytes,
            status: &mut status,
        }))
    });
    (r, status)
}

fn complete(h: &Harness, target: u8) -> (CallbackStatus, CompleteStatus) {
    let mut status = CompleteStatus::Success;
    let r = h.poll(|c| {
        c.dispatch(Request::Firmware(FirmwareRequest::DownloadComplete {
            target,
            status: &mut status,
        }))
    });
    (r, status)
}

#[test]
fn image_of_three_chunks_through_two_buffers() {
    let flash = Arc::new(Flash::default());
    let h = harness(flash.clone(), None);
    let image: Vec<u8> = (0..48).collect();

    assert_eq!(start(&h, 0, 48), DownloadStatus::Success);
    assert_eq!(data(&h, 0, 0, &image), (CallbackStatus::Continue, DownloadStatus::Success));
    assert_eq!(complete(&h, 0), (CallbackStatus::Continue, CompleteStatus::Success));

    let writes = flash.writes.lock().unwrap();
    let layout: Vec<(u32, usize, bool)> = writes.iter().map(|(o, d, l)| (*o, d.len(), *l)).collect();
    assert_eq!(layout, [(0, 16, false), (16, 16, false), (32, 16, true)]);
    let written: Vec<u8> = writes.iter().flat_map(|(_, d, _)| d.clone()).collect();
    assert_eq!(written, image);
}

#[test]
fn uneven_pieces_are_rechunked_in_order() {
    let flash = Arc::new(Flash::default());
    let h = harness(flash.clone(), None);
    let image: Vec<u8> = (0..45).map(|i| i * 3).collect();

    assert_eq!(start(&h, 0, 45), DownloadStatus::Success);
    let mut offset = 0;
    for piece in image.chunks(7) {
        assert_eq!(data(&h, 0, offset, piece).0, CallbackStatus::Continue);
        offset += piece.len() as u32;
    }
    assert_eq!(complete(&h, 0).1, CompleteStatus::Success);

    let writes = flash.writes.lock().unwrap();
    let offsets: Vec<u32> = writes.iter().map(|(o, _, _)| *o).collect();
    assert_eq!(offsets, [0, 16, 32]);
    assert!(writes[2].2);
    let written: Vec<u8> = writes.iter().flat_map(|(_, d, _)| d.clone()).collect();
    assert_eq!(written, image);
}

#[test]
fn out_of_order_data_is_refused() {
    let h = harness(Arc::new(Flash::default()), None);
    start(&h, 0, 48);
    assert_eq!(
        data(&h, 0, 16, &[0; 16]),
        (CallbackStatus::Continue, DownloadStatus::InvalidOffset)
    );
}

#[test]
fn refusals_at_start() {
    let flash = Arc::new(Flash {
        refuse: Some(FirmwareRequestError::NotAllowed),
        ..Flash::default()
    });
    let h = harness(flash, None);
    assert_eq!(start(&h, 0, 10), DownloadStatus::DownloadNotAllowed);
    assert_eq!(start(&h, 1, 65), DownloadStatus::DownloadInvalidSize);
    assert_eq!(start(&h, 7, 10), DownloadStatus::EncounteredError);
}

#[test]
fn writer_error_fails_completion() {
    let flash = Arc::new(Flash::default());
    flash.fail_writes.store(true, Ordering::SeqCst);
    let h = harness(flash, None);

    start(&h, 0, 16);
    assert_eq!(data(&h, 0, 0, &[9; 16]).0, CallbackStatus::Continue);
    assert_eq!(complete(&h, 0), (CallbackStatus::Error, CompleteStatus::InvalidData));
}

#[test]
fn abort_waits_for_worker_then_cancels() {
    let flash = Arc::new(Flash::default());
    let h = harness(flash.clone(), None);
    start(&h, 0, 48);
    data(&h, 0, 0, &[1; 20]);

    let r = h.poll(|c| {
        c.dispatch(Request::Firmware(FirmwareRequest::DownloadAbort {
            target: 0,
            status: DownloadStatus::UserAbort,
        }))
    });
    assert_eq!(r, CallbackStatus::Continue);
    assert_eq!(*flash.cancelled.lock().unwrap(), [(0, CancelReason::UserAbort)]);
    assert_eq!(flash.writes.lock().unwrap().len(), 1);

    // The pool is free again: a new download may start.
    assert_eq!(start(&h, 0, 16), DownloadStatus::Success);
}

#[test]
fn target_table_is_reported() {
    let h = harness(Arc::new(Flash::default()), None);
    let mut count = 0;
    h.connector
        .dispatch(Request::Firmware(FirmwareRequest::TargetCount { count: &mut count }));
    assert_eq!(count, 2);

    let mut info = TargetInfo::default();
    h.connector.dispatch(Request::Firmware(FirmwareRequest::TargetInfo {
        target: 1,
        info: &mut info,
    }));
    assert_eq!(info.description, "Bootloader");
    assert_eq!(info.filespec, r"boot.*\.bin");
    assert_eq!(info.version, FirmwareVersion::new(1, 0, 0, 0));
}

#[test]
fn reset_updates_version_and_resets_device() {
    let board = Arc::new(Board::default());
    let h = harness(Arc::new(Flash::default()), Some(board.clone()));
    let r = h
        .connector
        .dispatch(Request::Firmware(FirmwareRequest::TargetReset { target: 0 }));
    assert_eq!(r, CallbackStatus::Continue);
    assert_eq!(*board.resets.lock().unwrap(), 1);
    assert_eq!(h.connector.firmware_version(0), Some(FirmwareVersion::new(2, 0, 0, 1)));
}

#[test]
fn reset_without_device_control_fails_unless_skipped() {
    let h = harness(Arc::new(Flash::default()), None);
    let r = h
        .connector
        .dispatch(Request::Firmware(FirmwareRequest::TargetReset { target: 0 }));
    assert_eq!(r, CallbackStatus::Error);

    let h = harness(
        Arc::new(Flash {
            keep_running: true,
            ..Flash::default()
        }),
        None,
    );
    let r = h
        .connector
        .dispatch(Request::Firmware(FirmwareRequest::TargetReset { target: 1 }));
    assert_eq!(r, CallbackStatus::Continue);
}
