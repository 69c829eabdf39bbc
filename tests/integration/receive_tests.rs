//! Inbound messages through the connector and the receive worker.

use std::sync::{Arc, Mutex};

use cloudlink::engine::{CallbackStatus, DataService, SessionStatus, Transport};
use cloudlink::error::ReceiveError;
use cloudlink::ports::{AcceptFilter, ReceiveHandler};
use cloudlink::receive::{ReceiveContext, ReceiveOptions};
use cloudlink::{Request, Services};

use crate::mock_engine::Harness;

#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<(String, Vec<u8>)>>,
    finished: Mutex<Vec<(String, Option<Vec<u8>>, Option<ReceiveError>)>>,
    fail_with: Option<ReceiveError>,
}

impl ReceiveHandler for Recorder {
    fn data(
        &self,
        target: &str,
        _transport: Transport,
        request: &[u8],
        response: Option<&mut Vec<u8>>,
    ) -> Result<(), ReceiveError> {
        self.requests
            .lock()
            .unwrap()
            .push((target.to_owned(), request.to_vec()));
        if let Some(r) = response {
            r.extend_from_slice(b"ack:");
            r.extend_from_slice(request);
        }
        match self.fail_with {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn status(
        &self,
        target: &str,
        _transport: Transport,
        response: Option<Vec<u8>>,
        error: Option<ReceiveError>,
    ) {
        self.finished
            .lock()
            .unwrap()
            .push((target.to_owned(), response, error));
    }
}

fn receive_services(options: ReceiveOptions) -> Services {
    Services {
        receive: Some(options),
        ..Services::default()
    }
}

fn announce(h: &Harness, target: &str, response_required: bool) -> (CallbackStatus, ReceiveContext) {
    let mut context = None;
    let status = h
        .connector
        .dispatch(Request::DataService(DataService::ReceiveTarget {
            target,
            transport: Transport::Tcp,
            response_required,
            context: &mut context,
        }));
    (status, context.expect("session context"))
}

fn feed(h: &Harness, context: &ReceiveContext, chunks: &[&[u8]]) -> CallbackStatus {
    let mut status = CallbackStatus::Continue;
    for (i, chunk) in chunks.iter().enumerate() {
        let more_data = i + 1 < chunks.len();
        status = h.poll(|c| {
            c.dispatch(Request::DataService(DataService::ReceiveData {
                context,
                data: chunk,
                more_data,
            }))
        });
        if status != CallbackStatus::Continue {
            break;
        }
    }
    status
}

fn read_reply(h: &Harness, context: &ReceiveContext, mtu: usize) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut buffer = vec![0u8; mtu];
        let (mut used, mut more) = (0, false);
        let status = h
            .connector
            .dispatch(Request::DataService(DataService::ReceiveReply {
                context,
                buffer: &mut buffer,
                bytes_used: &mut used,
                more_data: &mut more,
            }));
        assert_eq!(status, CallbackStatus::Continue);
        out.extend_from_slice(&buffer[..used]);
        if !more {
            return out;
        }
    }
}

fn finish(h: &Harness, context: &ReceiveContext, status: SessionStatus) {
    h.connector
        .dispatch(Request::DataService(DataService::ReceiveStatus { context, status }));
}

#[test]
fn registered_target_round_trip() {
    let h = Harness::start(receive_services(ReceiveOptions::default()));
    let handler = Arc::new(Recorder::default());
    h.connector
        .add_receive_target("config", handler.clone(), None)
        .unwrap();

    let (status, ctx) = announce(&h, "config", true);
    assert_eq!(status, CallbackStatus::Continue);
    assert_eq!(feed(&h, &ctx, &[b"set ", b"led ", b"on"]), CallbackStatus::Continue);

    let mut total = 0;
    h.connector
        .dispatch(Request::DataService(DataService::ReceiveReplyLength {
            context: &ctx,
            total_bytes: &mut total,
        }));
    assert_eq!(total, 14);
    assert_eq!(read_reply(&h, &ctx, 5), b"ack:set led on");
    finish(&h, &ctx, SessionStatus::Complete);

    assert_eq!(
        *handler.requests.lock().unwrap(),
        vec![("config".to_owned(), b"set led on".to_vec())]
    );
    assert_eq!(
        *handler.finished.lock().unwrap(),
        vec![("config".to_owned(), Some(b"ack:set led on".to_vec()), None)]
    );
}

#[test]
fn target_registry_rules() {
    let h = Harness::start(receive_services(ReceiveOptions::default()));
    let handler = Arc::new(Recorder::default());
    assert_eq!(
        h.connector.add_receive_target("", handler.clone(), None),
        Err(ReceiveError::InvalidTarget)
    );
    h.connector.add_receive_target("a", handler.clone(), None).unwrap();
    assert_eq!(
        h.connector.add_receive_target("a", handler.clone(), None),
        Err(ReceiveError::TargetAlreadyAdded)
    );
    assert_eq!(h.connector.remove_receive_target("a"), Ok(()));
    assert_eq!(
        h.connector.remove_receive_target("a"),
        Err(ReceiveError::TargetNotAdded)
    );
}

#[test]
fn missing_receive_service_is_reported() {
    let h = Harness::start(Services::default());
    assert_eq!(
        h.connector
            .add_receive_target("x", Arc::new(Recorder::default()), None),
        Err(ReceiveError::NoReceiveSupport)
    );

    let (status, ctx) = announce(&h, "x", true);
    assert_eq!(status, CallbackStatus::Error);
    assert_eq!(
        read_reply(&h, &ctx, 64),
        b"Error 2 (NO_RECEIVE_SUPPORT) while handling target 'x'"
    );
}

#[test]
fn default_handler_and_accept_filter() {
    let fallback = Arc::new(Recorder::default());
    let only_status: Arc<dyn AcceptFilter> = Arc::new(|target: &str, _: Transport| target == "status");
    let h = Harness::start(receive_services(ReceiveOptions {
        accept: Some(only_status),
        default_handler: Some(fallback.clone()),
    }));

    let (status, ctx) = announce(&h, "status", false);
    assert_eq!(status, CallbackStatus::Continue);
    assert_eq!(feed(&h, &ctx, &[b"?"]), CallbackStatus::Continue);
    finish(&h, &ctx, SessionStatus::Complete);

    let (status, ctx) = announce(&h, "reboot", true);
    assert_eq!(status, CallbackStatus::Error);
    assert_eq!(
        read_reply(&h, &ctx, 128),
        b"Error 9 (USER_REFUSED_TARGET) while handling target 'reboot'"
    );
    finish(&h, &ctx, SessionStatus::Complete);

    let finished = fallback.finished.lock().unwrap();
    assert_eq!(finished.len(), 2);
    assert_eq!(finished[1].2, Some(ReceiveError::UserRefusedTarget));
    assert_eq!(fallback.requests.lock().unwrap().len(), 1);
}

#[test]
fn oversized_request_is_refused_with_reply() {
    let h = Harness::start(receive_services(ReceiveOptions::default()));
    let handler = Arc::new(Recorder::default());
    h.connector
        .add_receive_target("small", handler.clone(), Some(8))
        .unwrap();

    let (_, ctx) = announce(&h, "small", true);
    assert_eq!(feed(&h, &ctx, &[b"12345", b"67890"]), CallbackStatus::Error);
    assert_eq!(
        read_reply(&h, &ctx, 128),
        b"Error 10 (REQUEST_TOO_BIG) while handling target 'small'"
    );
    finish(&h, &ctx, SessionStatus::Complete);

    assert!(handler.requests.lock().unwrap().is_empty());
    let finished = handler.finished.lock().unwrap();
    assert_eq!(finished[0].1, None);
    assert_eq!(finished[0].2, Some(ReceiveError::RequestTooBig));
}

#[test]
fn handler_error_keeps_its_own_response() {
    let h = Harness::start(receive_services(ReceiveOptions::default()));
    let handler = Arc::new(Recorder {
        fail_with: Some(ReceiveError::InsufficientMemory),
        ..Recorder::default()
    });
    h.connector
        .add_receive_target("t", handler.clone(), None)
        .unwrap();

    let (_, ctx) = announce(&h, "t", true);
    assert_eq!(feed(&h, &ctx, &[b"abc"]), CallbackStatus::Error);
    assert_eq!(read_reply(&h, &ctx, 64), b"ack:abc");
    finish(&h, &ctx, SessionStatus::Complete);

    let finished = handler.finished.lock().unwrap();
    assert_eq!(finished[0].2, Some(ReceiveError::InsufficientMemory));
}

#[test]
fn session_status_maps_to_error() {
    let h = Harness::start(receive_services(ReceiveOptions::default()));
    let handler = Arc::new(Recorder::default());
    h.connector
        .add_receive_target("t", handler.clone(), None)
        .unwrap();

    let (_, ctx) = announce(&h, "t", false);
    finish(&h, &ctx, SessionStatus::Cancel);
    assert_eq!(
        handler.finished.lock().unwrap()[0].2,
        Some(ReceiveError::StatusCancel)
    );
}
