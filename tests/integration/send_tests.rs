//! Send data / send file / ping rendezvous, driven end to end.

use std::io::Write;
use std::thread;
use std::time::Duration;

use cloudlink::engine::{
    CallbackStatus, DataService, ResponseCode, SessionStatus, ShortMessage, StopBehavior, Transport,
};
use cloudlink::error::{PingError, SendError};
use cloudlink::send::{Destination, HintBuffer, SendBehavior};
use cloudlink::sync::Timeout;
use cloudlink::{Request, Services};

use crate::mock_engine::{Harness, Recorded};

const FIVE_SECONDS: Timeout = Timeout::After(Duration::from_secs(5));

#[test]
fn send_data_streams_payload_and_releases_caller() {
    let h = Harness::start(Services::default());
    let payload: Vec<u8> = (0..=99).collect();

    let c = h.connector.clone();
    let data = payload.clone();
    let app = thread::spawn(move || {
        c.send_data(
            Destination::new(Transport::Tcp, "metrics/temp").content_type("application/octet-stream"),
            &data,
        )
    });

    let Recorded::Send {
        transport,
        path,
        content_type,
        behavior,
        response_required,
        context,
    } = h.next_action()
    else {
        panic!("expected a send action");
    };
    assert_eq!(transport, Transport::Tcp);
    assert_eq!(path, "metrics/temp");
    assert_eq!(content_type.as_deref(), Some("application/octet-stream"));
    assert_eq!(behavior, SendBehavior::Overwrite);
    assert!(!response_required);

    assert_eq!(h.pull_send(&context, 7), payload);
    assert_eq!(h.finish_send(&context, SessionStatus::Complete), CallbackStatus::Continue);
    assert_eq!(app.join().unwrap(), Ok(()));
}

#[test]
fn reply_error_and_truncated_hint_reach_caller() {
    let h = Harness::start(Services::default());

    let c = h.connector.clone();
    let app = thread::spawn(move || {
        let mut hint = HintBuffer::with_capacity(6);
        let r = c.send_data_with_reply(
            Destination::new(Transport::Udp, "upload").behavior(SendBehavior::Append),
            b"hello",
            FIVE_SECONDS,
            Some(&mut hint),
        );
        (r, hint.as_str().to_owned())
    });

    let Recorded::Send {
        response_required,
        behavior,
        context,
        ..
    } = h.next_action()
    else {
        panic!("expected a send action");
    };
    assert!(response_required);
    assert_eq!(behavior, SendBehavior::Append);

    h.pull_send(&context, 64);
    h.connector.dispatch(Request::DataService(DataService::SendResponse {
        context: &context,
        response: ResponseCode::BadRequest,
        hint: Some("quota exceeded"),
    }));
    h.finish_send(&context, SessionStatus::Complete);

    let (result, hint) = app.join().unwrap();
    assert_eq!(result, Err(SendError::ResponseBadRequest));
    assert_eq!(hint, "quota");
}

#[test]
fn send_file_reads_from_disk() {
    let h = Harness::start(Services::default());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let content = b"line one\nline two\nline three\n".repeat(20);
    file.write_all(&content).unwrap();
    let path = file.path().to_owned();

    let c = h.connector.clone();
    let app = thread::spawn(move || c.send_file(Destination::new(Transport::Tcp, "logs/boot"), &path));

    let Recorded::Send { context, .. } = h.next_action() else {
        panic!("expected a send action");
    };
    assert_eq!(h.pull_send(&context, 100), content);
    h.finish_send(&context, SessionStatus::Complete);
    assert_eq!(app.join().unwrap(), Ok(()));
}

#[test]
fn send_file_precondition_errors() {
    let h = Harness::start(Services::default());
    let dir = tempfile::tempdir().unwrap();
    let dest = || Destination::new(Transport::Tcp, "logs");

    assert_eq!(h.connector.send_file(dest(), dir.path()), Err(SendError::NotAFile));
    assert_eq!(
        h.connector.send_file(dest(), &dir.path().join("missing.bin")),
        Err(SendError::NotAFile)
    );
    assert_eq!(
        h.connector.send_file(dest(), std::path::Path::new("")),
        Err(SendError::InvalidLocalPath)
    );
    assert_eq!(
        h.connector.send_data(Destination::new(Transport::Tcp, ""), b"x"),
        Err(SendError::InvalidCloudPath)
    );
    assert_eq!(
        h.connector.send_data(dest().content_type(""), b"x"),
        Err(SendError::InvalidContentType)
    );
    assert_eq!(h.connector.send_data(dest(), b""), Err(SendError::InvalidData));
    let mut empty = HintBuffer::with_capacity(0);
    assert_eq!(
        h.connector.send_data_with_reply(dest(), b"x", FIVE_SECONDS, Some(&mut empty)),
        Err(SendError::InvalidHint)
    );
}

#[test]
fn wait_timeout_reports_lock_failed_and_late_status_is_harmless() {
    let h = Harness::start(Services::default());
    let r = h.connector.send_data_with_reply(
        Destination::new(Transport::Tcp, "slow"),
        b"abc",
        Timeout::After(Duration::from_millis(30)),
        None,
    );
    assert_eq!(r, Err(SendError::LockFailed));

    let Recorded::Send { context, .. } = h.next_action() else {
        panic!("expected a send action");
    };
    assert_eq!(h.finish_send(&context, SessionStatus::Complete), CallbackStatus::Continue);
    assert_eq!(h.finish_send(&context, SessionStatus::Complete), CallbackStatus::Error);
}

#[test]
fn rejected_action_fails_without_waiting() {
    let h = Harness::start(Services::default());
    h.engine.reject.store(true, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(
        h.connector.send_data(Destination::new(Transport::Tcp, "x"), b"1"),
        Err(SendError::InitiateActionFailed)
    );
}

#[test]
fn status_error_surfaces_when_no_reply_requested() {
    let h = Harness::start(Services::default());
    let c = h.connector.clone();
    let app = thread::spawn(move || c.send_data(Destination::new(Transport::Sms, "x"), b"1"));

    let Recorded::Send { context, .. } = h.next_action() else {
        panic!("expected a send action");
    };
    h.finish_send(&context, SessionStatus::Timeout);
    assert_eq!(app.join().unwrap(), Err(SendError::StatusTimeout));
}

#[test]
fn ping_round_trip_and_transport_rules() {
    let h = Harness::start(Services::default());
    assert_eq!(h.connector.send_ping(Transport::Tcp), Err(PingError::TransportNotValid));

    let c = h.connector.clone();
    let app = thread::spawn(move || c.send_ping_with_reply(Transport::Udp, FIVE_SECONDS));
    let Recorded::Ping {
        transport,
        response_required,
        context,
    } = h.next_action()
    else {
        panic!("expected a ping action");
    };
    assert_eq!(transport, Transport::Udp);
    assert!(response_required);
    h.connector.dispatch(Request::ShortMessage(ShortMessage::PingResponse {
        context: &context,
        status: SessionStatus::Complete,
    }));
    assert_eq!(app.join().unwrap(), Ok(()));

    h.connector.stop_transport(Transport::Sms, StopBehavior::Immediately).unwrap();
    assert!(matches!(
        h.next_action(),
        Recorded::StopTransport(Transport::Sms, StopBehavior::Immediately)
    ));
    assert_eq!(h.connector.send_ping(Transport::Sms), Err(PingError::TransportNotStarted));
}

#[test]
fn stopped_connector_refuses_actions() {
    let h = Harness::start(Services::default());
    h.connector.stop(StopBehavior::Immediately).unwrap();
    assert_eq!(
        h.connector.send_data(Destination::new(Transport::Tcp, "x"), b"1"),
        Err(SendError::NotRunning)
    );
    assert_eq!(h.connector.send_ping(Transport::Udp), Err(PingError::NotRunning));
}
