//! Data point collection flush through the connector.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cloudlink::datapoints::{DataPoint, DataPointCollection, Location, PointValue, Timestamp};
use cloudlink::engine::{DataPointEvent, ResponseCode, SessionStatus, Transport};
use cloudlink::error::DataPointError;
use cloudlink::send::HintBuffer;
use cloudlink::sync::Timeout;
use cloudlink::{Request, Services};

use crate::mock_engine::{Harness, Recorded};

fn two_streams() -> Arc<DataPointCollection> {
    let c = Arc::new(DataPointCollection::new());
    c.add_stream_with("temperature", "double ts_epoch", Some("C"), None)
        .unwrap();
    c.add_stream("position", "string loc").unwrap();

    for (i, t) in [21.5, 21.7, 22.0].into_iter().enumerate() {
        c.add(
            "temperature",
            DataPoint::new(PointValue::Double(t)).at(Timestamp::Epoch {
                seconds: 1_700_000_000 + i as u32,
                milliseconds: 0,
            }),
        )
        .unwrap();
    }
    c.add(
        "position",
        DataPoint::new(PointValue::String("dock".into())).located(Location {
            latitude: 52.1,
            longitude: 4.3,
            elevation: 0.0,
        }),
    )
    .unwrap();
    c
}

#[test]
fn two_streams_flush_newest_first_and_empty_on_success() {
    let h = Harness::start(Services::default());
    let collection = two_streams();

    let c = h.connector.clone();
    let col = Arc::clone(&collection);
    let app = thread::spawn(move || c.send_collection(Transport::Tcp, &col));

    let Recorded::DataPoints {
        transport,
        response_required,
        streams,
        context,
    } = h.next_action()
    else {
        panic!("expected a data point upload");
    };
    assert_eq!(transport, Transport::Tcp);
    assert!(!response_required);

    let ids: Vec<&str> = streams.iter().map(|s| s.stream_id.as_str()).collect();
    assert_eq!(ids, ["position", "temperature"]);
    let temps: Vec<PointValue> = streams[1].points.iter().map(|p| p.value.clone()).collect();
    assert_eq!(
        temps,
        [PointValue::Double(21.5), PointValue::Double(21.7), PointValue::Double(22.0)]
    );
    assert_eq!(streams[1].units.as_deref(), Some("C"));

    let json = serde_json::to_string(&streams).unwrap();
    assert!(json.contains("\"stream_id\":\"position\""));

    h.connector.dispatch(Request::DataPoint(DataPointEvent::Status {
        context: &context,
        status: SessionStatus::Complete,
    }));
    assert_eq!(app.join().unwrap(), Ok(()));
    assert_eq!(collection.point_count(), 0);
    assert_eq!(collection.stream_count(), 2);
}

#[test]
fn failed_flush_keeps_points() {
    let h = Harness::start(Services::default());
    let collection = two_streams();

    let c = h.connector.clone();
    let col = Arc::clone(&collection);
    let app = thread::spawn(move || {
        let mut hint = HintBuffer::with_capacity(32);
        let r = c.send_collection_with_reply(
            Transport::Udp,
            &col,
            Timeout::After(Duration::from_secs(5)),
            Some(&mut hint),
        );
        (r, hint.as_str().to_owned())
    });

    let Recorded::DataPoints {
        response_required,
        context,
        ..
    } = h.next_action()
    else {
        panic!("expected a data point upload");
    };
    assert!(response_required);
    h.connector.dispatch(Request::DataPoint(DataPointEvent::Response {
        context: &context,
        response: ResponseCode::Unavailable,
        hint: Some("storage offline"),
    }));
    h.connector.dispatch(Request::DataPoint(DataPointEvent::Status {
        context: &context,
        status: SessionStatus::Complete,
    }));

    let (result, hint) = app.join().unwrap();
    assert_eq!(result, Err(DataPointError::ResponseUnavailable));
    assert_eq!(hint, "storage offline");
    assert_eq!(collection.point_count(), 4);
}

#[test]
fn reply_flush_without_response_reports_initiate_failure() {
    let h = Harness::start(Services::default());
    let collection = two_streams();

    let c = h.connector.clone();
    let col = Arc::clone(&collection);
    let app = thread::spawn(move || {
        c.send_collection_with_reply(Transport::Tcp, &col, Timeout::After(Duration::from_secs(5)), None)
    });

    let Recorded::DataPoints { context, .. } = h.next_action() else {
        panic!("expected a data point upload");
    };
    h.connector.dispatch(Request::DataPoint(DataPointEvent::Status {
        context: &context,
        status: SessionStatus::Complete,
    }));
    assert_eq!(app.join().unwrap(), Err(DataPointError::InitiateActionFailed));
}

#[test]
fn flush_preconditions() {
    let h = Harness::start(Services::default());
    let empty = DataPointCollection::new();
    assert_eq!(
        h.connector.send_collection(Transport::Tcp, &empty),
        Err(DataPointError::InvalidArgument)
    );

    let collection = two_streams();
    h.connector
        .stop_transport(Transport::Sms, cloudlink::engine::StopBehavior::Gracefully)
        .unwrap();
    assert_eq!(
        h.connector.send_collection(Transport::Sms, &collection),
        Err(DataPointError::TransportNotStarted)
    );
}
