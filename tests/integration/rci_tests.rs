//! Remote configuration traversal through the connector and the RCI worker.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cloudlink::engine::CallbackStatus;
use cloudlink::rci::{
    CollectionItem, ElementType, ElementValue, GroupType, RciAction, RciCallbacks, RciError, RciStep,
    RemoteConfigData, RemoteListLevel,
};
use cloudlink::{Request, Services};

use crate::mock_engine::Harness;

fn step(h: &Harness, step: RciStep, data: &mut RemoteConfigData) -> CallbackStatus {
    h.poll(|c| c.dispatch(Request::RemoteConfig { step, data: &mut *data }))
}

#[test]
fn query_traversal_reads_settings() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&log);
    let callbacks = RciCallbacks {
        start_session: Some(Arc::new(|_| Ok(()))),
        start_group: Some(Arc::new(move |info| {
            l.lock().unwrap().push(format!("group {} {:?}", info.group.id, info.group.item));
            Ok(())
        })),
        get_element: Some(Arc::new(|info, value| {
            *value = match (info.group.id, info.element.id) {
                (4, 0) => ElementValue::String("eth0".into()),
                (4, 1) => ElementValue::UnsignedInteger(1500),
                _ => return Err(RciError(1)),
            };
            Ok(())
        })),
        ..RciCallbacks::default()
    };
    let h = Harness::start(Services {
        rci: Some(callbacks),
        ..Services::default()
    });

    let mut data = RemoteConfigData::default();
    assert_eq!(step(&h, RciStep::SessionStart, &mut data), CallbackStatus::Continue);
    assert_eq!(step(&h, RciStep::ActionStart, &mut data), CallbackStatus::Continue);

    data.group.kind = GroupType::Setting;
    data.group.id = 4;
    data.group.item = CollectionItem::Index(1);
    assert_eq!(step(&h, RciStep::GroupStart, &mut data), CallbackStatus::Continue);

    data.element.id = 0;
    data.element.kind = ElementType::String;
    step(&h, RciStep::ElementProcess, &mut data);
    assert_eq!(data.response.element_value, ElementValue::String("eth0".into()));
    assert_eq!(data.error_id, 0);

    data.element.id = 1;
    data.element.kind = ElementType::Uint32;
    step(&h, RciStep::ElementProcess, &mut data);
    assert_eq!(data.response.element_value, ElementValue::UnsignedInteger(1500));

    data.element.id = 9;
    step(&h, RciStep::ElementProcess, &mut data);
    assert_eq!(data.error_id, 1);

    for s in [RciStep::GroupEnd, RciStep::ActionEnd, RciStep::SessionEnd] {
        assert_eq!(step(&h, s, &mut data), CallbackStatus::Continue);
    }
    assert_eq!(*log.lock().unwrap(), ["group 4 Index(1)"]);
}

#[test]
fn set_inside_nested_list() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let callbacks = RciCallbacks {
        start_action: Some(Arc::new(|_| Ok(()))),
        start_list: Some(Arc::new(|_| Ok(()))),
        set_element: Some(Arc::new(move |info, value| {
            let path: Vec<(u32, CollectionItem)> =
                info.lists.iter().map(|l| (l.id, l.item.clone())).collect();
            s.lock().unwrap().push((path, value.clone()));
            Ok(())
        })),
        ..RciCallbacks::default()
    };
    let h = Harness::start(Services {
        rci: Some(callbacks),
        ..Services::default()
    });

    let mut data = RemoteConfigData {
        action: RciAction::Set,
        ..RemoteConfigData::default()
    };
    step(&h, RciStep::ActionStart, &mut data);

    data.list
        .push(RemoteListLevel {
            id: 2,
            item: CollectionItem::Key("wan".into()),
            ..RemoteListLevel::default()
        })
        .unwrap();
    assert_eq!(step(&h, RciStep::ListStart, &mut data), CallbackStatus::Continue);
    data.list
        .push(RemoteListLevel {
            id: 5,
            item: CollectionItem::Index(3),
            ..RemoteListLevel::default()
        })
        .unwrap();
    assert_eq!(step(&h, RciStep::ListStart, &mut data), CallbackStatus::Continue);
    data.element.kind = ElementType::Bool;
    data.element.value = ElementValue::Boolean(true);
    assert_eq!(step(&h, RciStep::ElementProcess, &mut data), CallbackStatus::Continue);

    assert_eq!(
        *seen.lock().unwrap(),
        [(
            vec![(2, CollectionItem::Key("wan".into())), (5, CollectionItem::Index(3))],
            ElementValue::Boolean(true)
        )]
    );
}

#[test]
fn cancel_while_callback_runs_discards_its_result() {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let entered_tx = Mutex::new(entered_tx);

    let callbacks = RciCallbacks {
        start_session: Some(Arc::new(|_| Ok(()))),
        set_factory_defaults: Some(Arc::new(move |info| {
            entered_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            info.error_hint = Some("too late".into());
            Err(RciError(7))
        })),
        ..RciCallbacks::default()
    };
    let h = Harness::start(Services {
        rci: Some(callbacks),
        ..Services::default()
    });

    let mut data = RemoteConfigData::default();
    let r = h
        .connector
        .dispatch(Request::RemoteConfig { step: RciStep::SetFactoryDefaults, data: &mut data });
    assert_eq!(r, CallbackStatus::Busy);
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let r = h
        .connector
        .dispatch(Request::RemoteConfig { step: RciStep::SessionCancel, data: &mut data });
    assert_eq!(r, CallbackStatus::Continue);

    release_tx.send(()).unwrap();
    thread::sleep(Duration::from_millis(20));

    // A fresh session is not disturbed by the late result.
    let mut data = RemoteConfigData::default();
    assert_eq!(step(&h, RciStep::SessionStart, &mut data), CallbackStatus::Continue);
    assert_eq!(data.error_id, 0);
    assert_eq!(data.response.error_hint, None);
}

#[test]
fn steps_without_callbacks_do_not_wait() {
    let h = Harness::start(Services {
        rci: Some(RciCallbacks::default()),
        ..Services::default()
    });
    let mut data = RemoteConfigData::default();
    for s in [
        RciStep::SessionStart,
        RciStep::ActionStart,
        RciStep::GroupStart,
        RciStep::ElementProcess,
        RciStep::GroupEnd,
        RciStep::ActionEnd,
        RciStep::SessionEnd,
    ] {
        let r = h.connector.dispatch(Request::RemoteConfig { step: s, data: &mut data });
        assert_eq!(r, CallbackStatus::Continue, "{:?}", s);
    }
}
