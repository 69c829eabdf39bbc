//! RCI step dispatcher.
//!
//! ```text
//!            step with a handler                 worker done
//!   Idle ─────────────────────────▶ CallbackQueued ──────────▶ CallbackProcessed
//!    ▲  │ (Busy)                        │ (Busy)                    │
//!    │  └─ no handler: Continue         │                           │ same step again:
//!    │                                  │                           │ write back, Continue
//!    └──────── SessionCancel (any phase, never waits) ◀─────────────┘
//! ```
//!
//! The engine repeats a step until it gets `Continue`. The first call
//! copies the step's position into [`RciInfo`], picks the callback and
//! queues it; the repeat after the worker finished copies the results into
//! the engine's [`RemoteConfigData`].

use std::sync::{Arc, Mutex};

use log::{debug, error, warn};

use super::types::{
    ElementType, ElementValue, GroupType, RciAction, RciError, RciInfo, RciResult, RciStep,
    RemoteConfigData, ResponseItem,
};
use crate::engine::{CallbackStatus, Engine};
use crate::sync::{self, Semaphore};

pub type BaseFn = Arc<dyn Fn(&mut RciInfo) -> RciResult + Send + Sync>;
pub type LockFn = Arc<dyn Fn(&mut RciInfo, &mut ResponseItem) -> RciResult + Send + Sync>;
pub type ElementFn = Arc<dyn Fn(&mut RciInfo, &mut ElementValue) -> RciResult + Send + Sync>;
pub type TransformFn =
    Arc<dyn Fn(&mut RciInfo, &ElementValue, &mut Option<String>) -> RciResult + Send + Sync>;

/// Application callbacks, one optional entry per traversal step.
#[derive(Clone, Default)]
pub struct RciCallbacks {
    pub start_session: Option<BaseFn>,
    pub end_session: Option<BaseFn>,
    pub start_action: Option<BaseFn>,
    pub end_action: Option<BaseFn>,
    pub start_group: Option<BaseFn>,
    pub end_group: Option<BaseFn>,
    pub lock_group_instances: Option<LockFn>,
    pub set_group_instances: Option<BaseFn>,
    pub remove_group_instance: Option<BaseFn>,
    pub unlock_group_instances: Option<BaseFn>,
    pub start_list: Option<BaseFn>,
    pub end_list: Option<BaseFn>,
    pub lock_list_instances: Option<LockFn>,
    pub set_list_instances: Option<BaseFn>,
    pub remove_list_instance: Option<BaseFn>,
    pub unlock_list_instances: Option<BaseFn>,
    pub get_element: Option<ElementFn>,
    pub set_element: Option<ElementFn>,
    pub set_and_transform_element: Option<TransformFn>,
    pub do_command: Option<BaseFn>,
    pub set_factory_defaults: Option<BaseFn>,
    pub reboot: Option<BaseFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle,
    CallbackQueued,
    CallbackProcessed,
}

/// The callback selected for the current step plus the values it reads
/// and writes.
#[derive(Clone, Default)]
enum Descriptor {
    #[default]
    None,
    Base(BaseFn),
    Lock {
        function: LockFn,
        item: ResponseItem,
    },
    Element {
        function: ElementFn,
        value: ElementValue,
        enums: Vec<String>,
    },
    Transform {
        function: TransformFn,
        value: ElementValue,
        transformed: Option<String>,
        enums: Vec<String>,
    },
}

impl Descriptor {
    fn base(function: Option<&BaseFn>) -> Self {
        function.map_or(Self::None, |f| Self::Base(Arc::clone(f)))
    }

    fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Run the callback. Returns the error id (0 on success).
    fn run(&mut self, info: &mut RciInfo) -> u32 {
        let result = match self {
            Self::None => {
                error!("RCI: worker woken with no callback queued");
                Ok(())
            }
            Self::Base(function) => function(info),
            Self::Lock { function, item } => function(info, item),
            Self::Element {
                function,
                value,
                enums,
            } => {
                if enums.is_empty() {
                    function(info, value)
                } else if info.action == RciAction::Query {
                    query_enum(function, info, value, enums)
                } else {
                    match enum_name(value, enums) {
                        Some(mut named) => function(info, &mut named),
                        None => Err(RciError::BAD_VALUE),
                    }
                }
            }
            Self::Transform {
                function,
                value,
                transformed,
                enums,
            } => {
                if enums.is_empty() {
                    function(info, value, transformed)
                } else {
                    match enum_name(value, enums) {
                        Some(named) => function(info, &named, transformed),
                        None => Err(RciError::BAD_VALUE),
                    }
                }
            }
        };
        result.err().map_or(0, |e| e.0)
    }
}

/// Query of an enum element: the callback answers with the symbolic name,
/// the engine wants the ordinal.
fn query_enum(
    function: &ElementFn,
    info: &mut RciInfo,
    value: &mut ElementValue,
    enums: &[String],
) -> RciResult {
    let mut named = ElementValue::None;
    function(info, &mut named)?;
    let ordinal = match &named {
        ElementValue::String(name) => enums.iter().position(|e| e == name),
        _ => None,
    };
    let ordinal = ordinal.and_then(|i| u32::try_from(i).ok()).ok_or_else(|| {
        warn!("RCI: callback answered {:?}, not one of {:?}", named, enums);
        RciError::BAD_VALUE
    })?;
    *value = ElementValue::Enum(ordinal);
    Ok(())
}

fn enum_name(value: &ElementValue, enums: &[String]) -> Option<ElementValue> {
    match value {
        ElementValue::Enum(i) => enums
            .get(*i as usize)
            .map(|name| ElementValue::String(name.clone())),
        _ => None,
    }
}

struct DispatcherState {
    phase: DispatchPhase,
    descriptor: Descriptor,
    error: u32,
    info: RciInfo,
    /// Incremented per queued callback; a worker result is applied only if
    /// its ticket is still current.
    ticket: u64,
}

pub struct RciService {
    callbacks: RciCallbacks,
    state: Mutex<DispatcherState>,
    wake: Arc<Semaphore>,
    engine: Arc<dyn Engine>,
}

impl RciService {
    pub(crate) fn new(callbacks: RciCallbacks, engine: Arc<dyn Engine>) -> Self {
        Self {
            callbacks,
            state: Mutex::new(DispatcherState {
                phase: DispatchPhase::Idle,
                descriptor: Descriptor::None,
                error: 0,
                info: RciInfo::default(),
                ticket: 0,
            }),
            wake: Arc::new(Semaphore::binary()),
            engine,
        }
    }

    pub(crate) fn wake_handle(&self) -> Arc<Semaphore> {
        Arc::clone(&self.wake)
    }

    pub fn phase(&self) -> DispatchPhase {
        sync::lock(&self.state).phase
    }

    /// Snapshot of the traversal state.
    pub fn info(&self) -> RciInfo {
        sync::lock(&self.state).info.clone()
    }

    pub(crate) fn handle(&self, step: RciStep, data: &mut RemoteConfigData) -> CallbackStatus {
        let mut st = sync::lock(&self.state);

        if step == RciStep::SessionCancel {
            debug!("RCI: session cancelled in {:?}", st.phase);
            st.descriptor = Descriptor::None;
            st.error = 0;
            st.phase = DispatchPhase::Idle;
            return CallbackStatus::Continue;
        }

        match st.phase {
            DispatchPhase::Idle => {
                // Prepared on a copy so a refused step leaves the traversal untouched.
                let mut info = st.info.clone();
                info.error_hint.clone_from(&data.response.error_hint);
                let Some(descriptor) = self.prepare(step, data, &mut info) else {
                    return CallbackStatus::Error;
                };
                st.info = info;
                st.descriptor = Descriptor::None;
                st.error = 0;
                if descriptor.is_none() {
                    finish(step, data, &mut st);
                    return CallbackStatus::Continue;
                }

                st.descriptor = descriptor;
                st.phase = DispatchPhase::CallbackQueued;
                st.ticket = st.ticket.wrapping_add(1);
                drop(st);
                debug!("RCI: {:?} queued", step);
                self.wake.signal();
                CallbackStatus::Busy
            }
            DispatchPhase::CallbackQueued => CallbackStatus::Busy,
            DispatchPhase::CallbackProcessed => {
                finish(step, data, &mut st);
                CallbackStatus::Continue
            }
        }
    }

    /// Copy the step's position into `info` and select its callback.
    /// `None` means the step cannot be served at all.
    fn prepare(&self, step: RciStep, data: &RemoteConfigData, info: &mut RciInfo) -> Option<Descriptor> {
        let cb = &self.callbacks;
        let depth = data.list.len();
        let level = depth.checked_sub(1);

        let descriptor = match step {
            RciStep::SessionStart => {
                let d = Descriptor::base(cb.start_session.as_ref());
                if !d.is_none() {
                    info.action = RciAction::Query;
                    info.error_hint = None;
                    info.query_setting = super::types::QuerySetting::default();
                    info.group.kind = GroupType::Setting;
                    info.clear_group();
                    info.clear_lists();
                    info.clear_element();
                    info.clear_do_command();
                }
                d
            }
            RciStep::ActionStart => {
                let d = Descriptor::base(cb.start_action.as_ref());
                if !d.is_none() {
                    info.action = data.action;
                    info.group.kind = data.group.kind;
                    match (info.action, info.group.kind) {
                        (RciAction::Query, GroupType::Setting) => {
                            info.query_setting.compare_to = data.attribute.compare_to;
                            info.query_setting.source = data.attribute.source;
                            info.query_setting.matches = false;
                        }
                        (RciAction::Set, GroupType::Setting) => {
                            info.embed_transformed_values = data.attribute.embed_transformed_values;
                        }
                        _ => {}
                    }
                    info.clear_group();
                    info.clear_lists();
                    info.clear_element();
                }
                d
            }
            RciStep::DoCommand => {
                let d = Descriptor::base(cb.do_command.as_ref());
                if !d.is_none() {
                    info.do_command.target.clone_from(&data.attribute.target);
                    info.do_command.request = match &data.element.value {
                        ElementValue::String(s) => Some(s.clone()),
                        _ => None,
                    };
                    info.do_command.response = None;
                }
                d
            }
            RciStep::Reboot => Descriptor::base(cb.reboot.as_ref()),
            RciStep::SetFactoryDefaults => Descriptor::base(cb.set_factory_defaults.as_ref()),

            RciStep::GroupInstancesLock => match &cb.lock_group_instances {
                Some(function) => {
                    copy_group(info, data, false);
                    Descriptor::Lock {
                        function: Arc::clone(function),
                        item: ResponseItem::None,
                    }
                }
                None => Descriptor::None,
            },
            RciStep::GroupInstancesSet => {
                let d = Descriptor::base(cb.set_group_instances.as_ref());
                if !d.is_none() {
                    info.group.item = data.group.item.clone();
                }
                d
            }
            RciStep::GroupInstanceRemove => {
                let d = Descriptor::base(cb.remove_group_instance.as_ref());
                if !d.is_none() {
                    copy_group(info, data, true);
                }
                d
            }
            RciStep::GroupInstancesUnlock => {
                let d = Descriptor::base(cb.unlock_group_instances.as_ref());
                if !d.is_none() {
                    copy_group(info, data, false);
                }
                d
            }
            RciStep::GroupStart => {
                let d = Descriptor::base(cb.start_group.as_ref());
                if !d.is_none() {
                    copy_group(info, data, true);
                }
                d
            }

            RciStep::ListInstancesLock => match &cb.lock_list_instances {
                Some(function) => {
                    copy_list(info, data, level?, false)?;
                    Descriptor::Lock {
                        function: Arc::clone(function),
                        item: ResponseItem::None,
                    }
                }
                None => Descriptor::None,
            },
            RciStep::ListInstancesSet => {
                let d = Descriptor::base(cb.set_list_instances.as_ref());
                if !d.is_none() {
                    let index = level?;
                    if !info.set_list_depth(depth) {
                        return None;
                    }
                    info.lists[index].item = data.list[index].item.clone();
                }
                d
            }
            RciStep::ListInstanceRemove => {
                let d = Descriptor::base(cb.remove_list_instance.as_ref());
                if !d.is_none() {
                    copy_list(info, data, level?, true)?;
                }
                d
            }
            RciStep::ListInstancesUnlock => {
                let d = Descriptor::base(cb.unlock_list_instances.as_ref());
                if !d.is_none() {
                    copy_list(info, data, level?, false)?;
                }
                d
            }
            RciStep::ListStart => {
                let d = Descriptor::base(cb.start_list.as_ref());
                if !d.is_none() {
                    copy_list(info, data, level?, true)?;
                }
                d
            }

            RciStep::ElementProcess => {
                let enums = if data.element.kind == ElementType::Enum {
                    data.element.enum_names.clone()
                } else {
                    Vec::new()
                };
                let d = match (info.action, info.embed_transformed_values) {
                    (RciAction::Query, _) => cb.get_element.as_ref().map(|f| Descriptor::Element {
                        function: Arc::clone(f),
                        value: ElementValue::None,
                        enums,
                    }),
                    // A set is served only when `set_element` exists; the
                    // transform variant replaces it when values are embedded.
                    (RciAction::Set, embed) => cb.set_element.as_ref().map(|set| {
                        let value = data.element.value.clone();
                        match cb.set_and_transform_element.as_ref().filter(|_| embed) {
                            Some(f) => Descriptor::Transform {
                                function: Arc::clone(f),
                                value,
                                transformed: None,
                                enums,
                            },
                            None => Descriptor::Element {
                                function: Arc::clone(set),
                                value,
                                enums,
                            },
                        }
                    }),
                    _ => None,
                };
                match d {
                    Some(d) => {
                        if !info.set_list_depth(depth) {
                            return None;
                        }
                        info.element.id = data.element.id;
                        info.element.name.clone_from(&data.element.name);
                        info.element.kind = data.element.kind;
                        d
                    }
                    None => Descriptor::None,
                }
            }
            RciStep::ListEnd => {
                let d = Descriptor::base(cb.end_list.as_ref());
                if !d.is_none() && !info.set_list_depth(depth) {
                    return None;
                }
                d
            }
            RciStep::GroupEnd => Descriptor::base(cb.end_group.as_ref()),
            RciStep::ActionEnd => {
                let d = Descriptor::base(cb.end_action.as_ref());
                if !d.is_none() {
                    info.element.kind = ElementType::NotSet;
                }
                d
            }
            RciStep::SessionEnd => {
                let d = Descriptor::base(cb.end_session.as_ref());
                if !d.is_none() {
                    info.element.kind = ElementType::NotSet;
                }
                d
            }
            RciStep::SessionCancel => Descriptor::None,
        };
        Some(descriptor)
    }

    /// Worker body: run the queued callback outside the lock.
    pub(crate) fn run_worker(&self) {
        let (ticket, mut descriptor, mut info) = {
            let st = sync::lock(&self.state);
            if st.phase != DispatchPhase::CallbackQueued {
                debug!("RCI: nothing queued ({:?})", st.phase);
                return;
            }
            (st.ticket, st.descriptor.clone(), st.info.clone())
        };

        let error_id = descriptor.run(&mut info);
        if error_id != 0 {
            debug!("RCI: callback reported error {}", error_id);
        }

        {
            let mut st = sync::lock(&self.state);
            if st.phase == DispatchPhase::CallbackQueued && st.ticket == ticket {
                st.info = info;
                st.descriptor = descriptor;
                st.error = error_id;
                st.phase = DispatchPhase::CallbackProcessed;
            } else {
                debug!("RCI: session cancelled while the callback ran");
            }
        }
        self.engine.wake();
    }
}

fn copy_group(info: &mut RciInfo, data: &RemoteConfigData, with_item: bool) {
    info.group.id = data.group.id;
    info.group.collection = data.group.collection;
    if with_item {
        info.group.item = data.group.item.clone();
    }
    info.group.name.clone_from(&data.group.name);
    info.clear_lists();
    info.clear_element();
}

fn copy_list(info: &mut RciInfo, data: &RemoteConfigData, index: usize, with_item: bool) -> Option<()> {
    if !info.set_list_depth(data.list.len()) {
        return None;
    }
    let source = &data.list[index];
    let level = &mut info.lists[index];
    level.id = source.id;
    level.collection = source.collection;
    if with_item {
        level.item = source.item.clone();
    }
    level.name.clone_from(&source.name);
    info.clear_element();
    Some(())
}

/// Write the processed step back to the engine and return to idle.
fn finish(step: RciStep, data: &mut RemoteConfigData, st: &mut DispatcherState) {
    let query_setting = st.info.action == RciAction::Query && st.info.group.kind == GroupType::Setting;
    let descriptor = std::mem::take(&mut st.descriptor);
    let info = &mut st.info;

    match step {
        RciStep::GroupStart | RciStep::ListStart => {
            if query_setting {
                data.response.compare_matches = info.query_setting.matches;
            }
        }
        RciStep::GroupInstancesLock | RciStep::ListInstancesLock => {
            if let Descriptor::Lock { item, .. } = descriptor {
                data.response.item = item;
            }
        }
        RciStep::ElementProcess => {
            match descriptor {
                Descriptor::Element { value, .. } if info.action == RciAction::Query => {
                    data.response.element_value = value;
                }
                Descriptor::Transform {
                    transformed: Some(text),
                    ..
                } => {
                    data.response.element_value = ElementValue::String(text);
                }
                _ => {}
            }
            if query_setting {
                data.response.compare_matches = info.query_setting.matches;
                info.query_setting.matches = false;
            }
        }
        RciStep::DoCommand => {
            if let Some(response) = info.do_command.response.take() {
                data.response.element_value = ElementValue::String(response);
            }
        }
        RciStep::ListEnd => {
            if let Some(index) = info.list_depth().checked_sub(1) {
                info.clear_list(index);
            }
            info.clear_element();
        }
        RciStep::GroupEnd => {
            info.clear_group();
            info.clear_lists();
            info.clear_element();
        }
        RciStep::ActionEnd => {
            if info.action == RciAction::DoCommand {
                info.clear_do_command();
            }
        }
        _ => {}
    }

    data.error_id = st.error;
    data.response.error_hint.clone_from(&st.info.error_hint);
    st.error = 0;
    st.phase = DispatchPhase::Idle;
}
