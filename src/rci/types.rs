//! Remote configuration vocabulary.
//!
//! [`RemoteConfigData`] is what the engine hands over on every step;
//! [`RciInfo`] is the traversal state the connector keeps between steps and
//! shows to user callbacks.

use heapless::Vec as BoundedVec;

/// Deepest list nesting a descriptor may use.
pub const RCI_LIST_MAX_DEPTH: usize = 4;

/// Error id reported for an enum value outside the element's table.
pub const RCI_ERROR_BAD_VALUE: u32 = 3;

// ── Steps and attributes ──────────────────────────────────────

/// One engine traversal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RciStep {
    SessionStart,
    ActionStart,
    DoCommand,
    Reboot,
    SetFactoryDefaults,
    GroupStart,
    GroupInstancesLock,
    GroupInstancesSet,
    GroupInstanceRemove,
    GroupInstancesUnlock,
    ListStart,
    ListInstancesLock,
    ListInstancesSet,
    ListInstanceRemove,
    ListInstancesUnlock,
    ElementProcess,
    ListEnd,
    GroupEnd,
    ActionEnd,
    SessionEnd,
    SessionCancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RciAction {
    Set,
    #[default]
    Query,
    DoCommand,
    Reboot,
    SetFactoryDefaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupType {
    #[default]
    Setting,
    State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionType {
    #[default]
    FixedArray,
    VariableArray,
    FixedDictionary,
    VariableDictionary,
}

/// Which instance of a collection a step refers to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CollectionItem {
    #[default]
    None,
    Index(u32),
    Key(String),
    /// New instance count for a variable array.
    Count(u32),
    /// New key set for a variable dictionary.
    Keys(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuerySource {
    #[default]
    Current,
    Stored,
    Defaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareTo {
    #[default]
    None,
    Current,
    Stored,
    Defaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementType {
    #[default]
    NotSet,
    String,
    MultilineString,
    Password,
    Int32,
    Uint32,
    Hex32,
    ZeroXHex32,
    Float,
    Enum,
    OnOff,
    Bool,
    Ipv4,
    Fqdnv4,
    Fqdnv6,
    List,
    MacAddr,
    Datetime,
    RefEnum,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ElementValue {
    #[default]
    None,
    String(String),
    SignedInteger(i32),
    UnsignedInteger(u32),
    Float(f32),
    Enum(u32),
    OnOff(bool),
    Boolean(bool),
}

/// Answer of an instance lock callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResponseItem {
    #[default]
    None,
    Count(u32),
    Keys(Vec<String>),
}

// ── Engine side ───────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RemoteGroup {
    pub kind: GroupType,
    pub id: u32,
    pub collection: CollectionType,
    pub item: CollectionItem,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteListLevel {
    pub id: u32,
    pub collection: CollectionType,
    pub item: CollectionItem,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteElement {
    pub id: u32,
    pub name: Option<String>,
    pub kind: ElementType,
    pub value: ElementValue,
    /// Symbolic names of an enum element, in ordinal order.
    pub enum_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteAttributes {
    pub source: QuerySource,
    pub compare_to: CompareTo,
    pub embed_transformed_values: bool,
    /// Do-command target.
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteResponse {
    pub element_value: ElementValue,
    pub compare_matches: bool,
    pub item: ResponseItem,
    pub error_hint: Option<String>,
}

/// Per-step exchange with the engine. Input fields describe the position
/// in the descriptor tree; `response` and `error_id` are written back.
#[derive(Debug, Clone, Default)]
pub struct RemoteConfigData {
    pub action: RciAction,
    pub group: RemoteGroup,
    /// Current list path; its length is the nesting depth.
    pub list: BoundedVec<RemoteListLevel, RCI_LIST_MAX_DEPTH>,
    pub element: RemoteElement,
    pub attribute: RemoteAttributes,
    pub response: RemoteResponse,
    pub error_id: u32,
}

// ── Connector side ────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub kind: GroupType,
    pub id: u32,
    pub collection: CollectionType,
    pub item: CollectionItem,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListInfo {
    pub id: u32,
    pub collection: CollectionType,
    pub item: CollectionItem,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementInfo {
    pub id: u32,
    pub name: Option<String>,
    pub kind: ElementType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySetting {
    pub source: QuerySource,
    pub compare_to: CompareTo,
    /// Set by callbacks when the queried value equals the comparison value.
    pub matches: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoCommandInfo {
    pub target: Option<String>,
    pub request: Option<String>,
    /// Filled by the do-command callback.
    pub response: Option<String>,
}

/// Traversal state shown to every callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RciInfo {
    pub action: RciAction,
    pub group: GroupInfo,
    pub lists: BoundedVec<ListInfo, RCI_LIST_MAX_DEPTH>,
    pub element: ElementInfo,
    pub query_setting: QuerySetting,
    pub embed_transformed_values: bool,
    pub do_command: DoCommandInfo,
    pub error_hint: Option<String>,
}

impl RciInfo {
    pub fn list_depth(&self) -> usize {
        self.lists.len()
    }

    pub(crate) fn clear_group(&mut self) {
        self.group.id = 0;
        self.group.item = CollectionItem::None;
        self.group.name = None;
    }

    pub(crate) fn clear_lists(&mut self) {
        self.lists.clear();
    }

    pub(crate) fn clear_list(&mut self, index: usize) {
        if let Some(level) = self.lists.get_mut(index) {
            *level = ListInfo {
                collection: level.collection,
                ..ListInfo::default()
            };
        }
    }

    pub(crate) fn clear_element(&mut self) {
        self.element.id = 0;
        self.element.name = None;
    }

    pub(crate) fn clear_do_command(&mut self) {
        self.do_command = DoCommandInfo::default();
    }

    /// Grow or shrink the list path to `depth` levels.
    pub(crate) fn set_list_depth(&mut self, depth: usize) -> bool {
        if depth > RCI_LIST_MAX_DEPTH {
            return false;
        }
        self.lists.truncate(depth);
        while self.lists.len() < depth {
            if self.lists.push(ListInfo::default()).is_err() {
                return false;
            }
        }
        true
    }
}

/// Failure reported by an RCI callback: a descriptor error id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RciError(pub u32);

impl RciError {
    pub const BAD_VALUE: Self = Self(RCI_ERROR_BAD_VALUE);
}

impl core::fmt::Display for RciError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "rci error {}", self.0)
    }
}

pub type RciResult = Result<(), RciError>;
