//! Remote configuration interface (RCI).
//!
//! The engine walks a descriptor tree (session → action → group → lists →
//! elements) and calls the connector once per step. Application callbacks
//! may touch persistent storage, so each step is handed to the RCI worker
//! and the engine polls until it has run.
//!
//! ```text
//!  ┌──────────────┐  step, &mut RemoteConfigData  ┌──────────────┐
//!  │ engine thread│ ─────────────────────────────▶│  RciService  │
//!  │              │ ◀── Busy … Busy … Continue ── │  (phases)    │
//!  └──────────────┘                               └──────┬───────┘
//!                                                 signal │ ▲ wake
//!                                                        ▼ │
//!                                                 ┌──────────────┐
//!                                                 │  rci worker  │──▶ RciCallbacks
//!                                                 └──────────────┘
//! ```

mod dispatcher;
pub mod types;

pub use dispatcher::{
    BaseFn, DispatchPhase, ElementFn, LockFn, RciCallbacks, RciService, TransformFn,
};
pub use types::*;
