#![warn(clippy::unwrap_used)]

//! Source reconciliation: keeps record, summary, trend, and account data
//! consistent with the current selection across remote, cache, and
//! fallback sources.

pub mod reconciler;
pub mod selection;
pub mod slice;
pub mod source;

pub use reconciler::{Reconciler, RefreshReport, Slices};
pub use selection::{Selection, SliceKind};
pub use slice::{resolve, LoadState, Origin, Resolution, Slice, SliceOutcome};
pub use source::{Endpoint, FetchError, JsonFileSource, MemorySource, RemoteSource};
