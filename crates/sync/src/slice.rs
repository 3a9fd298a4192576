//! Per-slice state and the rules for folding a fetch result into it.

use crate::selection::Selection;
use crate::source::FetchError;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    NotLoaded,
    Loaded,
}

/// Where the data currently held by a slice came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Remote,
    Cache,
    Fallback,
    /// Nothing usable; the slice holds an empty value.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slice<T> {
    pub data: Option<T>,
    pub origin: Option<Origin>,
    /// Selection scope the data was loaded for.
    pub scope: Option<Selection>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for Slice<T> {
    fn default() -> Self {
        Self {
            data: None,
            origin: None,
            scope: None,
            last_error: None,
            updated_at: None,
        }
    }
}

impl<T> Slice<T> {
    pub fn state(&self) -> LoadState {
        if self.data.is_some() {
            LoadState::Loaded
        } else {
            LoadState::NotLoaded
        }
    }

    /// Loaded for exactly `scope`.
    pub fn holds(&self, scope: &Selection) -> bool {
        self.data.is_some() && self.scope.as_ref() == Some(scope)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn store(&mut self, data: T, origin: Origin, scope: Selection, now: DateTime<Utc>) {
        self.data = Some(data);
        self.origin = Some(origin);
        self.scope = Some(scope);
        self.updated_at = Some(now);
    }
}

/// What happened to a slice after one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceOutcome {
    Applied(Origin),
    /// Fetch failed; the previous data for the same scope was kept.
    KeptPrior,
    /// Fetch failed under a dimension filter; the slice was emptied.
    Cleared,
    /// The selection moved on before the result could be applied.
    Stale,
}

#[derive(Debug, PartialEq)]
pub enum Resolution<T> {
    Use { data: T, origin: Origin },
    KeepPrior,
    Clear,
}

/// Decide what a slice should show after a fetch.
///
/// A successful remote result always wins, even when empty. On failure a
/// dimension-filtered slice is cleared, since numbers from another scope
/// would be wrong rather than merely old. An unfiltered slice keeps what it
/// already had for this scope, then tries the fallback, then goes empty.
pub fn resolve<T: Default>(
    remote: Result<T, FetchError>,
    dimension_filtered: bool,
    has_prior: bool,
    fallback: impl FnOnce() -> Option<T>,
) -> Resolution<T> {
    match remote {
        Ok(data) => Resolution::Use {
            data,
            origin: Origin::Remote,
        },
        Err(_) if dimension_filtered => Resolution::Clear,
        Err(_) if has_prior => Resolution::KeepPrior,
        Err(_) => match fallback() {
            Some(data) => Resolution::Use {
                data,
                origin: Origin::Fallback,
            },
            None => Resolution::Use {
                data: T::default(),
                origin: Origin::Empty,
            },
        },
    }
}

/// Fold a fetch result into `slice` for `scope`.
pub(crate) fn apply<T: Default>(
    slice: &mut Slice<T>,
    scope: Selection,
    remote: Result<T, FetchError>,
    dimension_filtered: bool,
    fallback: impl FnOnce() -> Option<T>,
    now: DateTime<Utc>,
) -> SliceOutcome {
    let error = remote.as_ref().err().map(ToString::to_string);
    let has_prior = slice.holds(&scope);
    let outcome = match resolve(remote, dimension_filtered, has_prior, fallback) {
        Resolution::Use { data, origin } => {
            slice.store(data, origin, scope, now);
            SliceOutcome::Applied(origin)
        }
        Resolution::KeepPrior => SliceOutcome::KeptPrior,
        Resolution::Clear => {
            slice.store(T::default(), Origin::Empty, scope, now);
            SliceOutcome::Cleared
        }
    };
    slice.last_error = error;
    outcome
}
