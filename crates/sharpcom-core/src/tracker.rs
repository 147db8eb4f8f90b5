//! Leak diagnostics for live wrappers.
//!
//! When [`Configuration::enable_object_tracking`] is set, every
//! [`ComObject`] registers itself here on creation and removes itself on
//! disposal. Whatever is still registered at shutdown (or when a report is
//! requested) is a wrapper that was never disposed.
//!
//! The tracker is purely observational: it never calls into native code and
//! its bookkeeping failures are logged and ignored.
//!
//! # Scopes
//!
//! References live either in one process-wide table guarded by a mutex, or
//! in a per-thread table ([`TrackingScope::ThreadLocal`]), selected by
//! [`Configuration::use_thread_local_tracking`] at the time a wrapper is
//! tracked. A wrapper is always untracked from the table it was added to.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::SystemTime;

use serde::Serialize;

use crate::config::Configuration;
use crate::error::Result;
use crate::object::ComObject;

type Table = BTreeMap<usize, Vec<ObjectReference>>;

static GLOBAL: Mutex<Table> = Mutex::new(BTreeMap::new());

thread_local! {
    static LOCAL: RefCell<Table> = const { RefCell::new(BTreeMap::new()) };
}

const SCOPE_NONE: u8 = 0;
const SCOPE_GLOBAL: u8 = 1;
const SCOPE_THREAD_LOCAL: u8 = 2;

/// Which table a reference is kept in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingScope {
    Global,
    ThreadLocal,
}

impl TrackingScope {
    /// The scope selected by the current [`Configuration`].
    pub fn current() -> Self {
        if Configuration::current().use_thread_local_tracking {
            Self::ThreadLocal
        } else {
            Self::Global
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::Global => SCOPE_GLOBAL,
            Self::ThreadLocal => SCOPE_THREAD_LOCAL,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            SCOPE_GLOBAL => Some(Self::Global),
            SCOPE_THREAD_LOCAL => Some(Self::ThreadLocal),
            _ => None,
        }
    }
}

/// Per-wrapper state shared with the tracker through a weak reference.
#[derive(Debug)]
pub(crate) struct TrackingState {
    alive: AtomicBool,
    scope: AtomicU8,
}

impl TrackingState {
    pub(crate) fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            scope: AtomicU8::new(SCOPE_NONE),
        }
    }

    pub(crate) fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

// =========================================================================
// ObjectReference
// =========================================================================

/// One tracked wrapper.
#[derive(Clone)]
pub struct ObjectReference {
    /// When the wrapper was tracked.
    pub creation_time: SystemTime,
    /// The native interface pointer at tracking time.
    pub native_pointer: usize,
    /// Interface name recorded by the wrapper.
    pub interface: &'static str,
    /// Backtrace at tracking time, when capture is enabled.
    pub stack_trace: Option<Arc<str>>,
    state: Weak<TrackingState>,
}

impl ObjectReference {
    /// True while the wrapper exists and has not been disposed.
    pub fn is_alive(&self) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| state.alive.load(Ordering::Acquire))
    }

    fn belongs_to(&self, state: &Arc<TrackingState>) -> bool {
        std::ptr::eq(self.state.as_ptr(), Arc::as_ptr(state))
    }
}

impl std::fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReference")
            .field("native_pointer", &format_args!("0x{:X}", self.native_pointer))
            .field("interface", &self.interface)
            .field("alive", &self.is_alive())
            .finish()
    }
}

// =========================================================================
// LeakReport
// =========================================================================

/// Serializable summary of live references, for leak triage.
#[derive(Debug, Clone, Serialize)]
pub struct LeakReport {
    pub scope: TrackingScope,
    pub total: usize,
    pub by_interface: BTreeMap<&'static str, usize>,
    pub objects: Vec<LeakEntry>,
}

/// One live reference in a [`LeakReport`].
#[derive(Debug, Clone, Serialize)]
pub struct LeakEntry {
    pub interface: &'static str,
    pub native_pointer: String,
    pub age_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

// =========================================================================
// ObjectTracker
// =========================================================================

fn lock_global() -> MutexGuard<'static, Table> {
    // Tracking is observational; a panic elsewhere must not disable it.
    GLOBAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn with_table<R>(scope: TrackingScope, f: impl FnOnce(&mut Table) -> R) -> Option<R> {
    match scope {
        TrackingScope::Global => Some(f(&mut lock_global())),
        TrackingScope::ThreadLocal => {
            let result = LOCAL.try_with(|table| table.try_borrow_mut().ok().map(|mut t| f(&mut t)));
            match result {
                Ok(Some(value)) => Some(value),
                _ => {
                    log::warn!("thread-local object tracker unavailable; entry skipped");
                    None
                }
            }
        }
    }
}

/// Registry of live wrappers, keyed by native pointer.
pub struct ObjectTracker;

impl ObjectTracker {
    /// Track `object` in the scope selected by the current configuration.
    pub fn track(object: &ComObject) {
        Self::track_in(TrackingScope::current(), object);
    }

    /// Track `object` in `scope`. A wrapper is tracked at most once.
    pub fn track_in(scope: TrackingScope, object: &ComObject) {
        let ptr = object.as_raw();
        if ptr.is_null() {
            return;
        }
        let state = object.tracking_state();
        if state
            .scope
            .compare_exchange(SCOPE_NONE, scope.tag(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let stack_trace = Configuration::current()
            .capture_stack_traces
            .then(|| Arc::from(std::backtrace::Backtrace::force_capture().to_string()));
        let reference = ObjectReference {
            creation_time: SystemTime::now(),
            native_pointer: ptr as usize,
            interface: object.interface_name(),
            stack_trace,
            state: Arc::downgrade(state),
        };

        let added = with_table(scope, |table| {
            table.entry(ptr as usize).or_default().push(reference);
        });
        if added.is_none() {
            state.scope.store(SCOPE_NONE, Ordering::Release);
        }
    }

    /// Remove `object` from the table it was tracked in. No-op if untracked.
    pub fn untrack(object: &ComObject) {
        Self::untrack_raw(object.as_raw(), object.tracking_state());
    }

    pub(crate) fn untrack_raw(ptr: *mut c_void, state: &Arc<TrackingState>) {
        let Some(scope) = TrackingScope::from_tag(state.scope.swap(SCOPE_NONE, Ordering::AcqRel)) else {
            return;
        };
        with_table(scope, |table| {
            let key = ptr as usize;
            if let Some(references) = table.get_mut(&key) {
                references.retain(|reference| !reference.belongs_to(state));
                if references.is_empty() {
                    table.remove(&key);
                }
            }
        });
    }

    /// All references tracked for `ptr` in the configured scope.
    pub fn find(ptr: *mut c_void) -> Vec<ObjectReference> {
        Self::find_in(TrackingScope::current(), ptr)
    }

    /// All references tracked for `ptr` in `scope`.
    pub fn find_in(scope: TrackingScope, ptr: *mut c_void) -> Vec<ObjectReference> {
        with_table(scope, |table| table.get(&(ptr as usize)).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// The reference registered by `object`, if it is tracked.
    pub fn find_object_reference(object: &ComObject) -> Option<ObjectReference> {
        let state = object.tracking_state();
        let scope = TrackingScope::from_tag(state.scope.load(Ordering::Acquire))?;
        Self::find_in(scope, object.as_raw())
            .into_iter()
            .find(|reference| reference.belongs_to(state))
    }

    /// Every live reference in the configured scope.
    pub fn find_active_objects() -> Vec<ObjectReference> {
        Self::find_active_objects_in(TrackingScope::current())
    }

    /// Every live reference in `scope`, ordered by native pointer.
    pub fn find_active_objects_in(scope: TrackingScope) -> Vec<ObjectReference> {
        with_table(scope, |table| {
            table
                .values()
                .flatten()
                .filter(|reference| reference.is_alive())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    /// Live reference counts grouped by interface name.
    pub fn summary_by_type_in(scope: TrackingScope) -> BTreeMap<&'static str, usize> {
        let mut summary = BTreeMap::new();
        for reference in Self::find_active_objects_in(scope) {
            *summary.entry(reference.interface).or_insert(0) += 1;
        }
        summary
    }

    /// [`summary_by_type_in`](Self::summary_by_type_in) for the configured scope.
    pub fn summary_by_type() -> BTreeMap<&'static str, usize> {
        Self::summary_by_type_in(TrackingScope::current())
    }

    /// Structured report of live references in `scope`.
    pub fn leak_report_in(scope: TrackingScope) -> LeakReport {
        let now = SystemTime::now();
        let objects: Vec<LeakEntry> = Self::find_active_objects_in(scope)
            .into_iter()
            .map(|reference| LeakEntry {
                interface: reference.interface,
                native_pointer: format!("0x{:X}", reference.native_pointer),
                age_ms: now
                    .duration_since(reference.creation_time)
                    .map(|age| age.as_millis())
                    .unwrap_or(0),
                stack_trace: reference.stack_trace.as_deref().map(str::to_owned),
            })
            .collect();

        let mut by_interface = BTreeMap::new();
        for entry in &objects {
            *by_interface.entry(entry.interface).or_insert(0) += 1;
        }

        LeakReport {
            scope,
            total: objects.len(),
            by_interface,
            objects,
        }
    }

    /// The leak report for the configured scope as JSON.
    pub fn report_json() -> Result<String> {
        Ok(serde_json::to_string_pretty(&Self::leak_report_in(TrackingScope::current()))?)
    }

    /// Human-readable listing of live references in `scope`.
    pub fn report_active_objects_in(scope: TrackingScope) -> String {
        let report = Self::leak_report_in(scope);
        let mut text = String::new();
        for (index, entry) in report.objects.iter().enumerate() {
            let _ = writeln!(
                text,
                "[{index}]: Active COM Object: [{}] Interface: [{}] Age: [{} ms]",
                entry.native_pointer, entry.interface, entry.age_ms
            );
            if let Some(stack) = &entry.stack_trace {
                for line in stack.lines() {
                    let _ = writeln!(text, "    {line}");
                }
            }
        }
        if !report.by_interface.is_empty() {
            text.push_str("Count per interface:\n");
            for (interface, count) in &report.by_interface {
                let _ = writeln!(text, "    {interface} : {count}");
            }
        }
        text
    }

    /// [`report_active_objects_in`](Self::report_active_objects_in) for the configured scope.
    pub fn report_active_objects() -> String {
        Self::report_active_objects_in(TrackingScope::current())
    }
}
