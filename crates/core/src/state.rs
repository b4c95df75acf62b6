//! Application state slices.
//!
//! Every slice is created once by [`AppStateStore::new`] together with a single
//! private writer. Readers are freely cloneable; writers are not, and each can
//! be taken out of [`AppStateWriters`] exactly once by the owning domain.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{ElementsState, InfoState, PageState, PipState, StatusState, TimeState};

/// Read-only handle to one state slice.
#[derive(Debug)]
pub struct SliceReader<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for SliceReader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> SliceReader<T> {
    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.read().clone()
    }

    /// Borrow-free projection, avoids cloning the whole slice.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.read())
    }

    fn read(&self) -> RwLockReadGuard<'_, T> {
        // A panicking writer never leaves a slice half-written: every write
        // replaces or mutates under the guard, so the poisoned value is usable.
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// The single writer for one state slice.
#[derive(Debug)]
pub struct SliceWriter<T> {
    inner: Arc<RwLock<T>>,
}

impl<T: Clone + PartialEq> SliceWriter<T> {
    /// Replace the value. Returns `true` when it actually changed.
    pub fn set(&self, value: T) -> bool {
        let mut guard = self.write();
        if *guard == value {
            return false;
        }
        *guard = value;
        true
    }

    /// Mutate in place and return the new value.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> T {
        let mut guard = self.write();
        f(&mut guard);
        guard.clone()
    }

    pub fn reader(&self) -> SliceReader<T> {
        SliceReader {
            inner: self.inner.clone(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn slice<T>(initial: T) -> (SliceReader<T>, SliceWriter<T>) {
    let inner = Arc::new(RwLock::new(initial));
    (
        SliceReader {
            inner: inner.clone(),
        },
        SliceWriter { inner },
    )
}

/// Read views over all six slices. Cheap to clone; handed to every domain.
#[derive(Debug, Clone)]
pub struct AppStateStore {
    pub page: SliceReader<PageState>,
    pub elements: SliceReader<ElementsState>,
    pub status: SliceReader<StatusState>,
    pub time: SliceReader<TimeState>,
    pub pip: SliceReader<PipState>,
    pub info: SliceReader<InfoState>,
}

/// Writers not yet claimed by a domain.
#[derive(Debug)]
pub struct AppStateWriters {
    page: Option<SliceWriter<PageState>>,
    elements: Option<SliceWriter<ElementsState>>,
    status: Option<SliceWriter<StatusState>>,
    time: Option<SliceWriter<TimeState>>,
    pip: Option<SliceWriter<PipState>>,
    info: Option<SliceWriter<InfoState>>,
}

impl AppStateStore {
    /// Create all slices with their fixed initial values.
    pub fn new() -> (AppStateStore, AppStateWriters) {
        let (page_r, page_w) = slice(PageState::default());
        let (elements_r, elements_w) = slice(ElementsState::default());
        let (status_r, status_w) = slice(StatusState::default());
        let (time_r, time_w) = slice(TimeState::default());
        let (pip_r, pip_w) = slice(PipState::default());
        let (info_r, info_w) = slice(InfoState::default());

        let store = AppStateStore {
            page: page_r,
            elements: elements_r,
            status: status_r,
            time: time_r,
            pip: pip_r,
            info: info_r,
        };
        let writers = AppStateWriters {
            page: Some(page_w),
            elements: Some(elements_w),
            status: Some(status_w),
            time: Some(time_w),
            pip: Some(pip_w),
            info: Some(info_w),
        };
        (store, writers)
    }
}

impl AppStateWriters {
    pub fn take_page(&mut self) -> Option<SliceWriter<PageState>> {
        self.page.take()
    }

    pub fn take_elements(&mut self) -> Option<SliceWriter<ElementsState>> {
        self.elements.take()
    }

    pub fn take_status(&mut self) -> Option<SliceWriter<StatusState>> {
        self.status.take()
    }

    pub fn take_time(&mut self) -> Option<SliceWriter<TimeState>> {
        self.time.take()
    }

    pub fn take_pip(&mut self) -> Option<SliceWriter<PipState>> {
        self.pip.take()
    }

    pub fn take_info(&mut self) -> Option<SliceWriter<InfoState>> {
        self.info.take()
    }

    /// Names of slices nobody claimed. Useful for startup diagnostics.
    pub fn unclaimed(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.page.is_some() {
            names.push("page");
        }
        if self.elements.is_some() {
            names.push("elements");
        }
        if self.status.is_some() {
            names.push("status");
        }
        if self.time.is_some() {
            names.push("time");
        }
        if self.pip.is_some() {
            names.push("pip");
        }
        if self.info.is_some() {
            names.push("info");
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_visible_through_reader() {
        let (store, mut writers) = AppStateStore::new();
        let page = writers.take_page().unwrap();
        assert!(page.set(PageState {
            url: "https://example.com/".into(),
            is_watch_page: false,
            generation: 1,
        }));
        assert_eq!(store.page.get().generation, 1);
        assert_eq!(store.page.with(|p| p.url.clone()), "https://example.com/");
    }

    #[test]
    fn test_writer_taken_once() {
        let (_store, mut writers) = AppStateStore::new();
        assert!(writers.take_pip().is_some());
        assert!(writers.take_pip().is_none());
        assert!(!writers.unclaimed().contains(&"pip"));
        assert!(writers.unclaimed().contains(&"page"));
    }

    #[test]
    fn test_set_reports_unchanged() {
        let (_store, mut writers) = AppStateStore::new();
        let pip = writers.take_pip().unwrap();
        assert!(!pip.set(PipState::default()));
        let updated = pip.update(|p| p.enabled = true);
        assert!(updated.enabled);
    }
}
