//! Entity stores
//!
//! Each store keeps its state in an [`Observable`]: a `watch` channel
//! holding an `Arc` of the whole state. Mutations never edit the published
//! value in place. They clone the previous state, change the copy and
//! publish it, so observers can detect change with [`Arc::ptr_eq`] and
//! readers never see a half-applied merge.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::Result;

pub mod account;
pub mod filter;
pub mod media;
pub mod status;
pub mod view;

pub use account::{AccountState, AccountStore};
pub use filter::{filter_statuses, StatusFilter};
pub use media::{MediaState, MediaStore};
pub use status::{StatusState, StatusStore, Timeline};
pub use view::{LayoutMode, ViewSettings, ViewStore};

/// Copy-on-write state cell with change notification.
pub struct Observable<S> {
    tx: watch::Sender<Arc<S>>,
}

impl<S> Observable<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(initial: S) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<S> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<S>> {
        self.tx.subscribe()
    }

    /// Publish a new state derived from a copy of the current one.
    pub fn update(&self, apply: impl FnOnce(&mut S)) {
        self.tx.send_modify(|current| {
            let mut next = S::clone(current);
            apply(&mut next);
            *current = Arc::new(next);
        });
    }

    /// Like [`update`](Self::update), but observers are only notified when
    /// `apply` returns `true`.
    pub fn update_if(&self, apply: impl FnOnce(&mut S) -> bool) -> bool {
        self.tx.send_if_modified(|current| {
            let mut next = S::clone(current);
            if apply(&mut next) {
                *current = Arc::new(next);
                true
            } else {
                false
            }
        })
    }
}

impl<S: Default + Clone + Send + Sync + 'static> Default for Observable<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

/// Cancellation marker for UI-driven loads.
///
/// Cancelling does not abort the request that is already running. It only
/// stops its result from being applied.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Await `future` and hand its value to `apply` unless `flag` was cancelled
/// in the meantime.
///
/// Returns `Ok(true)` if `apply` ran. Once cancelled, errors from `future`
/// are discarded as well.
pub async fn run_unless_cancelled<T, Fut, A>(flag: &CancelFlag, future: Fut, apply: A) -> Result<bool>
where
    Fut: Future<Output = Result<T>>,
    A: FnOnce(T),
{
    let outcome = future.await;

    if flag.is_cancelled() {
        if let Err(e) = &outcome {
            tracing::debug!(error = %e, "Dropping error from cancelled load");
        }
        return Ok(false);
    }

    apply(outcome?);
    Ok(true)
}

/// Append `ids` to `list`, skipping ids already present.
pub(crate) fn append_unique<'a, I>(list: &mut Vec<String>, ids: I)
where
    I: IntoIterator<Item = &'a str>,
{
    for id in ids {
        if !list.iter().any(|existing| existing == id) {
            list.push(id.to_string());
        }
    }
}

/// Move `id` to the front of `list`.
pub(crate) fn prepend_unique(list: &mut Vec<String>, id: &str) {
    list.retain(|existing| existing != id);
    list.insert(0, id.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, FeomoError};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        value: u32,
    }

    #[test]
    fn test_update_publishes_a_new_snapshot() {
        let state = Observable::new(Counter::default());
        let before = state.get();

        state.update(|c| c.value += 1);

        let after = state.get();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.value, 0);
        assert_eq!(after.value, 1);
    }

    #[test]
    fn test_update_if_skips_unchanged_state() {
        let state = Observable::new(Counter::default());
        let before = state.get();

        assert!(!state.update_if(|_| false));
        assert!(Arc::ptr_eq(&before, &state.get()));
    }

    #[tokio::test]
    async fn test_subscribers_are_notified() {
        let state = Observable::new(Counter::default());
        let mut rx = state.subscribe();

        state.update(|c| c.value = 5);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().value, 5);
    }

    #[tokio::test]
    async fn test_cancelled_load_is_not_applied() {
        let flag = CancelFlag::new();
        let mut applied = None;

        let load = async {
            flag.cancel();
            Ok::<_, FeomoError>(3)
        };
        let ran = run_unless_cancelled(&flag, load, |v| applied = Some(v))
            .await
            .unwrap();

        assert!(!ran);
        assert_eq!(applied, None);
    }

    #[tokio::test]
    async fn test_cancelled_load_swallows_error() {
        let flag = CancelFlag::new();
        flag.cancel();

        let load = async { Err::<u32, _>(FeomoError::Api(ApiError::Network("gone".to_string()))) };
        let ran = run_unless_cancelled(&flag, load, |_| {}).await.unwrap();
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_live_load_is_applied() {
        let flag = CancelFlag::new();
        let mut applied = None;

        let ran = run_unless_cancelled(&flag, async { Ok(7) }, |v| applied = Some(v))
            .await
            .unwrap();

        assert!(ran);
        assert_eq!(applied, Some(7));
    }

    #[test]
    fn test_append_unique_keeps_first_position() {
        let mut list = vec!["a".to_string(), "b".to_string()];
        append_unique(&mut list, ["c", "a", "d", "c"]);
        assert_eq!(list, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_prepend_unique_moves_to_front() {
        let mut list = vec!["a".to_string(), "b".to_string()];
        prepend_unique(&mut list, "b");
        prepend_unique(&mut list, "z");
        assert_eq!(list, vec!["z", "b", "a"]);
    }
}
