//! Storage progress snapshots

use futures_util::future;
use futures_util::{Stream, StreamExt};
use rxstore_storage::Progress;

/// One step of a local storage being added
///
/// Snapshots are immutable; the fraction is captured when the snapshot is
/// taken, not read from the live tracker later.
#[derive(Debug, Clone)]
pub struct StorageProgress<S> {
    storage: S,
    progress_tracker: Option<Progress>,
    fraction_completed: f64,
    is_completed: bool,
}

impl<S> StorageProgress<S> {
    pub fn new(storage: S, progress_tracker: Option<Progress>, is_completed: bool) -> Self {
        let fraction_completed = progress_tracker
            .as_ref()
            .map_or(0.0, Progress::fraction_completed);

        Self {
            storage,
            progress_tracker,
            fraction_completed,
            is_completed,
        }
    }

    pub(crate) fn reported(storage: S, progress_tracker: Progress, fraction_completed: f64) -> Self {
        Self {
            storage,
            progress_tracker: Some(progress_tracker),
            fraction_completed,
            is_completed: false,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn progress_tracker(&self) -> Option<&Progress> {
        self.progress_tracker.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    /// 1.0 once completed, otherwise the captured fraction (0.0 without a tracker)
    pub fn progress(&self) -> f64 {
        if self.is_completed {
            1.0
        } else {
            self.fraction_completed
        }
    }
}

pub trait StorageProgressStreamExt<S, E>: Stream<Item = Result<StorageProgress<S>, E>> + Sized {
    /// Only the final, completed snapshot (errors pass through)
    fn filter_completed(self) -> impl Stream<Item = Result<StorageProgress<S>, E>> {
        self.filter_map(|item| {
            future::ready(match item {
                Ok(snapshot) if !snapshot.is_completed() => None,
                other => Some(other),
            })
        })
    }

    /// Intermediate snapshots as their fraction (errors pass through)
    fn filter_progress(self) -> impl Stream<Item = Result<f64, E>> {
        self.filter_map(|item| {
            future::ready(match item {
                Ok(snapshot) if snapshot.is_completed() => None,
                Ok(snapshot) => Some(Ok(snapshot.progress())),
                Err(e) => Some(Err(e)),
            })
        })
    }
}

impl<St, S, E> StorageProgressStreamExt<S, E> for St where
    St: Stream<Item = Result<StorageProgress<S>, E>> + Sized
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn snapshots() -> Vec<Result<StorageProgress<&'static str>, String>> {
        let tracker = Progress::new(4);
        vec![
            Ok(StorageProgress::reported("store", tracker.clone(), 0.25)),
            Ok(StorageProgress::reported("store", tracker.clone(), 0.5)),
            Ok(StorageProgress::new("store", Some(tracker), true)),
        ]
    }

    #[test]
    fn test_progress_value() {
        let tracker = Progress::new(2);
        tracker.advance();

        assert_eq!(StorageProgress::new("s", None, false).progress(), 0.0);
        assert_eq!(
            StorageProgress::new("s", Some(tracker.clone()), false).progress(),
            0.5
        );
        assert_eq!(StorageProgress::new("s", Some(tracker), true).progress(), 1.0);
        assert_eq!(StorageProgress::new("s", None, true).progress(), 1.0);
    }

    #[test]
    fn test_snapshot_is_not_live() {
        let tracker = Progress::new(4);
        let snapshot = StorageProgress::new("s", Some(tracker.clone()), false);
        tracker.advance();

        assert_eq!(snapshot.progress(), 0.0);
        assert_eq!(snapshot.progress_tracker().unwrap().completed_unit_count(), 1);
    }

    #[tokio::test]
    async fn test_filter_completed() {
        let completed: Vec<_> = stream::iter(snapshots()).filter_completed().collect().await;

        assert_eq!(completed.len(), 1);
        let last = completed[0].as_ref().unwrap();
        assert!(last.is_completed());
        assert_eq!(last.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_filter_progress() {
        let fractions: Vec<f64> = stream::iter(snapshots())
            .filter_progress()
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(fractions, vec![0.25, 0.5]);
    }

    #[tokio::test]
    async fn test_filters_pass_errors_through() {
        let items: Vec<Result<StorageProgress<&str>, String>> = vec![Err("boom".to_string())];

        let completed: Vec<_> = stream::iter(items.clone()).filter_completed().collect().await;
        assert!(matches!(completed.as_slice(), [Err(e)] if e == "boom"));

        let fractions: Vec<_> = stream::iter(items).filter_progress().collect().await;
        assert!(matches!(fractions.as_slice(), [Err(e)] if e == "boom"));
    }
}
