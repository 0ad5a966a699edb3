use db_model::Entity;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Soft time budget: a pending batch is flushed even if it hasn't hit
/// `cap` once this much time has elapsed since its first item.
const SOFT_BATCH_BUDGET: Duration = Duration::from_millis(256);

/// A predicate over incoming items that, when true, forces the
/// chunker to flush the pending batch before the triggering item
/// (which then starts the next batch).
pub trait SplitPolicy<T> {
    fn should_split(&mut self, item: &T) -> bool;
}

/// Never forces an early flush; batches are bounded by `cap` and the
/// soft time budget alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSplit;

impl<T> SplitPolicy<T> for NeverSplit {
    fn should_split(&mut self, _item: &T) -> bool {
        false
    }
}

/// Forces a flush when the next item's identifier has already been
/// seen in the current batch — used by the insert-ignore and upsert
/// paths so a single `ON DUPLICATE KEY UPDATE` / `ON CONFLICT` batch
/// never contains the same key twice.
#[derive(Debug, Default)]
pub struct SplitOnDupId {
    seen: HashSet<db_model::Identifier>,
}

impl SplitOnDupId {
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }
}

impl<T: Entity> SplitPolicy<T> for SplitOnDupId {
    fn should_split(&mut self, item: &T) -> bool {
        let id = item.id();
        if self.seen.contains(&id) {
            self.seen.clear();
            self.seen.insert(id);
            true
        } else {
            self.seen.insert(id);
            false
        }
    }
}

/// Groups `in_rx` into batches bounded by `cap` items, a soft time
/// budget, and the split policy produced by `split_policy_factory`.
/// The returned channel closes when `in_rx` closes (after flushing
/// the trailing batch) or when `cancel` fires (trailing partial batch
/// may be dropped).
pub fn bulk<T, P, F>(
    cancel: CancellationToken,
    mut in_rx: mpsc::Receiver<T>,
    cap: usize,
    split_policy_factory: F,
) -> mpsc::Receiver<Vec<T>>
where
    T: Send + 'static,
    P: SplitPolicy<T> + Send + 'static,
    F: FnOnce() -> P + Send + 'static,
{
    let cap = cap.max(1);
    let (out_tx, out_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut policy = split_policy_factory();
        let mut pending: Vec<T> = Vec::with_capacity(cap);
        let mut batch_started_at: Option<Instant> = None;

        loop {
            let sleep_fut = async {
                match batch_started_at {
                    Some(started) => {
                        let deadline = started + SOFT_BATCH_BUDGET;
                        tokio::time::sleep_until(deadline).await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(dropped = pending.len(), "bulk chunker cancelled, dropping trailing batch");
                    return;
                }

                maybe_item = in_rx.recv() => {
                    match maybe_item {
                        Some(item) => {
                            // Always consult the policy so it records this item's
                            // id, even when `pending` is empty — otherwise a
                            // duplicate arriving later in the same still-open
                            // batch would go unnoticed (the id was never added
                            // to `seen` the first time around).
                            let should_split = policy.should_split(&item);

                            if !pending.is_empty() && should_split {
                                let flushed = std::mem::replace(&mut pending, Vec::with_capacity(cap));
                                if out_tx.send(flushed).await.is_err() {
                                    return;
                                }
                                batch_started_at = Some(Instant::now());
                            } else if pending.is_empty() {
                                batch_started_at = Some(Instant::now());
                            }

                            pending.push(item);

                            if pending.len() >= cap {
                                let flushed = std::mem::replace(&mut pending, Vec::with_capacity(cap));
                                batch_started_at = None;
                                if out_tx.send(flushed).await.is_err() {
                                    return;
                                }
                            }
                        }
                        None => {
                            if !pending.is_empty() {
                                let _ = out_tx.send(pending).await;
                            }
                            return;
                        }
                    }
                }

                _ = sleep_fut, if batch_started_at.is_some() => {
                    if !pending.is_empty() {
                        let flushed = std::mem::replace(&mut pending, Vec::with_capacity(cap));
                        batch_started_at = None;
                        if out_tx.send(flushed).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_model::Identifier;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Item(u8);

    impl Entity for Item {
        fn id(&self) -> Identifier {
            Identifier::new(vec![self.0])
        }

        fn fingerprint(&self) -> Vec<u8> {
            vec![self.0]
        }
    }

    #[tokio::test]
    async fn batches_by_cap_and_preserves_order() {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        let mut out = bulk(cancel, rx, 2, NeverSplit::default);

        for i in 0..5u8 {
            tx.send(Item(i)).await.unwrap();
        }
        drop(tx);

        let mut all = Vec::new();
        while let Some(batch) = out.recv().await {
            assert!(batch.len() <= 2 && !batch.is_empty());
            all.extend(batch);
        }
        assert_eq!(all, (0..5).map(Item).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn cap_zero_is_treated_as_one() {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        let mut out = bulk(cancel, rx, 0, NeverSplit::default);

        tx.send(Item(1)).await.unwrap();
        tx.send(Item(2)).await.unwrap();
        drop(tx);

        let first = out.recv().await.unwrap();
        assert_eq!(first.len(), 1);
        let second = out.recv().await.unwrap();
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn split_on_dup_id_never_batches_duplicate_keys_together() {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        let mut out = bulk(cancel, rx, 10, SplitOnDupId::new);

        for item in [Item(7), Item(7), Item(8)] {
            tx.send(item).await.unwrap();
        }
        drop(tx);

        let mut batches = Vec::new();
        while let Some(b) = out.recv().await {
            batches.push(b);
        }

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![Item(7)]);
        assert_eq!(batches[1], vec![Item(7), Item(8)]);
    }

    #[tokio::test]
    async fn closing_input_flushes_trailing_partial_batch() {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        let mut out = bulk(cancel, rx, 10, NeverSplit::default);

        tx.send(Item(1)).await.unwrap();
        drop(tx);

        let batch = out.recv().await.unwrap();
        assert_eq!(batch, vec![Item(1)]);
        assert!(out.recv().await.is_none());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use db_model::Identifier;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Item(u16);

    impl Entity for Item {
        fn id(&self) -> Identifier {
            Identifier::new(self.0.to_be_bytes().to_vec())
        }

        fn fingerprint(&self) -> Vec<u8> {
            self.0.to_be_bytes().to_vec()
        }
    }

    proptest! {
        #[test]
        fn batches_stay_within_cap_and_reassemble_the_input(
            items in proptest::collection::vec(0u16..500, 0..64),
            cap in 1usize..16,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let cancel = CancellationToken::new();
                let (tx, rx) = mpsc::channel(items.len().max(1));
                let mut out = bulk(cancel, rx, cap, NeverSplit::default);

                for &v in &items {
                    tx.send(Item(v)).await.unwrap();
                }
                drop(tx);

                let mut reassembled = Vec::new();
                while let Some(batch) = out.recv().await {
                    prop_assert!(!batch.is_empty());
                    prop_assert!(batch.len() <= cap);
                    reassembled.extend(batch);
                }

                prop_assert_eq!(reassembled, items.into_iter().map(Item).collect::<Vec<_>>());
                Ok(())
            })?;
        }
    }
}
