//! Query cache over the comment API.
//!
//! Results are keyed by the full parameter set of the request and tagged by
//! the resources they contain. A mutation invalidates tags; every entry
//! carrying one of them becomes stale and is refetched on its next read.
//! Concurrent reads of the same key share a single request.

use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use alumni_types::*;

use crate::api::{ApiResult, CommentBackend};

/// Logical resource a cached result depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Comment,
    Reply,
    Like,
    Post,
    Gallery,
    User,
}

/// Full parameter set of a cacheable read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Comments {
        parent: ParentRef,
        page: u32,
        limit: u32,
    },
    NestedReplies {
        reply_id: ReplyId,
        max_depth: u32,
    },
    LikeStatus {
        likeable_type: LikeableType,
        likeable_id: i64,
    },
}

impl QueryKey {
    /// Nested reply lists carry the `Comment` tag too, so that any comment or
    /// reply mutation refreshes every open thread.
    pub fn tags(&self) -> &'static [Tag] {
        match self {
            QueryKey::Comments { .. } => &[Tag::Comment],
            QueryKey::NestedReplies { .. } => &[Tag::Comment, Tag::Reply],
            QueryKey::LikeStatus { .. } => &[Tag::Like],
        }
    }
}

/// Writes and the tags each one invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    CreateComment,
    UpdateComment,
    DeleteComment,
    CreateReply,
    UpdateReply,
    DeleteReply,
    ToggleLike,
}

impl Mutation {
    pub fn invalidates(&self) -> &'static [Tag] {
        match self {
            Mutation::CreateComment | Mutation::UpdateComment | Mutation::DeleteComment => &[Tag::Comment],
            // Coarse on purpose: the whole comment tag, not the one thread
            Mutation::CreateReply | Mutation::UpdateReply | Mutation::DeleteReply => &[Tag::Comment],
            Mutation::ToggleLike => &[Tag::Like],
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueryData {
    Comments(CommentPage),
    Replies(Vec<Reply>),
    LikeStatus(LikeStatus),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<QueryData>,
    /// Invalidation epoch current when the request was sent
    fetched_epoch: u64,
    /// Store order, used to tell a result fetched while we waited
    seq: u64,
}

struct CacheState {
    entries: LruCache<QueryKey, CacheEntry>,
    epoch: u64,
    tag_epochs: HashMap<Tag, u64>,
    next_seq: u64,
    inflight: HashMap<QueryKey, Arc<tokio::sync::Mutex<()>>>,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn is_fresh(&self, key: &QueryKey, entry: &CacheEntry) -> bool {
        key.tags().iter().all(|tag| {
            self.tag_epochs
                .get(tag)
                .map_or(true, |invalidated| *invalidated <= entry.fetched_epoch)
        })
    }

    fn fresh_entry(&mut self, key: &QueryKey) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?.clone();
        self.is_fresh(key, &entry).then_some(entry)
    }
}

/// Counters for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct QueryCache {
    state: Mutex<CacheState>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                epoch: 0,
                tag_epochs: HashMap::new(),
                next_seq: 0,
                inflight: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read through the cache. `force` skips a still-valid entry.
    pub async fn fetch<F, Fut>(&self, key: QueryKey, force: bool, fetcher: F) -> ApiResult<Arc<QueryData>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<QueryData>>,
    {
        let (gate, seen_seq) = {
            let mut state = self.state();
            if !force {
                if let Some(entry) = state.fresh_entry(&key) {
                    state.hits += 1;
                    log::debug!(target: "cache", "hit {:?}", key);
                    return Ok(entry.value);
                }
            }
            let seen_seq = state.entries.peek(&key).map_or(0, |e| e.seq);
            let gate = state
                .inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone();
            (gate, seen_seq)
        };

        let guard = gate.lock().await;

        // Another caller may have stored a result while we waited on the gate.
        {
            let mut state = self.state();
            if let Some(entry) = state.fresh_entry(&key) {
                if entry.seq > seen_seq {
                    state.hits += 1;
                    log::debug!(target: "cache", "shared in-flight result for {:?}", key);
                    drop(state);
                    drop(guard);
                    self.release_gate(&key, gate);
                    return Ok(entry.value);
                }
            }
            state.misses += 1;
        }

        let started_epoch = self.state().epoch;
        log::debug!(target: "cache", "miss {:?}", key);
        let result = fetcher().await;

        let outcome = match result {
            Ok(data) => {
                let value = Arc::new(data);
                let mut state = self.state();
                state.next_seq += 1;
                let entry = CacheEntry {
                    value: Arc::clone(&value),
                    fetched_epoch: started_epoch,
                    seq: state.next_seq,
                };
                state.entries.put(key.clone(), entry);
                Ok(value)
            }
            // Failures are not cached; the next read retries.
            Err(e) => Err(e),
        };

        drop(guard);
        self.release_gate(&key, gate);
        outcome
    }

    fn release_gate(&self, key: &QueryKey, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut state = self.state();
        // One reference is held by the map, one by us.
        if Arc::strong_count(&gate) <= 2 {
            state.inflight.remove(key);
        }
    }

    /// Mark every entry carrying one of `tags` stale. Returns the keys that were cached.
    pub fn invalidate(&self, tags: &[Tag]) -> Vec<QueryKey> {
        let mut state = self.state();
        state.epoch += 1;
        let epoch = state.epoch;
        for tag in tags {
            state.tag_epochs.insert(*tag, epoch);
        }
        let affected: Vec<QueryKey> = state
            .entries
            .iter()
            .filter(|(key, _)| key.tags().iter().any(|t| tags.contains(t)))
            .map(|(key, _)| key.clone())
            .collect();
        log::debug!(target: "cache", "invalidated {:?}: {} entries", tags, affected.len());
        affected
    }

    /// Invalidate whatever `mutation` declares.
    pub fn invalidate_for(&self, mutation: Mutation) -> Vec<QueryKey> {
        self.invalidate(mutation.invalidates())
    }

    pub fn is_fresh(&self, key: &QueryKey) -> bool {
        let state = self.state();
        state
            .entries
            .peek(key)
            .is_some_and(|entry| state.is_fresh(key, entry))
    }

    pub fn clear(&self) {
        self.state().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
        }
    }

    // Typed reads

    pub async fn comment_page<B: CommentBackend + ?Sized>(
        &self,
        backend: &B,
        parent: ParentRef,
        page: u32,
        limit: u32,
        force: bool,
    ) -> ApiResult<CommentPage> {
        let key = QueryKey::Comments { parent, page, limit };
        let data = self
            .fetch(key, force, || async move {
                backend.list_comments(parent, page, limit).await.map(QueryData::Comments)
            })
            .await?;
        match data.as_ref() {
            QueryData::Comments(page) => Ok(page.clone()),
            _ => Ok(CommentPage::default()),
        }
    }

    pub async fn nested_replies<B: CommentBackend + ?Sized>(
        &self,
        backend: &B,
        reply_id: ReplyId,
        max_depth: u32,
        force: bool,
    ) -> ApiResult<Vec<Reply>> {
        let key = QueryKey::NestedReplies { reply_id, max_depth };
        let data = self
            .fetch(key, force, || async move {
                backend.nested_replies(reply_id, max_depth).await.map(QueryData::Replies)
            })
            .await?;
        match data.as_ref() {
            QueryData::Replies(replies) => Ok(replies.clone()),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn like_status<B: CommentBackend + ?Sized>(
        &self,
        backend: &B,
        likeable_type: LikeableType,
        likeable_id: i64,
        force: bool,
    ) -> ApiResult<LikeStatus> {
        let key = QueryKey::LikeStatus {
            likeable_type,
            likeable_id,
        };
        let data = self
            .fetch(key, force, || async move {
                backend
                    .like_status(likeable_type, likeable_id)
                    .await
                    .map(QueryData::LikeStatus)
            })
            .await?;
        match data.as_ref() {
            QueryData::LikeStatus(status) => Ok(*status),
            _ => Ok(LikeStatus {
                like_count: 0,
                is_liked: false,
            }),
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn comments_key(page: u32) -> QueryKey {
        QueryKey::Comments {
            parent: ParentRef::new(ParentType::Post, 1),
            page,
            limit: 10,
        }
    }

    fn page_with(total_items: u64) -> QueryData {
        QueryData::Comments(CommentPage {
            comments: vec![],
            total_items,
            total_pages: CommentPage::pages_for(total_items, 10),
        })
    }

    fn total_items(data: &QueryData) -> u64 {
        match data {
            QueryData::Comments(page) => page.total_items,
            _ => panic!("expected comments"),
        }
    }

    #[tokio::test]
    async fn test_second_read_hits_cache() {
        let cache = QueryCache::new(8);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .fetch(comments_key(1), false, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(page_with(3))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_pages_are_cached_independently() {
        let cache = QueryCache::new(8);
        cache.fetch(comments_key(1), false, || async { Ok(page_with(1)) }).await.unwrap();
        cache.fetch(comments_key(2), false, || async { Ok(page_with(2)) }).await.unwrap();

        assert!(cache.is_fresh(&comments_key(1)));
        assert!(cache.is_fresh(&comments_key(2)));
        assert_eq!(cache.stats().entries, 2);
    }

    #[tokio::test]
    async fn test_invalidation_forces_refetch() {
        let cache = QueryCache::new(8);
        cache.fetch(comments_key(1), false, || async { Ok(page_with(1)) }).await.unwrap();

        let affected = cache.invalidate_for(Mutation::CreateReply);
        assert_eq!(affected, vec![comments_key(1)]);
        assert!(!cache.is_fresh(&comments_key(1)));

        let data = cache
            .fetch(comments_key(1), false, || async { Ok(page_with(2)) })
            .await
            .unwrap();
        assert_eq!(total_items(&data), 2);
        assert!(cache.is_fresh(&comments_key(1)));
    }

    #[tokio::test]
    async fn test_like_invalidation_leaves_comment_lists_alone() {
        let cache = QueryCache::new(8);
        cache.fetch(comments_key(1), false, || async { Ok(page_with(1)) }).await.unwrap();

        cache.invalidate_for(Mutation::ToggleLike);
        assert!(cache.is_fresh(&comments_key(1)));
    }

    #[tokio::test]
    async fn test_force_bypasses_fresh_entry() {
        let cache = QueryCache::new(8);
        cache.fetch(comments_key(1), false, || async { Ok(page_with(1)) }).await.unwrap();

        let data = cache
            .fetch(comments_key(1), true, || async { Ok(page_with(5)) })
            .await
            .unwrap();
        assert_eq!(total_items(&data), 5);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = QueryCache::new(8);
        let err = cache
            .fetch(comments_key(1), false, || async { Err(ApiError::Api("boom".to_string())) })
            .await;
        assert!(err.is_err());
        assert_eq!(cache.stats().entries, 0);

        cache.fetch(comments_key(1), false, || async { Ok(page_with(1)) }).await.unwrap();
        assert!(cache.is_fresh(&comments_key(1)));
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_request() {
        let cache = QueryCache::new(8);
        let calls = AtomicUsize::new(0);

        let fetch = || {
            cache.fetch(comments_key(1), false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(page_with(4))
            })
        };

        let (a, b, c) = tokio::join!(fetch(), fetch(), fetch());
        assert_eq!(total_items(&a.unwrap()), 4);
        assert_eq!(total_items(&b.unwrap()), 4);
        assert_eq!(total_items(&c.unwrap()), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_result_racing_an_invalidation_is_stale() {
        let cache = QueryCache::new(8);

        let read = cache.fetch(comments_key(1), false, || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(page_with(1))
        });
        let invalidate = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cache.invalidate(&[Tag::Comment]);
        };
        let (result, _) = tokio::join!(read, invalidate);

        assert_eq!(total_items(&result.unwrap()), 1);
        assert!(!cache.is_fresh(&comments_key(1)));
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let cache = QueryCache::new(2);
        for page in 1..=3 {
            cache
                .fetch(comments_key(page), false, || async { Ok(page_with(1)) })
                .await
                .unwrap();
        }
        assert_eq!(cache.stats().entries, 2);
        assert!(!cache.is_fresh(&comments_key(1)));
        assert!(cache.is_fresh(&comments_key(3)));
    }
}
