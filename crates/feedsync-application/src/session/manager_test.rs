use super::*;
use crate::session::persistence::DescriptorStore;
use async_trait::async_trait;
use feedsync_core::clock::FakeClock;
use feedsync_core::request::ResponseConsumer;
use feedsync_core::store::ContentMutation;
use feedsync_core::stream::{DataOperation, FeedResponse, OperationKind, StructuralOperation};
use feedsync_infrastructure::InMemoryContentStore;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicUsize;
use tokio::sync::mpsc;

const LIFETIME: i64 = 1_000;

type PendingLoad = (ContinuationToken, Box<dyn ResponseConsumer>);

#[derive(Default)]
struct RecordingRequestManager {
    refreshes: StdMutex<Vec<Box<dyn ResponseConsumer>>>,
    loads: StdMutex<Vec<PendingLoad>>,
    refresh_count: AtomicUsize,
}

impl RecordingRequestManager {
    fn take_refresh(&self) -> Option<Box<dyn ResponseConsumer>> {
        self.refreshes.lock().unwrap().pop()
    }

    fn take_load(&self) -> Option<PendingLoad> {
        self.loads.lock().unwrap().pop()
    }

    fn refresh_count(&self) -> usize {
        self.refresh_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestManager for RecordingRequestManager {
    async fn load_more(&self, token: ContinuationToken, consumer: Box<dyn ResponseConsumer>) {
        self.loads.lock().unwrap().push((token, consumer));
    }

    async fn trigger_refresh(&self, _reason: RequestReason, consumer: Box<dyn ResponseConsumer>) {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        self.refreshes.lock().unwrap().push(consumer);
    }
}

struct FixedScheduler {
    behavior: StdMutex<RequestBehavior>,
    received: StdMutex<Vec<i64>>,
    errors: AtomicUsize,
}

impl FixedScheduler {
    fn new(behavior: RequestBehavior) -> Self {
        Self {
            behavior: StdMutex::new(behavior),
            received: StdMutex::new(Vec::new()),
            errors: AtomicUsize::new(0),
        }
    }

    fn set(&self, behavior: RequestBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

impl SchedulerApi for FixedScheduler {
    fn should_session_request_data(&self, _state: &SessionState) -> RequestBehavior {
        *self.behavior.lock().unwrap()
    }

    fn on_receive_new_content(&self, content_creation_time_ms: i64) {
        self.received.lock().unwrap().push(content_creation_time_ms);
    }

    fn on_request_error(&self, _error: &FeedError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    manager: FeedSessionManager,
    store: Arc<InMemoryContentStore>,
    requests: Arc<RecordingRequestManager>,
    scheduler: Arc<FixedScheduler>,
    clock: Arc<FakeClock>,
}

fn harness_with(store: Arc<InMemoryContentStore>, now: i64) -> Harness {
    let requests = Arc::new(RecordingRequestManager::default());
    let scheduler = Arc::new(FixedScheduler::new(RequestBehavior::RequestWithWait));
    let clock = Arc::new(FakeClock::new(now));
    let config = FeedConfig {
        session_lifetime_ms: LIFETIME,
        ..FeedConfig::default()
    };
    let manager = FeedSessionManager::new(
        FeedCollaborators {
            store: store.clone(),
            request_manager: requests.clone(),
            scheduler: scheduler.clone(),
            clock: clock.clone(),
        },
        config,
    );
    Harness {
        manager,
        store,
        requests,
        scheduler,
        clock,
    }
}

async fn initialized() -> Harness {
    let harness = harness_with(Arc::new(InMemoryContentStore::new()), 0);
    harness.manager.initialize().await.unwrap();
    harness
}

fn root() -> Option<ContentId> {
    Some(ContentId::from("root"))
}

fn feature(id: &str) -> DataOperation {
    DataOperation::new(
        StructuralOperation::append(id, root()),
        Some(StreamPayload::feature(id.as_bytes().to_vec())),
    )
}

fn token_op(id: &str) -> DataOperation {
    DataOperation::new(
        StructuralOperation::append(id, root()),
        Some(StreamPayload::Token {
            bytes: b"cursor".to_vec(),
        }),
    )
}

fn token(id: &str) -> ContinuationToken {
    ContinuationToken {
        content_id: ContentId::from(id),
        parent_id: root(),
        bytes: b"cursor".to_vec(),
    }
}

/// CLEAR_ALL, the root, then `ids` under the root.
fn full_page(ids: &[&str]) -> FeedResponse {
    let mut operations = vec![
        DataOperation::new(StructuralOperation::clear_all(), None),
        DataOperation::new(
            StructuralOperation::append("root", None),
            Some(StreamPayload::feature(b"root".to_vec())),
        ),
    ];
    operations.extend(ids.iter().map(|id| feature(id)));
    FeedResponse::new(operations)
}

async fn apply(harness: &Harness, context: MutationContext, response: FeedResponse) {
    harness
        .manager
        .update_consumer(context)
        .apply(Ok(response))
        .await
        .unwrap();
}

fn names(ids: Option<Vec<ContentId>>) -> Vec<String> {
    ids.unwrap_or_default()
        .into_iter()
        .map(|id| id.as_str().to_string())
        .collect()
}

async fn create(harness: &Harness) -> (SessionId, mpsc::UnboundedReceiver<ModelMutation>) {
    let (handle, mut receiver) = ConsumerHandle::channel();
    let session_id = harness.manager.create_session(handle).await.unwrap();
    let initial = receiver.recv().await.unwrap();
    assert!(initial.reset);
    (session_id, receiver)
}

#[tokio::test]
async fn initialize_restores_only_live_sessions() {
    let store = Arc::new(InMemoryContentStore::new());
    let s1 = SessionId::from("session:s1");
    let s2 = SessionId::from("session:s2");

    for session_id in [SessionId::head(), s1.clone(), s2.clone()] {
        let mut journal = SessionMutation::new(session_id);
        journal
            .add(StructuralOperation::append("root", None))
            .add(StructuralOperation::append("A", root()));
        store.commit_session(journal).await.unwrap();
    }
    DescriptorStore::new(store.clone())
        .save(vec![
            SessionDescriptor::new(SessionId::head(), 0),
            SessionDescriptor::new(s1.clone(), 0),
            SessionDescriptor::new(s2.clone(), LIFETIME - 1),
        ])
        .await
        .unwrap();

    let harness = harness_with(store.clone(), LIFETIME + 2);
    harness.manager.initialize().await.unwrap();

    let live = harness.manager.persisted_sessions().await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].session_id, s2);
    assert_eq!(names(harness.manager.session_content(&s2).await), vec!["A", "root"]);
    assert!(harness.manager.session_content(&s1).await.is_none());
    assert_eq!(
        names(harness.manager.session_content(&SessionId::head()).await),
        vec!["A", "root"]
    );

    let journals = store.get_all_sessions().await.unwrap();
    assert!(!journals.contains(&s1));
    assert!(journals.contains(&s2));

    let stored: Vec<_> = DescriptorStore::new(store)
        .load()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.session_id)
        .collect();
    assert_eq!(stored, vec![SessionId::head(), s2]);
}

#[tokio::test]
async fn refresh_populates_head_and_notifies_scheduler() {
    let harness = initialized().await;
    harness.clock.set(42);

    apply(&harness, MutationContext::refresh(None), full_page(&["A", "B"])).await;

    assert_eq!(
        names(harness.manager.session_content(&SessionId::head()).await),
        vec!["A", "B", "root"]
    );
    assert_eq!(*harness.scheduler.received.lock().unwrap(), vec![42]);

    let content = harness.manager.get_content(&["A".into()]).await.unwrap();
    assert_eq!(content.len(), 1);
    assert_eq!(content[0].payload, StreamPayload::feature(b"A".to_vec()));
}

#[tokio::test]
async fn created_session_starts_from_head_snapshot() {
    let harness = initialized().await;
    apply(&harness, MutationContext::refresh(None), full_page(&["A", "B"])).await;

    let (handle, mut receiver) = ConsumerHandle::channel();
    let session_id = harness.manager.create_session(handle).await.unwrap();

    let initial = receiver.recv().await.unwrap();
    assert!(initial.reset);
    assert_eq!(initial.session_id, session_id);
    assert_eq!(initial.structure.len(), 3);

    assert_eq!(
        names(harness.manager.session_content(&session_id).await),
        vec!["A", "B", "root"]
    );
    let journal = harness.store.get_stream_structures(&session_id).await.unwrap();
    assert_eq!(journal, initial.structure);
    assert_eq!(harness.manager.persisted_sessions().await.len(), 1);
}

#[tokio::test]
async fn update_of_existing_feature_replaces_payload_only() {
    let harness = initialized().await;
    apply(&harness, MutationContext::refresh(None), full_page(&["A", "B", "C"])).await;
    let (session_id, mut receiver) = create(&harness).await;

    let updated = DataOperation::new(
        StructuralOperation::append("B", root()),
        Some(StreamPayload::feature(b"B v2".to_vec())),
    );
    apply(&harness, MutationContext::refresh(None), FeedResponse::new(vec![updated])).await;

    let mutation = receiver.recv().await.unwrap();
    assert!(!mutation.reset);
    assert!(mutation.structure.is_empty());
    assert_eq!(mutation.updated, vec![ContentId::from("B")]);
    assert_eq!(
        names(harness.manager.session_content(&session_id).await),
        vec!["A", "B", "C", "root"]
    );

    let content = harness.manager.get_content(&["B".into()]).await.unwrap();
    assert_eq!(content[0].payload, StreamPayload::feature(b"B v2".to_vec()));
}

#[tokio::test]
async fn token_loads_next_page_into_owning_session() {
    let harness = initialized().await;
    let mut page = full_page(&["A"]);
    page.operations.push(token_op("T1"));
    apply(&harness, MutationContext::refresh(None), page).await;
    let (session_id, mut receiver) = create(&harness).await;

    assert!(harness.manager.handle_token(&session_id, token("T1")).await.unwrap());
    let (requested, consumer) = harness.requests.take_load().unwrap();
    assert_eq!(requested.content_id, ContentId::from("T1"));

    consumer
        .accept(Ok(FeedResponse::new(vec![
            DataOperation::new(StructuralOperation::remove("T1", root()), None),
            feature("B"),
            token_op("T2"),
        ])))
        .await;

    let mutation = receiver.recv().await.unwrap();
    assert_eq!(mutation.source_token, Some(token("T1")));
    assert_eq!(
        names(harness.manager.session_content(&session_id).await),
        vec!["A", "B", "T2", "root"]
    );
    assert_eq!(
        names(harness.manager.session_content(&SessionId::head()).await),
        vec!["A", "B", "T2", "root"]
    );
}

#[tokio::test]
async fn tokens_outside_the_session_are_not_requested() {
    let harness = initialized().await;
    apply(&harness, MutationContext::refresh(None), full_page(&["A"])).await;
    let (session_id, _receiver) = create(&harness).await;

    assert!(!harness.manager.handle_token(&session_id, token("T9")).await.unwrap());
    assert!(
        !harness
            .manager
            .handle_token(&SessionId::from("session:unknown"), token("A"))
            .await
            .unwrap()
    );
    assert!(harness.requests.take_load().is_none());
}

#[tokio::test]
async fn stale_token_response_is_ignored_by_session() {
    let harness = initialized().await;
    let mut page = full_page(&["A"]);
    page.operations.push(token_op("T1"));
    apply(&harness, MutationContext::refresh(None), page).await;
    let (session_id, _receiver) = create(&harness).await;

    assert!(harness.manager.handle_token(&session_id, token("T1")).await.unwrap());
    let (_, consumer) = harness.requests.take_load().unwrap();

    // The session refreshes before the page arrives, dropping T1.
    apply(
        &harness,
        MutationContext::refresh(Some(session_id.clone())),
        full_page(&["X"]),
    )
    .await;
    consumer.accept(Ok(FeedResponse::new(vec![feature("B")]))).await;

    assert_eq!(
        names(harness.manager.session_content(&session_id).await),
        vec!["X", "root"]
    );
}

#[tokio::test]
async fn token_page_starting_with_clear_all_resets_owning_session() {
    let harness = initialized().await;
    let mut page = full_page(&["A"]);
    page.operations.push(token_op("T1"));
    apply(&harness, MutationContext::refresh(None), page).await;
    let (session_id, mut receiver) = create(&harness).await;

    assert!(harness.manager.handle_token(&session_id, token("T1")).await.unwrap());
    let (_, consumer) = harness.requests.take_load().unwrap();
    consumer.accept(Ok(full_page(&["X"]))).await;

    let mutation = receiver.recv().await.unwrap();
    assert!(mutation.reset);
    assert_eq!(mutation.source_token, Some(token("T1")));
    assert_eq!(
        names(harness.manager.session_content(&session_id).await),
        vec!["X", "root"]
    );
    assert_eq!(
        names(harness.manager.session_content(&SessionId::head()).await),
        vec!["X", "root"]
    );

    let journal = harness.store.get_stream_structures(&session_id).await.unwrap();
    assert_eq!(
        compact_structure(&journal),
        vec![
            StructuralOperation::append("root", None),
            StructuralOperation::append("X", root()),
        ]
    );
}

#[tokio::test]
async fn token_page_skips_sessions_without_the_token() {
    let harness = initialized().await;
    let mut page = full_page(&["A"]);
    page.operations.push(token_op("T1"));
    apply(&harness, MutationContext::refresh(None), page).await;
    let (owner, _r1) = create(&harness).await;
    let (other, _r2) = create(&harness).await;

    // `other` loses T1 to its own refresh before the page arrives.
    apply(&harness, MutationContext::refresh(Some(other.clone())), full_page(&["Y"])).await;
    assert!(harness.manager.handle_token(&owner, token("T1")).await.unwrap());
    let (_, consumer) = harness.requests.take_load().unwrap();
    consumer.accept(Ok(full_page(&["X"]))).await;

    assert_eq!(names(harness.manager.session_content(&owner).await), vec!["X", "root"]);
    assert_eq!(names(harness.manager.session_content(&other).await), vec!["Y", "root"]);
}

#[tokio::test]
async fn incremental_refresh_touches_only_requesting_session() {
    let harness = initialized().await;
    apply(&harness, MutationContext::refresh(None), full_page(&["A"])).await;
    let (requester, _r1) = create(&harness).await;
    let (bystander, _r2) = create(&harness).await;

    harness.clock.set(500);
    apply(
        &harness,
        MutationContext::refresh(Some(requester.clone())),
        FeedResponse::new(vec![feature("B")]),
    )
    .await;

    assert_eq!(
        names(harness.manager.session_content(&bystander).await),
        vec!["A", "B", "root"]
    );
    let last_accessed = |id: &SessionId, descriptors: &[SessionDescriptor]| {
        descriptors
            .iter()
            .find(|d| &d.session_id == id)
            .map(|d| d.last_accessed_ms)
    };
    let descriptors = harness.manager.persisted_sessions().await;
    assert_eq!(last_accessed(&requester, &descriptors), Some(500));
    assert_eq!(last_accessed(&bystander, &descriptors), Some(0));

    let stored = DescriptorStore::new(harness.store.clone()).load().await.unwrap();
    assert_eq!(last_accessed(&requester, &stored), Some(500));
}

#[tokio::test]
async fn full_refresh_only_replaces_requesting_session() {
    let harness = initialized().await;
    apply(&harness, MutationContext::refresh(None), full_page(&["A"])).await;
    let (s1, _r1) = create(&harness).await;
    let (s2, _r2) = create(&harness).await;

    apply(&harness, MutationContext::refresh(Some(s1.clone())), full_page(&["X"])).await;

    assert_eq!(names(harness.manager.session_content(&s1).await), vec!["X", "root"]);
    assert_eq!(names(harness.manager.session_content(&s2).await), vec!["A", "root"]);
    assert_eq!(
        names(harness.manager.session_content(&SessionId::head()).await),
        vec!["X", "root"]
    );
}

#[tokio::test]
async fn refresh_follows_scheduler_and_tracks_outstanding_request() {
    let harness = initialized().await;

    harness.scheduler.set(RequestBehavior::NoRequestWithContent);
    let behavior = harness
        .manager
        .trigger_refresh(None, RequestReason::OpenWithContent)
        .await
        .unwrap();
    assert_eq!(behavior, RequestBehavior::NoRequestWithContent);
    assert_eq!(harness.requests.refresh_count(), 0);

    harness.scheduler.set(RequestBehavior::RequestWithWait);
    harness
        .manager
        .trigger_refresh(None, RequestReason::ManualRefresh)
        .await
        .unwrap();
    harness
        .manager
        .trigger_refresh(None, RequestReason::ManualRefresh)
        .await
        .unwrap();
    assert_eq!(harness.requests.refresh_count(), 1);

    let consumer = harness.requests.take_refresh().unwrap();
    consumer.accept(Ok(full_page(&["A"]))).await;

    harness
        .manager
        .trigger_refresh(None, RequestReason::ManualRefresh)
        .await
        .unwrap();
    assert_eq!(harness.requests.refresh_count(), 2);
}

#[tokio::test]
async fn request_errors_reach_scheduler() {
    let harness = initialized().await;
    harness
        .manager
        .trigger_refresh(None, RequestReason::OpenWithoutContent)
        .await
        .unwrap();

    let consumer = harness.requests.take_refresh().unwrap();
    consumer.accept(Err(FeedError::io("offline"))).await;

    assert_eq!(harness.scheduler.errors.load(Ordering::SeqCst), 1);
    assert!(harness.scheduler.received.lock().unwrap().is_empty());
    assert!(harness.manager.session_content(&SessionId::head()).await.unwrap().is_empty());
}

#[tokio::test]
async fn appends_without_content_and_unknown_kinds_are_skipped() {
    let harness = initialized().await;
    let mut stored = ContentMutation::new();
    stored.add("P".into(), StreamPayload::feature(b"p".to_vec()));
    harness.store.commit_content(stored).await.unwrap();

    let mut page = full_page(&["A"]);
    page.operations.extend([
        DataOperation::new(StructuralOperation::append("ghost", root()), None),
        DataOperation::new(StructuralOperation::append("P", root()), None),
        DataOperation::new(
            StructuralOperation {
                kind: OperationKind::Unknown,
                content_id: "odd".into(),
                parent_id: root(),
            },
            None,
        ),
    ]);
    apply(&harness, MutationContext::refresh(None), page).await;

    assert_eq!(
        names(harness.manager.session_content(&SessionId::head()).await),
        vec!["A", "P", "root"]
    );
}

#[tokio::test]
async fn missing_shared_state_is_a_soft_failure() {
    let harness = initialized().await;
    let page = FeedResponse::new(vec![
        DataOperation::new(StructuralOperation::clear_all(), None),
        DataOperation::new(
            StructuralOperation::append("A", None),
            Some(StreamPayload::styled_feature(b"a".to_vec(), "style")),
        ),
        DataOperation::new(
            StructuralOperation::append("B", None),
            Some(StreamPayload::styled_feature(b"b".to_vec(), "missing")),
        ),
    ])
    .with_shared_state(
        "style",
        SharedState {
            bytes: b"css".to_vec(),
        },
    );
    apply(&harness, MutationContext::refresh(None), page).await;

    let content = harness
        .manager
        .get_content(&["A".into(), "B".into(), "nothing".into()])
        .await
        .unwrap();
    assert_eq!(content.len(), 2);
    assert_eq!(
        content[0].shared_state,
        Some(SharedState {
            bytes: b"css".to_vec()
        })
    );
    assert_eq!(content[1].shared_state, None);
    assert!(harness.manager.shared_state(&"style".into()).await.is_some());
}

#[tokio::test]
async fn cleanup_purges_expired_sessions_and_collects_content() {
    let harness = initialized().await;
    apply(&harness, MutationContext::refresh(None), full_page(&["A"])).await;
    let (session_id, _receiver) = create(&harness).await;

    harness.clock.advance(LIFETIME + 1);
    apply(&harness, MutationContext::refresh(None), full_page(&["Z"])).await;

    let report = harness.manager.cleanup().await.unwrap();
    assert_eq!(report.expired_sessions, vec![session_id.clone()]);
    assert_eq!(report.removed_journals, 1);
    assert!(report.collected_payloads >= 1);

    assert!(harness.manager.get_content(&["A".into()]).await.unwrap().is_empty());
    assert_eq!(harness.manager.get_content(&["Z".into()]).await.unwrap().len(), 1);
    assert!(harness.manager.persisted_sessions().await.is_empty());

    let (handle, _receiver) = ConsumerHandle::channel();
    let err = harness.manager.bind_session(&session_id, handle).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn bind_session_replays_journal_and_touches_descriptor() {
    let harness = initialized().await;
    apply(&harness, MutationContext::refresh(None), full_page(&["A"])).await;
    let (session_id, _receiver) = create(&harness).await;
    harness.manager.detach_session(&session_id).await.unwrap();

    harness.clock.set(LIFETIME - 1);
    let (handle, mut receiver) = ConsumerHandle::channel();
    harness.manager.bind_session(&session_id, handle).await.unwrap();

    let replay = receiver.recv().await.unwrap();
    assert!(replay.reset);
    assert_eq!(replay.structure.len(), 2);

    let descriptor = harness.manager.persisted_sessions().await.remove(0);
    assert_eq!(descriptor.last_accessed_ms, LIFETIME - 1);
    assert!(harness.manager.is_session_alive(&descriptor));
}

#[tokio::test]
async fn bind_session_with_closed_consumer_still_binds() {
    let harness = initialized().await;
    apply(&harness, MutationContext::refresh(None), full_page(&["A"])).await;
    let (session_id, _receiver) = create(&harness).await;

    let (handle, receiver) = ConsumerHandle::channel();
    drop(receiver);
    harness.manager.bind_session(&session_id, handle).await.unwrap();

    assert_eq!(
        names(harness.manager.session_content(&session_id).await),
        vec!["A", "root"]
    );
}

#[tokio::test]
async fn bound_session_expires_after_lifetime() {
    let harness = initialized().await;
    apply(&harness, MutationContext::refresh(None), full_page(&["A"])).await;
    let (session_id, _receiver) = create(&harness).await;

    harness.clock.set(LIFETIME + 5);
    let (handle, _receiver) = ConsumerHandle::channel();
    let err = harness.manager.bind_session(&session_id, handle).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(harness.manager.session_content(&session_id).await.is_none());
}

#[tokio::test]
async fn invalidate_removes_session_and_journal() {
    let harness = initialized().await;
    apply(&harness, MutationContext::refresh(None), full_page(&["A"])).await;
    let (session_id, _receiver) = create(&harness).await;

    assert!(harness.manager.invalidate_session(&session_id).await.unwrap());
    assert!(!harness.manager.invalidate_session(&session_id).await.unwrap());

    assert!(harness.manager.persisted_sessions().await.is_empty());
    assert!(
        !harness
            .store
            .get_all_sessions()
            .await
            .unwrap()
            .contains(&session_id)
    );
}

#[tokio::test]
async fn semantic_properties_pass_through() {
    let harness = initialized().await;
    harness
        .manager
        .write_semantic_properties(vec![("A".into(), b"meta".to_vec())])
        .await
        .unwrap();

    let properties = harness
        .manager
        .semantic_properties(&["A".into(), "B".into()])
        .await
        .unwrap();
    assert_eq!(properties, vec![(ContentId::from("A"), b"meta".to_vec())]);
}
