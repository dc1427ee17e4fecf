//! The mutation cycle: one network result applied to every interested session.

use super::content_cache::ContentCache;
use super::manager::ManagerInner;
use super::model::{Session, UpdateOutcome};
use crate::task_queue::TaskQueue;
use async_trait::async_trait;
use feedsync_core::error::Result;
use feedsync_core::request::ResponseConsumer;
use feedsync_core::store::ContentMutation;
use feedsync_core::stream::{
    ContentId, DataOperation, FeedResponse, ModelMutation, MutationContext, OperationKind,
    StructuralOperation,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Sink handed to the request manager for one request.
///
/// Each accepted result is scheduled on the task queue, so responses are
/// applied one at a time in arrival order.
#[derive(Clone)]
pub struct UpdateConsumer {
    inner: Arc<ManagerInner>,
    queue: TaskQueue,
    context: MutationContext,
}

impl UpdateConsumer {
    pub(super) fn new(inner: Arc<ManagerInner>, queue: TaskQueue, context: MutationContext) -> Self {
        Self {
            inner,
            queue,
            context,
        }
    }

    pub fn context(&self) -> &MutationContext {
        &self.context
    }

    /// Schedules the mutation cycle and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns an error only if the task queue is closed.
    pub async fn apply(&self, result: Result<FeedResponse>) -> Result<()> {
        let inner = self.inner.clone();
        let context = self.context.clone();
        self.queue
            .run("apply_response", async move {
                inner.apply_response(context, result).await
            })
            .await
    }
}

#[async_trait]
impl ResponseConsumer for UpdateConsumer {
    async fn accept(&self, result: Result<FeedResponse>) {
        if let Err(e) = self.apply(result).await {
            tracing::error!("[UpdateConsumer] Failed to schedule response: {}", e);
        }
    }
}

impl ManagerInner {
    pub(super) async fn apply_response(&self, context: MutationContext, result: Result<FeedResponse>) {
        if !context.is_continuation() {
            self.outstanding_request.store(false, Ordering::SeqCst);
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("[Mutation] Request failed: {}", e);
                self.scheduler.on_request_error(&e);
                return;
            }
        };

        let now = self.clock.now_ms();
        let token = context.continuation_token.as_ref();
        let notify = self.config.commit_consumer_on_storage_failure;

        let mut content_cache = self.content_cache.lock().await;
        content_cache.start_mutation();
        let mut sessions = self.sessions.write().await;

        let mut content = ContentMutation::new();
        for (id, state) in response.shared_states {
            if self.shared_states.insert(id.clone(), state.clone()).await {
                content.add_shared_state(id, state);
            }
        }
        let structures = self
            .screen_operations(response.operations, sessions.head(), &mut content_cache, &mut content)
            .await;

        if !content.is_empty() {
            if let Err(e) = self.store.commit_content(content).await {
                tracing::error!("[Mutation] Content commit failed: {}", e);
            }
        }

        match sessions
            .head_mut()
            .update_session(&structures, token, self.store.as_ref(), notify)
            .await
        {
            Ok(outcome) => {
                if outcome.mutation().is_some_and(ModelMutation::has_structure_changes) {
                    self.content_creation_time_ms.store(now, Ordering::SeqCst);
                    self.scheduler.on_receive_new_content(now);
                }
            }
            Err(e) => tracing::error!("[Mutation] Head update failed: {}", e),
        }

        // A refresh that clears everything only replaces the requesting session.
        let full_refresh = token.is_none() && structures.iter().any(StructuralOperation::is_clear_all);
        let lifetime = self.config.session_lifetime_ms;
        let mut touched = false;

        for session in sessions.bound_sessions_mut() {
            if !session
                .descriptor()
                .is_some_and(|descriptor| descriptor.is_alive(now, lifetime))
            {
                continue;
            }

            let requested = context.requesting_session.as_ref() == Some(session.id());
            // Pages go whole to every session holding the token; update_session drops the rest.
            let selected = if token.is_some() {
                structures.clone()
            } else if full_refresh {
                if !requested {
                    continue;
                }
                structures.clone()
            } else {
                session.interested_operations(&structures)
            };
            if selected.is_empty() {
                continue;
            }

            match session
                .update_session(&selected, token, self.store.as_ref(), notify)
                .await
            {
                Ok(UpdateOutcome::Applied { .. }) => {
                    if requested {
                        session.touch(now);
                        touched = true;
                    }
                }
                Ok(UpdateOutcome::Stale) => {}
                Err(e) => tracing::error!(
                    session_id = %session.id(),
                    "[Mutation] Session update failed: {}",
                    e
                ),
            }
        }

        if touched {
            if let Err(e) = self.store_descriptors(&sessions).await {
                tracing::warn!("[Mutation] Failed to persist descriptors: {}", e);
            }
        }

        content_cache.finish_mutation();
    }

    /// Drops operations that cannot be applied and stages the batch's payloads.
    ///
    /// Unknown kinds are skipped. An append is skipped when its payload is
    /// neither in the batch, in the cache, nor already stored.
    async fn screen_operations(
        &self,
        operations: Vec<DataOperation>,
        head: &Session,
        cache: &mut ContentCache,
        content: &mut ContentMutation,
    ) -> Vec<StructuralOperation> {
        let missing: Vec<ContentId> = operations
            .iter()
            .filter(|op| {
                op.structure.kind == OperationKind::AppendOrUpdate
                    && op.payload.is_none()
                    && !head.contains(&op.structure.content_id)
                    && cache.get(&op.structure.content_id).is_none()
            })
            .map(|op| op.structure.content_id.clone())
            .collect();

        let mut stored: HashSet<ContentId> = HashSet::new();
        if !missing.is_empty() {
            match self.store.get_payloads(&missing).await {
                Ok(found) => {
                    for payload in found {
                        stored.insert(payload.content_id.clone());
                        cache.put(payload.content_id, payload.payload);
                    }
                }
                Err(e) => tracing::warn!("[Mutation] Failed to look up stored payloads: {}", e),
            }
        }

        let mut structures = Vec::with_capacity(operations.len());
        for DataOperation { structure, payload } in operations {
            match structure.kind {
                OperationKind::Unknown => {
                    tracing::warn!(
                        content_id = %structure.content_id,
                        "[Mutation] Skipping operation of unknown kind"
                    );
                    continue;
                }
                OperationKind::AppendOrUpdate => {
                    let id = &structure.content_id;
                    if let Some(payload) = payload {
                        cache.put(id.clone(), payload.clone());
                        content.add(id.clone(), payload);
                    } else if !(head.contains(id) || stored.contains(id) || cache.get(id).is_some()) {
                        tracing::warn!(
                            content_id = %id,
                            "[Mutation] Skipping append without content"
                        );
                        continue;
                    }
                }
                OperationKind::Remove | OperationKind::ClearAll => {}
            }
            structures.push(structure);
        }
        structures
    }
}
