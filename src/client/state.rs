//! Refresh coordination state shared by all requests of one client.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::warn;

use super::RequestDescriptor;
use crate::error::ApiError;

/// Результат повторного запроса, который получает ожидающий в очереди
pub(crate) type Completion = oneshot::Sender<Result<serde_json::Value, ApiError>>;

/// Отложенный запрос: дескриптор + handle завершения
pub(crate) struct PendingRequest {
    pub(crate) request: RequestDescriptor,
    pub(crate) done: Completion,
}

/// Что делать запросу, получившему 401
pub(crate) enum Admission {
    /// Refresh уже идёт: ждать результата повторного запроса
    Queued(oneshot::Receiver<Result<serde_json::Value, ApiError>>),
    /// Токен сменился после отправки: повторить с текущим
    Retry(String),
    /// Сессия уже сброшена другим запросом
    SessionGone,
    /// Этот запрос выполняет refresh; значение: эпоха сессии на момент старта
    Lead(u64),
}

#[derive(Default)]
struct Inner {
    refreshing: bool,
    queue: VecDeque<PendingRequest>,
    /// Default bearer credential for outgoing requests
    bearer: Option<String>,
    /// Увеличивается при logout и login, чтобы устаревший refresh не тронул новую сессию
    epoch: u64,
}

/// Client State: refreshing flag, pending queue and default bearer under one mutex.
/// Invariant: queue is non-empty only while refreshing is true.
#[derive(Default)]
pub(crate) struct ClientState {
    inner: Mutex<Inner>,
}

impl ClientState {
    pub(crate) fn new(bearer: Option<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                bearer,
                ..Default::default()
            }),
        }
    }

    // Критические секции не паникуют, poisoned lock безопасно переиспользовать
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e: PoisonError<_>| {
            warn!("[API] Client state mutex poisoned, recovering");
            e.into_inner()
        })
    }

    pub(crate) fn bearer(&self) -> Option<String> {
        self.lock().bearer.clone()
    }

    pub(crate) fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Decide the fate of a request that got 401 after being sent with `sent_with`.
    /// Check and set of `refreshing` happen in one critical section.
    pub(crate) fn admit(&self, sent_with: Option<&str>, request: &RequestDescriptor) -> Admission {
        let mut inner = self.lock();
        if inner.refreshing {
            let (done, rx) = oneshot::channel();
            inner.queue.push_back(PendingRequest {
                request: request.clone(),
                done,
            });
            return Admission::Queued(rx);
        }
        if inner.bearer.as_deref() != sent_with {
            return match inner.bearer.clone() {
                Some(current) => Admission::Retry(current),
                None => Admission::SessionGone,
            };
        }
        inner.refreshing = true;
        Admission::Lead(inner.epoch)
    }

    /// Install the refreshed bearer unless a logout or login happened since `epoch`.
    pub(crate) fn install_bearer(&self, epoch: u64, bearer: String) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        inner.bearer = Some(bearer);
        true
    }

    /// Take the queued requests in arrival order. When the queue is already empty
    /// the refresh is over: `refreshing` is reset and None returned.
    pub(crate) fn take_queue_or_finish(&self) -> Option<Vec<PendingRequest>> {
        let mut inner = self.lock();
        if inner.queue.is_empty() {
            inner.refreshing = false;
            return None;
        }
        Some(inner.queue.drain(..).collect())
    }

    /// Fail everything queued and reset `refreshing` in one step, but only if
    /// the session has not changed since `epoch`. A stale leader must not
    /// touch the flag or waiters of a newer session.
    pub(crate) fn fail_all_if(&self, epoch: u64, err: &ApiError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                return 0;
            }
            inner.refreshing = false;
            inner.queue.drain(..).collect()
        };
        let count = drained.len();
        for pending in drained {
            let _ = pending.done.send(Err(err.clone()));
        }
        count
    }

    /// Drop the bearer unless a logout or login happened since `epoch`.
    pub(crate) fn clear_bearer_if(&self, epoch: u64) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        inner.bearer = None;
        true
    }

    /// Logout: drop the bearer and fail anything still waiting.
    pub(crate) fn reset(&self, err: &ApiError) {
        self.start_epoch(None, err);
    }

    /// Login: install the new bearer under a new epoch. A refresh of the
    /// previous session can no longer install, clear or fail anything.
    pub(crate) fn begin_session(&self, bearer: String, err: &ApiError) {
        self.start_epoch(Some(bearer), err);
    }

    fn start_epoch(&self, bearer: Option<String>, err: &ApiError) {
        let drained: Vec<PendingRequest> = {
            let mut inner = self.lock();
            inner.bearer = bearer;
            inner.epoch += 1;
            inner.refreshing = false;
            inner.queue.drain(..).collect()
        };
        for pending in drained {
            let _ = pending.done.send(Err(err.clone()));
        }
    }
}
