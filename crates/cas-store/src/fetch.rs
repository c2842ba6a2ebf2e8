//! Batch retrieval with bounded parallelism.
//!
//! A single producer feeds request indices into a queue; a fixed pool of
//! workers pulls indices, fetches and verifies each object, and sends the
//! outcome back. The caller's task writes every outcome into the slot at
//! that index, so each slot is written exactly once and the slice is never
//! reordered or resized.

use std::sync::Arc;

use bytes::Bytes;
use cas_types::ObjectId;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, Instrument, Span};

use crate::client::ObjectStoreClient;
use crate::error::{StoreError, StoreResult};
use crate::fatal;

/// One entry of a batch retrieval: the requested ID plus its result slots.
///
/// After [`ObjectStoreClient::get_objects`] returns, exactly one of `data`
/// and `error` is set for every request.
#[derive(Debug)]
pub struct GetRequest {
    pub id: ObjectId,
    pub data: Option<Bytes>,
    pub error: Option<StoreError>,
}

impl GetRequest {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            data: None,
            error: None,
        }
    }

    /// `true` once the pipeline has written an outcome into this request.
    pub fn is_resolved(&self) -> bool {
        self.data.is_some() || self.error.is_some()
    }

    pub fn result(&self) -> Option<Result<&Bytes, &StoreError>> {
        match (&self.data, &self.error) {
            (_, Some(err)) => Some(Err(err)),
            (Some(data), None) => Some(Ok(data)),
            (None, None) => None,
        }
    }

    pub fn into_result(self) -> Option<StoreResult<Bytes>> {
        match (self.data, self.error) {
            (_, Some(err)) => Some(Err(err)),
            (Some(data), None) => Some(Ok(data)),
            (None, None) => None,
        }
    }

    fn reset(&mut self) {
        self.data = None;
        self.error = None;
    }

    fn resolve(&mut self, outcome: StoreResult<Bytes>) {
        match outcome {
            Ok(data) => self.data = Some(data),
            Err(err) => self.error = Some(err),
        }
    }
}

impl From<ObjectId> for GetRequest {
    fn from(id: ObjectId) -> Self {
        Self::new(id)
    }
}

type Outcome = (usize, StoreResult<Bytes>);

impl ObjectStoreClient {
    /// Fetch every request, verifying each object against its ID.
    ///
    /// Per-item failures (backend errors, checksum mismatches) land in that
    /// item's `error` slot and never affect other items. Items complete in no
    /// particular order. If a worker dies the process aborts; see
    /// [`fatal`](crate::fatal).
    pub async fn get_objects(&self, gets: &mut [GetRequest]) {
        self.get_objects_with_cancel(gets, &CancellationToken::new())
            .await
    }

    /// [`get_objects`](Self::get_objects) bound to a cancellation scope.
    ///
    /// Cancelling `cancel` drops in-flight backend calls and returns
    /// promptly. Items that had not finished are left unresolved, so the
    /// per-item outcome of a cancelled batch is undefined.
    #[tracing::instrument(
        name = "cas.get_objects",
        skip_all,
        fields(count = gets.len(), workers = field::Empty)
    )]
    pub async fn get_objects_with_cancel(
        &self,
        gets: &mut [GetRequest],
        cancel: &CancellationToken,
    ) {
        gets.iter_mut().for_each(GetRequest::reset);
        if gets.is_empty() {
            return;
        }

        let ids: Arc<[ObjectId]> = gets.iter().map(|get| get.id).collect();
        let workers = self.inner.options.get_concurrency.min(ids.len());
        Span::current().record("workers", workers);

        let (job_tx, job_rx) = mpsc::channel::<usize>(workers);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Outcome>();
        let mut tasks = JoinSet::new();

        let count = ids.len();
        tasks.spawn(async move {
            for idx in 0..count {
                // All workers gone: nobody left to feed.
                if job_tx.send(idx).await.is_err() {
                    break;
                }
            }
        });

        for _ in 0..workers {
            let worker = Worker {
                client: self.clone(),
                ids: Arc::clone(&ids),
                jobs: Arc::clone(&job_rx),
                done: done_tx.clone(),
                cancel: cancel.clone(),
            };
            tasks.spawn(worker.run().instrument(Span::current()));
        }
        // Only workers may hold the queue and result channel, so both close
        // once the pool is gone.
        drop(job_rx);
        drop(done_tx);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = done_rx.recv() => match next {
                    Some((idx, outcome)) => gets[idx].resolve(outcome),
                    None => break,
                },
            }
        }

        if cancel.is_cancelled() {
            // Keep whatever already finished.
            while let Ok((idx, outcome)) = done_rx.try_recv() {
                gets[idx].resolve(outcome);
            }
            debug!("batch retrieval cancelled");
            tasks.abort_all();
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    fatal::invariant_violation(format_args!("get_objects: internal error: {err}"))
                }
            }
        }
    }
}

/// One member of the retrieval pool.
struct Worker {
    client: ObjectStoreClient,
    ids: Arc<[ObjectId]>,
    jobs: Arc<Mutex<mpsc::Receiver<usize>>>,
    done: mpsc::UnboundedSender<Outcome>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                idx = async { self.jobs.lock().await.recv().await } => idx,
            };
            let Some(idx) = next else {
                break;
            };

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = self.client.get_object(&self.ids[idx]) => outcome,
            };
            if self.done.send((idx, outcome)).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use cas_crypto::digest;

    use crate::config::StoreOptions;
    use crate::error::{BackendError, BackendResult};
    use crate::memory::InMemoryBackend;
    use crate::traits::{BlobBackend, BlobKey};

    const ADDRESS: &str = "s3://bucket/objects";

    fn client_with(
        backend: Arc<dyn BlobBackend>,
        get_concurrency: usize,
    ) -> ObjectStoreClient {
        ObjectStoreClient::with_options(
            backend,
            ADDRESS,
            StoreOptions {
                get_concurrency,
                ..StoreOptions::default()
            },
        )
        .unwrap()
    }

    fn payload(n: usize) -> Vec<u8> {
        format!("object number {n}").into_bytes()
    }

    /// Seed `count` objects and return their IDs in order.
    fn seed(backend: &InMemoryBackend, client: &ObjectStoreClient, count: usize) -> Vec<ObjectId> {
        (0..count)
            .map(|n| {
                let data = payload(n);
                let id = digest(&data);
                backend.insert(client.address().key_for(&id), data);
                id
            })
            .collect()
    }

    fn requests(ids: &[ObjectId]) -> Vec<GetRequest> {
        ids.iter().copied().map(GetRequest::new).collect()
    }

    #[tokio::test]
    async fn fetches_more_items_than_workers() {
        let backend = Arc::new(InMemoryBackend::new());
        let client = client_with(backend.clone(), 32);
        let ids = seed(&backend, &client, 50);

        let mut gets = requests(&ids);
        client.get_objects(&mut gets).await;

        assert_eq!(gets.len(), 50);
        for (n, get) in gets.iter().enumerate() {
            assert_eq!(get.id, ids[n]);
            let data = get.result().unwrap().unwrap();
            assert_eq!(&data[..], &payload(n)[..]);
            assert!(client.cache().has_object(&get.id));
        }
        assert_eq!(backend.stats().read_calls, 50);
    }

    #[tokio::test]
    async fn corrupted_item_is_isolated() {
        let backend = Arc::new(InMemoryBackend::new());
        let client = client_with(backend.clone(), 32);
        let mut ids = seed(&backend, &client, 10);

        let bad = digest(b"what was asked for");
        backend.insert(client.address().key_for(&bad), &b"what came back"[..]);
        ids.insert(4, bad);

        let mut gets = requests(&ids);
        client.get_objects(&mut gets).await;

        for get in &gets {
            if get.id == bad {
                assert!(get.data.is_none());
                assert!(matches!(
                    get.error,
                    Some(StoreError::ChecksumMismatch { expected, .. }) if expected == bad
                ));
                assert!(!client.cache().has_object(&bad));
            } else {
                assert!(get.error.is_none());
                assert_eq!(digest(get.data.as_ref().unwrap()), get.id);
            }
        }
    }

    #[tokio::test]
    async fn backend_errors_are_recorded_per_item() {
        let backend = Arc::new(InMemoryBackend::new());
        let client = client_with(backend.clone(), 4);
        let mut ids = seed(&backend, &client, 6);

        let missing = digest(b"never stored");
        let unreachable = ids[2];
        backend.fail_key(client.address().key_for(&unreachable));
        ids.push(missing);

        let mut gets = requests(&ids);
        client.get_objects(&mut gets).await;

        assert!(gets.iter().all(GetRequest::is_resolved));
        assert!(matches!(
            gets[2].error,
            Some(StoreError::Backend(BackendError::Unavailable(_)))
        ));
        assert!(matches!(
            gets[6].error,
            Some(StoreError::Backend(BackendError::NotFound(_)))
        ));
        let ok = gets.iter().filter(|get| get.data.is_some()).count();
        assert_eq!(ok, 5);
        assert!(!client.cache().has_object(&unreachable));
        assert!(!client.cache().has_object(&missing));
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let backend = Arc::new(InMemoryBackend::new());
        let client = client_with(backend.clone(), 32);
        let mut gets: Vec<GetRequest> = Vec::new();
        client.get_objects(&mut gets).await;
        assert_eq!(backend.stats().read_calls, 0);
    }

    #[tokio::test]
    async fn single_worker_pool_completes() {
        let backend = Arc::new(InMemoryBackend::new());
        let client = client_with(backend.clone(), 1);
        let ids = seed(&backend, &client, 7);

        let mut gets = requests(&ids);
        client.get_objects(&mut gets).await;
        assert!(gets.iter().all(|get| get.data.is_some()));
    }

    #[tokio::test]
    async fn duplicate_ids_each_get_a_result() {
        let backend = Arc::new(InMemoryBackend::new());
        let client = client_with(backend.clone(), 32);
        let ids = seed(&backend, &client, 1);

        let mut gets = requests(&[ids[0], ids[0], ids[0]]);
        client.get_objects(&mut gets).await;
        assert!(gets.iter().all(|get| get.data.as_deref() == Some(&payload(0)[..])));
    }

    #[tokio::test]
    async fn stale_slots_are_cleared_before_fetching() {
        let backend = Arc::new(InMemoryBackend::new());
        let client = client_with(backend.clone(), 2);
        let ids = seed(&backend, &client, 1);

        let mut gets = vec![GetRequest {
            id: ids[0],
            data: None,
            error: Some(StoreError::InvalidConfig("left over".into())),
        }];
        client.get_objects(&mut gets).await;
        assert!(gets[0].error.is_none());
        assert!(gets[0].data.is_some());
    }

    #[tokio::test]
    async fn into_result_reflects_outcome() {
        let backend = Arc::new(InMemoryBackend::new());
        let client = client_with(backend.clone(), 2);
        let ids = seed(&backend, &client, 1);

        let mut gets = requests(&[ids[0], digest(b"absent")]);
        assert!(gets[0].result().is_none());
        client.get_objects(&mut gets).await;

        let mut results = gets.into_iter().map(|get| get.into_result().unwrap());
        assert_eq!(results.next().unwrap().unwrap(), Bytes::from(payload(0)));
        assert!(results.next().unwrap().is_err());
    }

    /// Delegates to an in-memory backend, delaying each read and tracking
    /// how many reads are in flight at once.
    struct SlowBackend {
        inner: InMemoryBackend,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl SlowBackend {
        fn new(delay: Duration) -> Self {
            Self {
                inner: InMemoryBackend::new(),
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BlobBackend for SlowBackend {
        async fn exists(&self, key: &BlobKey) -> BackendResult<bool> {
            self.inner.exists(key).await
        }

        async fn write(&self, key: &BlobKey, data: Bytes) -> BackendResult<()> {
            self.inner.write(key, data).await
        }

        async fn read(&self, key: &BlobKey) -> BackendResult<Bytes> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.read(key).await
        }
    }

    #[tokio::test]
    async fn parallelism_is_bounded_by_pool_size() {
        let backend = Arc::new(SlowBackend::new(Duration::from_millis(5)));
        let client = client_with(backend.clone(), 4);
        let ids = seed(&backend.inner, &client, 20);

        let mut gets = requests(&ids);
        client.get_objects(&mut gets).await;

        assert!(gets.iter().all(|get| get.data.is_some()));
        let max = backend.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 4, "saw {max} concurrent reads");
        assert!(max > 1, "reads never overlapped");
    }

    #[tokio::test]
    async fn precancelled_batch_returns_unresolved() {
        let backend = Arc::new(InMemoryBackend::new());
        let client = client_with(backend.clone(), 4);
        let ids = seed(&backend, &client, 8);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut gets = requests(&ids);
        client.get_objects_with_cancel(&mut gets, &cancel).await;

        assert!(gets.iter().all(|get| !get.is_resolved()));
    }

    #[tokio::test]
    async fn cancellation_interrupts_in_flight_reads() {
        let backend = Arc::new(SlowBackend::new(Duration::from_secs(3600)));
        let client = client_with(backend.clone(), 2);
        let ids = seed(&backend.inner, &client, 4);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut gets = requests(&ids);
        tokio::time::timeout(
            Duration::from_secs(10),
            client.get_objects_with_cancel(&mut gets, &cancel),
        )
        .await
        .expect("cancelled batch should return promptly");

        assert!(gets.iter().all(|get| !get.is_resolved()));
    }

    /// Backend whose reads panic inside the worker task.
    struct PanickingBackend;

    #[async_trait]
    impl BlobBackend for PanickingBackend {
        async fn exists(&self, _key: &BlobKey) -> BackendResult<bool> {
            Ok(false)
        }

        async fn write(&self, _key: &BlobKey, _data: Bytes) -> BackendResult<()> {
            Ok(())
        }

        async fn read(&self, key: &BlobKey) -> BackendResult<Bytes> {
            panic!("read of {key} panicked");
        }
    }

    const ABORT_CHILD_ENV: &str = "CAS_FETCH_ABORT_CHILD";
    const RETURNED_MARKER: &str = "get_objects returned";

    #[test]
    fn panicking_worker_aborts_the_process() {
        if std::env::var_os(ABORT_CHILD_ENV).is_some() {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let client = client_with(Arc::new(PanickingBackend), 4);
                let mut gets = requests(&[digest(b"never read")]);
                client.get_objects(&mut gets).await;
            });
            println!("{RETURNED_MARKER}");
            return;
        }

        let output = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "fetch::tests::panicking_worker_aborts_the_process",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(ABORT_CHILD_ENV, "1")
            .output()
            .unwrap();

        assert!(!output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(!stdout.contains(RETURNED_MARKER), "child returned: {stdout}");
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            assert_eq!(output.status.signal(), Some(6), "expected SIGABRT");
        }
    }
}
