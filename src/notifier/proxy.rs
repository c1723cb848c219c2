//! Notify layer: emits an event for every observable state change.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{future, stream, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stowage_common::{Error, Image, ImageId, NewImage, RequestContext, Result, Task, TaskId};

use super::format::{
    format_image, format_image_send, format_task, mark_deleted, upload_error_message,
};
use super::Notifier;
use crate::domain::{
    ImageAttributesMut, ImageData, ImageFactory, ImageFilter, ImageHandle, ImageRepo,
    TaskExecutor, TaskFactory, TaskFilter, TaskHandle, TaskRepo,
};
use crate::guard::{GuardedLocations, GuardedTags};
use crate::store::ByteStream;

pub struct NotifyImage<I> {
    inner: I,
    ctx: RequestContext,
    notifier: Notifier,
}

impl<I: ImageHandle> NotifyImage<I> {
    pub fn new(inner: I, ctx: RequestContext, notifier: Notifier) -> Self {
        Self {
            inner,
            ctx,
            notifier,
        }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut I {
        &mut self.inner
    }

    pub fn into_inner(self) -> I {
        self.inner
    }
}

impl<I: ImageHandle> ImageHandle for NotifyImage<I> {
    fn image(&self) -> &Image {
        self.inner.image()
    }

    fn attributes_mut(&mut self) -> ImageAttributesMut<'_> {
        self.inner.attributes_mut()
    }

    fn tags(&mut self) -> GuardedTags<'_> {
        self.inner.tags()
    }

    fn locations(&mut self) -> GuardedLocations<'_> {
        self.inner.locations()
    }

    fn delete(&mut self) -> Result<()> {
        self.inner.delete()
    }
}

#[async_trait]
impl<I: ImageData> ImageData for NotifyImage<I> {
    /// `image.prepare` before the write, then either `image.upload` +
    /// `image.activate` or an `image.upload` error. The error is always
    /// returned with its original kind.
    async fn set_data(&mut self, data: ByteStream, size: Option<u64>) -> Result<()> {
        self.notifier.info("image.prepare", format_image(self.image()));

        match self.inner.set_data(data, size).await {
            Ok(()) => {
                let payload = format_image(self.image());
                self.notifier.info("image.upload", payload.clone());
                self.notifier.info("image.activate", payload);
                Ok(())
            }
            Err(e) => {
                let msg = upload_error_message(self.image_id(), &e);
                self.notifier.error("image.upload", Value::String(msg.clone()));
                Err(match e {
                    Error::StorageFull(_)
                    | Error::StorageWriteDenied(_)
                    | Error::Duplicate(_)
                    | Error::Forbidden(_) => e.with_message(msg),
                    other => other,
                })
            }
        }
    }

    /// Counts bytes as the caller drains the stream and reports `image.send`
    /// once it ends. A short read is reported at error severity.
    async fn get_data(&self) -> Result<ByteStream> {
        let data = self.inner.get_data().await?;

        let sent = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&sent);
        let counted = data.inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
        });

        let image = self.image().clone();
        let ctx = self.ctx.clone();
        let notifier = self.notifier.clone();
        let report = stream::once(async move {
            let bytes_sent = sent.load(Ordering::Relaxed);
            let payload = format_image_send(&image, &ctx, bytes_sent);
            if image.size == Some(bytes_sent) {
                notifier.info("image.send", payload);
            } else {
                notifier.error("image.send", payload);
            }
        })
        .filter_map(|()| future::ready(None::<std::io::Result<Bytes>>));

        Ok(Box::pin(counted.chain(report)))
    }
}

pub struct NotifyImageRepo<R> {
    inner: R,
    ctx: RequestContext,
    notifier: Notifier,
}

impl<R: ImageRepo> NotifyImageRepo<R> {
    pub fn new(inner: R, ctx: RequestContext, notifier: Notifier) -> Self {
        Self {
            inner,
            ctx,
            notifier,
        }
    }

    fn wrap(&self, image: R::Image) -> NotifyImage<R::Image> {
        NotifyImage::new(image, self.ctx.clone(), self.notifier.clone())
    }
}

#[async_trait]
impl<R: ImageRepo> ImageRepo for NotifyImageRepo<R> {
    type Image = NotifyImage<R::Image>;

    async fn get(&self, image_id: ImageId) -> Result<Self::Image> {
        Ok(self.wrap(self.inner.get(image_id).await?))
    }

    async fn list(&self, filter: &ImageFilter) -> Result<Vec<Self::Image>> {
        let images = self.inner.list(filter).await?;
        Ok(images.into_iter().map(|image| self.wrap(image)).collect())
    }

    async fn add(&self, image: &mut Self::Image) -> Result<()> {
        self.inner.add(image.inner_mut()).await?;
        self.notifier.info("image.create", format_image(image.image()));
        Ok(())
    }

    async fn save(&self, image: &mut Self::Image) -> Result<()> {
        self.inner.save(image.inner_mut()).await?;
        self.notifier.info("image.update", format_image(image.image()));
        Ok(())
    }

    async fn remove(&self, image: &mut Self::Image) -> Result<()> {
        self.inner.remove(image.inner_mut()).await?;
        let payload = mark_deleted(format_image(image.image()), Utc::now());
        self.notifier.info("image.delete", payload);
        Ok(())
    }
}

pub struct NotifyImageFactory<F> {
    inner: F,
    ctx: RequestContext,
    notifier: Notifier,
}

impl<F: ImageFactory> NotifyImageFactory<F> {
    pub fn new(inner: F, ctx: RequestContext, notifier: Notifier) -> Self {
        Self {
            inner,
            ctx,
            notifier,
        }
    }
}

impl<F: ImageFactory> ImageFactory for NotifyImageFactory<F> {
    type Image = NotifyImage<F::Image>;

    fn new_image(&self, params: NewImage) -> Result<Self::Image> {
        let image = self.inner.new_image(params)?;
        Ok(NotifyImage::new(image, self.ctx.clone(), self.notifier.clone()))
    }
}

/// A task whose lifecycle transitions are reported once they succeed.
pub struct NotifyTask<T> {
    inner: T,
    notifier: Notifier,
}

impl<T: TaskHandle> NotifyTask<T> {
    pub fn new(inner: T, notifier: Notifier) -> Self {
        Self { inner, notifier }
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn report(&self, event_type: &str) {
        self.notifier.info(event_type, format_task(self.inner.task()));
    }
}

impl<T: TaskHandle> TaskHandle for NotifyTask<T> {
    fn task(&self) -> &Task {
        self.inner.task()
    }

    fn run(&mut self, executor: &dyn TaskExecutor) -> Result<()> {
        self.inner.run(executor)?;
        self.report("task.run");
        Ok(())
    }

    fn begin_processing(&mut self) -> Result<()> {
        self.inner.begin_processing()?;
        self.report("task.processing");
        Ok(())
    }

    fn succeed(&mut self, result: Value) -> Result<()> {
        self.inner.succeed(result)?;
        self.report("task.success");
        Ok(())
    }

    fn fail(&mut self, message: &str) -> Result<()> {
        self.inner.fail(message)?;
        self.report("task.failure");
        Ok(())
    }
}

pub struct NotifyTaskRepo<R> {
    inner: R,
    notifier: Notifier,
}

impl<R: TaskRepo> NotifyTaskRepo<R> {
    pub fn new(inner: R, notifier: Notifier) -> Self {
        Self { inner, notifier }
    }

    fn wrap(&self, task: R::Task) -> NotifyTask<R::Task> {
        NotifyTask::new(task, self.notifier.clone())
    }
}

impl<R: TaskRepo> TaskRepo for NotifyTaskRepo<R> {
    type Task = NotifyTask<R::Task>;

    fn get(&self, task_id: TaskId) -> Result<Self::Task> {
        Ok(self.wrap(self.inner.get(task_id)?))
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Self::Task>> {
        let tasks = self.inner.list(filter)?;
        Ok(tasks.into_iter().map(|task| self.wrap(task)).collect())
    }

    fn add(&self, task: &mut Self::Task) -> Result<()> {
        self.inner.add(task.inner_mut())?;
        self.notifier.info("task.create", format_task(task.task()));
        Ok(())
    }

    fn save(&self, task: &mut Self::Task) -> Result<()> {
        self.inner.save(task.inner_mut())
    }

    fn remove(&self, task: &mut Self::Task) -> Result<()> {
        self.inner.remove(task.inner_mut())?;
        let payload = mark_deleted(format_task(task.task()), Utc::now());
        self.notifier.info("task.delete", payload);
        Ok(())
    }
}

pub struct NotifyTaskFactory<F> {
    inner: F,
    notifier: Notifier,
}

impl<F: TaskFactory> NotifyTaskFactory<F> {
    pub fn new(inner: F, notifier: Notifier) -> Self {
        Self { inner, notifier }
    }
}

impl<F: TaskFactory> TaskFactory for NotifyTaskFactory<F> {
    type Task = NotifyTask<F::Task>;

    fn new_task(&self, task_type: &str, owner: Option<String>, input: Value) -> Result<Self::Task> {
        let task = self.inner.new_task(task_type, owner, input)?;
        Ok(NotifyTask::new(task, self.notifier.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{BusSink, Notification, Priority};
    use crate::store::{
        collect_stream, stream_from_bytes, MemoryBackend, StorageBackend, StoreImage, StoredData,
    };
    use serde_json::json;
    use stowage_common::TaskStatus;

    fn bus_notifier() -> (Notifier, Arc<BusSink>) {
        let bus = Arc::new(BusSink::new(32));
        (Notifier::new(bus.clone(), "image.localhost"), bus)
    }

    fn notify_image(
        backend: impl StorageBackend + 'static,
    ) -> (NotifyImage<StoreImage<Image>>, Arc<BusSink>) {
        let (notifier, bus) = bus_notifier();
        let raw = Image::new(NewImage {
            owner: Some("tenant-a".into()),
            ..Default::default()
        })
        .unwrap();
        let image = NotifyImage::new(
            StoreImage::new(raw, Arc::new(backend)),
            RequestContext::new("tenant-b", "bob"),
            notifier,
        );
        (image, bus)
    }

    #[tokio::test]
    async fn test_set_data_success_sequence() {
        let (mut image, bus) = notify_image(MemoryBackend::new());

        image
            .set_data(stream_from_bytes(&b"abcd"[..]), Some(4))
            .await
            .unwrap();

        assert_eq!(
            bus.event_types(),
            vec!["image.prepare", "image.upload", "image.activate"]
        );
        let sent = bus.recent(3);
        assert_eq!(sent[0].payload["status"], "queued");
        assert_eq!(sent[1].payload["status"], "active");
        assert_eq!(sent[1].payload["size"], 4);
        assert!(sent.iter().all(|n| n.priority == Priority::Info));
    }

    #[tokio::test]
    async fn test_set_data_storage_full() {
        let (mut image, bus) = notify_image(MemoryBackend::new().with_capacity(2));

        let err = image
            .set_data(stream_from_bytes(&b"abcd"[..]), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::StorageFull(ref m) if m.starts_with("Image storage media is full: ")
        ));
        assert_eq!(bus.event_types(), vec!["image.prepare", "image.upload"]);
        let upload = &bus.recent(1)[0];
        assert_eq!(upload.priority, Priority::Error);
        assert_eq!(upload.payload, Value::String(err.to_string()));
    }

    /// Backend whose writes always fail with one kind of error.
    struct RefusingBackend(fn(String) -> Error);

    #[async_trait]
    impl StorageBackend for RefusingBackend {
        fn name(&self) -> &'static str {
            "refusing"
        }

        async fn add(
            &self,
            _image_id: ImageId,
            _data: ByteStream,
            _size: Option<u64>,
        ) -> Result<StoredData> {
            Err((self.0)("backend refused".to_string()))
        }

        async fn get(&self, url: &str) -> Result<ByteStream> {
            Err(Error::not_found(url))
        }

        async fn delete(&self, url: &str) -> Result<()> {
            Err(Error::not_found(url))
        }
    }

    /// Upload through a refusing backend; returns the error, the image id
    /// and the `image.upload` notification.
    async fn refused_upload(kind: fn(String) -> Error) -> (Error, ImageId, Notification) {
        let (mut image, bus) = notify_image(RefusingBackend(kind));
        let image_id = image.image_id();

        let err = image
            .set_data(stream_from_bytes(&b"abcd"[..]), None)
            .await
            .unwrap_err();

        assert_eq!(bus.event_types(), vec!["image.prepare", "image.upload"]);
        let upload = bus.recent(1).remove(0);
        assert_eq!(upload.priority, Priority::Error);
        (err, image_id, upload)
    }

    #[tokio::test]
    async fn test_set_data_invalid_value_passes_through() {
        let (err, image_id, upload) = refused_upload(Error::InvalidValue).await;

        assert!(matches!(err, Error::InvalidValue(ref m) if m == "backend refused"));
        assert_eq!(
            upload.payload,
            Value::String(format!(
                "Cannot save data for image {}: backend refused",
                image_id
            ))
        );
    }

    #[tokio::test]
    async fn test_set_data_duplicate_is_reworded() {
        let (err, image_id, upload) = refused_upload(Error::Duplicate).await;

        let expected = format!(
            "Unable to upload duplicate image data for image {}: backend refused",
            image_id
        );
        assert!(matches!(err, Error::Duplicate(ref m) if *m == expected));
        assert_eq!(upload.payload, Value::String(expected));
    }

    #[tokio::test]
    async fn test_set_data_forbidden_is_reworded() {
        let (err, image_id, upload) = refused_upload(Error::Forbidden).await;

        let expected = format!(
            "Not allowed to upload image data for image {}: backend refused",
            image_id
        );
        assert!(matches!(err, Error::Forbidden(ref m) if *m == expected));
        assert_eq!(upload.payload, Value::String(expected));
    }

    #[tokio::test]
    async fn test_set_data_not_found_passes_through() {
        let (err, image_id, upload) = refused_upload(Error::NotFound).await;

        assert!(matches!(err, Error::NotFound(ref m) if m == "backend refused"));
        let Value::String(msg) = upload.payload else {
            panic!("upload error payload should be a string");
        };
        assert!(msg.starts_with(&format!(
            "Image {} could not be found after upload.",
            image_id
        )));
        assert!(msg.ends_with(": backend refused"));
    }

    #[tokio::test]
    async fn test_set_data_transport_passes_through() {
        let (err, image_id, upload) = refused_upload(Error::Transport).await;

        assert!(matches!(err, Error::Transport(ref m) if m == "backend refused"));
        assert_eq!(
            upload.payload,
            Value::String(format!(
                "Failed to upload image data for image {} due to HTTP error: backend refused",
                image_id
            ))
        );
    }

    #[tokio::test]
    async fn test_set_data_other_errors_are_internal() {
        let (err, image_id, upload) = refused_upload(Error::Internal).await;

        assert!(matches!(err, Error::Internal(ref m) if m == "backend refused"));
        assert_eq!(
            upload.payload,
            Value::String(format!(
                "Failed to upload image data for image {} due to internal error: backend refused",
                image_id
            ))
        );
    }

    #[tokio::test]
    async fn test_get_data_reports_send() {
        let (mut image, bus) = notify_image(MemoryBackend::new());
        image
            .set_data(stream_from_bytes(&b"abcd"[..]), None)
            .await
            .unwrap();
        bus.clear();

        let data = collect_stream(image.get_data().await.unwrap()).await.unwrap();
        assert_eq!(&data[..], b"abcd");

        let sent = bus.recent(1);
        assert_eq!(sent[0].event_type, "image.send");
        assert_eq!(sent[0].priority, Priority::Info);
        assert_eq!(sent[0].payload["bytes_sent"], 4);
        assert_eq!(sent[0].payload["receiver_user_id"], "bob");
    }

    #[tokio::test]
    async fn test_get_data_size_mismatch_is_error() {
        let (mut image, bus) = notify_image(MemoryBackend::new());
        image
            .set_data(stream_from_bytes(&b"abcd"[..]), None)
            .await
            .unwrap();
        *image.attributes_mut().size = Some(5);
        bus.clear();

        collect_stream(image.get_data().await.unwrap()).await.unwrap();
        assert_eq!(bus.recent(1)[0].priority, Priority::Error);
    }

    #[test]
    fn test_task_events_follow_success() {
        let (notifier, bus) = bus_notifier();
        let raw = Task::new("import", None, json!({}), chrono::Duration::hours(1)).unwrap();
        let mut task = NotifyTask::new(raw, notifier);

        assert!(task.succeed(json!({})).is_err());
        assert!(bus.event_types().is_empty());

        task.begin_processing().unwrap();
        task.fail("unreachable source").unwrap();

        assert_eq!(bus.event_types(), vec!["task.processing", "task.failure"]);
        assert_eq!(bus.recent(1)[0].payload["status"], "failure");
        assert_eq!(task.task().status, TaskStatus::Failure);
    }
}
