use facegrab_core::EmbeddingExtractor;
use facegrab_store::{
    FaceRecord, FaceRegistry, Recognition, Registration, RegistryError, RegistryStatus,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const REQUEST_QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// An uploaded image as received over HTTP.
pub struct Upload {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Register {
        name: String,
        upload: Upload,
        reply: oneshot::Sender<Result<Registration, RegistryError>>,
    },
    Recognize {
        upload: Upload,
        reply: oneshot::Sender<Result<Recognition, RegistryError>>,
    },
    Status {
        reply: oneshot::Sender<Result<RegistryStatus, RegistryError>>,
    },
    ListFaces {
        reply: oneshot::Sender<Result<Vec<FaceRecord>, RegistryError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Store the upload, extract its embedding, and record it under `name`.
    pub async fn register(&self, name: String, upload: Upload) -> Result<Registration, EngineError> {
        self.call(|reply| EngineRequest::Register {
            name,
            upload,
            reply,
        })
        .await
    }

    /// Store the upload and look up the nearest registered face.
    pub async fn recognize(&self, upload: Upload) -> Result<Recognition, EngineError> {
        self.call(|reply| EngineRequest::Recognize { upload, reply })
            .await
    }

    pub async fn status(&self) -> Result<RegistryStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    pub async fn list_faces(&self) -> Result<Vec<FaceRecord>, EngineError> {
        self.call(|reply| EngineRequest::ListFaces { reply }).await
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, RegistryError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the registry (models, index, database) and handles one
/// request at a time, so concurrent HTTP requests never interleave index or
/// database writes.
pub fn spawn_engine<E>(mut registry: FaceRegistry<E>) -> Result<EngineHandle, EngineError>
where
    E: EmbeddingExtractor + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(REQUEST_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("facegrab-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register {
                        name,
                        upload,
                        reply,
                    } => {
                        let result = registry.register_upload(
                            &name,
                            upload.file_name.as_deref(),
                            &upload.bytes,
                        );
                        if let Err(err) = &result {
                            tracing::warn!(name = %name, error = %err, "registration failed");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { upload, reply } => {
                        let result =
                            registry.recognize_upload(upload.file_name.as_deref(), &upload.bytes);
                        if let Err(err) = &result {
                            tracing::warn!(error = %err, "recognition failed");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(registry.status());
                    }
                    EngineRequest::ListFaces { reply } => {
                        let _ = reply.send(registry.list_faces());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facegrab_core::extractor::decode_rgb;
    use facegrab_core::{Embedding, ExtractError};
    use facegrab_store::{FlatIndex, MetadataStore, UploadDir};
    use std::path::Path;
    use tempfile::TempDir;

    /// Reads comma-separated floats from the stored upload; "noface" means no
    /// face, and anything unparseable goes through the real image decoder.
    pub(crate) struct TextExtractor;

    impl EmbeddingExtractor for TextExtractor {
        fn extract(&mut self, image: &Path) -> Result<Embedding, ExtractError> {
            let text = std::fs::read_to_string(image).unwrap_or_default();
            if text.trim() == "noface" {
                return Err(ExtractError::NoFaceDetected);
            }
            match text
                .split(',')
                .map(|v| v.trim().parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(values) => Ok(Embedding::new(values)),
                Err(_) => {
                    decode_rgb(image)?;
                    Err(ExtractError::NoFaceDetected)
                }
            }
        }
    }

    pub(crate) fn test_engine(dir: &TempDir, threshold: Option<f32>) -> EngineHandle {
        let registry = FaceRegistry::new(
            TextExtractor,
            FlatIndex::open(dir.path().join("index.fgix"), None).unwrap(),
            MetadataStore::open(&dir.path().join("meta.db")).unwrap(),
            UploadDir::new(dir.path().join("images")),
            threshold,
        );
        spawn_engine(registry).unwrap()
    }

    fn upload(name: &str, bytes: &[u8]) -> Upload {
        Upload {
            file_name: Some(name.to_string()),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_register_and_recognize_through_engine() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir, Some(1.3));

        let reg = engine
            .register("nina".into(), upload("n.jpg", b"1.0,0.0"))
            .await
            .unwrap();
        assert_eq!(reg.slot, 0);

        let result = engine.recognize(upload("q.jpg", b"1.0,0.0")).await.unwrap();
        assert_eq!(result.label(), "nina");

        let status = engine.status().await.unwrap();
        assert_eq!((status.faces, status.vectors), (1, 1));
        assert_eq!(engine.list_faces().await.unwrap()[0].name, "nina");
    }

    #[tokio::test]
    async fn test_concurrent_registrations_get_distinct_slots() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir, None);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let bytes = format!("{i}.0,1.0");
                    engine
                        .register(format!("p{i}"), upload("p.png", bytes.as_bytes()))
                        .await
                        .unwrap()
                        .slot
                })
            })
            .collect();

        let mut slots = Vec::new();
        for task in tasks {
            slots.push(task.await.unwrap());
        }
        slots.sort_unstable();
        assert_eq!(slots, (0..8).collect::<Vec<_>>());

        let index = FlatIndex::open(dir.path().join("index.fgix"), None).unwrap();
        assert_eq!(index.len(), 8);
    }

    #[tokio::test]
    async fn test_registry_errors_pass_through() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir, None);
        let err = engine
            .register("olga".into(), upload("o.gif", b"1.0"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Registry(RegistryError::UnsupportedFileType(_))
        ));
    }
}
