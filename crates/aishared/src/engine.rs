use aishare_core::{
    encode_png_base64, AnnotateError, Annotator, EncoderError, EnrollError, EnrollOutcome,
    FaceEncoder, ImageSource, ModelStore, NearestNeighborMatcher, OnnxEncoder, Scope, StoreError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("enrollment error: {0}")]
    Enroll(#[from] EnrollError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("annotation error: {0}")]
    Annotate(#[from] AnnotateError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One query image that contained at least one face.
#[derive(Debug, Clone)]
pub struct PredictedImage {
    /// Distinct identity names found in the image, in detection order.
    pub names: Vec<String>,
    /// Annotated image, base64 PNG.
    pub png_base64: String,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Train {
        scope: Scope,
        person: String,
        images: Vec<ImageSource>,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
    Predict {
        scope: Scope,
        images: Vec<ImageSource>,
        reply: oneshot::Sender<Result<Vec<PredictedImage>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Enroll `person` from `images` into `scope`.
    pub async fn train(
        &self,
        scope: Scope,
        person: String,
        images: Vec<ImageSource>,
    ) -> Result<EnrollOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Train {
                scope,
                person,
                images,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Identify every face in `images` against the models in `scope`.
    pub async fn predict(
        &self,
        scope: Scope,
        images: Vec<ImageSource>,
    ) -> Result<Vec<PredictedImage>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Predict {
                scope,
                images,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load the ONNX models and label font, then spawn the engine.
///
/// Fails fast at startup if either model is unavailable.
pub fn spawn_engine(config: &Config, store: ModelStore) -> Result<EngineHandle, EngineError> {
    let encoder = OnnxEncoder::load(&config.onnx_dir, config.intra_threads)?;
    tracing::info!(dir = %config.onnx_dir.display(), "SCRFD and ArcFace models loaded");

    let annotator = Annotator::discover(config.font_path.as_deref())?;
    let matcher = NearestNeighborMatcher {
        threshold: config.match_threshold,
    };
    spawn_engine_with(encoder, store, matcher, annotator)
}

/// Spawn the engine on a dedicated OS thread that owns `encoder`.
///
/// Requests are served one at a time, in arrival order.
pub fn spawn_engine_with<E>(
    mut encoder: E,
    store: ModelStore,
    matcher: NearestNeighborMatcher,
    annotator: Annotator,
) -> Result<EngineHandle, EngineError>
where
    E: FaceEncoder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("aishare-engine".into())
        .spawn(move || {
            tracing::info!(threshold = matcher.threshold, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Train {
                        scope,
                        person,
                        images,
                        reply,
                    } => {
                        let result = aishare_core::enroll(&mut encoder, &store, &scope, &person, &images)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Predict {
                        scope,
                        images,
                        reply,
                    } => {
                        let result =
                            run_predict(&mut encoder, &store, &matcher, &annotator, &scope, &images);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Load the gallery once, then recognize and annotate each image.
/// Images that cannot be decoded or contain no face are left out.
fn run_predict<E: FaceEncoder>(
    encoder: &mut E,
    store: &ModelStore,
    matcher: &NearestNeighborMatcher,
    annotator: &Annotator,
    scope: &Scope,
    images: &[ImageSource],
) -> Result<Vec<PredictedImage>, EngineError> {
    let gallery = store.load_all(scope)?;
    tracing::debug!(people = gallery.len(), images = images.len(), "predict: gallery loaded");

    let mut predictions = Vec::new();
    for source in images {
        let image = match source.load_rgb() {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(image = %source, error = %e, "predict: skipping unreadable image");
                continue;
            }
        };

        let recognition = aishare_core::recognize(encoder, matcher, image, &gallery)?;
        if recognition.faces.is_empty() {
            tracing::debug!(image = %source, "predict: no faces");
            continue;
        }

        let mut names: Vec<String> = Vec::new();
        for face in &recognition.faces {
            let name = face.identity.name();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }

        let annotated = annotator.annotate(&recognition.image, &recognition.faces);
        predictions.push(PredictedImage {
            names,
            png_base64: encode_png_base64(&annotated)?,
        });
    }

    tracing::info!(
        images = images.len(),
        with_faces = predictions.len(),
        "predict: complete"
    );
    Ok(predictions)
}
