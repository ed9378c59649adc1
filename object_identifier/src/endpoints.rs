//! Endpoints of HTTP server.
//!
use std::convert::Infallible;

use axum::{
    body::StreamBody,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Extension, Json, Router,
};
use common::Prediction;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::pipeline::FrameHub;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Object Identifier</title>
    <style>
        body { font-family: sans-serif; background: #111; color: #eee; margin: 2em; }
        img { max-width: 100%; }
    </style>
</head>
<body>
    <h3>Object Identifier</h3>
    <img src="./stream">
    <ol id="predictions"></ol>
    <script>
        async function refresh() {
            try {
                const predictions = await (await fetch("./predictions")).json();
                const items = predictions.map(p => {
                    const item = document.createElement("li");
                    item.textContent = `${p.class}: ${(p.score * 100).toFixed(2)}%`;
                    return item;
                });
                document.getElementById("predictions").replaceChildren(...items);
            } catch (e) {
                console.log(e);
            }
        }
        setInterval(refresh, 500);
    </script>
</body>
</html>
"#;

/// Build the HTTP routes serving the frame loop outputs.
pub fn router(hub: FrameHub) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/stream", get(overlay_stream))
        .route("/predictions", get(predictions))
        .layer(Extension(hub))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Endpoint of the rendered overlay stream.
pub async fn overlay_stream(Extension(hub): Extension<FrameHub>) -> impl IntoResponse {
    log::info!("Overlay stream requested");

    // Slow clients skip the frames they lagged behind on
    let stream = BroadcastStream::new(hub.subscribe_frames())
        .filter_map(|item| async move { item.ok() })
        .map(Ok::<_, Infallible>);

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

/// Predictions of the most recent frame as JSON.
pub async fn predictions(Extension(hub): Extension<FrameHub>) -> Json<Vec<Prediction>> {
    Json(hub.latest_predictions())
}
