use std::{net::SocketAddr, time::Duration};

use common::Prediction;
use image::{Rgb, RgbImage};
use object_identifier::{
    endpoints::router,
    nn::{DetectorConfig, InferModel, ObjectDetector},
    pipeline::{frame_channels, FrameHub},
    sensors::{setup_source, FrameSource, ImageDirSource},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn serve(hub: FrameHub) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let server =
        axum::Server::bind(&"127.0.0.1:0".parse()?).serve(router(hub).into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);

    Ok(addr)
}

#[tokio::test]
async fn endpoints_serve_latest_results() -> TestResult {
    let (publisher, hub) = frame_channels(80);
    let predictions = vec![Prediction {
        class: "cat".into(),
        score: 0.9,
        bbox: Some([1.0, 2.0, 3.0, 4.0]),
    }];
    publisher.publish(&RgbImage::new(32, 24), &predictions)?;

    let addr = serve(hub).await?;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("http://{addr}/healthcheck"))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(health, "healthy");

    let body = client
        .get(format!("http://{addr}/predictions"))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(body, r#"[{"class":"cat","score":0.9,"bbox":[1.0,2.0,3.0,4.0]}]"#);

    let stream = client.get(format!("http://{addr}/stream")).send().await?;
    assert_eq!(
        stream.headers()["content-type"],
        "multipart/x-mixed-replace; boundary=frame"
    );

    let index = client.get(format!("http://{addr}/")).send().await?.text().await?;
    assert!(index.contains(r#"<img src="./stream">"#));
    // Class names come from user supplied label files and must never be parsed as markup
    assert!(index.contains("item.textContent"));
    assert!(!index.contains("innerHTML"));

    Ok(())
}

#[tokio::test]
async fn image_directory_becomes_ready() -> TestResult {
    let dir = tempfile::tempdir()?;
    RgbImage::from_pixel(64, 48, Rgb([10, 20, 30])).save(dir.path().join("frame_0.png"))?;
    std::fs::write(dir.path().join("notes.txt"), "not an image")?;

    let mut source = ImageDirSource::new(dir.path())?;
    assert!(!source.is_ready());

    setup_source(&mut source, Duration::from_secs(1)).await?;
    assert!(source.is_ready());
    assert_eq!(source.capture()?.dimensions(), (64, 48));

    Ok(())
}

#[test]
fn test_ssd_mobilenet_on_blank_frame() -> TestResult {
    let config = DetectorConfig::default();
    if !config.model_path.exists() {
        println!(
            "Skipping, no detection model at {}",
            config.model_path.display()
        );
        return Ok(());
    }

    let mut model = ObjectDetector::new(config);
    model.load_model()?;

    let image = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
    let detections = model.infer(&image)?;
    dbg!(&detections);

    for detection in detections {
        assert!(detection.score >= 0.5);
        assert!(detection.bbox[2] >= 0.0 && detection.bbox[3] >= 0.0);
    }

    Ok(())
}
