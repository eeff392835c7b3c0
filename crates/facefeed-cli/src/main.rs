use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facefeed_core::annotate::annotate;
use facefeed_core::catalog::{DEFAULT_CATALOG_KEY, DEFAULT_PEOPLE_PREFIX};
use facefeed_core::{
    Catalog, CatalogStore, FaceGateway, FirstMatch, GatewayError, Matcher, OnnxGateway,
    RecognitionResult, StoreLocation, DEFAULT_THRESHOLD,
};
use facefeed_hw::Camera;
use image::{imageops, RgbImage};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facefeed", about = "facefeed catalog and recognition tools")]
struct Cli {
    /// Object store holding reference images: fs:<path> or gcs:<bucket>
    #[arg(long, global = true, default_value = "fs:store")]
    store: String,
    /// Bearer token for a GCS store
    #[arg(long, global = true)]
    token: Option<String>,
    /// Local catalog cache file
    #[arg(long, global = true, default_value = "known_embeddings.json")]
    cache: PathBuf,
    /// Object key of the catalog artifact
    #[arg(long, global = true, default_value = DEFAULT_CATALOG_KEY)]
    catalog_key: String,
    /// Prefix of the `<label>/<image>` reference tree
    #[arg(long, global = true, default_value = DEFAULT_PEOPLE_PREFIX)]
    people_prefix: String,
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true, default_value = "models")]
    model_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the catalog from the reference images and save it
    Bootstrap,
    /// List identities in the catalog
    List,
    /// Recognize faces in a still image
    Identify {
        /// Image to analyse
        image: PathBuf,
        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Cosine similarity needed for a match
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f32,
        /// Pixels added around each detected box before embedding
        #[arg(long, default_value_t = 20)]
        padding: u32,
    },
    /// List V4L2 capture devices
    Devices,
}

impl Cli {
    fn catalog_store(&self) -> Result<CatalogStore> {
        let Some(location) = StoreLocation::parse(&self.store) else {
            bail!("invalid store {:?}, expected fs:<path> or gcs:<bucket>", self.store);
        };
        let store = location
            .open(self.token.clone())
            .with_context(|| format!("failed to open store {location}"))?;
        Ok(CatalogStore::new(store, &self.cache)
            .with_catalog_key(self.catalog_key.clone())
            .with_people_prefix(self.people_prefix.clone()))
    }

    fn gateway(&self) -> Result<Arc<dyn FaceGateway>> {
        let gateway = OnnxGateway::load(
            &self.model_dir.join("det_10g.onnx"),
            &self.model_dir.join("w600k_r50.onnx"),
            1,
        )
        .context("failed to load face models")?;
        Ok(Arc::new(gateway))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Bootstrap => {
            let catalogs = cli.catalog_store()?;
            let gateway = cli.gateway()?;
            let catalog = catalogs.bootstrap(gateway).await;
            println!(
                "Catalog rebuilt: {} identities, {} reference embeddings",
                catalog.len(),
                catalog.reference_count()
            );
            print_catalog(&catalog);
        }
        Commands::List => {
            let catalog = cli.catalog_store()?.load().await;
            if catalog.is_empty() {
                println!("No identities in catalog");
            } else {
                print_catalog(&catalog);
            }
        }
        Commands::Identify {
            image: input,
            output,
            threshold,
            padding,
        } => {
            let frame = image::open(input)
                .with_context(|| format!("failed to read {}", input.display()))?
                .to_rgb8();
            let catalog = cli.catalog_store()?.load().await;
            let gateway = cli.gateway()?;

            let results = identify(gateway.as_ref(), &catalog, &frame, *threshold, *padding)?;
            if results.is_empty() {
                println!("No faces recognized");
            }
            for r in &results {
                println!(
                    "[{:.0}, {:.0}, {:.0}, {:.0}] {}",
                    r.face.x1, r.face.y1, r.face.x2, r.face.y2, r.label
                );
            }

            if let Some(path) = output {
                annotate(&frame, &results)
                    .save(path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Annotated image written to {}", path.display());
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn print_catalog(catalog: &Catalog) {
    for identity in catalog.identities() {
        println!("{:<24} {} reference(s)", identity.label, identity.references.len());
    }
}

/// Detect, embed and first-match every face in a still image.
///
/// Faces whose crop holds no detectable face are skipped. Other gateway
/// errors abort.
fn identify(
    gateway: &dyn FaceGateway,
    catalog: &Catalog,
    frame: &RgbImage,
    threshold: f32,
    padding: u32,
) -> Result<Vec<RecognitionResult>> {
    let boxes = gateway.detect_boxes(frame).context("face detection failed")?;

    let mut results = Vec::new();
    for face in boxes.into_iter().filter(|b| b.is_valid()) {
        let Some((x, y, w, h)) = face.padded_region(padding, frame.width(), frame.height()) else {
            continue;
        };
        let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
        let embedding = match gateway.embed(&crop) {
            Ok(embedding) => embedding,
            Err(GatewayError::NoFace) => {
                tracing::debug!(?face, "no face in crop");
                continue;
            }
            Err(e) => return Err(e).context("face embedding failed"),
        };
        let label = FirstMatch.match_label(&embedding, catalog, threshold);
        results.push(RecognitionResult { face, label });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facefeed_core::{Embedding, FaceBox, Label};

    /// Boxes are fixed; the embedding is read from the crop's top-left pixel.
    struct StubGateway {
        boxes: Vec<FaceBox>,
    }

    impl FaceGateway for StubGateway {
        fn detect_boxes(&self, _image: &RgbImage) -> Result<Vec<FaceBox>, GatewayError> {
            Ok(self.boxes.clone())
        }

        fn embed(&self, crop: &RgbImage) -> Result<Embedding, GatewayError> {
            let [r, g, _] = crop.get_pixel(0, 0).0;
            if r == 0 && g == 0 {
                return Err(GatewayError::NoFace);
            }
            Ok(Embedding::new(vec![r as f32, g as f32]))
        }
    }

    #[test]
    fn test_cli_parses_identify() {
        let cli = Cli::try_parse_from([
            "facefeed", "--store", "gcs:faces", "identify", "in.jpg", "-o", "out.jpg", "-t", "0.7",
        ])
        .unwrap();
        assert_eq!(cli.store, "gcs:faces");
        match cli.command {
            Commands::Identify { image, output, threshold, padding } => {
                assert_eq!(image, PathBuf::from("in.jpg"));
                assert_eq!(output, Some(PathBuf::from("out.jpg")));
                assert_eq!(threshold, 0.7);
                assert_eq!(padding, 20);
            }
            _ => panic!("expected identify"),
        }
    }

    #[test]
    fn test_invalid_store_is_rejected() {
        let cli = Cli::try_parse_from(["facefeed", "--store", "s3:nope", "list"]).unwrap();
        assert!(cli.catalog_store().is_err());
    }

    #[test]
    fn test_identify_matches_and_skips_faceless_crops() {
        // Left half red (Alice), right half black (no face).
        let mut frame = RgbImage::new(100, 50);
        for x in 0..50 {
            for y in 0..50 {
                frame.put_pixel(x, y, image::Rgb([200, 0, 0]));
            }
        }
        let gateway = StubGateway {
            boxes: vec![
                FaceBox::new(10.0, 10.0, 30.0, 30.0),
                FaceBox::new(60.0, 10.0, 80.0, 30.0),
                FaceBox::new(5.0, 5.0, 5.0, 5.0),
            ],
        };
        let mut catalog = Catalog::new();
        catalog.add_reference("Alice", Embedding::new(vec![1.0, 0.0]), "alice.jpg");

        let results = identify(&gateway, &catalog, &frame, 0.5, 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, Label::Known("Alice".into()));
        assert_eq!(results[0].face.x1, 10.0);
    }
}
