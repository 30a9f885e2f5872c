use log::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Deserialize;
use serde_json::json;
use sfm_core::{
    nalgebra::{Point2, Vector2},
    Feature,
};
use sfm_geom::LinearEigenTriangulator;
use sfm_odometry::{Descriptor, Frame, VisualOdometry, VoSettings, BINARY_DESCRIPTOR_BYTES};
use sfm_pinhole::{CameraIntrinsics, Distortion, ImageBounds};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Clone)]
#[structopt(name = "vo-sandbox", about = "A tool for testing visual odometry on recorded features")]
struct Opt {
    /// The file where settings are specified.
    ///
    /// This is in the format of `sfm_odometry::VoSettings`. Missing fields take their defaults.
    #[structopt(short, long, default_value = "vo-settings.json")]
    settings: PathBuf,
    /// The x focal length
    #[structopt(long, default_value = "984.2439")]
    x_focal: f64,
    /// The y focal length
    #[structopt(long, default_value = "980.8141")]
    y_focal: f64,
    /// The x optical center coordinate
    #[structopt(long, default_value = "690.0")]
    x_center: f64,
    /// The y optical center coordinate
    #[structopt(long, default_value = "233.1966")]
    y_center: f64,
    /// The skew
    #[structopt(long, default_value = "0.0")]
    skew: f64,
    /// The K1 radial distortion
    #[structopt(long, default_value = "0.0")]
    radial_distortion: f64,
    /// The image width, projections outside the image are ignored when given with the height
    #[structopt(long)]
    width: Option<f64>,
    /// The image height
    #[structopt(long)]
    height: Option<f64>,
    /// Seed of the sample consensus
    #[structopt(long, default_value = "5")]
    seed: u64,
    /// The recording to replay
    ///
    /// A JSON list of frames, each a list of `{ "u", "v", "descriptor" }` features.
    #[structopt(parse(from_os_str))]
    recording: PathBuf,
}

#[derive(Deserialize)]
struct RecordedFeature {
    u: f64,
    v: f64,
    #[serde(default)]
    scale: Option<f64>,
    #[serde(default)]
    orientation: Option<f64>,
    descriptor: RecordedDescriptor,
}

/// Binary descriptors are byte lists of at most `BINARY_DESCRIPTOR_BYTES`.
#[derive(Deserialize)]
enum RecordedDescriptor {
    Binary(Vec<u8>),
    Real(Vec<f64>),
}

impl RecordedFeature {
    fn into_pair(self) -> Option<(Feature, Descriptor)> {
        let mut feature = Feature::new(self.u, self.v);
        feature.scale = self.scale;
        feature.orientation = self.orientation;
        let descriptor = match self.descriptor {
            RecordedDescriptor::Binary(bytes) if bytes.len() <= BINARY_DESCRIPTOR_BYTES => {
                Descriptor::binary(&bytes)
            }
            RecordedDescriptor::Binary(_) => return None,
            RecordedDescriptor::Real(values) => Descriptor::Real(values),
        };
        Some((feature, descriptor))
    }
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();

    // Fill intrinsics from args.
    let mut intrinsics = CameraIntrinsics::identity()
        .focals(Vector2::new(opt.x_focal, opt.y_focal))
        .principal_point(Point2::new(opt.x_center, opt.y_center))
        .skew(opt.skew)
        .distortion(Distortion::new(opt.radial_distortion, 0.0, 0.0, 0.0, 0.0));
    if let (Some(width), Some(height)) = (opt.width, opt.height) {
        intrinsics = intrinsics.bounds(ImageBounds::new(width, height));
    }

    let settings = std::fs::File::open(&opt.settings)
        .ok()
        .and_then(|file| serde_json::from_reader(file).ok());
    if settings.is_some() {
        info!("loaded existing settings");
    } else {
        info!("used default settings");
    }
    let settings: VoSettings = settings.unwrap_or_default();

    let recording: Vec<Vec<RecordedFeature>> = match std::fs::File::open(&opt.recording)
        .map_err(|e| e.to_string())
        .and_then(|file| serde_json::from_reader(file).map_err(|e| e.to_string()))
    {
        Ok(recording) => recording,
        Err(e) => {
            error!("unable to read recording {}: {}", opt.recording.display(), e);
            std::process::exit(1);
        }
    };
    info!("replaying {} frames", recording.len());

    let mut vo = VisualOdometry::new(
        intrinsics,
        settings,
        LinearEigenTriangulator::new(),
        Xoshiro256PlusPlus::seed_from_u64(opt.seed),
    );
    for (ix, features) in recording.into_iter().enumerate() {
        let frame: Frame = match features
            .into_iter()
            .map(RecordedFeature::into_pair)
            .collect::<Option<Frame>>()
        {
            Some(frame) => frame,
            None => {
                error!(
                    "frame {} has a binary descriptor longer than {} bytes",
                    ix, BINARY_DESCRIPTOR_BYTES
                );
                std::process::exit(1);
            }
        };
        match vo.update(frame) {
            Ok(report) => {
                let center = report
                    .view
                    .and_then(|view| vo.map().view(view))
                    .map(|view| view.camera.optical_center())
                    .map(|c| [c.x, c.y, c.z]);
                println!(
                    "{}",
                    json!({
                        "frame": ix,
                        "state": format!("{:?}", report.state),
                        "center": center,
                        "inliers": report.num_inliers,
                        "new_landmarks": report.num_new_landmarks,
                    })
                );
            }
            Err(e) => {
                warn!("frame {} failed: {}", ix, e);
                println!("{}", json!({ "frame": ix, "error": e.to_string() }));
            }
        }
    }
    info!(
        "finished with {} views and {} landmarks",
        vo.map().num_views(),
        vo.map().num_landmarks()
    );
}
