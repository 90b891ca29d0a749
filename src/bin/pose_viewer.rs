use clap::Parser;
use pose_readout::config::{CameraArgs, LandmarkerArgs, ReadoutArgs, ZenohArgs};
use pose_readout::zenoh_detector::ZenohLandmarkerFactory;
use pose_readout::{init_logger, CameraSource, HighguiSurface, ModelLoader, PoseController};

/// Live head pose readout in a window. Space toggles the webcam, esc quits.
#[derive(Parser, Debug)]
#[command()]
struct Args {
    #[clap(flatten)]
    camera: CameraArgs,

    #[clap(flatten)]
    readout: ReadoutArgs,

    #[clap(flatten)]
    landmarker: LandmarkerArgs,

    #[clap(flatten)]
    zenoh: ZenohArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(env!("CARGO_CRATE_NAME"));
    let args: Args = Args::parse();

    let factory = ZenohLandmarkerFactory::new(
        args.zenoh.zenoh_config(),
        &args.landmarker.key_prefix,
        args.landmarker.reply_timeout(),
    );
    let models = ModelLoader::spawn(factory, args.landmarker.options());

    let surface = HighguiSurface::new("pose readout")?;
    let mut controller = PoseController::new(
        CameraSource::new(args.camera.camera),
        models,
        surface,
        args.readout.readout_config(),
    );

    controller.run().await?;
    Ok(())
}
