use clap::Parser;
use log::info;
use pose_readout::config::{CameraArgs, LandmarkerArgs, ReadoutArgs, ZenohArgs};
use pose_readout::zenoh_detector::ZenohLandmarkerFactory;
use pose_readout::{
    init_logger, CameraSource, ConsoleSurface, ModelLoader, PoseController, UiEvent,
};

/// Prints head pose once per frame without a window. Ctrl-c quits.
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

    let (surface, events) = ConsoleSurface::new();
    let mut controller = PoseController::new(
        CameraSource::new(args.camera.camera),
        models,
        surface,
        args.readout.readout_config(),
    );

    if !controller.models_mut().wait().await {
        anyhow::bail!("Face landmarker failed to load");
    }
    events.send(UiEvent::Toggle)?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            _ = events.send(UiEvent::Quit);
        }
    });

    controller.run().await?;
    Ok(())
}
