use crate::controller::ReadoutConfig;
use crate::detector::{Delegate, LandmarkerOptions, DEFAULT_MODEL_ASSET_PATH};
use crate::landmark::Color;
use crate::pose::AngleMode;
use crate::zenoh_detector::DEFAULT_KEY_PREFIX;
use clap::Args;
use log::info;
use std::time::Duration;
use zenoh::config::Config;

#[derive(Args, Debug, Clone)]
pub struct CameraArgs {
    /// Camera index
    #[clap(long, default_value_t = 0)]
    pub camera: i32,
}

#[derive(Args, Debug, Clone)]
pub struct ReadoutArgs {
    /// Report raw angles or recenter yaw and pitch around forward facing.
    #[clap(long, value_enum, default_value_t = AngleMode::Raw)]
    pub angle_mode: AngleMode,

    /// Leave mouth openness out of the readout.
    #[clap(long)]
    pub no_mouth: bool,

    /// Mesh color as #RRGGBB
    #[clap(long, default_value_t = Color::GREEN)]
    pub mesh_color: Color,

    /// Frames per second of the inference loop
    #[clap(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=240))]
    pub fps: u32,
}

impl ReadoutArgs {
    pub fn readout_config(&self) -> ReadoutConfig {
        ReadoutConfig {
            angle_mode: self.angle_mode,
            mouth: !self.no_mouth,
            mesh_color: self.mesh_color,
            frame_interval: Duration::from_secs(1) / self.fps,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LandmarkerArgs {
    /// Model asset the detector should load
    #[clap(long, default_value = DEFAULT_MODEL_ASSET_PATH)]
    pub model_asset_path: String,

    /// Inference delegate requested from the detector
    #[clap(long, value_enum, default_value_t = Delegate::Gpu)]
    pub delegate: Delegate,

    /// Key expression prefix shared with the detector service
    #[clap(long, default_value = DEFAULT_KEY_PREFIX)]
    pub key_prefix: String,

    /// Milliseconds to wait for landmarks before dropping a frame
    #[clap(long, default_value_t = 500)]
    pub reply_timeout_ms: u64,
}

impl LandmarkerArgs {
    pub fn options(&self) -> LandmarkerOptions {
        LandmarkerOptions {
            model_asset_path: self.model_asset_path.clone(),
            delegate: self.delegate,
            ..Default::default()
        }
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ZenohArgs {
    /// Endpoints to connect to.
    #[clap(short = 'e', long)]
    pub connect: Vec<zenoh_config::EndPoint>,

    /// Endpoints to listen on.
    #[clap(long)]
    pub listen: Vec<zenoh_config::EndPoint>,
}

impl ZenohArgs {
    pub fn zenoh_config(&self) -> Config {
        let mut zenoh_config = Config::default();
        if !self.listen.is_empty() {
            zenoh_config.listen.endpoints = self.listen.clone();
            info!(
                "Configured listening endpoints {:?}",
                zenoh_config.listen.endpoints
            );
        }
        if !self.connect.is_empty() {
            zenoh_config.connect.endpoints = self.connect.clone();
            info!(
                "Configured connect endpoints {:?}",
                zenoh_config.connect.endpoints
            );
        }
        zenoh_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestArgs {
        #[clap(flatten)]
        readout: ReadoutArgs,
        #[clap(flatten)]
        landmarker: LandmarkerArgs,
    }

    #[test]
    fn defaults() {
        let args = TestArgs::parse_from(["test"]);
        let config = args.readout.readout_config();
        assert_eq!(config, ReadoutConfig::default());
        assert_eq!(args.landmarker.options(), LandmarkerOptions::default());
        assert_eq!(args.landmarker.reply_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn recentered_without_mouth() {
        let args = TestArgs::parse_from([
            "test",
            "--angle-mode",
            "recentered",
            "--no-mouth",
            "--mesh-color",
            "#FF0000",
            "--delegate",
            "cpu",
        ]);
        let config = args.readout.readout_config();
        assert_eq!(config.angle_mode, AngleMode::Recentered);
        assert!(!config.mouth);
        assert_eq!(config.mesh_color, Color::RED);
        assert_eq!(args.landmarker.options().delegate, Delegate::Cpu);
    }

    #[test]
    fn frame_rate_is_bounded() {
        for fps in ["0", "241", "1000000001"] {
            assert!(TestArgs::try_parse_from(["test", "--fps", fps]).is_err());
        }
        let args = TestArgs::try_parse_from(["test", "--fps", "240"]).unwrap();
        let interval = args.readout.readout_config().frame_interval;
        assert!(interval > Duration::ZERO);
        assert_eq!(interval, Duration::from_secs(1) / 240);
    }
}
