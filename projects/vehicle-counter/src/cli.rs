use crate::error::Result;
use crate::pipeline::tracker::TrackerConfig;
use crate::pipeline::types::{CountSettings, CountingLine, DEFAULT_CONFIDENCE, DEFAULT_LINE_TOLERANCE};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the web front end (uploads, live feed, running count)
    Serve(ServeArgs),
    /// Count vehicles in one video file and print the summary
    Process(ProcessArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, default_value_t = 5000)]
    pub port: u16,

    /// Directory for uploaded source videos
    #[arg(long, env = "VEHICLE_COUNTER_UPLOAD_ROOT", default_value = "uploads")]
    pub upload_root: PathBuf,

    /// Directory for annotated outputs and job summaries
    #[arg(long, env = "VEHICLE_COUNTER_RESULTS_ROOT", default_value = "static/results")]
    pub results_root: PathBuf,

    /// Camera device index for the live feed
    #[arg(long, default_value_t = 0)]
    pub camera: i32,

    /// Give every uploaded video its own tracker and tally instead of the
    /// shared one used by the live feed
    #[arg(long)]
    pub isolated_sessions: bool,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ProcessArgs {
    /// Video file to process
    pub input: PathBuf,

    /// Directory for the annotated output and job summary
    #[arg(long, env = "VEHICLE_COUNTER_RESULTS_ROOT", default_value = "static/results")]
    pub results_root: PathBuf,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct PipelineArgs {
    /// RT-DETR ONNX model file
    #[arg(long, env = "VEHICLE_COUNTER_MODEL", default_value = "models/rtdetr-r18.onnx")]
    pub model: String,

    /// Minimum detector confidence, exclusive
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
    pub confidence: f32,

    /// Counting line as x1,y1,x2,y2
    #[arg(long, default_value = "370,297,750,297")]
    pub line: CountingLine,

    /// Vertical half-height of the crossing band in pixels
    #[arg(long, default_value_t = DEFAULT_LINE_TOLERANCE)]
    pub line_tolerance: i32,

    #[arg(long, default_value_t = 20)]
    pub max_age: u32,

    #[arg(long, default_value_t = 3)]
    pub min_hits: u32,

    #[arg(long, default_value_t = 0.3)]
    pub iou_threshold: f32,
}

impl PipelineArgs {
    pub fn count_settings(&self) -> Result<CountSettings> {
        let line = self.line.with_tolerance(self.line_tolerance)?;
        CountSettings::new(self.confidence, line)
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            max_age: self.max_age,
            min_hits: self.min_hits,
            iou_threshold: self.iou_threshold,
        }
    }
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let args = Args::try_parse_from(["vehicle-counter", "serve"]).unwrap();
        let Command::Serve(serve) = args.command else {
            panic!("expected serve");
        };
        assert_eq!(serve.port, 5000);
        assert!(!serve.isolated_sessions);

        let settings = serve.pipeline.count_settings().unwrap();
        assert_eq!(settings.line, CountingLine::default());
        assert_eq!(settings.confidence, 0.3);
        assert_eq!(serve.pipeline.tracker_config().min_hits, 3);
    }

    #[test]
    fn test_process_with_custom_line() {
        let args = Args::try_parse_from([
            "vehicle-counter",
            "process",
            "clip.mp4",
            "--line",
            "0,100,640,100",
            "--line-tolerance",
            "20",
        ])
        .unwrap();
        let Command::Process(process) = args.command else {
            panic!("expected process");
        };
        let settings = process.pipeline.count_settings().unwrap();
        assert_eq!(settings.line.y1, 100);
        assert_eq!(settings.line.tolerance, 20);
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(Args::try_parse_from(["vehicle-counter", "serve", "--line", "1,2,3"]).is_err());

        let args =
            Args::try_parse_from(["vehicle-counter", "serve", "--confidence", "1.5"]).unwrap();
        let Command::Serve(serve) = args.command else {
            panic!("expected serve");
        };
        let err = serve.pipeline.count_settings().unwrap_err();
        assert_eq!(err.kind(), "invalid_configuration");
    }
}
