//! FFmpeg invocation for the picture-in-picture composite

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::{OverlayConfig, ToolConfig};

/// Everything needed to composite one unit
#[derive(Debug, Clone)]
pub struct OverlayJob {
    pub unit_id: String,
    pub background: PathBuf,
    pub overlay: PathBuf,
    pub output: PathBuf,
    /// Background duration in seconds
    pub total_duration: f64,
}

/// Build the `-filter_complex` graph.
///
/// Input 0 is the background, input 1 the overlay. The overlay is scaled to a
/// square whose edge is `scale_ratio` of the background width, optionally cut
/// to a circle, then placed `margin_right`/`margin_top` pixels in from the
/// top-right corner.
pub fn build_filter_graph(config: &OverlayConfig) -> String {
    let mut graph = format!(
        "[1:v][0:v]scale2ref=w=rw*{ratio}:h=rw*{ratio}[ovrl][base];",
        ratio = config.scale_ratio
    );

    let overlay_label = if config.circular_mask {
        graph.push_str(
            "[ovrl]format=rgba,\
             geq=a='if(gt(pow(X-(W/2),2)+pow(Y-(H/2),2),(W/2)*(W/2)),0,255)':\
             r='r(X,Y)':g='g(X,Y)':b='b(X,Y)'[circ];",
        );
        "circ"
    } else {
        "ovrl"
    };

    graph.push_str(&format!(
        "[base][{}]overlay=main_w-overlay_w-{}:{}",
        overlay_label, config.margin_right, config.margin_top
    ));
    if config.end_with_shortest {
        graph.push_str(":shortest=1");
    }

    graph
}

/// Arguments for `ffmpeg`, excluding the program itself
pub fn build_ffmpeg_args(job: &OverlayJob, tools: &ToolConfig, overlay: &OverlayConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into()];

    if let Some(ref accel) = tools.hwaccel {
        args.push("-hwaccel".into());
        args.push(accel.into());
    }

    args.push("-i".into());
    args.push(job.background.clone().into());
    args.push("-i".into());
    args.push(job.overlay.clone().into());
    args.push("-filter_complex".into());
    args.push(build_filter_graph(overlay).into());
    args.push("-c:v".into());
    args.push(tools.video_codec.clone().into());
    args.push("-c:a".into());
    args.push("copy".into());
    args.push("-progress".into());
    args.push("pipe:1".into());
    args.push("-nostats".into());
    args.push(job.output.clone().into());

    args
}

/// Arguments for `ffprobe` printing only the container duration
pub fn build_probe_args(input: &Path) -> Vec<OsString> {
    vec![
        "-v".into(),
        "error".into(),
        "-show_entries".into(),
        "format=duration".into(),
        "-of".into(),
        "default=noprint_wrappers=1:nokey=1".into(),
        input.as_os_str().to_owned(),
    ]
}

/// Shell-like rendering of a command line, for logs and dry runs
pub fn render_command(program: &Path, args: &[OsString]) -> String {
    let mut rendered = quote(&program.to_string_lossy());
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&quote(&arg.to_string_lossy()));
    }
    rendered
}

fn quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:=".contains(c)) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> OverlayJob {
        OverlayJob {
            unit_id: "1-Alice".to_string(),
            background: PathBuf::from("/in/1-Alice/Screen Recording/rec.mov"),
            overlay: PathBuf::from("/in/1-Alice/HeyGen Video/avatar.mp4"),
            output: PathBuf::from("/Final Video/1-Alice.mp4"),
            total_duration: 60.0,
        }
    }

    #[test]
    fn test_default_filter_graph() {
        let graph = build_filter_graph(&OverlayConfig::default());
        assert!(graph.starts_with("[1:v][0:v]scale2ref=w=rw*0.14:h=rw*0.14[ovrl][base];"));
        assert!(graph.contains("geq=a='if(gt(pow(X-(W/2),2)+pow(Y-(H/2),2),(W/2)*(W/2)),0,255)'"));
        assert!(graph.ends_with("[base][circ]overlay=main_w-overlay_w-543:270:shortest=1"));
    }

    #[test]
    fn test_filter_graph_without_mask() {
        let config = OverlayConfig {
            circular_mask: false,
            end_with_shortest: false,
            margin_right: 20,
            margin_top: 20,
            ..OverlayConfig::default()
        };
        let graph = build_filter_graph(&config);
        assert!(!graph.contains("geq"));
        assert!(graph.ends_with("[base][ovrl]overlay=main_w-overlay_w-20:20"));
    }

    #[test]
    fn test_ffmpeg_args_order() {
        let tools = ToolConfig {
            hwaccel: Some("videotoolbox".to_string()),
            video_codec: "h264_videotoolbox".to_string(),
            ..ToolConfig::default()
        };
        let args = build_ffmpeg_args(&job(), &tools, &OverlayConfig::default());
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();

        assert_eq!(&args[..3], ["-y", "-hwaccel", "videotoolbox"]);
        assert_eq!(args[3], "-i");
        assert!(args[4].ends_with("rec.mov"));
        assert_eq!(args[5], "-i");
        assert!(args[6].ends_with("avatar.mp4"));

        let progress = args.iter().position(|a| a == "-progress").unwrap();
        assert_eq!(args[progress + 1], "pipe:1");
        assert_eq!(args.last().unwrap(), "/Final Video/1-Alice.mp4");
    }

    #[test]
    fn test_ffmpeg_args_without_hwaccel() {
        let tools = ToolConfig {
            hwaccel: None,
            ..ToolConfig::default()
        };
        let args = build_ffmpeg_args(&job(), &tools, &OverlayConfig::default());
        assert!(!args.iter().any(|a| a == "-hwaccel"));
        assert_eq!(args[1], "-i");
    }

    #[test]
    fn test_render_command_quotes_spaces() {
        let rendered = render_command(
            Path::new("ffprobe"),
            &build_probe_args(Path::new("/in/Screen Recording/it's.mov")),
        );
        assert_eq!(
            rendered,
            "ffprobe -v error -show_entries format=duration -of default=noprint_wrappers=1:nokey=1 '/in/Screen Recording/it'\\''s.mov'"
        );
    }
}
