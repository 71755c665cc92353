//! Movie export: numbered PNG frames in a temporary directory, assembled
//! by an external ffmpeg run per output format.

use crate::animation::MovieState;
use crate::rendering::capture::RgbaFrame;
use crate::rendering::RenderError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Output movies are written at no less than this rate.
pub const MIN_OUTPUT_FPS: f64 = 24.0;
pub const MOVIE_LOG: &str = "movie.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovieFormat {
    Avi,
    Wmv,
}

impl MovieFormat {
    pub const ALL: [MovieFormat; 2] = [MovieFormat::Avi, MovieFormat::Wmv];

    pub fn extension(self) -> &'static str {
        match self {
            MovieFormat::Avi => "avi",
            MovieFormat::Wmv => "wmv",
        }
    }

    fn codec_args(self) -> &'static [&'static str] {
        match self {
            MovieFormat::Avi => &["-pix_fmt", "bgr24", "-vcodec", "zlib"],
            MovieFormat::Wmv => &["-pix_fmt", "bgr24", "-b:v", "8192K", "-c", "wmv2"],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MovieError {
    #[error("no movie is being recorded")]
    NoSession,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame write failed: {0}")]
    Frame(#[from] RenderError),
    #[error("could not run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{format} encode failed ({status}); see {log}, frames kept in {frames}")]
    EncoderFailed {
        format: &'static str,
        status: String,
        log: PathBuf,
        frames: PathBuf,
    },
}

/// Records frames while ON and encodes them on stop.
#[derive(Debug)]
pub struct MovieRecorder {
    output_base: PathBuf,
    temp_dir: PathBuf,
    encoder: PathBuf,
    log_path: PathBuf,
    state: MovieState,
    fps: f64,
    frame: u32,
}

impl MovieRecorder {
    /// Prepare a recording that will produce `<output_base>.avi` and `.wmv`.
    pub fn new(output_base: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Result<Self, MovieError> {
        let temp_dir = temp_dir.into();
        std::fs::create_dir_all(&temp_dir)?;
        Ok(Self {
            output_base: output_base.into(),
            temp_dir,
            encoder: PathBuf::from("ffmpeg"),
            log_path: PathBuf::from(MOVIE_LOG),
            state: MovieState::Off,
            fps: MIN_OUTPUT_FPS,
            frame: 0,
        })
    }

    pub fn with_encoder(mut self, encoder: impl Into<PathBuf>) -> Self {
        self.encoder = encoder.into();
        self
    }

    pub fn with_log(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = log_path.into();
        self
    }

    pub fn state(&self) -> MovieState {
        self.state
    }

    pub fn frames_saved(&self) -> u32 {
        self.frame
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn start(&mut self, fps: f64) {
        self.fps = fps;
        self.frame = 0;
        self.state = MovieState::On;
        log::info!("Movie recording started at {:.2} fps into {}", fps, self.temp_dir.display());
    }

    /// Toggle between recording and paused.
    pub fn pause(&mut self) -> MovieState {
        self.state = match self.state {
            MovieState::On => MovieState::Paused,
            MovieState::Paused => MovieState::On,
            MovieState::Off => MovieState::Off,
        };
        self.state
    }

    pub fn frame_path(&self, index: u32) -> PathBuf {
        self.temp_dir.join(format!("frame{:06}.png", index))
    }

    /// Write the next numbered frame.
    pub fn save_frame(&mut self, frame: &RgbaFrame) -> Result<PathBuf, MovieError> {
        if self.state == MovieState::Off {
            return Err(MovieError::NoSession);
        }
        let path = self.frame_path(self.frame);
        frame.save_png(&path)?;
        self.frame += 1;
        Ok(path)
    }

    pub fn output_path(&self, format: MovieFormat) -> PathBuf {
        let mut name = self.output_base.as_os_str().to_owned();
        name.push(".");
        name.push(format.extension());
        PathBuf::from(name)
    }

    /// ffmpeg arguments for one output format.
    pub fn encoder_args(&self, format: MovieFormat) -> Vec<String> {
        let output_fps = self.fps.max(MIN_OUTPUT_FPS);
        let input = self.temp_dir.join("frame%06d.png");
        let mut args: Vec<String> = ["-y", "-nostdin", "-loglevel", "error", "-framerate"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(format!("{}", self.fps));
        args.push("-i".to_string());
        args.push(input.display().to_string());
        args.push("-r".to_string());
        args.push(format!("{}", output_fps.floor()));
        args.extend(format.codec_args().iter().map(|s| s.to_string()));
        args.push(self.output_path(format).display().to_string());
        args
    }

    fn append_log(&self, format: MovieFormat, output: &std::process::Output) -> Result<(), MovieError> {
        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(log, "== {} ({}) ==", self.output_path(format).display(), output.status)?;
        log.write_all(&output.stdout)?;
        log.write_all(&output.stderr)?;
        Ok(())
    }

    /// Stop recording and encode every format. Frames are removed only
    /// when all encodes succeed.
    pub fn stop(&mut self) -> Result<Vec<PathBuf>, MovieError> {
        if self.state == MovieState::Off {
            return Err(MovieError::NoSession);
        }
        self.state = MovieState::Off;
        log::info!(
            "Encoding {} frames, effective {:.2} fps, output {} fps",
            self.frame,
            self.fps,
            self.fps.max(MIN_OUTPUT_FPS).floor()
        );

        let mut written = Vec::new();
        let mut failure = None;
        for format in MovieFormat::ALL {
            let output = Command::new(&self.encoder)
                .args(self.encoder_args(format))
                .output()
                .map_err(|source| MovieError::Spawn {
                    program: self.encoder.display().to_string(),
                    source,
                })?;
            self.append_log(format, &output)?;
            if output.status.success() {
                written.push(self.output_path(format));
            } else if failure.is_none() {
                failure = Some(MovieError::EncoderFailed {
                    format: format.extension(),
                    status: output.status.to_string(),
                    log: self.log_path.clone(),
                    frames: self.temp_dir.clone(),
                });
            }
        }

        if let Some(error) = failure {
            log::error!("{}", error);
            return Err(error);
        }
        std::fs::remove_dir_all(&self.temp_dir)?;
        log::info!("Movie written: {:?}", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("brainstem_movie_{}_{}", std::process::id(), name))
    }

    fn tiny_frame() -> RgbaFrame {
        RgbaFrame {
            width: 1,
            height: 1,
            pixels: vec![10, 20, 30, 255],
        }
    }

    #[test]
    fn test_encoder_args() {
        let dir = temp("args");
        let mut recorder = MovieRecorder::new("/out/spin", &dir).unwrap();
        recorder.start(12.0);
        let args = recorder.encoder_args(MovieFormat::Avi);
        let joined = args.join(" ");
        assert!(joined.starts_with("-y -nostdin -loglevel error -framerate 12 -i "));
        assert!(joined.contains("frame%06d.png -r 24 -pix_fmt bgr24 -vcodec zlib"));
        assert!(joined.ends_with("/out/spin.avi"));

        recorder.start(50.0);
        let wmv = recorder.encoder_args(MovieFormat::Wmv).join(" ");
        assert!(wmv.contains("-r 50 -pix_fmt bgr24 -b:v 8192K -c wmv2"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_frames_numbered_and_pause_toggles() {
        let dir = temp("frames");
        let mut recorder = MovieRecorder::new("clip", &dir).unwrap();
        assert!(matches!(recorder.save_frame(&tiny_frame()), Err(MovieError::NoSession)));

        recorder.start(24.0);
        let first = recorder.save_frame(&tiny_frame()).unwrap();
        let second = recorder.save_frame(&tiny_frame()).unwrap();
        assert!(first.ends_with("frame000000.png"));
        assert!(second.ends_with("frame000001.png"));
        assert!(second.exists());

        assert_eq!(recorder.pause(), MovieState::Paused);
        assert_eq!(recorder.pause(), MovieState::On);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failed_encode_keeps_frames() {
        let dir = temp("fail");
        let log = temp("fail.log");
        let mut recorder = MovieRecorder::new(temp("fail_out"), &dir)
            .unwrap()
            .with_encoder("brainstem-viz-no-such-encoder")
            .with_log(&log);
        recorder.start(24.0);
        recorder.save_frame(&tiny_frame()).unwrap();

        assert!(matches!(recorder.stop(), Err(MovieError::Spawn { .. })));
        assert!(dir.join("frame000000.png").exists());
        assert_eq!(recorder.state(), MovieState::Off);
        let _ = std::fs::remove_dir_all(&dir);
        let _ = std::fs::remove_file(&log);
    }

    #[test]
    fn test_stop_without_session() {
        let dir = temp("idle");
        let mut recorder = MovieRecorder::new("idle", &dir).unwrap();
        assert!(matches!(recorder.stop(), Err(MovieError::NoSession)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
