//! Frame sources: external camera tools streaming raw frames, or a replay directory.
//!
//! Live cameras are read through a child process writing raw frames to its
//! stdout (`ffmpeg` for V4L2 devices, `rpicam-vid` for the board camera).
//! The child is killed and reaped when the source is dropped.

use crate::config::CaptureMethod;
use log::{debug, info, warn};
use precland_core::GrayImage;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Instant;

/// One grayscale frame and the moment it was read.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: GrayImage,
    pub captured_at: Instant,
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureOpenError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{0}` has no stdout pipe")]
    NoStdout(String),
    #[error("invalid capture size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("cannot read replay directory {path}: {source}")]
    ReplayDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("replay directory {0} holds no images")]
    EmptyReplay(PathBuf),
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("frame read failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    /// A finite source has no more frames.
    #[error("frame source exhausted")]
    Exhausted,
}

/// Anything that yields grayscale frames, one at a time.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
    fn describe(&self) -> String;
}

/// Raw frame layout written by the capture child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// 8-bit luma only.
    Gray,
    /// Planar YUV 4:2:0; the chroma planes are read and discarded.
    Yuv420,
}

impl PixelLayout {
    fn trailing_bytes(self, width: usize, height: usize) -> usize {
        match self {
            PixelLayout::Gray => 0,
            PixelLayout::Yuv420 => 2 * width.div_ceil(2) * height.div_ceil(2),
        }
    }
}

/// Camera read through a child process writing raw frames to stdout.
pub struct SubprocessSource {
    program: String,
    child: Child,
    stdout: ChildStdout,
    width: usize,
    height: usize,
    layout: PixelLayout,
    scratch: Vec<u8>,
}

impl SubprocessSource {
    /// Start `command` with stdout piped; stderr is discarded.
    pub fn spawn(
        mut command: Command,
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<Self, CaptureOpenError> {
        if width == 0 || height == 0 {
            return Err(CaptureOpenError::InvalidSize { width, height });
        }
        let program = command.get_program().to_string_lossy().into_owned();
        debug!("spawning {command:?}");
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| CaptureOpenError::Spawn {
                program: program.clone(),
                source,
            })?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CaptureOpenError::NoStdout(program));
        };
        let (width, height) = (width as usize, height as usize);
        Ok(Self {
            program,
            child,
            stdout,
            width,
            height,
            layout,
            scratch: vec![0; layout.trailing_bytes(width, height)],
        })
    }

    /// V4L2 device through `ffmpeg`, converted to 8-bit gray.
    pub fn generic(device: &str, width: u32, height: u32) -> Result<Self, CaptureOpenError> {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-f", "v4l2"])
            .args(["-video_size", &format!("{width}x{height}")])
            .args(["-i", device])
            .args(["-f", "rawvideo", "-pix_fmt", "gray", "-"]);
        Self::spawn(cmd, width, height, PixelLayout::Gray)
    }

    /// Raspberry Pi board camera through `rpicam-vid`, raw YUV420.
    ///
    /// `rpicam-vid` pads rows to its own stride; pick a width that is a
    /// multiple of 64 so the stream is tightly packed.
    pub fn board_camera(width: u32, height: u32) -> Result<Self, CaptureOpenError> {
        if width % 64 != 0 {
            warn!("board camera width {width} is not a multiple of 64; frames may be skewed");
        }
        let mut cmd = Command::new("rpicam-vid");
        cmd.args(["-t", "0", "-n", "--codec", "yuv420"])
            .args(["--width", &width.to_string(), "--height", &height.to_string()])
            .args(["-o", "-"]);
        Self::spawn(cmd, width, height, PixelLayout::Yuv420)
    }
}

impl FrameSource for SubprocessSource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let mut data = vec![0u8; self.width * self.height];
        self.stdout.read_exact(&mut data)?;
        let captured_at = Instant::now();
        if !self.scratch.is_empty() {
            self.stdout.read_exact(&mut self.scratch)?;
        }
        Ok(Frame {
            image: GrayImage {
                width: self.width,
                height: self.height,
                data,
            },
            captured_at,
        })
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}x{} {:?})",
            self.program, self.width, self.height, self.layout
        )
    }
}

impl Drop for SubprocessSource {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("{}: kill failed: {e}", self.program);
        }
        match self.child.wait() {
            Ok(status) => debug!("{} exited: {status}", self.program),
            Err(e) => warn!("{}: wait failed: {e}", self.program),
        }
    }
}

const REPLAY_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "pgm", "pnm", "tif", "tiff"];

/// Still images from a directory, in file name order, each read once.
#[derive(Debug)]
pub struct ReplaySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ReplaySource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CaptureOpenError> {
        let dir = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&dir).map_err(|source| CaptureOpenError::ReplayDir {
            path: dir.clone(),
            source,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| CaptureOpenError::ReplayDir {
                    path: dir.clone(),
                    source,
                })?
                .path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| REPLAY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(CaptureOpenError::EmptyReplay(dir));
        }
        files.sort();
        info!("replaying {} images from {}", files.len(), dir.display());
        Ok(Self {
            dir,
            files,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let path = self.files.get(self.next).ok_or(CaptureError::Exhausted)?;
        self.next += 1;
        let decoded = image::open(path)
            .map_err(|source| CaptureError::Decode {
                path: path.clone(),
                source,
            })?
            .to_luma8();
        Ok(Frame {
            image: GrayImage {
                width: decoded.width() as usize,
                height: decoded.height() as usize,
                data: decoded.into_raw(),
            },
            captured_at: Instant::now(),
        })
    }

    fn describe(&self) -> String {
        format!("replay {}", self.dir.display())
    }
}

/// Open the source selected in the calibration file.
pub fn open_frame_source(
    method: &CaptureMethod,
    width: u32,
    height: u32,
) -> Result<Box<dyn FrameSource>, CaptureOpenError> {
    let source: Box<dyn FrameSource> = match method {
        CaptureMethod::Generic { device } => {
            Box::new(SubprocessSource::generic(device, width, height)?)
        }
        CaptureMethod::BoardCamera => Box::new(SubprocessSource::board_camera(width, height)?),
        CaptureMethod::Replay { dir } => Box::new(ReplaySource::open(dir)?),
    };
    info!("frame source: {}", source.describe());
    Ok(source)
}
