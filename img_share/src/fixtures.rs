//! Test fixtures: in-memory images and a scripted external encoder.

use crate::animated_image::{EncoderCommand, ExternalEncoder};
use crate::cancel::CancelToken;
use image::codecs::gif::GifEncoder;
use image::{DynamicImage, Frame, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use shared_utils::{Result, ShareError};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::{Duration, Instant};

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

pub fn encoded_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(gradient(width, height))
        .write_to(&mut buf, format)
        .unwrap();
    buf.into_inner()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encoded_bytes(width, height, ImageFormat::Png)
}

pub fn gif_bytes(width: u32, height: u32, frames: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        let frames = (0..frames).map(|i| {
            let shade = (i * 60 % 256) as u8;
            Frame::new(RgbaImage::from_pixel(width, height, Rgba([shade, 0, 255 - shade, 255])))
        });
        encoder.encode_frames(frames).unwrap();
    }
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Write a small non-empty output and report success.
    Succeed,
    /// Report success without writing anything.
    SucceedEmpty,
    /// Report a nonzero exit.
    Fail,
    /// Report cancellation.
    Cancel,
    /// Block until the token fires, then report cancellation.
    WaitForCancel,
}

/// Plays back one [`Step`] per call; an exhausted script fails.
pub struct ScriptedEncoder {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<EncoderCommand>>,
}

impl ScriptedEncoder {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<EncoderCommand> {
        self.calls.lock().unwrap().clone()
    }
}

impl ExternalEncoder for ScriptedEncoder {
    fn name(&self) -> &str {
        "scripted"
    }

    fn run(&self, command: &EncoderCommand, cancel: &CancelToken) -> Result<()> {
        self.calls.lock().unwrap().push(command.clone());
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Fail);
        match step {
            Step::Succeed => {
                std::fs::write(&command.output, b"GIF89a-scripted")?;
                Ok(())
            }
            Step::SucceedEmpty => Ok(()),
            Step::Fail => Err(ShareError::ExternalEncoder("exit status: 1".to_string())),
            Step::Cancel => Err(ShareError::Cancelled),
            Step::WaitForCancel => {
                let deadline = Instant::now() + Duration::from_secs(10);
                while !cancel.is_cancelled() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(ShareError::Cancelled)
            }
        }
    }
}
