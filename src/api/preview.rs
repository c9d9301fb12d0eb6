//! MJPEG preview of a camera feed.
//!
//! Opens its own capture handle (independent of the site's supervisor), encodes
//! every `FRAME_STRIDE`-th frame as JPEG at preview size, and writes the parts as
//! `multipart/x-mixed-replace` until the client goes away, the source fails, or
//! the frame budget is spent.

use anyhow::{Context, Result};
use image::{imageops, DynamicImage, GrayImage, ImageFormat};
use std::io::{Cursor, Write};

use crate::frame::LumaFrame;
use crate::ingest::SourceOpener;

pub const PREVIEW_WIDTH: u32 = 640;
pub const PREVIEW_HEIGHT: u32 = 480;
pub const FRAME_STRIDE: u64 = 4;
pub const MAX_PREVIEW_FRAMES: usize = 600;

const BOUNDARY: &str = "frame";

pub fn encode_jpeg(frame: &LumaFrame) -> Result<Vec<u8>> {
    let image = GrayImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
        .context("frame buffer does not match its dimensions")?;
    let resized = imageops::resize(
        &image,
        PREVIEW_WIDTH,
        PREVIEW_HEIGHT,
        imageops::FilterType::Triangle,
    );
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(resized)
        .write_to(&mut out, ImageFormat::Jpeg)
        .context("encode preview jpeg")?;
    Ok(out.into_inner())
}

/// Streams up to `max_frames` JPEG parts. Returns how many were sent.
pub fn stream<W: Write>(
    out: &mut W,
    opener: &dyn SourceOpener,
    identifier: &str,
    max_frames: usize,
) -> Result<usize> {
    let mut source = opener.open(identifier)?;
    write!(
        out,
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        BOUNDARY
    )?;

    let mut read: u64 = 0;
    let mut sent = 0;
    while sent < max_frames {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::info!("preview of {} ended: {:#}", identifier, e);
                break;
            }
        };
        read += 1;
        if read % FRAME_STRIDE != 0 {
            continue;
        }
        let jpeg = encode_jpeg(&frame)?;
        let part = write!(
            out,
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            BOUNDARY,
            jpeg.len()
        )
        .and_then(|_| out.write_all(&jpeg))
        .and_then(|_| out.write_all(b"\r\n"))
        .and_then(|_| out.flush());
        if part.is_err() {
            // Client disconnected.
            break;
        }
        sent += 1;
    }
    source.release();
    Ok(sent)
}
