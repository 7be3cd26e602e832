// THEORY:
// Frames can arrive faster than anything renders them, and every one of them
// becomes a decoded resource. The display surface therefore owns exactly one
// `DisplayHandle` at a time and replaces it through an explicit swap:
//
// 1.  **Decode first**: the new frame is decoded before the surface is touched.
//     A frame that fails to decode is dropped and the surface keeps showing the
//     previous one.
// 2.  **Bind, then release**: `DisplaySurface::bind(new)` returns the old handle
//     and the tracker releases it immediately after, on the same call path with
//     no await in between. There is never a moment where the surface points at
//     a released resource (no flash to the offline state) and never a moment
//     where two resources are live after `submit` returns (no leak).
// 3.  **Idempotent release**: the `ResourceStore` forgets a resource once.
//     Releasing an id it no longer holds is a no-op.
//
// Nothing outside the `FrameTracker` can reach the handle. Consumers observe a
// `SurfaceState`, which names the bound handle without owning it.

use std::collections::HashMap;
use std::io::Cursor;

use bytes::Bytes;
use image::{ImageReader, RgbaImage};
use serde::Serialize;
use tracing::trace;

use crate::core_modules::demux::ImageFrame;
use crate::error::Result;

pub type HandleId = u64;

/// Pixel content of a decoded frame.
#[derive(Debug, Clone)]
pub enum FrameContent {
    /// Fully decoded RGBA pixels.
    Rgba(RgbaImage),
    /// The original encoded bytes, for surfaces that decode on their own.
    Encoded(Bytes),
}

#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub content: FrameContent,
}

/// Turns an encoded stream frame into something a surface can show.
pub trait FrameDecoder: Send {
    fn decode(&self, frame: &ImageFrame) -> Result<DecodedFrame>;
}

/// Decodes every frame to RGBA with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RgbaDecoder;

impl FrameDecoder for RgbaDecoder {
    fn decode(&self, frame: &ImageFrame) -> Result<DecodedFrame> {
        let rgba = image::load_from_memory(&frame.data)?.to_rgba8();
        Ok(DecodedFrame {
            width: rgba.width(),
            height: rgba.height(),
            content: FrameContent::Rgba(rgba),
        })
    }
}

/// Reads only the image header and keeps the encoded bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderProbe;

impl FrameDecoder for HeaderProbe {
    fn decode(&self, frame: &ImageFrame) -> Result<DecodedFrame> {
        let (width, height) = ImageReader::new(Cursor::new(&frame.data[..]))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)?
            .into_dimensions()?;
        Ok(DecodedFrame {
            width,
            height,
            content: FrameContent::Encoded(frame.data.clone()),
        })
    }
}

/// The binding between one decoded resource and the surface showing it.
/// Not `Clone`: only the tracker ever holds one.
#[derive(Debug, PartialEq, Eq)]
pub struct DisplayHandle {
    id: HandleId,
    width: u32,
    height: u32,
}

impl DisplayHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }
}

/// What a consumer sees of the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SurfaceState {
    /// No live frame; render the explicit offline presentation.
    #[default]
    Offline,
    Showing { handle: HandleId, width: u32, height: u32 },
}

/// Holds at most one bound handle.
#[derive(Debug, Default)]
pub struct DisplaySurface {
    current: Option<DisplayHandle>,
}

impl DisplaySurface {
    /// Binds `new` and hands back whatever was bound before.
    pub fn bind(&mut self, new: DisplayHandle) -> Option<DisplayHandle> {
        self.current.replace(new)
    }

    pub fn unbind(&mut self) -> Option<DisplayHandle> {
        self.current.take()
    }

    pub fn state(&self) -> SurfaceState {
        match &self.current {
            Some(h) => SurfaceState::Showing {
                handle: h.id,
                width: h.width,
                height: h.height,
            },
            None => SurfaceState::Offline,
        }
    }
}

/// Live decoded resources, keyed by handle id.
#[derive(Debug, Default)]
pub struct ResourceStore {
    live: HashMap<HandleId, DecodedFrame>,
    next_id: HandleId,
    created: u64,
    released: u64,
}

impl ResourceStore {
    fn insert(&mut self, frame: DecodedFrame) -> DisplayHandle {
        let id = self.next_id;
        self.next_id += 1;
        let handle = DisplayHandle {
            id,
            width: frame.width,
            height: frame.height,
        };
        self.live.insert(id, frame);
        self.created += 1;
        handle
    }

    /// Releases a handle's resource. Returns `false` if it was already gone.
    pub fn release(&mut self, handle: DisplayHandle) -> bool {
        self.release_id(handle.id)
    }

    pub fn release_id(&mut self, id: HandleId) -> bool {
        if self.live.remove(&id).is_some() {
            self.released += 1;
            trace!(handle = id, "released display resource");
            true
        } else {
            false
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn released(&self) -> u64 {
        self.released
    }

    fn get(&self, id: HandleId) -> Option<&DecodedFrame> {
        self.live.get(&id)
    }
}

/// Owns the surface, its single handle and the resources behind it.
pub struct FrameTracker<D: FrameDecoder> {
    decoder: D,
    store: ResourceStore,
    surface: DisplaySurface,
}

impl<D: FrameDecoder> FrameTracker<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            store: ResourceStore::default(),
            surface: DisplaySurface::default(),
        }
    }

    /// Decodes `frame`, binds it to the surface and releases the frame it
    /// replaced. On decode failure the surface is left untouched.
    pub fn submit(&mut self, frame: &ImageFrame) -> Result<SurfaceState> {
        let decoded = self.decoder.decode(frame)?;
        let handle = self.store.insert(decoded);
        if let Some(previous) = self.surface.bind(handle) {
            self.store.release(previous);
        }
        Ok(self.surface.state())
    }

    /// Drops the bound frame so the surface shows its offline presentation.
    pub fn go_offline(&mut self) -> SurfaceState {
        if let Some(previous) = self.surface.unbind() {
            self.store.release(previous);
        }
        self.surface.state()
    }

    pub fn state(&self) -> SurfaceState {
        self.surface.state()
    }

    /// Runs `f` against the currently bound frame, if any.
    pub fn with_current<R>(&self, f: impl FnOnce(&DecodedFrame) -> R) -> Option<R> {
        let handle = self.surface.current.as_ref()?;
        self.store.get(handle.id).map(f)
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }
}
