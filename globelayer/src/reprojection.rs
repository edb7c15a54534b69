//! Deferred reprojection of Web Mercator textures to geographic.
//!
//! Reprojection is GPU work the host performs between frames. The layer
//! enqueues a [`ReprojectionCommand`] when a tile's native texture is loaded
//! and a geographic texture is needed; the host drains the queue, runs the
//! commands and reports each [`ReprojectionOutcome`] back to the layer.
//!
//! Each pending command holds its own reference on the imagery so the tile
//! cannot be freed underneath it. At most one command is pending per imagery.

use std::collections::{HashSet, VecDeque};

use crate::geometry::Rectangle;
use crate::imagery::ImageryHandle;
use crate::texture::TextureHandle;

/// One unit of reprojection work.
#[derive(Debug, Clone, PartialEq)]
pub struct ReprojectionCommand {
    handle: ImageryHandle,
    source: TextureHandle,
    rectangle: Rectangle,
}

impl ReprojectionCommand {
    pub fn new(handle: ImageryHandle, source: TextureHandle, rectangle: Rectangle) -> Self {
        Self {
            handle,
            source,
            rectangle,
        }
    }

    /// Imagery the output belongs to.
    pub fn handle(&self) -> ImageryHandle {
        self.handle
    }

    /// Native Web Mercator texture to resample.
    pub fn source(&self) -> TextureHandle {
        self.source
    }

    /// Geodetic rectangle covered by the texture.
    pub fn rectangle(&self) -> Rectangle {
        self.rectangle
    }
}

/// How a reprojection command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprojectionOutcome {
    /// The reprojected geographic texture.
    Completed(TextureHandle),
    Cancelled,
}

/// Queue of reprojection commands for one layer.
#[derive(Debug, Default)]
pub struct ReprojectionScheduler {
    queued: VecDeque<ReprojectionCommand>,
    outstanding: HashSet<ImageryHandle>,
}

impl ReprojectionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command. Returns false if one is already pending for the
    /// same imagery.
    pub fn enqueue(&mut self, command: ReprojectionCommand) -> bool {
        if !self.outstanding.insert(command.handle) {
            return false;
        }
        self.queued.push_back(command);
        true
    }

    /// Whether a command is queued or being executed for `handle`.
    pub fn is_pending(&self, handle: ImageryHandle) -> bool {
        self.outstanding.contains(&handle)
    }

    /// Hand queued commands to the host. They stay pending until finished.
    pub fn take_queued(&mut self) -> Vec<ReprojectionCommand> {
        self.queued.drain(..).collect()
    }

    /// Mark the command for `handle` finished. Returns false if none was
    /// pending.
    pub fn finish(&mut self, handle: ImageryHandle) -> bool {
        self.outstanding.remove(&handle)
    }

    /// Number of pending commands, queued or handed out.
    pub fn pending(&self) -> usize {
        self.outstanding.len()
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }
}
