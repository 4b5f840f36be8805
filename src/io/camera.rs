//! Camera and classifier collaborators
//!
//! The vision model and capture device are external. The orchestrator only
//! needs "give me a frame" and "label this frame"; both can fail.

use crate::domain::types::Label;
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::debug;

/// One captured image, opaque to the sorter
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

pub trait FrameSource: Send {
    /// Try to (re)acquire the capture device
    fn open(&mut self) -> bool;

    fn is_open(&self) -> bool;

    /// `None` is a capture fault; the caller releases and reconnects
    fn read_frame(&mut self) -> Option<Frame>;

    fn release(&mut self);
}

pub trait Classifier: Send {
    fn classify(&mut self, frame: &Frame) -> Option<Label>;
}

/// Camera stand-in with injectable open/read failures
#[derive(Debug, Default)]
pub struct SimCamera {
    open: bool,
    failed_opens: u32,
    failed_reads: u32,
    pub opens: u32,
    pub frames: u64,
}

impl SimCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Camera that starts out connected
    pub fn connected() -> Self {
        Self { open: true, ..Self::default() }
    }

    /// The next `n` open attempts fail
    pub fn fail_opens(mut self, n: u32) -> Self {
        self.failed_opens = n;
        self
    }

    /// The next `n` reads fail
    pub fn fail_reads(mut self, n: u32) -> Self {
        self.failed_reads = n;
        self
    }
}

impl FrameSource for SimCamera {
    fn open(&mut self) -> bool {
        self.opens += 1;
        if self.failed_opens > 0 {
            self.failed_opens -= 1;
            return false;
        }
        self.open = true;
        true
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read_frame(&mut self) -> Option<Frame> {
        if !self.open {
            return None;
        }
        if self.failed_reads > 0 {
            self.failed_reads -= 1;
            return None;
        }
        self.frames += 1;
        Some(Frame { width: 640, height: 480, data: Bytes::new() })
    }

    fn release(&mut self) {
        self.open = false;
    }
}

/// Classifier replaying a fixed label sequence
///
/// `once` stops after the script runs out (returns `None`), `cycling`
/// starts over.
#[derive(Debug, Clone)]
pub struct ScriptedClassifier {
    script: VecDeque<Option<String>>,
    cycle: bool,
}

impl ScriptedClassifier {
    pub fn once<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self { script: labels.into_iter().map(|l| l.map(Into::into)).collect(), cycle: false }
    }

    pub fn cycling<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { script: labels.into_iter().map(|l| Some(l.into())).collect(), cycle: true }
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&mut self, _frame: &Frame) -> Option<Label> {
        let next = self.script.pop_front()?;
        if self.cycle {
            self.script.push_back(next.clone());
        }
        debug!(label = ?next, "classified");
        next.map(Label)
    }
}
