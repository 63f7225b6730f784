//! Audio Output Device
//!
//! The scheduler talks to sound hardware only through [`AudioOutputDevice`]:
//! buffer sources with a start time, read offset, optional loop region and
//! stop time, gain nodes with automatable gain, and one-way routing to the
//! device destination. Times are in seconds on the device's own clock.
//!
//! [`SoftwareDevice`] is a pull-model implementation: every call to
//! [`SoftwareDevice::render`] advances its clock and mixes whatever the
//! graph says is audible. It backs offline previews and tests; a platform
//! backend implements the same trait over a real output stream.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use super::automation::GainParam;
use super::buffer::{AudioBuffer, ChannelLayout, DEFAULT_SAMPLE_RATE};

/// Errors raised by an output device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Unknown audio node {0}")]
    UnknownNode(u64),

    #[error("Audio node {0} is not a buffer source")]
    NotASource(u64),

    #[error("Audio node {0} is not a gain node")]
    NotAGain(u64),

    #[error("Buffer source {0} was already started")]
    AlreadyStarted(u64),

    #[error("Invalid timing: {0}")]
    InvalidTiming(String),

    #[error("Device rejected the request: {0}")]
    Rejected(String),
}

/// Handle to a node in the device graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Raw numeric id
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The device output every audible chain ends at
pub const DESTINATION: NodeId = NodeId(0);

/// Trait for audio output backends
pub trait AudioOutputDevice {
    /// Device sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Current device clock time in seconds
    fn current_time(&self) -> f64;

    /// Whether the device clock is halted
    fn is_suspended(&self) -> bool;

    /// Start (or restart) the device clock
    fn resume(&mut self) -> Result<(), DeviceError>;

    /// Final output node
    fn destination(&self) -> NodeId {
        DESTINATION
    }

    /// Create a one-shot source playing `buffer`
    fn create_source(&mut self, buffer: Arc<AudioBuffer>) -> Result<NodeId, DeviceError>;

    /// Create a gain node at unity gain
    fn create_gain(&mut self) -> Result<NodeId, DeviceError>;

    /// Route the output of `from` into `to`
    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), DeviceError>;

    /// Make a source wrap between `loop_start` and `loop_end` (seconds into its buffer)
    fn set_loop(&mut self, source: NodeId, loop_start: f64, loop_end: f64)
        -> Result<(), DeviceError>;

    /// Start a source at device time `when`, reading from `offset` seconds into its buffer
    fn start_source(&mut self, source: NodeId, when: f64, offset: f64) -> Result<(), DeviceError>;

    /// Stop a source at device time `when`
    fn stop_source(&mut self, source: NodeId, when: f64) -> Result<(), DeviceError>;

    /// Set a gain immediately, cancelling its scheduled automation
    fn set_gain(&mut self, gain: NodeId, value: f32) -> Result<(), DeviceError>;

    /// Jump a gain to `value` at device time `time`
    fn set_gain_at(&mut self, gain: NodeId, value: f32, time: f64) -> Result<(), DeviceError>;

    /// Ramp a gain linearly to `value`, arriving at device time `time`
    fn ramp_gain_to(&mut self, gain: NodeId, value: f32, time: f64) -> Result<(), DeviceError>;

    /// Disconnect and forget a node
    fn release(&mut self, node: NodeId);
}

// ============================================================================
// Software implementation
// ============================================================================

/// Snapshot of how a buffer source is programmed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSchedule {
    /// Device time the source starts, once started
    pub start_at: Option<f64>,
    /// Read offset into the buffer at start (seconds)
    pub offset: f64,
    /// Device time the source stops, if scheduled
    pub stop_at: Option<f64>,
    /// Loop region within the buffer (seconds)
    pub loop_region: Option<(f64, f64)>,
}

#[derive(Debug)]
struct SourceNode {
    buffer: Arc<AudioBuffer>,
    start_at: Option<f64>,
    offset: f64,
    stop_at: Option<f64>,
    loop_region: Option<(f64, f64)>,
}

impl SourceNode {
    /// Buffer read position (seconds) after `elapsed` seconds of play
    fn read_position(&self, elapsed: f64) -> Option<f64> {
        let position = self.offset + elapsed;
        match self.loop_region {
            Some((start, end)) if end > start => {
                if position < end {
                    Some(position)
                } else {
                    Some(start + (position - start) % (end - start))
                }
            }
            _ => (position < self.buffer.duration_secs()).then_some(position),
        }
    }

    fn schedule(&self) -> SourceSchedule {
        SourceSchedule {
            start_at: self.start_at,
            offset: self.offset,
            stop_at: self.stop_at,
            loop_region: self.loop_region,
        }
    }
}

#[derive(Debug)]
enum Node {
    Source(SourceNode),
    Gain(GainParam),
}

/// Pull-model software mixer implementing [`AudioOutputDevice`]
///
/// Starts suspended at time 0. Each node feeds at most one downstream
/// node; connecting again replaces the previous route.
///
/// # Example
/// ```
/// use layerdeck::engine::{AudioOutputDevice, SoftwareDevice};
/// let mut device = SoftwareDevice::new(48000);
/// assert!(device.is_suspended());
/// device.resume().unwrap();
/// let block = device.render(480);
/// assert_eq!(block.len(), 480);
/// assert!((device.current_time() - 0.01).abs() < 1e-9);
/// ```
#[derive(Debug)]
pub struct SoftwareDevice {
    sample_rate: u32,
    frames_rendered: u64,
    suspended: bool,
    next_id: u64,
    nodes: HashMap<NodeId, Node>,
    routes: HashMap<NodeId, NodeId>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl SoftwareDevice {
    /// Create a suspended device at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames_rendered: 0,
            suspended: true,
            next_id: 1,
            nodes: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    /// Halt the device clock
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Total frames rendered since creation
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Number of live buffer sources
    pub fn source_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|node| matches!(node, Node::Source(_)))
            .count()
    }

    /// Number of live nodes of any kind
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// How a source is currently programmed
    pub fn source_schedule(&self, source: NodeId) -> Option<SourceSchedule> {
        match self.nodes.get(&source) {
            Some(Node::Source(node)) => Some(node.schedule()),
            _ => None,
        }
    }

    /// Value of a gain node at device time `time`
    pub fn gain_value_at(&self, gain: NodeId, time: f64) -> Option<f32> {
        match self.nodes.get(&gain) {
            Some(Node::Gain(param)) => Some(param.value_at(time)),
            _ => None,
        }
    }

    /// Render `frames` stereo frames and advance the clock
    ///
    /// A suspended device returns silence and keeps its clock where it is.
    /// Output is clamped to [-1, 1].
    pub fn render(&mut self, frames: usize) -> AudioBuffer {
        let mut output = AudioBuffer::new(frames, ChannelLayout::Stereo, self.sample_rate);
        if self.suspended || frames == 0 {
            return output;
        }

        let rate = self.sample_rate as f64;
        let first_frame = self.frames_rendered;

        for (&id, node) in &self.nodes {
            let Node::Source(source) = node else {
                continue;
            };
            let Some(start_at) = source.start_at else {
                continue;
            };
            let Some(gains) = self.route_gains(id) else {
                continue;
            };
            let buffer_rate = source.buffer.sample_rate as f64;

            for i in 0..frames {
                let time = (first_frame + i as u64) as f64 / rate;
                if time < start_at {
                    continue;
                }
                if source.stop_at.is_some_and(|stop| time >= stop) {
                    break;
                }
                let Some(position) = source.read_position(time - start_at) else {
                    break;
                };
                let (left, right) = source.buffer.frame_at(position * buffer_rate);
                let gain: f32 = gains
                    .iter()
                    .filter_map(|g| match self.nodes.get(g) {
                        Some(Node::Gain(param)) => Some(param.value_at(time)),
                        _ => None,
                    })
                    .product();
                output.samples[0][i] += left * gain;
                output.samples[1][i] += right * gain;
            }
        }

        output.clamp();
        self.frames_rendered += frames as u64;
        trace!(frames, time = self.current_time(), "rendered block");
        output
    }

    /// Gain nodes between `source` and the destination, or `None` if unrouted
    fn route_gains(&self, source: NodeId) -> Option<Vec<NodeId>> {
        let mut gains = Vec::new();
        let mut current = source;
        for _ in 0..=self.nodes.len() {
            let next = *self.routes.get(&current)?;
            if next == DESTINATION {
                return Some(gains);
            }
            match self.nodes.get(&next)? {
                Node::Gain(_) => gains.push(next),
                Node::Source(_) => return None,
            }
            current = next;
        }
        // Cycle in the graph
        None
    }

    fn allocate(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    fn source_mut(&mut self, id: NodeId) -> Result<&mut SourceNode, DeviceError> {
        match self.nodes.get_mut(&id) {
            Some(Node::Source(source)) => Ok(source),
            Some(Node::Gain(_)) => Err(DeviceError::NotASource(id.0)),
            None => Err(DeviceError::UnknownNode(id.0)),
        }
    }

    fn gain_mut(&mut self, id: NodeId) -> Result<&mut GainParam, DeviceError> {
        match self.nodes.get_mut(&id) {
            Some(Node::Gain(param)) => Ok(param),
            Some(Node::Source(_)) => Err(DeviceError::NotAGain(id.0)),
            None => Err(DeviceError::UnknownNode(id.0)),
        }
    }
}

fn check_time(what: &str, value: f64) -> Result<(), DeviceError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DeviceError::InvalidTiming(format!("{what} must be finite and >= 0, got {value}")))
    }
}

impl AudioOutputDevice for SoftwareDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        if self.suspended {
            self.suspended = false;
            debug!(time = self.current_time(), "software device resumed");
        }
        Ok(())
    }

    fn create_source(&mut self, buffer: Arc<AudioBuffer>) -> Result<NodeId, DeviceError> {
        if buffer.sample_rate == 0 || buffer.channels() == 0 {
            return Err(DeviceError::Rejected("buffer has no audio".to_string()));
        }
        Ok(self.allocate(Node::Source(SourceNode {
            buffer,
            start_at: None,
            offset: 0.0,
            stop_at: None,
            loop_region: None,
        })))
    }

    fn create_gain(&mut self) -> Result<NodeId, DeviceError> {
        Ok(self.allocate(Node::Gain(GainParam::default())))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), DeviceError> {
        if !self.nodes.contains_key(&from) {
            return Err(DeviceError::UnknownNode(from.0));
        }
        if to != DESTINATION && !self.nodes.contains_key(&to) {
            return Err(DeviceError::UnknownNode(to.0));
        }
        if from == to {
            return Err(DeviceError::Rejected("cannot connect a node to itself".to_string()));
        }
        self.routes.insert(from, to);
        Ok(())
    }

    fn set_loop(
        &mut self,
        source: NodeId,
        loop_start: f64,
        loop_end: f64,
    ) -> Result<(), DeviceError> {
        check_time("loop start", loop_start)?;
        check_time("loop end", loop_end)?;
        if loop_end <= loop_start {
            return Err(DeviceError::InvalidTiming(format!(
                "loop end {loop_end} must be after loop start {loop_start}"
            )));
        }
        self.source_mut(source)?.loop_region = Some((loop_start, loop_end));
        Ok(())
    }

    fn start_source(&mut self, source: NodeId, when: f64, offset: f64) -> Result<(), DeviceError> {
        check_time("start time", when)?;
        check_time("offset", offset)?;
        let node = self.source_mut(source)?;
        if node.start_at.is_some() {
            return Err(DeviceError::AlreadyStarted(source.0));
        }
        if offset > node.buffer.duration_secs() {
            return Err(DeviceError::InvalidTiming(format!(
                "offset {offset} is past the end of the buffer"
            )));
        }
        node.start_at = Some(when);
        node.offset = offset;
        Ok(())
    }

    fn stop_source(&mut self, source: NodeId, when: f64) -> Result<(), DeviceError> {
        check_time("stop time", when)?;
        self.source_mut(source)?.stop_at = Some(when);
        Ok(())
    }

    fn set_gain(&mut self, gain: NodeId, value: f32) -> Result<(), DeviceError> {
        self.gain_mut(gain)?.set_value(value);
        Ok(())
    }

    fn set_gain_at(&mut self, gain: NodeId, value: f32, time: f64) -> Result<(), DeviceError> {
        check_time("automation time", time)?;
        self.gain_mut(gain)?.set_value_at_time(value, time);
        Ok(())
    }

    fn ramp_gain_to(&mut self, gain: NodeId, value: f32, time: f64) -> Result<(), DeviceError> {
        check_time("automation time", time)?;
        self.gain_mut(gain)?.linear_ramp_to_value_at_time(value, time);
        Ok(())
    }

    fn release(&mut self, node: NodeId) {
        self.nodes.remove(&node);
        self.routes.remove(&node);
        self.routes.retain(|_, to| *to != node);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
