//! Gain Automation
//!
//! Timed gain changes on a device gain node: jump to a value at a time,
//! or ramp linearly to a value by a time. An immediate `set_value`
//! cancels everything scheduled on that parameter.

/// One scheduled change on a [`GainParam`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationEvent {
    /// Jump to `value` at `time`
    SetValue { time: f64, value: f32 },
    /// Ramp linearly from the previous event to `value`, arriving at `time`
    LinearRamp { time: f64, value: f32 },
}

impl AutomationEvent {
    /// Device time of the event
    pub fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. } | AutomationEvent::LinearRamp { time, .. } => {
                time
            }
        }
    }

    /// Value reached at the event time
    pub fn value(&self) -> f32 {
        match *self {
            AutomationEvent::SetValue { value, .. } | AutomationEvent::LinearRamp { value, .. } => {
                value
            }
        }
    }
}

/// Automatable linear gain
#[derive(Debug, Clone, PartialEq)]
pub struct GainParam {
    value: f32,
    events: Vec<AutomationEvent>,
}

impl Default for GainParam {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl GainParam {
    /// Create a parameter holding `value` with no automation
    pub fn new(value: f32) -> Self {
        Self {
            value,
            events: Vec::new(),
        }
    }

    /// Set the value immediately, dropping any scheduled events
    pub fn set_value(&mut self, value: f32) {
        self.value = value;
        self.events.clear();
    }

    /// Jump to `value` at device time `time`
    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(AutomationEvent::SetValue { time, value });
    }

    /// Ramp linearly to `value`, arriving at device time `time`
    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(AutomationEvent::LinearRamp { time, value });
    }

    /// Drop every event at or after `time`
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|event| event.time() < time);
    }

    /// Scheduled events, in time order
    pub fn events(&self) -> &[AutomationEvent] {
        &self.events
    }

    /// Parameter value at device time `time`
    pub fn value_at(&self, time: f64) -> f32 {
        let mut value = self.value;
        let mut previous_time = 0.0;

        for event in &self.events {
            if event.time() <= time {
                value = event.value();
                previous_time = event.time();
                continue;
            }
            if let AutomationEvent::LinearRamp {
                time: end,
                value: target,
            } = *event
            {
                let span = end - previous_time;
                if span <= 0.0 {
                    return target;
                }
                let progress = ((time - previous_time) / span).clamp(0.0, 1.0) as f32;
                return value + (target - value) * progress;
            }
            break;
        }

        value
    }

    fn insert(&mut self, event: AutomationEvent) {
        if !event.time().is_finite() || !event.value().is_finite() {
            return;
        }
        // Events at the same time keep insertion order
        let index = self
            .events
            .iter()
            .position(|existing| existing.time() > event.time())
            .unwrap_or(self.events.len());
        self.events.insert(index, event);
    }
}
