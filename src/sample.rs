use std::collections::BTreeSet;

use parking_lot::Mutex;

/// One typed field value inside a trace sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Str(String),
    Int(i64),
    Set(BTreeSet<String>),
}

/// One structured trace record describing the state of a read stream.
///
/// Serialization is the sink's concern; this is just an ordered list of
/// named, typed fields.
#[derive(Debug, Clone, Default)]
pub struct TraceSample {
    fields: Vec<(&'static str, SampleValue)>,
}

impl TraceSample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_string(&mut self, name: &'static str, value: impl Into<String>) {
        self.fields.push((name, SampleValue::Str(value.into())));
    }

    pub fn add_int(&mut self, name: &'static str, value: i64) {
        self.fields.push((name, SampleValue::Int(value)));
    }

    pub fn add_set(&mut self, name: &'static str, value: BTreeSet<String>) {
        self.fields.push((name, SampleValue::Set(value)));
    }

    pub fn get(&self, name: &str) -> Option<&SampleValue> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    /// Returns a string field's value, if present and of string type.
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(SampleValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns an integer field's value, if present and of integer type.
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(SampleValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(&'static str, SampleValue)> {
        self.fields.iter()
    }
}

/// Destination for weighted trace samples.
///
/// The builder is invoked only if the sink decides to keep a sample for
/// the given weight, so building stays off the fast path for sinks that
/// subsample.
pub trait SampleSink: Send + Sync {
    fn publish(&self, weight: f64, build: &mut dyn FnMut() -> TraceSample);
}

/// Sink that keeps every published sample in memory.
#[derive(Debug, Default)]
pub struct MemorySampleSink {
    samples: Mutex<Vec<(f64, TraceSample)>>,
}

impl MemorySampleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes all captured samples, clearing the sink.
    pub fn take(&self) -> Vec<(f64, TraceSample)> {
        std::mem::take(&mut self.samples.lock())
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Returns the most recently published sample, if any.
    pub fn last(&self) -> Option<(f64, TraceSample)> {
        self.samples.lock().last().cloned()
    }
}

impl SampleSink for MemorySampleSink {
    fn publish(&self, weight: f64, build: &mut dyn FnMut() -> TraceSample) {
        self.samples.lock().push((weight, build()));
    }
}
