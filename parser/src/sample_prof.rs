//! Sample profile data model
//!
//! These are the values profile readers produce and the tracker stores:
//! locations inside a function body, function identities, per-location
//! sample records, whole-function profiles and calling contexts.

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use source_map::SourceSpan;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A location inside a function body: line offset from the function's first
/// line plus a discriminator that separates several calls on one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LineLocation {
    pub line_offset: u32,
    pub discriminator: u32,
}

impl LineLocation {
    pub const fn new(line_offset: u32, discriminator: u32) -> Self {
        Self {
            line_offset,
            discriminator,
        }
    }

    /// The location used for frames that are not call sites (top-level
    /// contexts and leaf frames).
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    pub fn is_zero(&self) -> bool {
        self.line_offset == 0 && self.discriminator == 0
    }
}

impl fmt::Display for LineLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.discriminator == 0 {
            write!(f, "{}", self.line_offset)
        } else {
            write!(f, "{}.{}", self.line_offset, self.discriminator)
        }
    }
}

impl FromStr for LineLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (line, disc) = match s.split_once('.') {
            Some((line, disc)) => (line, Some(disc)),
            None => (s, None),
        };
        let line_offset = line
            .parse::<u32>()
            .map_err(|e| format!("invalid line offset '{}': {}", line, e))?;
        let discriminator = match disc {
            Some(disc) => disc
                .parse::<u32>()
                .map_err(|e| format!("invalid discriminator '{}': {}", disc, e))?,
            None => 0,
        };
        Ok(Self::new(line_offset, discriminator))
    }
}

impl Serialize for LineLocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LineLocation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// Function identity: a (mangled) name, or a numeric hash when the profile
/// was written in compact mode.
///
/// Textual identities made only of decimal digits are hashes; no real symbol
/// name has that shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionId {
    Name(String),
    Hash(u64),
}

impl FunctionId {
    pub fn new(text: &str) -> Self {
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(hash) = text.parse::<u64>() {
                return FunctionId::Hash(hash);
            }
        }
        FunctionId::Name(text.to_string())
    }

    /// The empty identity belongs only to the synthetic trie root.
    pub fn is_empty(&self) -> bool {
        matches!(self, FunctionId::Name(name) if name.is_empty())
    }

    pub fn as_hash(&self) -> Option<u64> {
        match self {
            FunctionId::Hash(hash) => Some(*hash),
            FunctionId::Name(_) => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            FunctionId::Name(name) => Some(name),
            FunctionId::Hash(_) => None,
        }
    }
}

impl Default for FunctionId {
    fn default() -> Self {
        FunctionId::Name(String::new())
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionId::Name(name) => f.write_str(name),
            FunctionId::Hash(hash) => write!(f, "{}", hash),
        }
    }
}

impl From<&str> for FunctionId {
    fn from(text: &str) -> Self {
        FunctionId::new(text)
    }
}

impl From<String> for FunctionId {
    fn from(text: String) -> Self {
        FunctionId::new(&text)
    }
}

impl From<u64> for FunctionId {
    fn from(hash: u64) -> Self {
        FunctionId::Hash(hash)
    }
}

impl Serialize for FunctionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FunctionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(FunctionId::new(&text))
    }
}

/// Samples collected at one body location, with the targets observed for a
/// call at that location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    #[serde(default)]
    pub samples: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub call_targets: BTreeMap<FunctionId, u64>,
}

impl SampleRecord {
    pub fn add_samples(&mut self, count: u64) {
        self.samples = self.samples.saturating_add(count);
    }

    pub fn add_called_target(&mut self, target: FunctionId, count: u64) {
        let entry = self.call_targets.entry(target).or_insert(0);
        *entry = entry.saturating_add(count);
    }

    pub fn merge(&mut self, other: &SampleRecord) {
        self.add_samples(other.samples);
        for (target, count) in &other.call_targets {
            self.add_called_target(target.clone(), *count);
        }
    }
}

/// Profile of one function body under one context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSamples {
    #[serde(default)]
    pub name: FunctionId,
    #[serde(default)]
    pub total_samples: u64,
    #[serde(default)]
    pub head_samples: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub body_samples: BTreeMap<LineLocation, SampleRecord>,
    /// Profiles of callees inlined at a call site, keyed by call site then callee
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub callsite_samples: BTreeMap<LineLocation, BTreeMap<FunctionId, FunctionSamples>>,
}

impl FunctionSamples {
    pub fn new(name: impl Into<FunctionId>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_total_samples(&mut self, count: u64) {
        self.total_samples = self.total_samples.saturating_add(count);
    }

    pub fn add_head_samples(&mut self, count: u64) {
        self.head_samples = self.head_samples.saturating_add(count);
    }

    pub fn add_body_samples(&mut self, location: LineLocation, count: u64) {
        self.body_samples
            .entry(location)
            .or_default()
            .add_samples(count);
    }

    pub fn add_called_target_samples(&mut self, location: LineLocation, target: FunctionId, count: u64) {
        self.body_samples
            .entry(location)
            .or_default()
            .add_called_target(target, count);
    }

    /// Nested inlinee profile at a call site
    pub fn callsite_profile(&self, location: LineLocation, callee: &FunctionId) -> Option<&FunctionSamples> {
        self.callsite_samples.get(&location)?.get(callee)
    }

    /// Nested inlinee profile at a call site, created empty if missing
    pub fn callsite_profile_mut(&mut self, location: LineLocation, callee: FunctionId) -> &mut FunctionSamples {
        self.callsite_samples
            .entry(location)
            .or_default()
            .entry(callee.clone())
            .or_insert_with(|| FunctionSamples::new(callee))
    }

    /// Sum another profile of the same function into this one.
    pub fn merge(&mut self, other: &FunctionSamples) {
        if self.name.is_empty() {
            self.name = other.name.clone();
        }
        self.add_total_samples(other.total_samples);
        self.add_head_samples(other.head_samples);
        for (location, record) in &other.body_samples {
            self.body_samples.entry(*location).or_default().merge(record);
        }
        for (location, callees) in &other.callsite_samples {
            for (callee, profile) in callees {
                self.callsite_profile_mut(*location, callee.clone()).merge(profile);
            }
        }
    }

    /// Fold an inlined callee's profile into this one: the callee's samples
    /// now count towards this body and are kept nested under the call site.
    pub fn inline_callee(&mut self, call_site: LineLocation, callee: &FunctionSamples) {
        self.add_total_samples(callee.total_samples);
        self.callsite_profile_mut(call_site, callee.name.clone())
            .merge(callee);
    }

    pub fn is_empty(&self) -> bool {
        self.total_samples == 0 && self.body_samples.is_empty() && self.callsite_samples.is_empty()
    }
}

/// One frame of a calling context. `location` is the call site inside `func`
/// that leads to the next frame; the leaf frame has a zero location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ContextFrame {
    pub func: FunctionId,
    pub location: LineLocation,
}

impl ContextFrame {
    pub fn new(func: impl Into<FunctionId>, location: LineLocation) -> Self {
        Self {
            func: func.into(),
            location,
        }
    }
}

/// A calling context, outermost caller first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SampleContext {
    frames: Vec<ContextFrame>,
}

impl SampleContext {
    pub fn new(frames: Vec<ContextFrame>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[ContextFrame] {
        &self.frames
    }

    /// Function the context's profile belongs to
    pub fn leaf(&self) -> Option<&FunctionId> {
        self.frames.last().map(|frame| &frame.func)
    }

    pub fn is_base(&self) -> bool {
        self.frames.len() == 1
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for SampleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.frames.len().saturating_sub(1);
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                f.write_str(" @ ")?;
            }
            if i == last {
                write!(f, "{}", frame.func)?;
            } else {
                write!(f, "{}:{}", frame.func, frame.location)?;
            }
        }
        Ok(())
    }
}

impl FromStr for SampleContext {
    type Err = crate::ProfileParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::context_parser::parse_sample_context(s)
    }
}

/// Context profiles keyed by parsed context, in input order
pub type SampleProfileMap = IndexMap<SampleContext, FunctionSamples>;

/// Profiles of functions with all context folded away, in first-seen order
pub type ContextLessProfileMap = IndexMap<FunctionId, FunctionSamples>;

/// A profile record as read, before its context string is parsed
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub samples: FunctionSamples,
    pub span: SourceSpan,
}

impl RawRecord {
    pub fn new(samples: FunctionSamples, span: SourceSpan) -> Self {
        Self { samples, span }
    }

    /// Record with no backing file
    pub fn detached(samples: FunctionSamples) -> Self {
        Self::new(samples, SourceSpan::detached())
    }
}

/// Raw records keyed by serialized context string, in input order
pub type RawProfileMap = IndexMap<String, RawRecord>;
