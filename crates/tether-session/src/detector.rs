use std::fmt;

/// Content hash of a transcript snapshot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint(blake3::Hash);

impl Fingerprint {
    /// Whitespace at either end does not change the fingerprint.
    pub fn of(text: &str) -> Self {
        Self(blake3::hash(text.trim().as_bytes()))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.0.to_hex();
        write!(f, "Fingerprint({})", &hex.as_str()[..12])
    }
}

/// Result of observing one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Still streaming, or nothing new yet.
    Pending,
    /// The reply has stopped changing; carries the trimmed text.
    Complete(String),
}

/// Decides when a streaming reply has finished.
///
/// A reply is complete once its fingerprint has been unchanged across
/// `required` consecutive comparisons. Empty snapshots never count and reset
/// the run. Snapshots equal to the baseline (the reply that was on screen
/// before the prompt was sent) are ignored only until the new reply shows up,
/// either as a different frame or through [`StabilityDetector::mark_new_message`].
#[derive(Debug, Clone)]
pub struct StabilityDetector {
    baseline: Option<Fingerprint>,
    departed: bool,
    last: Option<Fingerprint>,
    stable: u32,
    required: u32,
}

impl StabilityDetector {
    pub fn new(required: u32) -> Self {
        Self {
            baseline: None,
            departed: false,
            last: None,
            stable: 0,
            required: required.max(1),
        }
    }

    /// Ignore snapshots identical to `text`.
    pub fn with_baseline(mut self, text: Option<&str>) -> Self {
        self.baseline = text
            .filter(|t| !t.trim().is_empty())
            .map(Fingerprint::of);
        self
    }

    /// The transport saw a new message appear, so baseline-equal text is the
    /// new reply repeating the previous one.
    pub fn mark_new_message(&mut self) {
        self.departed = true;
    }

    /// Consecutive unchanged comparisons seen so far.
    pub fn stable_count(&self) -> u32 {
        self.stable
    }

    pub fn observe(&mut self, snapshot: Option<&str>) -> Verdict {
        let text = match snapshot.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => {
                self.reset();
                return Verdict::Pending;
            }
        };

        let fp = Fingerprint::of(text);
        if Some(fp) == self.baseline {
            if !self.departed {
                self.reset();
                return Verdict::Pending;
            }
        } else {
            self.departed = true;
        }

        if self.last == Some(fp) {
            self.stable += 1;
        } else {
            self.last = Some(fp);
            self.stable = 0;
        }

        if self.stable >= self.required {
            Verdict::Complete(text.to_string())
        } else {
            Verdict::Pending
        }
    }

    fn reset(&mut self) {
        self.last = None;
        self.stable = 0;
    }
}
