/// Outcome of feeding one reading to a [`MagnitudeGuard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    /// First reading; always taken as the baseline
    Baseline(i64),
    /// Same as the baseline
    Unchanged(i64),
    /// Plausible change; `current` is the new baseline
    Accepted { previous: i64, current: i64 },
    /// Jump larger than the threshold; the baseline stays at `baseline`
    Rejected { baseline: i64, reading: i64 },
    /// Jump that the following reading agreed with; `current` is the new baseline
    Confirmed { previous: i64, current: i64 },
}

/// Discards implausible jumps in a slowly-moving reading
///
/// Echoed or duplicated hardware signals show up as large jumps that no user
/// gesture produces. Those are dropped without moving the baseline.
///
/// A guard built with [`MagnitudeGuard::confirming_repeats`] also remembers
/// the last rejected reading. When the next reading lands within the
/// threshold of it, the jump was real (a fast drag between two polls) and
/// is reported as [`Reading::Confirmed`].
#[derive(Debug, Clone)]
pub struct MagnitudeGuard {
    threshold: u64,
    baseline: Option<i64>,
    confirm_repeats: bool,
    pending: Option<i64>,
}

impl MagnitudeGuard {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            baseline: None,
            confirm_repeats: false,
            pending: None,
        }
    }

    pub fn confirming_repeats(threshold: u64) -> Self {
        Self {
            confirm_repeats: true,
            ..Self::new(threshold)
        }
    }

    pub fn check(&mut self, reading: i64) -> Reading {
        let Some(baseline) = self.baseline else {
            self.baseline = Some(reading);
            return Reading::Baseline(reading);
        };

        let pending = self.pending.take();

        if reading == baseline {
            return Reading::Unchanged(reading);
        }

        if reading.abs_diff(baseline) > self.threshold {
            if let Some(pending) = pending {
                if reading.abs_diff(pending) <= self.threshold {
                    self.baseline = Some(reading);
                    return Reading::Confirmed {
                        previous: baseline,
                        current: reading,
                    };
                }
            }
            if self.confirm_repeats {
                self.pending = Some(reading);
            }
            return Reading::Rejected { baseline, reading };
        }

        self.baseline = Some(reading);
        Reading::Accepted {
            previous: baseline,
            current: reading,
        }
    }

    pub fn baseline(&self) -> Option<i64> {
        self.baseline
    }
}
