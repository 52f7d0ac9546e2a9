//! Publish plan aggregate and the dispatch timing rules.

use std::{path::PathBuf, time::Duration};

use chrono::DateTime;
use chrono_tz::Tz;

use crate::{
    domain::{ChatId, Destination, UserId},
    errors::Error,
    publisher::PublishJob,
    Result,
};

/// Every `STAGGER_EVERY`-th item (after the first) is pushed `STAGGER_STEP` later
/// than the previous trigger.
pub const STAGGER_EVERY: usize = 3;
pub const STAGGER_STEP: Duration = Duration::from_secs(20);

/// The "published" confirmation goes out this long before the last trigger.
pub const COMPLETION_LEAD: Duration = Duration::from_secs(30 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanProgress {
    Remaining(u32),
    Complete,
}

/// Media collected for one destination and publish time.
///
/// Invariant: `media.len() <= requested`.
#[derive(Clone, Debug)]
pub struct PublishPlan {
    destination: Destination,
    requested: u32,
    publish_time: DateTime<Tz>,
    media: Vec<PathBuf>,
}

impl PublishPlan {
    pub fn new(destination: Destination, requested: u32, publish_time: DateTime<Tz>) -> Result<Self> {
        if requested == 0 {
            return Err(Error::InvalidInput(
                "a plan needs at least one video".to_string(),
            ));
        }
        Ok(Self {
            destination,
            requested,
            publish_time,
            media: Vec::new(),
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn requested(&self) -> u32 {
        self.requested
    }

    pub fn publish_time(&self) -> DateTime<Tz> {
        self.publish_time
    }

    pub fn media(&self) -> &[PathBuf] {
        &self.media
    }

    pub fn remaining(&self) -> u32 {
        self.requested - self.media.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Append one acquired clip. A complete plan accepts nothing more.
    pub fn push(&mut self, path: PathBuf) -> Result<PlanProgress> {
        if self.is_complete() {
            return Err(Error::InvalidInput(
                "all requested videos were already received".to_string(),
            ));
        }
        self.media.push(path);
        Ok(match self.remaining() {
            0 => PlanProgress::Complete,
            n => PlanProgress::Remaining(n),
        })
    }

    /// Split a complete plan into one job per clip, staggered.
    pub fn into_jobs(self, operator: UserId, chat_id: ChatId) -> Result<Vec<PublishJob>> {
        if !self.is_complete() {
            return Err(Error::InvalidInput(format!(
                "plan still waits for {} videos",
                self.remaining()
            )));
        }
        let triggers = staggered_triggers(self.publish_time, self.media.len());
        Ok(self
            .media
            .into_iter()
            .zip(triggers)
            .map(|(media_path, trigger)| PublishJob {
                trigger,
                group_id: self.destination.group_id,
                description: self.destination.description.clone(),
                operator,
                chat_id,
                media_path,
            })
            .collect())
    }
}

/// Trigger time per item; the offset accumulates at indices 3, 6, 9, ...
pub fn staggered_triggers(base: DateTime<Tz>, count: usize) -> Vec<DateTime<Tz>> {
    let step = chrono::Duration::from_std(STAGGER_STEP).unwrap_or_else(|_| chrono::Duration::zero());
    let mut current = base;
    (0..count)
        .map(|i| {
            if i > 0 && i % STAGGER_EVERY == 0 {
                current += step;
            }
            current
        })
        .collect()
}

/// How long the session waits before confirming publication; never negative.
pub fn completion_wait(last_trigger: DateTime<Tz>, now: DateTime<Tz>, lead: Duration) -> Duration {
    (last_trigger - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .saturating_sub(lead)
}
