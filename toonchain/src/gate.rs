//! Decides whether an episode's pages may be shown to a wallet.

use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::config::InvalidSetting;
use crate::model::{Episode, EpisodeNumber, SeriesId};
use crate::session::Session;

/// Answer given when the chain cannot tell whether a wallet unlocked an episode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnlockCheckPolicy {
    /// Treat the episode as unlocked.
    #[default]
    FailOpen,
    /// Treat the episode as locked.
    FailClosed,
}

impl UnlockCheckPolicy {
    pub fn fallback(&self) -> bool {
        matches!(self, UnlockCheckPolicy::FailOpen)
    }
}

impl FromStr for UnlockCheckPolicy {
    type Err = InvalidSetting;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.trim_start_matches("fail-") {
            "open" => Ok(UnlockCheckPolicy::FailOpen),
            "closed" => Ok(UnlockCheckPolicy::FailClosed),
            _ => Err(InvalidSetting(value.to_string())),
        }
    }
}

impl fmt::Display for UnlockCheckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockCheckPolicy::FailOpen => write!(f, "fail-open"),
            UnlockCheckPolicy::FailClosed => write!(f, "fail-closed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Locked,
    UnlockedFree,
    UnlockedPaid,
}

impl Access {
    pub fn is_unlocked(&self) -> bool {
        !matches!(self, Access::Locked)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Locked => write!(f, "locked"),
            Access::UnlockedFree => write!(f, "unlocked-free"),
            Access::UnlockedPaid => write!(f, "unlocked-paid"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    NotFound,
    Resolved { episode: Episode, access: Access },
}

impl GateDecision {
    pub fn access(&self) -> Option<Access> {
        match self {
            GateDecision::NotFound => None,
            GateDecision::Resolved { access, .. } => Some(*access),
        }
    }
}

pub struct AccessGate<'s> {
    session: &'s Session,
}

impl<'s> AccessGate<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Access for `wallet` given only what the episode record says.
    pub async fn access_for(&self, episode: &Episode, wallet: Option<&str>) -> Access {
        if episode.is_free() {
            return Access::UnlockedFree;
        }
        let Some(wallet) = wallet else {
            return Access::Locked;
        };
        let contracts = self.session.contracts();
        if contracts.check_episode_unlocked(episode.series_id, episode.episode_number, wallet).await {
            Access::UnlockedPaid
        } else {
            Access::Locked
        }
    }

    pub async fn resolve(&self, series_id: SeriesId, episode_number: EpisodeNumber, wallet: Option<&str>) -> GateDecision {
        let Some(episode) = self.session.contracts().get_episode(series_id, episode_number).await else {
            debug!("episode {series_id}/{episode_number} not found");
            return GateDecision::NotFound;
        };
        let access = self.access_for(&episode, wallet).await;
        debug!("episode {series_id}/{episode_number} is {access} for {}", wallet.unwrap_or("anonymous reader"));
        GateDecision::Resolved { episode, access }
    }
}
