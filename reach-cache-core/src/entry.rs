//! Cache entry metadata and the pure scoring functions derived from it.
//!
//! Priority and freshness are computed on demand from entry fields; neither
//! is ever stored as authoritative state.

use serde::{Deserialize, Serialize};

/// Content reach levels - determines who can access content
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReachLevel {
    Private = 0,
    Invited = 1,
    Local = 2,
    Neighborhood = 3,
    Municipal = 4,
    Bioregional = 5,
    Regional = 6,
    Commons = 7,
}

impl ReachLevel {
    /// Number of reach levels (and therefore isolated eviction pools)
    pub const COUNT: usize = 8;

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Private),
            1 => Some(Self::Invited),
            2 => Some(Self::Local),
            3 => Some(Self::Neighborhood),
            4 => Some(Self::Municipal),
            5 => Some(Self::Bioregional),
            6 => Some(Self::Regional),
            7 => Some(Self::Commons),
            _ => None,
        }
    }
}

/// Mastery levels with associated freshness decay rates
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MasteryLevel {
    NotStarted = 0,
    Seen = 1,
    Remember = 2,
    Understand = 3,
    Apply = 4,
    Analyze = 5,
    Evaluate = 6,
    Create = 7,
}

impl MasteryLevel {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NotStarted),
            1 => Some(Self::Seen),
            2 => Some(Self::Remember),
            3 => Some(Self::Understand),
            4 => Some(Self::Apply),
            5 => Some(Self::Analyze),
            6 => Some(Self::Evaluate),
            7 => Some(Self::Create),
            _ => None,
        }
    }

    /// Freshness decay rate per day for this mastery level.
    ///
    /// NotStarted is exempt (no decay). Passive engagement decays fastest,
    /// creating maintains mastery and decays slowest.
    pub fn decay_rate_per_day(&self) -> f64 {
        match self {
            MasteryLevel::NotStarted => 0.0,
            MasteryLevel::Seen => 0.05,
            MasteryLevel::Remember => 0.03,
            MasteryLevel::Understand => 0.02,
            MasteryLevel::Apply => 0.015,
            MasteryLevel::Analyze => 0.01,
            MasteryLevel::Evaluate => 0.008,
            MasteryLevel::Create => 0.005,
        }
    }

    /// Calculate freshness (0.0-1.0) after `age_seconds` since last access.
    ///
    /// freshness = max(0, 1.0 - decay_rate * age_seconds / 86400)
    pub fn calculate_freshness(&self, age_seconds: f64) -> f64 {
        let decay = self.decay_rate_per_day() * age_seconds / 86_400.0;
        (1.0 - decay).max(0.0)
    }

    pub fn freshness_status(&self, age_seconds: f64) -> FreshnessStatus {
        FreshnessStatus::from_freshness(self.calculate_freshness(age_seconds))
    }
}

/// Freshness bands derived from the decay curve
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FreshnessStatus {
    Fresh,
    Stale,
    Critical,
}

impl FreshnessStatus {
    pub fn from_freshness(freshness: f64) -> Self {
        if freshness >= 0.7 {
            Self::Fresh
        } else if freshness >= 0.4 {
            Self::Stale
        } else {
            Self::Critical
        }
    }
}

/// Custodian bandwidth class
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BandwidthClass {
    Low = 1,
    Medium = 2,
    High = 3,
    Ultra = 4,
}

impl BandwidthClass {
    pub fn score_bonus(&self) -> i32 {
        match self {
            BandwidthClass::Low => -5,
            BandwidthClass::Medium => 5,
            BandwidthClass::High => 10,
            BandwidthClass::Ultra => 20,
        }
    }
}

/// Steward tier for content curation
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum StewardTier {
    Caretaker = 1,
    Curator = 2,
    Expert = 3,
    Pioneer = 4,
}

impl StewardTier {
    pub fn score_bonus(&self) -> i32 {
        match self {
            StewardTier::Caretaker => 5,
            StewardTier::Curator => 15,
            StewardTier::Expert => 30,
            StewardTier::Pioneer => 50,
        }
    }
}

/// Custodian replica health
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum CustodianHealth {
    Healthy = 0,
    Degraded = 1,
    Critical = 2,
}

/// Cache entry metadata with reach-aware and custodian support
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub size_bytes: u64,
    /// Creation time, ms since epoch
    pub created_at: u64,
    /// Last access time, ms since epoch
    pub last_accessed_at: u64,
    pub access_count: u32,

    /// ReachLevel as u8 (0-7)
    pub reach_level: u8,
    pub domain: String,
    pub epic: String,
    /// Agent ID of custodian, if one holds this content
    pub custodian_id: Option<String>,
    /// StewardTier as u8 (1-4)
    pub steward_tier: u8,
    /// MasteryLevel as u8 (0-7)
    pub mastery_level: u8,

    /// -100 to +100
    pub custodian_proximity_score: i32,
    /// BandwidthClass as u8 (1-4)
    pub bandwidth_class: u8,
    /// CustodianHealth as u8 (0-2)
    pub custodian_health: u8,
    /// Penalty for aged content
    pub content_age_penalty: i32,
    /// 0.0-1.0 affinity relevance
    pub affinity_match: f64,
}

impl CacheEntry {
    /// Total priority score for this entry.
    ///
    /// score = reach*12 + proximity + bandwidth_bonus + steward_bonus
    ///       + round(affinity*10) - content_age_penalty, clamped to [0,200].
    ///
    /// Deterministic and side-effect free; eviction candidates are ranked
    /// by this value.
    pub fn priority(&self) -> i32 {
        let mut score: i32 = 0;

        // Base reach level (commons = 84, private = 0)
        score += (self.reach_level.min(7) as i32) * 12;

        score += self.custodian_proximity_score;

        let bandwidth = match self.bandwidth_class {
            4 => 20,
            3 => 10,
            2 => 5,
            1 => -5,
            _ => 0,
        };
        score += bandwidth;

        let steward = match self.steward_tier {
            1 => 5,
            2 => 15,
            3 => 30,
            4 => 50,
            _ => 0,
        };
        score += steward;

        score += (self.affinity_match * 10.0).round() as i32;

        score -= self.content_age_penalty;

        score.clamp(0, 200)
    }

    /// Freshness (0.0-1.0) at `now_ms`, driven by mastery-specific decay.
    pub fn freshness(&self, now_ms: u64) -> f64 {
        let age_seconds = now_ms.saturating_sub(self.last_accessed_at) as f64 / 1000.0;
        MasteryLevel::from_u8(self.mastery_level)
            .unwrap_or(MasteryLevel::NotStarted)
            .calculate_freshness(age_seconds)
    }

    /// Freshness band at `now_ms`.
    pub fn freshness_status(&self, now_ms: u64) -> FreshnessStatus {
        FreshnessStatus::from_freshness(self.freshness(now_ms))
    }
}
