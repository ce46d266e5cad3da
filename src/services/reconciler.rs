//! Quality reconciliation
//!
//! Decides whether a parsed candidate is admitted, rejected, or admitted in
//! place of existing files of the same partition. The partition filter is
//! pushed to the catalog query ([`partition_key`]); the dominance rules here
//! run over the already-filtered files and never touch the catalog.
//!
//! Dominance (existing `e` rejects candidate `c`), lower rank is better and
//! equal quality counts:
//! - `c` fullscreen: `e` fullscreen with `e.rank <= c.rank`, or `e`
//!   non-fullscreen and the non-fullscreen counterpart of `c` (any quality).
//! - `c` non-fullscreen: `e` non-fullscreen with `e.rank <= c.rank`.
//!
//! For episodes `e` must additionally cover `c`'s episode range.
//!
//! Supersession (admitted `c` deletes `e`): `c` covers `e`'s range,
//! `e.rank >= c.rank`, a fullscreen `c` never deletes a non-fullscreen file,
//! and a digital `c` never deletes a physical file.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{CreateMediaFile, MediaFileRecord, MediaKind, PartitionKey, TitleKey};
use crate::error::{ImportError, ImportResult};
use crate::services::filename_parser::ParsedIdentity;
use crate::services::path_planner::{plex_title, strip_fullscreen_suffix};
use crate::services::quality::{QualityOrdering, QualityTable, compare_ranks};

/// Inclusive range of episode numbers held by one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EpisodeRange {
    pub first: u32,
    pub last: u32,
}

impl EpisodeRange {
    pub fn new(first: u32, last: u32) -> Self {
        Self {
            first,
            last: last.max(first),
        }
    }

    /// Whether `self` is the same as or a superset of `other`
    pub fn covers(&self, other: &EpisodeRange) -> bool {
        self.first <= other.first && self.last >= other.last
    }

    pub fn overlaps(&self, other: &EpisodeRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

impl From<(u32, u32)> for EpisodeRange {
    fn from((first, last): (u32, u32)) -> Self {
        Self::new(first, last)
    }
}

/// The attributes of a file that take part in dominance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contender {
    pub rank: u32,
    pub physical: bool,
    pub fullscreen: bool,
    pub plex_title: String,
    /// `None` for movies
    pub range: Option<EpisodeRange>,
}

impl Contender {
    fn covers(&self, other: &Contender) -> bool {
        match (&self.range, &other.range) {
            (Some(a), Some(b)) => a.covers(b),
            _ => true,
        }
    }

    /// Whether `self` ranks the same as or better than `other`
    fn at_least_as_good_as(&self, other: &Contender) -> bool {
        compare_ranks(self.rank, other.rank) != QualityOrdering::Worse
    }

    /// `self` is the non-fullscreen cut that fullscreen `other` duplicates
    fn is_counterpart_of(&self, other: &Contender) -> bool {
        if self.fullscreen || !other.fullscreen {
            return false;
        }
        match (&self.range, &other.range) {
            (Some(_), Some(_)) => self.covers(other),
            _ => self.plex_title == strip_fullscreen_suffix(&other.plex_title),
        }
    }
}

/// Whether already-admitted `existing` rejects `candidate`
pub fn dominates(existing: &Contender, candidate: &Contender) -> bool {
    if !existing.covers(candidate) {
        return false;
    }
    match (candidate.fullscreen, existing.fullscreen) {
        (true, true) => existing.at_least_as_good_as(candidate),
        (true, false) => existing.is_counterpart_of(candidate),
        (false, false) => existing.at_least_as_good_as(candidate),
        (false, true) => false,
    }
}

/// Whether an admitted `candidate` removes `existing`
pub fn supersedes(candidate: &Contender, existing: &Contender) -> bool {
    candidate.covers(existing)
        && candidate.at_least_as_good_as(existing)
        && !(candidate.fullscreen && !existing.fullscreen)
        && !(existing.physical && !candidate.physical)
}

/// Why a candidate was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Same-or-better quality already present
    InferiorQuality,
    /// Fullscreen transfer of a cut already present non-fullscreen
    FullScreenCounterpart,
}

impl RejectReason {
    /// Name of the rejects subdirectory
    pub fn label(&self) -> &'static str {
        "inferior quality"
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::InferiorQuality => {
                write!(f, "inferior quality: a same-or-better file is already in the library")
            }
            RejectReason::FullScreenCounterpart => write!(
                f,
                "inferior quality: a non-fullscreen version is already in the library"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: RejectReason,
    /// Files that dominate the candidate, best first
    pub better_files: Vec<MediaFileRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Admit,
    Reject(Rejection),
    /// Admit and delete these files, best first
    AdmitAndReplace(Vec<MediaFileRecord>),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Decision::Reject(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Decision::Admit => "admit",
            Decision::Reject(_) => "reject",
            Decision::AdmitAndReplace(_) => "replace",
        }
    }
}

/// Catalog key of the title an identity names, as parsed
pub fn title_key(identity: &ParsedIdentity) -> TitleKey {
    match identity {
        ParsedIdentity::Movie(movie) => TitleKey::Movie {
            title: movie.title.clone(),
            year: movie.year,
        },
        ParsedIdentity::Episode(episode) => TitleKey::Series {
            title: episode.series_title.clone(),
        },
    }
}

/// Partition of the catalog a candidate competes in
pub fn partition_key(title_id: Uuid, identity: &ParsedIdentity) -> PartitionKey {
    match identity {
        ParsedIdentity::Movie(movie) => PartitionKey::Movie {
            title_id,
            group_key: group_key(identity),
            feature_type: movie.feature_type_name.clone(),
        },
        ParsedIdentity::Episode(episode) => PartitionKey::Episode {
            series_id: title_id,
            season: episode.season,
            first_episode: episode.episode,
            last_episode: episode.last_episode,
            edition: episode.edition.clone(),
        },
    }
}

/// Plex title without the fullscreen suffix
pub fn group_key(identity: &ParsedIdentity) -> String {
    strip_fullscreen_suffix(&plex_title(identity)).to_string()
}

/// Catalog row for an admitted candidate stored at `file_path`
pub fn new_media_file(title_id: Uuid, identity: &ParsedIdentity, file_path: &str) -> CreateMediaFile {
    let title = plex_title(identity);
    let group_key = strip_fullscreen_suffix(&title).to_string();
    match identity {
        ParsedIdentity::Movie(movie) => CreateMediaFile {
            title_id,
            media_kind: MediaKind::Movie,
            season: None,
            episode: None,
            last_episode: None,
            feature_type: movie.feature_type_name.clone(),
            edition: movie.edition.clone(),
            group_key,
            plex_title: title,
            quality_label: movie.quality_label.clone(),
            is_fullscreen: movie.is_fullscreen,
            file_path: file_path.to_string(),
        },
        ParsedIdentity::Episode(episode) => CreateMediaFile {
            title_id,
            media_kind: MediaKind::Episode,
            season: Some(episode.season),
            episode: Some(episode.episode),
            last_episode: Some(episode.last_episode),
            feature_type: None,
            edition: episode.edition.clone(),
            group_key,
            plex_title: title,
            quality_label: episode.quality_label.clone(),
            is_fullscreen: episode.is_fullscreen,
            file_path: file_path.to_string(),
        },
    }
}

/// Dominance evaluation against a quality table
#[derive(Debug, Clone)]
pub struct Reconciler {
    qualities: Arc<QualityTable>,
}

impl Reconciler {
    pub fn new(qualities: Arc<QualityTable>) -> Self {
        Self { qualities }
    }

    fn contender(
        &self,
        label: &str,
        fullscreen: bool,
        plex_title: String,
        range: Option<EpisodeRange>,
    ) -> ImportResult<Contender> {
        let unknown = || ImportError::UnknownQuality(label.to_string());
        Ok(Contender {
            rank: self.qualities.rank(label).ok_or_else(unknown)?,
            physical: self.qualities.is_physical(label).ok_or_else(unknown)?,
            fullscreen,
            plex_title,
            range,
        })
    }

    pub fn candidate(&self, identity: &ParsedIdentity) -> ImportResult<Contender> {
        let range = match identity {
            ParsedIdentity::Movie(_) => None,
            ParsedIdentity::Episode(e) => Some(EpisodeRange::new(e.episode, e.last_episode)),
        };
        self.contender(
            identity.quality_label(),
            identity.is_fullscreen(),
            plex_title(identity),
            range,
        )
    }

    pub fn existing(&self, file: &MediaFileRecord) -> ImportResult<Contender> {
        self.contender(
            &file.quality_label,
            file.is_fullscreen,
            file.plex_title.clone(),
            file.episode_range().map(EpisodeRange::from),
        )
    }

    /// Decide the fate of `candidate` (canonical title applied) against the
    /// files already admitted in its partition
    pub fn evaluate(
        &self,
        candidate: &ParsedIdentity,
        existing: &[MediaFileRecord],
    ) -> ImportResult<Decision> {
        let cand = self.candidate(candidate)?;

        let mut better: Vec<(u32, bool, &MediaFileRecord)> = Vec::new();
        let mut worse: Vec<(u32, &MediaFileRecord)> = Vec::new();
        for file in existing {
            let other = self.existing(file)?;
            if dominates(&other, &cand) {
                better.push((other.rank, other.is_counterpart_of(&cand), file));
            } else if supersedes(&cand, &other) {
                worse.push((other.rank, file));
            }
        }

        let decision = if !better.is_empty() {
            better.sort_by_key(|(rank, _, _)| *rank);
            let reason = if better.iter().any(|(_, counterpart, _)| *counterpart) {
                RejectReason::FullScreenCounterpart
            } else {
                RejectReason::InferiorQuality
            };
            Decision::Reject(Rejection {
                reason,
                better_files: better.into_iter().map(|(_, _, f)| f.clone()).collect(),
            })
        } else if worse.is_empty() {
            Decision::Admit
        } else {
            worse.sort_by_key(|(rank, _)| *rank);
            Decision::AdmitAndReplace(worse.into_iter().map(|(_, f)| f.clone()).collect())
        };

        debug!(
            plex_title = %cand.plex_title,
            quality = candidate.quality_label(),
            fullscreen = cand.fullscreen,
            existing = existing.len(),
            decision = decision.name(),
            "Evaluated candidate"
        );
        if let Decision::Reject(rejection) = &decision {
            info!(
                plex_title = %cand.plex_title,
                reason = %rejection.reason,
                better = rejection.better_files.len(),
                "Candidate dominated"
            );
        }

        Ok(decision)
    }
}
