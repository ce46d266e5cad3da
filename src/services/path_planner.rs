//! Library path planning
//!
//! Computes the Plex-style destination for an admitted file:
//! - Movies:   `Movies/{title} ({year})/{title} ({year})[ - {edition}] [{quality}].{ext}`
//! - Features: `Movies/{title} ({year})/{feature type}/{feature name} [{quality}].{ext}`
//! - Episodes: `TV Shows/{series}/Season {NN}/{series} - S{NN}E{NN}[-E{NN}][ - {edition}] [{quality}].{ext}`
//!
//! Every component passes through [`sanitize_path_segment`].

use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use crate::services::filename_parser::{
    FULL_SCREEN, ParsedEpisode, ParsedIdentity, ParsedMovie, TOKEN_SEPARATOR, is_fullscreen_token,
    split_edition,
};
use crate::services::text_utils::sanitize_path_segment;

pub const DEFAULT_MOVIES_DIR: &str = "Movies";
pub const DEFAULT_TV_DIR: &str = "TV Shows";

/// Suffix carried by the plex title of a fullscreen transfer
pub const FULL_SCREEN_SUFFIX: &str = " - Full Screen";

/// Destination relative to the library root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPath {
    pub directory: PathBuf,
    pub filename: String,
}

impl PlannedPath {
    pub fn relative_path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }
}

/// Deterministic destination naming
#[derive(Debug, Clone)]
pub struct PathPlanner {
    movies_dir: String,
    tv_dir: String,
}

impl Default for PathPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_MOVIES_DIR, DEFAULT_TV_DIR)
    }
}

impl PathPlanner {
    pub fn new(movies_dir: &str, tv_dir: &str) -> Self {
        Self {
            movies_dir: movies_dir.to_string(),
            tv_dir: tv_dir.to_string(),
        }
    }

    /// Plan the destination of an identity. Canonical titles should already
    /// be applied (see [`ParsedIdentity::with_canonical`]).
    pub fn plan(&self, identity: &ParsedIdentity) -> PlannedPath {
        let planned = match identity {
            ParsedIdentity::Movie(movie) => self.plan_movie(movie),
            ParsedIdentity::Episode(episode) => self.plan_episode(episode),
        };
        debug!(
            directory = %planned.directory.display(),
            filename = %planned.filename,
            "Planned library path"
        );
        planned
    }

    fn plan_movie(&self, movie: &ParsedMovie) -> PlannedPath {
        let base = movie_folder_name(movie);
        let mut directory = PathBuf::from(&self.movies_dir).join(&base);
        if let Some(feature_type) = &movie.feature_type_name {
            directory.push(sanitize_path_segment(feature_type));
        }

        PlannedPath {
            directory,
            filename: format!(
                "{} [{}].{}",
                movie_display_name(movie),
                movie.quality_label,
                movie.extension
            ),
        }
    }

    fn plan_episode(&self, episode: &ParsedEpisode) -> PlannedPath {
        let season_dir = if episode.season == 0 {
            "Specials".to_string()
        } else {
            format!("Season {:02}", episode.season)
        };

        PlannedPath {
            directory: PathBuf::from(&self.tv_dir)
                .join(sanitize_path_segment(&episode.series_title))
                .join(season_dir),
            filename: format!(
                "{} [{}].{}",
                episode_display_name(episode),
                episode.quality_label,
                episode.extension
            ),
        }
    }
}

fn movie_folder_name(movie: &ParsedMovie) -> String {
    sanitize_path_segment(&format!("{} ({})", movie.title, movie.year))
}

fn with_tokens(base: String, tokens: &[String]) -> String {
    let mut name = base;
    for token in tokens {
        let token = sanitize_path_segment(token);
        if !token.is_empty() {
            name.push_str(TOKEN_SEPARATOR);
            name.push_str(&token);
        }
    }
    name
}

fn movie_display_name(movie: &ParsedMovie) -> String {
    match &movie.feature_name {
        Some(feature_name) => {
            let mut name = sanitize_path_segment(feature_name);
            let already_marked = split_edition(feature_name)
                .iter()
                .any(|t| is_fullscreen_token(t));
            if movie.is_fullscreen && !already_marked {
                name.push_str(TOKEN_SEPARATOR);
                name.push_str(FULL_SCREEN);
            }
            name
        }
        None => with_tokens(movie_folder_name(movie), &movie.tokens),
    }
}

fn episode_display_name(episode: &ParsedEpisode) -> String {
    let mut numbering = format!("S{:02}E{:02}", episode.season, episode.episode);
    if episode.last_episode != episode.episode {
        numbering.push_str(&format!("-E{:02}", episode.last_episode));
    }
    let base = format!(
        "{}{}{}",
        sanitize_path_segment(&episode.series_title),
        TOKEN_SEPARATOR,
        numbering
    );
    with_tokens(base, &episode.tokens)
}

/// Display name of the file without quality or extension ("plex title")
pub fn plex_title(identity: &ParsedIdentity) -> String {
    match identity {
        ParsedIdentity::Movie(movie) => movie_display_name(movie),
        ParsedIdentity::Episode(episode) => episode_display_name(episode),
    }
}

/// Plex title with any trailing fullscreen marker removed
pub fn strip_fullscreen_suffix(title: &str) -> &str {
    title.strip_suffix(FULL_SCREEN_SUFFIX).unwrap_or(title)
}
